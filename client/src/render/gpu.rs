//! GPU backend against an abstract device.
//!
//! The engine does not bind a concrete 3D API; the host supplies a
//! [`GpuDevice`] that owns buffers, textures and draw submission. This module
//! does the engine's half of the work: static geometry uploads on map change
//! (fixed-point wall vertices with lightmap-atlas UVs, floor/ceiling cells,
//! model frames packed into a buffer texture), per-frame dynamic-wall vertex
//! updates, and draw submission in a fixed order.

use chasm_core::map::{MapDataPtr, WALL_LIGHTMAP_WIDTH};
use chasm_core::messages;
use chasm_core::resources::GameResourcesPtr;
use chasm_core::time::Time;

use crate::map_state::MapState;
use crate::minimap_state::MinimapState;
use crate::weapon_state::WeaponState;

use super::Camera;

pub type BufferId = u32;
pub type TextureId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    /// One vertex per `(vertex_id, frame_id)`; sampled by vertex shaders.
    BufferTexture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    OpaqueWalls,
    FloorsAndCeilings,
    OpaqueModels,
    Sky,
    Shadows,
    TransparentModels,
    SpriteEffects,
    FullscreenBlend,
    HudQuad,
    MinimapLines,
    WeaponModel,
}

#[derive(Debug, Clone)]
pub struct DrawCall {
    pub kind: DrawKind,
    pub vertex_buffer: Option<BufferId>,
    pub texture: Option<TextureId>,
    pub first: u32,
    pub count: u32,
}

/// Everything the engine needs from a 3D API. Object lifetimes follow the
/// device: dropping it releases every buffer and texture it handed out.
pub trait GpuDevice {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferId;
    fn update_buffer(&mut self, buffer: BufferId, byte_offset: usize, data: &[u8]);
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> TextureId;
    fn draw(&mut self, call: DrawCall);
}

/// Wall vertex as uploaded: positions in 8.8 fixed point, a normal sign pair
/// and the lightmap-atlas UV. Explicit padding keeps the layout `Pod`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WallVertex {
    pub xyz: [i16; 3],
    pub normal_sign: [i8; 2],
    pub texture_id: u8,
    pub tex_u: u8,
    pub _padding: [u8; 2],
    pub lightmap_uv: [f32; 2],
}

impl WallVertex {
    fn bytes(slice: &[WallVertex]) -> &[u8] {
        bytemuck::cast_slice(slice)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FloorVertex {
    pub cell_xy: [u8; 2],
    pub corner: [u8; 2],
    pub texture_id: u8,
    pub is_ceiling: u8,
}

impl FloorVertex {
    fn bytes(slice: &[FloorVertex]) -> &[u8] {
        bytemuck::cast_slice(slice)
    }
}

pub struct GlRenderer {
    device: Box<dyn GpuDevice>,
    resources: GameResourcesPtr,
    map_data: Option<MapDataPtr>,

    walls_buffer: Option<BufferId>,
    dynamic_walls_first_vertex: u32,
    floors_buffer: Option<BufferId>,
    models_frame_buffer: Option<BufferId>,
    lightmap_texture: Option<TextureId>,

    dynamic_wall_vertices: Vec<WallVertex>,
}

fn wall_quad(
    v0: glam::Vec2,
    v1: glam::Vec2,
    z: f32,
    texture_id: u8,
    tex_coords: [u8; 2],
    lightmap_uv: [[f32; 2]; 2],
) -> [WallVertex; 4] {
    let dir = v1 - v0;
    let normal_sign = [
        if dir.y >= 0.0 { 1i8 } else { -1 },
        if dir.x >= 0.0 { -1i8 } else { 1 },
    ];
    let coord = |p: glam::Vec2, h: f32| -> [i16; 3] {
        [
            messages::coord_to_message_coord(p.x),
            messages::coord_to_message_coord(p.y),
            messages::coord_to_message_coord(z + h),
        ]
    };
    let vertex = |p: glam::Vec2, h: f32, uv: [f32; 2], tex_u: u8| WallVertex {
        xyz: coord(p, h),
        normal_sign,
        texture_id,
        tex_u,
        _padding: [0; 2],
        lightmap_uv: uv,
    };
    [
        vertex(v0, 0.0, lightmap_uv[0], tex_coords[0]),
        vertex(v1, 0.0, lightmap_uv[1], tex_coords[1]),
        vertex(v1, 1.0, lightmap_uv[1], tex_coords[1]),
        vertex(v0, 1.0, lightmap_uv[0], tex_coords[0]),
    ]
}

impl GlRenderer {
    pub fn new(device: Box<dyn GpuDevice>, resources: GameResourcesPtr) -> GlRenderer {
        GlRenderer {
            device,
            resources,
            map_data: None,
            walls_buffer: None,
            dynamic_walls_first_vertex: 0,
            floors_buffer: None,
            models_frame_buffer: None,
            lightmap_texture: None,
            dynamic_wall_vertices: Vec::new(),
        }
    }

    /// Upload all static geometry once per map.
    pub fn set_map(&mut self, map_data: MapDataPtr) {
        // Static walls, then the dynamic walls' initial poses in the same
        // buffer; only the dynamic tail is rewritten per frame.
        let mut wall_vertices = Vec::with_capacity(
            4 * (map_data.static_walls.len() + map_data.dynamic_walls.len()),
        );
        for (index, wall) in map_data.static_walls.iter().enumerate() {
            let row = map_data.lightmaps.static_wall_row(index);
            wall_vertices.extend_from_slice(&wall_quad(
                wall.vert_pos[0],
                wall.vert_pos[1],
                0.0,
                wall.texture_id,
                wall.vert_tex_coord,
                map_data.lightmaps.wall_uv(row),
            ));
        }
        self.dynamic_walls_first_vertex = wall_vertices.len() as u32;
        self.dynamic_wall_vertices.clear();
        for (index, wall) in map_data.dynamic_walls.iter().enumerate() {
            let row = map_data.lightmaps.dynamic_wall_row(index);
            self.dynamic_wall_vertices.extend_from_slice(&wall_quad(
                wall.vert_pos[0],
                wall.vert_pos[1],
                0.0,
                wall.texture_id,
                wall.vert_tex_coord,
                map_data.lightmaps.wall_uv(row),
            ));
        }
        wall_vertices.extend_from_slice(&self.dynamic_wall_vertices);
        self.walls_buffer = Some(
            self.device
                .create_buffer(BufferKind::Vertex, WallVertex::bytes(&wall_vertices)),
        );

        // Floor and ceiling cells, indexed by (cell, texture).
        let mut floor_vertices = Vec::new();
        for y in 0..chasm_core::map::MAP_SIZE as u8 {
            for x in 0..chasm_core::map::MAP_SIZE as u8 {
                for (is_ceiling, texture_id) in [
                    (0u8, map_data.floor_texture(x as i32, y as i32)),
                    (1u8, map_data.ceiling_texture(x as i32, y as i32)),
                ] {
                    if texture_id == chasm_core::map::EMPTY_FLOOR_TEXTURE_ID {
                        continue;
                    }
                    for corner in [[0u8, 0u8], [1, 0], [1, 1], [0, 1]] {
                        floor_vertices.push(FloorVertex {
                            cell_xy: [x, y],
                            corner,
                            texture_id,
                            is_ceiling,
                        });
                    }
                }
            }
        }
        self.floors_buffer = Some(
            self.device
                .create_buffer(BufferKind::Vertex, FloorVertex::bytes(&floor_vertices)),
        );

        // Model animation frames as a buffer texture: one vertex per
        // (vertex_id, frame_id).
        let mut frame_data: Vec<u8> = Vec::new();
        for model in &self.resources.items_models {
            for v in &model.frame_vertices {
                for c in v {
                    frame_data.extend_from_slice(&c.to_le_bytes());
                }
                frame_data.extend_from_slice(&[0, 0]); // pad to 8 bytes
            }
        }
        self.models_frame_buffer = Some(
            self.device
                .create_buffer(BufferKind::BufferTexture, &frame_data),
        );

        // Single-channel lightmap atlas, expanded to RGBA for upload.
        let atlas = &map_data.lightmaps.walls_atlas;
        let mut rgba = Vec::with_capacity(atlas.len() * 4);
        for &texel in atlas {
            rgba.extend_from_slice(&[texel, texel, texel, 255]);
        }
        self.lightmap_texture = Some(self.device.create_texture(
            WALL_LIGHTMAP_WIDTH as u32,
            (atlas.len() / WALL_LIGHTMAP_WIDTH) as u32,
            &rgba,
        ));

        self.map_data = Some(map_data);
    }

    /// Submit one frame in the fixed order: opaque walls, floors/ceilings,
    /// opaque models, sky, shadows, transparent models, sprite effects.
    pub fn draw(&mut self, map_state: &MapState, _camera: &Camera, _now: Time) {
        let Some(map_data) = self.map_data.as_ref() else {
            return;
        };
        let Some(walls_buffer) = self.walls_buffer else {
            return;
        };

        // Dynamic walls move; rewrite their vertex tail only.
        for (index, wall) in map_state.dynamic_walls.iter() {
            let Some(map_wall) = map_data.dynamic_walls.get(*index as usize) else {
                continue;
            };
            let row = map_data.lightmaps.dynamic_wall_row(*index as usize);
            let quad = wall_quad(
                wall.vertices[0],
                wall.vertices[1],
                wall.z,
                wall.texture_id,
                map_wall.vert_tex_coord,
                map_data.lightmaps.wall_uv(row),
            );
            let first = *index as usize * 4;
            if first + 4 <= self.dynamic_wall_vertices.len() {
                self.dynamic_wall_vertices[first..first + 4].copy_from_slice(&quad);
                let byte_offset = (self.dynamic_walls_first_vertex as usize + first)
                    * std::mem::size_of::<WallVertex>();
                self.device
                    .update_buffer(walls_buffer, byte_offset, WallVertex::bytes(&quad));
            }
        }

        let static_wall_vertices = self.dynamic_walls_first_vertex;
        let total_wall_vertices =
            static_wall_vertices + self.dynamic_wall_vertices.len() as u32;
        self.device.draw(DrawCall {
            kind: DrawKind::OpaqueWalls,
            vertex_buffer: Some(walls_buffer),
            texture: self.lightmap_texture,
            first: 0,
            count: total_wall_vertices,
        });

        self.device.draw(DrawCall {
            kind: DrawKind::FloorsAndCeilings,
            vertex_buffer: self.floors_buffer,
            texture: self.lightmap_texture,
            first: 0,
            count: 0,
        });

        // Opaque models: statics, items, dynamic items, monsters, rockets.
        let opaque_count = (map_data.static_models.len()
            + map_state.dynamic_items.len()
            + map_state.monsters.len()
            + map_state.rockets.len()) as u32;
        self.device.draw(DrawCall {
            kind: DrawKind::OpaqueModels,
            vertex_buffer: self.models_frame_buffer,
            texture: None,
            first: 0,
            count: opaque_count,
        });

        self.device.draw(DrawCall {
            kind: DrawKind::Sky,
            vertex_buffer: None,
            texture: None,
            first: 0,
            count: 1,
        });
        self.device.draw(DrawCall {
            kind: DrawKind::Shadows,
            vertex_buffer: self.models_frame_buffer,
            texture: None,
            first: 0,
            count: opaque_count,
        });
        self.device.draw(DrawCall {
            kind: DrawKind::TransparentModels,
            vertex_buffer: self.models_frame_buffer,
            texture: None,
            first: 0,
            count: 0,
        });
        self.device.draw(DrawCall {
            kind: DrawKind::SpriteEffects,
            vertex_buffer: None,
            texture: None,
            first: 0,
            count: map_state.sprite_effects.len() as u32,
        });
    }

    pub fn draw_weapon(&mut self, weapon_state: &WeaponState) {
        self.device.draw(DrawCall {
            kind: DrawKind::WeaponModel,
            vertex_buffer: self.models_frame_buffer,
            texture: None,
            first: weapon_state.current_animation_frame(),
            count: 1,
        });
    }

    pub fn draw_hud(&mut self, _map_state: &MapState, _weapon_state: &WeaponState) {
        self.device.draw(DrawCall {
            kind: DrawKind::HudQuad,
            vertex_buffer: None,
            texture: None,
            first: 0,
            count: 1,
        });
    }

    pub fn draw_minimap(&mut self, minimap: &MinimapState, _camera: &Camera) {
        self.device.draw(DrawCall {
            kind: DrawKind::MinimapLines,
            vertex_buffer: None,
            texture: None,
            first: 0,
            count: minimap.seen_count() as u32,
        });
    }

    pub fn do_fullscreen_postprocess(&mut self, map_state: &MapState) {
        if map_state.fullscreen_blend.is_some() {
            self.device.draw(DrawCall {
                kind: DrawKind::FullscreenBlend,
                vertex_buffer: None,
                texture: None,
                first: 0,
                count: 1,
            });
        }
    }
}

/// Device that records calls; used in tests and as a template for real
/// backends.
#[derive(Default)]
pub struct RecordingDevice {
    pub buffers: Vec<(BufferKind, Vec<u8>)>,
    pub textures: Vec<(u32, u32)>,
    pub calls: Vec<DrawCall>,
    pub buffer_updates: Vec<(BufferId, usize, usize)>,
}

impl GpuDevice for RecordingDevice {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferId {
        self.buffers.push((kind, data.to_vec()));
        (self.buffers.len() - 1) as BufferId
    }

    fn update_buffer(&mut self, buffer: BufferId, byte_offset: usize, data: &[u8]) {
        self.buffer_updates.push((buffer, byte_offset, data.len()));
        if let Some((_, storage)) = self.buffers.get_mut(buffer as usize) {
            if byte_offset + data.len() <= storage.len() {
                storage[byte_offset..byte_offset + data.len()].copy_from_slice(data);
            }
        }
    }

    fn create_texture(&mut self, width: u32, height: u32, _rgba: &[u8]) -> TextureId {
        self.textures.push((width, height));
        (self.textures.len() - 1) as TextureId
    }

    fn draw(&mut self, call: DrawCall) {
        self.calls.push(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::MapLoader;
    use chasm_core::test_fixtures::write_test_archive;
    use chasm_core::vfs::Vfs;
    use glam::Vec3;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Recording device shared with the test through an Rc.
    struct SharedDevice(Rc<RefCell<RecordingDevice>>);

    impl GpuDevice for SharedDevice {
        fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferId {
            self.0.borrow_mut().create_buffer(kind, data)
        }
        fn update_buffer(&mut self, buffer: BufferId, byte_offset: usize, data: &[u8]) {
            self.0.borrow_mut().update_buffer(buffer, byte_offset, data)
        }
        fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> TextureId {
            self.0.borrow_mut().create_texture(width, height, rgba)
        }
        fn draw(&mut self, call: DrawCall) {
            self.0.borrow_mut().draw(call)
        }
    }

    fn renderer_with_map() -> (GlRenderer, Rc<RefCell<RecordingDevice>>, MapDataPtr) {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);
        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = chasm_core::resources::load_game_resources(vfs.clone()).unwrap();
        let map_loader = MapLoader::new(vfs, Rc::clone(&resources));
        let map_data = map_loader.load_map(1).unwrap();

        let device = Rc::new(RefCell::new(RecordingDevice::default()));
        let mut renderer = GlRenderer::new(Box::new(SharedDevice(Rc::clone(&device))), resources);
        renderer.set_map(Rc::clone(&map_data));
        (renderer, device, map_data)
    }

    #[test]
    fn set_map_uploads_static_geometry_once() {
        let (_renderer, device, map_data) = renderer_with_map();
        let device = device.borrow();

        // Wall buffer carries 4 vertices per wall, static then dynamic.
        let (kind, data) = &device.buffers[0];
        assert_eq!(*kind, BufferKind::Vertex);
        let expected_vertices =
            4 * (map_data.static_walls.len() + map_data.dynamic_walls.len());
        assert_eq!(
            data.len(),
            expected_vertices * std::mem::size_of::<WallVertex>()
        );

        // Lightmap atlas texture matches the atlas dimensions.
        assert_eq!(
            device.textures[0],
            (
                WALL_LIGHTMAP_WIDTH as u32,
                map_data.lightmaps.atlas_rows() as u32
            )
        );
    }

    #[test]
    fn draw_emits_the_fixed_pass_order() {
        let (mut renderer, device, _map) = renderer_with_map();
        let map_state = MapState::new();
        let camera = Camera::new(Vec3::new(4.0, 4.0, 0.5), 0.0, 0.0);

        renderer.draw(&map_state, &camera, Time::from_ms(16));

        let kinds: Vec<DrawKind> = device.borrow().calls.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DrawKind::OpaqueWalls,
                DrawKind::FloorsAndCeilings,
                DrawKind::OpaqueModels,
                DrawKind::Sky,
                DrawKind::Shadows,
                DrawKind::TransparentModels,
                DrawKind::SpriteEffects,
            ]
        );
    }

    #[test]
    fn moving_walls_update_only_their_vertex_tail() {
        let (mut renderer, device, _map) = renderer_with_map();
        let mut map_state = MapState::new();
        map_state.process_message(chasm_core::messages::Message::WallPosition(
            chasm_core::messages::WallPosition {
                wall_index: 0,
                vertices_xy: [
                    messages::coord_to_message_coord(8.0),
                    messages::coord_to_message_coord(1.0),
                    messages::coord_to_message_coord(9.0),
                    messages::coord_to_message_coord(1.0),
                ],
                z: messages::coord_to_message_coord(0.5),
                texture_id: 6,
            },
        ));

        let camera = Camera::new(Vec3::new(4.0, 4.0, 0.5), 0.0, 0.0);
        renderer.draw(&map_state, &camera, Time::from_ms(16));

        let device = device.borrow();
        assert_eq!(device.buffer_updates.len(), 1);
        let (buffer, offset, len) = device.buffer_updates[0];
        assert_eq!(buffer, 0);
        assert_eq!(len, 4 * std::mem::size_of::<WallVertex>());
        // The dynamic tail starts after the static walls.
        assert!(offset >= 4 * 4 * std::mem::size_of::<WallVertex>());
    }

    #[test]
    fn wall_vertices_are_in_8_8_fixed_point() {
        let quad = wall_quad(
            glam::Vec2::new(1.5, 2.0),
            glam::Vec2::new(3.0, 2.0),
            0.0,
            5,
            [0, 1],
            [[0.0, 0.1], [1.0, 0.1]],
        );
        assert_eq!(quad[0].xyz, [384, 512, 0]);
        assert_eq!(quad[2].xyz[2], 256); // top edge one unit up
    }
}
