//! Software backend: BSP-ordered walls, floors, models, sprites into an
//! owned framebuffer.

pub mod rasterizer;

use glam::{Vec2, Vec3};

use chasm_core::fixed::{fixed16_from_float, Fixed16, FIXED16_ONE};
use chasm_core::images::{Palette, TRANSPARENCY_INDEX};
use chasm_core::map::{MapDataPtr, FIRST_TRANSPARENT_TEXTURE_ID, WALL_LIGHTMAP_WIDTH};
use chasm_core::resources::{GameResourcesPtr, Model};
use chasm_core::time::Time;

use crate::hud;
use crate::map_state::MapState;
use crate::minimap_state::MinimapState;
use crate::weapon_state::WeaponState;

use super::Camera;
use rasterizer::{DrawOptions, Rasterizer, RasterizerVertex, ALPHA_MASK};

const NEAR_Z: f32 = 1.0 / 16.0;
const WALL_HEIGHT: f32 = 1.0;
const FLOOR_DRAW_DISTANCE: i32 = 24;
const WALL_TEXTURE_SIZE: u32 = 64;

pub struct SoftRenderer {
    rasterizer: Rasterizer,
    resources: GameResourcesPtr,
    map_data: Option<MapDataPtr>,

    /// Per texture id, RGBA wall/floor texture derived from the palette.
    wall_textures: Vec<Vec<u32>>,
    /// Per item model, skin converted through the palette.
    model_skins: Vec<Vec<u32>>,
    monster_skins: Vec<Vec<u32>>,
    sky_color: u32,
}

struct ViewTransform {
    pos: Vec3,
    sin_z: f32,
    cos_z: f32,
    sin_x: f32,
    cos_x: f32,
    focal: f32,
    half_width: f32,
    half_height: f32,
}

impl ViewTransform {
    fn new(camera: &Camera, width: i32, height: i32) -> ViewTransform {
        ViewTransform {
            pos: camera.pos,
            sin_z: camera.angle_z.sin(),
            cos_z: camera.angle_z.cos(),
            sin_x: camera.angle_x.sin(),
            cos_x: camera.angle_x.cos(),
            focal: width as f32 * 0.5 / (camera.fov * 0.5).tan(),
            half_width: width as f32 * 0.5,
            half_height: height as f32 * 0.5,
        }
    }

    /// World to view space: x right, y forward (depth), z up.
    fn to_view(&self, world: Vec3) -> Vec3 {
        let rel = world - self.pos;
        let x = rel.x * self.cos_z + rel.y * self.sin_z;
        let y = -rel.x * self.sin_z + rel.y * self.cos_z;
        let z = rel.z;
        // Pitch around the view x axis.
        let y2 = y * self.cos_x + z * self.sin_x;
        let z2 = -y * self.sin_x + z * self.cos_x;
        Vec3::new(x, y2, z2)
    }

    fn project(&self, view: Vec3) -> (f32, f32) {
        (
            self.half_width + view.x / view.y * self.focal,
            self.half_height - view.z / view.y * self.focal,
        )
    }
}

fn palette_color(palette: &Palette, index: u8) -> u32 {
    let base = index as usize * 3;
    let alpha = if index == TRANSPARENCY_INDEX { 0 } else { ALPHA_MASK };
    alpha | ((palette[base] as u32) << 16) | ((palette[base + 1] as u32) << 8)
        | palette[base + 2] as u32
}

/// Wall and floor texture pixels are not shipped in the archive slice this
/// engine reads; each id gets a deterministic dithered texture built from a
/// palette ramp, which keeps the whole pipeline (including lighting and
/// transparency) exercised.
fn synthesize_texture(palette: &Palette, texture_id: u8) -> Vec<u32> {
    let size = WALL_TEXTURE_SIZE as usize;
    let base_index = 16 + (texture_id as usize * 13) % 192;
    let mut data = vec![0u32; size * size];
    for y in 0..size {
        for x in 0..size {
            let ramp = ((x * 7 + y * 3 + texture_id as usize) % 16) / 4;
            let index = (base_index + ramp) as u8;
            data[x + y * size] = palette_color(palette, index);
        }
    }
    data
}

fn convert_skin(palette: &Palette, skin: &[u8]) -> Vec<u32> {
    skin.iter().map(|&i| palette_color(palette, i)).collect()
}

impl SoftRenderer {
    pub fn new(resources: GameResourcesPtr, width: u32, height: u32) -> SoftRenderer {
        let wall_textures = (0..=u8::MAX)
            .map(|id| synthesize_texture(&resources.palette, id))
            .collect();
        let model_skins = resources
            .items_models
            .iter()
            .map(|m| convert_skin(&resources.palette, &m.skin))
            .collect();
        let monster_skins = resources
            .monsters_models
            .iter()
            .map(|m| convert_skin(&resources.palette, &m.skin))
            .collect();
        let sky_color = palette_color(&resources.palette, 32);

        SoftRenderer {
            rasterizer: Rasterizer::new(width, height),
            resources,
            map_data: None,
            wall_textures,
            model_skins,
            monster_skins,
            sky_color,
        }
    }

    /// Buffers are owned by the renderer; only a viewport change reallocates.
    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        let (w, h) = self.rasterizer.viewport_size();
        if (w as u32, h as u32) != (width, height) {
            self.rasterizer = Rasterizer::new(width, height);
        }
    }

    pub fn set_map(&mut self, map_data: MapDataPtr) {
        self.map_data = Some(map_data);
    }

    pub fn frame_buffer(&self) -> &[u32] {
        self.rasterizer.color_buffer()
    }

    pub fn viewport_size(&self) -> (i32, i32) {
        self.rasterizer.viewport_size()
    }

    fn wall_light(&self, map_data: &MapDataPtr, row: usize) -> Fixed16 {
        // Average of the strip is enough for the software path's per-wall
        // modulation; both backends read the same atlas row.
        let mut sum = 0u32;
        for t in 0..WALL_LIGHTMAP_WIDTH {
            sum += map_data.lightmaps.wall_texel(row, t) as u32;
        }
        let average = sum / WALL_LIGHTMAP_WIDTH as u32;
        ((average as i32) << 16) / 255
    }

    /// Transform, near-clip, project and fan-triangulate one convex polygon.
    fn draw_world_polygon(
        &mut self,
        transform: &ViewTransform,
        corners: &[(Vec3, f32, f32)],
        texture_id: u8,
        light: Fixed16,
        options: DrawOptions,
    ) {
        // Sutherland-Hodgman against the near plane, in view space.
        let mut clipped: Vec<(Vec3, f32, f32)> = Vec::with_capacity(corners.len() + 1);
        for i in 0..corners.len() {
            let (pa, ua, va) = corners[i];
            let (pb, ub, vb) = corners[(i + 1) % corners.len()];
            let a = transform.to_view(pa);
            let b = transform.to_view(pb);

            if a.y >= NEAR_Z {
                clipped.push((a, ua, va));
            }
            if (a.y >= NEAR_Z) != (b.y >= NEAR_Z) {
                let k = (NEAR_Z - a.y) / (b.y - a.y);
                clipped.push((a.lerp(b, k), ua + (ub - ua) * k, va + (vb - va) * k));
            }
        }
        if clipped.len() < 3 {
            return;
        }

        let vertices: Vec<RasterizerVertex> = clipped
            .iter()
            .map(|&(view, u, v)| {
                let (sx, sy) = transform.project(view);
                RasterizerVertex {
                    x: fixed16_from_float(sx),
                    y: fixed16_from_float(sy),
                    u: fixed16_from_float(u),
                    v: fixed16_from_float(v),
                    z: view.y,
                }
            })
            .collect();

        if options.occlusion_test && self.rasterizer.is_occluded(&vertices) {
            return;
        }

        let texture = &self.wall_textures[texture_id as usize];
        self.rasterizer
            .set_texture(WALL_TEXTURE_SIZE, WALL_TEXTURE_SIZE, texture);
        self.rasterizer.set_light(light);

        for i in 1..vertices.len() - 1 {
            let triangle = [vertices[0], vertices[i], vertices[i + 1]];
            self.rasterizer
                .draw_textured_triangle_span_corrected(&triangle, options);
        }

        if options.occlusion_write {
            self.rasterizer.update_occlusion_hierarchy(&vertices);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_wall_quad(
        &mut self,
        transform: &ViewTransform,
        v0: Vec2,
        v1: Vec2,
        z_bottom: f32,
        z_top: f32,
        texture_id: u8,
        light: Fixed16,
        options: DrawOptions,
    ) {
        let u_max = WALL_TEXTURE_SIZE as f32;
        let corners = [
            (Vec3::new(v0.x, v0.y, z_bottom), 0.0, u_max),
            (Vec3::new(v1.x, v1.y, z_bottom), u_max, u_max),
            (Vec3::new(v1.x, v1.y, z_top), u_max, 0.0),
            (Vec3::new(v0.x, v0.y, z_top), 0.0, 0.0),
        ];
        self.draw_world_polygon(transform, &corners, texture_id, light, options);
    }

    fn draw_floors(&mut self, transform: &ViewTransform, map_data: &MapDataPtr) {
        let center_x = transform.pos.x as i32;
        let center_y = transform.pos.y as i32;
        let u_max = WALL_TEXTURE_SIZE as f32;

        for cy in center_y - FLOOR_DRAW_DISTANCE..=center_y + FLOOR_DRAW_DISTANCE {
            for cx in center_x - FLOOR_DRAW_DISTANCE..=center_x + FLOOR_DRAW_DISTANCE {
                for (is_ceiling, texture_id) in [
                    (false, map_data.floor_texture(cx, cy)),
                    (true, map_data.ceiling_texture(cx, cy)),
                ] {
                    if texture_id == chasm_core::map::EMPTY_FLOOR_TEXTURE_ID {
                        continue;
                    }
                    let z = if is_ceiling { WALL_HEIGHT } else { 0.0 };
                    let (x0, y0) = (cx as f32, cy as f32);
                    let corners = [
                        (Vec3::new(x0, y0, z), 0.0, 0.0),
                        (Vec3::new(x0 + 1.0, y0, z), u_max, 0.0),
                        (Vec3::new(x0 + 1.0, y0 + 1.0, z), u_max, u_max),
                        (Vec3::new(x0, y0 + 1.0, z), 0.0, u_max),
                    ];

                    let light = map_data.lightmaps.floor_level(cx, cy) as i32;
                    self.draw_world_polygon(
                        transform,
                        &corners,
                        texture_id,
                        (light << 16) / 255,
                        DrawOptions::OPAQUE,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_model(
        &mut self,
        transform: &ViewTransform,
        model: &Model,
        skin: &[u32],
        pos: Vec3,
        angle: f32,
        frame: u32,
        light: Fixed16,
    ) {
        if model.is_empty() || skin.is_empty() {
            return;
        }
        let frame = frame.min(model.frame_count - 1);

        // Coarse cull against the depth pyramid first.
        let center_view = transform.to_view(pos);
        if center_view.y > NEAR_Z {
            let radius = model
                .bbox_max
                .iter()
                .zip(model.bbox_min.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            let (sx, sy) = transform.project(center_view);
            let screen_radius = radius * transform.focal / center_view.y;
            let z_min = (center_view.y - radius).max(NEAR_Z);
            if self.rasterizer.is_depth_occluded(
                fixed16_from_float(sx - screen_radius),
                fixed16_from_float(sy - screen_radius),
                fixed16_from_float(sx + screen_radius),
                fixed16_from_float(sy + screen_radius),
                z_min,
            ) {
                return;
            }
        }

        let (sin_a, cos_a) = angle.sin_cos();
        let vertices = model.frame_vertices(frame);

        self.rasterizer
            .set_texture(model.skin_size[0], model.skin_size[1].max(1), skin);
        self.rasterizer.set_light(light);

        for triangle in &model.triangles {
            let mut screen = [RasterizerVertex::default(); 3];
            let mut behind = false;
            for (i, &vi) in triangle.vertex_indices.iter().enumerate() {
                let v = vertices[vi as usize];
                let local = Vec3::new(
                    v[0] as f32 / 256.0,
                    v[1] as f32 / 256.0,
                    v[2] as f32 / 256.0,
                );
                let world = Vec3::new(
                    pos.x + local.x * cos_a - local.y * sin_a,
                    pos.y + local.x * sin_a + local.y * cos_a,
                    pos.z + local.z,
                );
                let view = transform.to_view(world);
                if view.y < NEAR_Z {
                    behind = true;
                    break;
                }
                let (sx, sy) = transform.project(view);
                screen[i] = RasterizerVertex {
                    x: fixed16_from_float(sx),
                    y: fixed16_from_float(sy),
                    u: fixed16_from_float(triangle.tex_coords[i][0] as f32),
                    v: fixed16_from_float(triangle.tex_coords[i][1] as f32),
                    z: view.y,
                };
            }
            if behind {
                continue;
            }

            let translucent =
                triangle.flags & chasm_core::resources::model::TRIANGLE_FLAG_TRANSLUCENT != 0;
            let options = if translucent {
                DrawOptions::SPRITE
            } else {
                DrawOptions::OPAQUE
            };
            self.rasterizer
                .draw_textured_triangle_span_corrected(&screen, options);
        }
    }

    fn draw_billboard(&mut self, transform: &ViewTransform, pos: Vec3, size: f32, color: u32) {
        let view = transform.to_view(pos);
        if view.y < NEAR_Z {
            return;
        }
        let (sx, sy) = transform.project(view);
        let r = size * transform.focal / view.y;

        let vertex = |x: f32, y: f32| RasterizerVertex {
            x: fixed16_from_float(x),
            y: fixed16_from_float(y),
            u: 0,
            v: 0,
            z: view.y,
        };
        let t0 = [
            vertex(sx - r, sy - r),
            vertex(sx + r, sy - r),
            vertex(sx + r, sy + r),
        ];
        let t1 = [
            vertex(sx - r, sy - r),
            vertex(sx + r, sy + r),
            vertex(sx - r, sy + r),
        ];
        self.rasterizer.set_texture(1, 1, &[color]);
        self.rasterizer.set_light(FIXED16_ONE);
        self.rasterizer
            .draw_textured_triangle_span_corrected(&t0, DrawOptions::SPRITE);
        self.rasterizer
            .draw_textured_triangle_span_corrected(&t1, DrawOptions::SPRITE);
    }

    pub fn draw(&mut self, map_state: &MapState, camera: &Camera, _now: Time) {
        let Some(map_data) = self.map_data.clone() else {
            return;
        };
        let (width, height) = self.rasterizer.viewport_size();
        let transform = ViewTransform::new(camera, width, height);
        let render_time = map_state.render_time();

        self.rasterizer.clear_color_buffer(self.sky_color);
        self.rasterizer.clear_depth_buffer();
        self.rasterizer.clear_occlusion_buffer();

        // Opaque walls front to back via the BSP; transparent walls collect
        // for the late pass.
        let camera_xy = Vec2::new(camera.pos.x, camera.pos.y);
        let mut transparent_walls: Vec<(Vec2, Vec2, u8, usize)> = Vec::new();
        let mut wall_segments: Vec<(Vec2, Vec2, u8, usize)> = Vec::new();
        map_data
            .bsp_tree
            .enumerate_segments_front_to_back(camera_xy, &mut |segment| {
                let wall = &map_data.static_walls[segment.wall_index as usize];
                wall_segments.push((
                    segment.vert_pos[0],
                    segment.vert_pos[1],
                    wall.texture_id,
                    segment.wall_index as usize,
                ));
            });
        for (v0, v1, texture_id, wall_index) in wall_segments {
            if texture_id >= FIRST_TRANSPARENT_TEXTURE_ID {
                transparent_walls.push((v0, v1, texture_id, wall_index));
                continue;
            }
            let row = map_data.lightmaps.static_wall_row(wall_index);
            let light = self.wall_light(&map_data, row);
            self.draw_wall_quad(
                &transform,
                v0,
                v1,
                0.0,
                WALL_HEIGHT,
                texture_id,
                light,
                DrawOptions::WALL,
            );
        }

        // Dynamic walls at their replicated poses.
        for (&index, wall) in &map_state.dynamic_walls {
            let row = map_data.lightmaps.dynamic_wall_row(index as usize);
            let light = self.wall_light(&map_data, row);
            self.draw_wall_quad(
                &transform,
                wall.vertices[0],
                wall.vertices[1],
                wall.z,
                wall.z + WALL_HEIGHT,
                wall.texture_id,
                light,
                DrawOptions::OPAQUE,
            );
        }

        self.draw_floors(&transform, &map_data);

        self.rasterizer.build_depth_buffer_hierarchy();

        // Static models and items (skipped once picked or broken).
        let resources = self.resources.clone();
        let floor_light = |x: f32, y: f32| -> Fixed16 {
            ((map_data.lightmaps.floor_level(x as i32, y as i32) as i32) << 16) / 255
        };
        for (model_index, placement) in map_data.static_models.iter().enumerate() {
            if *map_state
                .broken_models
                .get(&(model_index as u16))
                .unwrap_or(&false)
                || *map_state
                    .picked_items
                    .get(&(model_index as u16))
                    .unwrap_or(&false)
            {
                continue;
            }
            let Some(model) = resources.items_models.get(placement.model_id as usize) else {
                continue;
            };
            let skin = self.model_skins[placement.model_id as usize].clone();
            self.draw_model(
                &transform,
                model,
                &skin,
                placement.pos,
                placement.angle,
                0,
                floor_light(placement.pos.x, placement.pos.y),
            );
        }

        // Monsters (players arrive in monster clothing too).
        for entry in map_state.monsters.values() {
            let (pos, angle) = entry.position.sample(render_time);
            if entry.is_invisible {
                continue;
            }
            let model_index = entry.monster_type as usize;
            let Some(model) = resources.monsters_models.get(model_index) else {
                // Replicated players have no model of their own in the
                // database; skip the body, deltas still drive the minimap.
                continue;
            };
            let skin = self
                .monster_skins
                .get(model_index)
                .cloned()
                .unwrap_or_default();
            let frame = model
                .animations
                .get(entry.animation as usize)
                .map(|a| a.first_frame + entry.animation_frame as u32 % a.frame_count.max(1))
                .unwrap_or(0);
            self.draw_model(
                &transform,
                model,
                &skin,
                pos,
                angle,
                frame,
                floor_light(pos.x, pos.y),
            );
        }

        // Rockets are fullbright.
        for entry in map_state.rockets.values() {
            let (pos, _) = entry.position.sample(render_time);
            self.draw_billboard(&transform, pos, 0.2, ALPHA_MASK | 0x00FF_C040);
        }
        for entry in map_state.dynamic_items.values() {
            let (pos, _) = entry.position.sample(render_time);
            self.draw_billboard(&transform, pos, 0.25, ALPHA_MASK | 0x0080_FF80);
        }

        // Transparent walls render double-sided, after the opaque world.
        for (v0, v1, texture_id, wall_index) in transparent_walls {
            let row = map_data.lightmaps.static_wall_row(wall_index);
            let light = self.wall_light(&map_data, row);
            self.draw_wall_quad(
                &transform,
                v0,
                v1,
                0.0,
                WALL_HEIGHT,
                texture_id,
                light,
                DrawOptions::SPRITE,
            );
            self.draw_wall_quad(
                &transform,
                v1,
                v0,
                0.0,
                WALL_HEIGHT,
                texture_id,
                light,
                DrawOptions::SPRITE,
            );
        }

        // Sprite effects last.
        for effect in &map_state.sprite_effects {
            self.draw_billboard(&transform, effect.pos, 0.3, ALPHA_MASK | 0x00FF_FF80);
        }
    }

    pub fn draw_weapon(&mut self, weapon_state: &WeaponState) {
        let (width, height) = self.rasterizer.viewport_size();
        // The deployed fraction slides the weapon up from the bottom edge.
        let raise = (weapon_state.switch_stage() * height as f32 * 0.25) as i32;
        let base_y = height - raise;
        let color = ALPHA_MASK | 0x00A0_A0A0;

        hud::fill_rect(
            self.rasterizer.color_buffer_mut(),
            width,
            height,
            width / 2 - width / 10,
            base_y,
            width / 5,
            height / 4,
            color,
        );
    }

    pub fn draw_hud(&mut self, map_state: &MapState, weapon_state: &WeaponState) {
        let (width, height) = self.rasterizer.viewport_size();
        hud::draw_hud(
            self.rasterizer.color_buffer_mut(),
            width,
            height,
            map_state,
            weapon_state,
        );
    }

    pub fn draw_minimap(&mut self, minimap: &MinimapState, camera: &Camera) {
        let Some(map_data) = self.map_data.clone() else {
            return;
        };
        let (width, height) = self.rasterizer.viewport_size();
        hud::draw_minimap(
            self.rasterizer.color_buffer_mut(),
            width,
            height,
            &map_data,
            minimap,
            Vec2::new(camera.pos.x, camera.pos.y),
        );
    }

    pub fn do_fullscreen_postprocess(&mut self, map_state: &MapState) {
        let Some((color_index, intensity, _)) = map_state.fullscreen_blend else {
            return;
        };
        let blend = palette_color(&self.resources.palette, color_index);
        let k = intensity as u32;
        for pixel in self.rasterizer.color_buffer_mut() {
            let r = (((*pixel >> 16) & 0xFF) * (255 - k) + ((blend >> 16) & 0xFF) * k) / 255;
            let g = (((*pixel >> 8) & 0xFF) * (255 - k) + ((blend >> 8) & 0xFF) * k) / 255;
            let b = ((*pixel & 0xFF) * (255 - k) + (blend & 0xFF) * k) / 255;
            *pixel = (*pixel & ALPHA_MASK) | (r << 16) | (g << 8) | b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::MapLoader;
    use chasm_core::test_fixtures::write_test_archive;
    use chasm_core::vfs::Vfs;
    use std::rc::Rc;

    fn renderer_with_map() -> (SoftRenderer, MapDataPtr) {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);
        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = chasm_core::resources::load_game_resources(vfs.clone()).unwrap();
        let map_loader = MapLoader::new(vfs, Rc::clone(&resources));
        let map_data = map_loader.load_map(1).unwrap();

        let mut renderer = SoftRenderer::new(resources, 160, 120);
        renderer.set_map(Rc::clone(&map_data));
        (renderer, map_data)
    }

    #[test]
    fn a_frame_inside_the_room_covers_the_viewport() {
        let (mut renderer, _map) = renderer_with_map();
        let mut map_state = MapState::new();
        map_state.tick(Time::from_ms(500));

        let camera = Camera::new(Vec3::new(8.0, 8.0, 0.5), 0.0, 0.0);
        renderer.draw(&map_state, &camera, Time::from_ms(500));

        // Looking at the inside of a closed room: most pixels are not sky.
        let sky = renderer.sky_color;
        let covered = renderer
            .frame_buffer()
            .iter()
            .filter(|&&p| p != sky)
            .count();
        assert!(
            covered > renderer.frame_buffer().len() / 2,
            "only {} of {} pixels covered",
            covered,
            renderer.frame_buffer().len()
        );
    }

    #[test]
    fn viewport_change_reallocates_buffers() {
        let (mut renderer, _map) = renderer_with_map();
        renderer.set_viewport_size(160, 120);
        assert_eq!(renderer.viewport_size(), (160, 120));
        renderer.set_viewport_size(80, 60);
        assert_eq!(renderer.viewport_size(), (80, 60));
        assert_eq!(renderer.frame_buffer().len(), 80 * 60);
    }

    #[test]
    fn fullscreen_blend_shifts_every_pixel_toward_the_color() {
        let (mut renderer, _map) = renderer_with_map();
        let mut map_state = MapState::new();
        map_state.tick(Time::from_ms(100));
        map_state.fullscreen_blend = Some((40, 255, Time::from_ms(100)));

        let camera = Camera::new(Vec3::new(8.0, 8.0, 0.5), 0.0, 0.0);
        renderer.draw(&map_state, &camera, Time::from_ms(100));
        renderer.do_fullscreen_postprocess(&map_state);

        let blend = palette_color(&renderer.resources.palette, 40);
        assert!(renderer
            .frame_buffer()
            .iter()
            .all(|&p| p & 0x00FF_FFFF == blend & 0x00FF_FFFF));
    }
}
