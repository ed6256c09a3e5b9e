//! Precomputed static lighting.
//!
//! One single-channel floor lightmap sampled at cell centres, and one wall
//! atlas of 32×1 texel strips. Static walls occupy atlas rows below
//! [`DYNAMIC_WALLS_ATLAS_ROW`]; dynamic walls get the sub-region above it.
//! The mapping from wall index to atlas row never changes while a map is
//! loaded, so both renderer backends share the same lightmap coordinates.

use glam::Vec2;

use super::{MapData, MAP_SIZE};

pub const WALL_LIGHTMAP_WIDTH: usize = 32;

/// First atlas row of the dynamic-wall sub-region. The single knob that moves
/// the static/dynamic boundary.
pub const DYNAMIC_WALLS_ATLAS_ROW: usize = 2048;

pub const AMBIENT_LIGHT: f32 = 32.0;

pub struct MapLightmaps {
    /// `MAP_SIZE * MAP_SIZE`, row-major, one byte per cell.
    pub floor: Vec<u8>,
    /// `WALL_LIGHTMAP_WIDTH` texels per row; static walls first, dynamic walls
    /// from `DYNAMIC_WALLS_ATLAS_ROW`.
    pub walls_atlas: Vec<u8>,
    atlas_rows: usize,
}

/// Accumulated light level at a point, ambient included.
fn sample_light(map_data: &MapData, point: Vec2) -> f32 {
    let mut level = AMBIENT_LIGHT;
    for light in &map_data.lights {
        let distance = (light.pos - point).length();
        if distance >= light.outer_radius {
            continue;
        }
        let k = if distance <= light.inner_radius {
            1.0
        } else {
            (light.outer_radius - distance) / (light.outer_radius - light.inner_radius)
        };
        level = (level + light.power * k).min(light.max_light_level.max(level));
    }
    level.clamp(0.0, 255.0)
}

impl MapLightmaps {
    /// Placeholder with ambient-only data; used while a map is under
    /// construction.
    pub fn empty() -> MapLightmaps {
        MapLightmaps {
            floor: vec![AMBIENT_LIGHT as u8; MAP_SIZE * MAP_SIZE],
            walls_atlas: Vec::new(),
            atlas_rows: 0,
        }
    }

    pub fn build(map_data: &MapData) -> MapLightmaps {
        let mut floor = vec![0u8; MAP_SIZE * MAP_SIZE];
        for y in 0..MAP_SIZE {
            for x in 0..MAP_SIZE {
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                floor[x + y * MAP_SIZE] = sample_light(map_data, center) as u8;
            }
        }

        let atlas_rows = DYNAMIC_WALLS_ATLAS_ROW + map_data.dynamic_walls.len();
        let walls_atlas = vec![AMBIENT_LIGHT as u8; atlas_rows * WALL_LIGHTMAP_WIDTH];

        let mut lightmaps = MapLightmaps {
            floor,
            walls_atlas,
            atlas_rows,
        };

        for (wall_index, wall) in map_data.static_walls.iter().enumerate() {
            lightmaps.light_wall_row(map_data, wall_index, wall.vert_pos);
        }
        for (wall_index, wall) in map_data.dynamic_walls.iter().enumerate() {
            lightmaps.light_wall_row(
                map_data,
                DYNAMIC_WALLS_ATLAS_ROW + wall_index,
                wall.vert_pos,
            );
        }

        lightmaps
    }

    fn light_wall_row(&mut self, map_data: &MapData, row: usize, vert_pos: [Vec2; 2]) {
        let dst = &mut self.walls_atlas[row * WALL_LIGHTMAP_WIDTH..][..WALL_LIGHTMAP_WIDTH];
        for (t, texel) in dst.iter_mut().enumerate() {
            let k = (t as f32 + 0.5) / WALL_LIGHTMAP_WIDTH as f32;
            let point = vert_pos[0].lerp(vert_pos[1], k);
            *texel = sample_light(map_data, point) as u8;
        }
    }

    /// Atlas row for a static wall.
    pub fn static_wall_row(&self, wall_index: usize) -> usize {
        debug_assert!(wall_index < DYNAMIC_WALLS_ATLAS_ROW);
        wall_index
    }

    /// Atlas row for a dynamic wall.
    pub fn dynamic_wall_row(&self, wall_index: usize) -> usize {
        DYNAMIC_WALLS_ATLAS_ROW + wall_index
    }

    /// Lightmap UV pair for one wall strip, normalised to the atlas size.
    pub fn wall_uv(&self, row: usize) -> [[f32; 2]; 2] {
        let v = (row as f32 + 0.5) / self.atlas_rows as f32;
        [[0.0, v], [1.0, v]]
    }

    pub fn atlas_rows(&self) -> usize {
        self.atlas_rows
    }

    pub fn floor_level(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= MAP_SIZE as i32 || y >= MAP_SIZE as i32 {
            return AMBIENT_LIGHT as u8;
        }
        self.floor[x as usize + y as usize * MAP_SIZE]
    }

    pub fn wall_texel(&self, row: usize, t: usize) -> u8 {
        self.walls_atlas[row * WALL_LIGHTMAP_WIDTH + t.min(WALL_LIGHTMAP_WIDTH - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Light, Wall};

    #[test]
    fn floor_cells_near_a_light_are_brighter() {
        let mut map = MapData::empty(1);
        map.lights.push(Light {
            pos: Vec2::new(10.5, 10.5),
            inner_radius: 1.0,
            outer_radius: 6.0,
            power: 100.0,
            max_light_level: 255.0,
        });
        let lightmaps = MapLightmaps::build(&map);

        let near = lightmaps.floor_level(10, 10);
        let mid = lightmaps.floor_level(13, 10);
        let far = lightmaps.floor_level(30, 30);

        assert!(near > mid, "{} <= {}", near, mid);
        assert!(mid > far, "{} <= {}", mid, far);
        assert_eq!(far, AMBIENT_LIGHT as u8);
    }

    #[test]
    fn wall_rows_are_stable_and_separated() {
        let mut map = MapData::empty(1);
        map.static_walls.push(Wall {
            vert_pos: [Vec2::new(9.0, 9.0), Vec2::new(12.0, 9.0)],
            texture_id: 0,
            vert_tex_coord: [0, 1],
        });
        map.dynamic_walls.push(Wall {
            vert_pos: [Vec2::new(9.0, 12.0), Vec2::new(12.0, 12.0)],
            texture_id: 0,
            vert_tex_coord: [0, 1],
        });
        map.lights.push(Light {
            pos: Vec2::new(9.0, 9.0),
            inner_radius: 0.5,
            outer_radius: 3.0,
            power: 120.0,
            max_light_level: 255.0,
        });

        let lightmaps = MapLightmaps::build(&map);

        assert_eq!(lightmaps.static_wall_row(0), 0);
        assert_eq!(lightmaps.dynamic_wall_row(0), DYNAMIC_WALLS_ATLAS_ROW);

        // The static wall starts at the light: its first texel outshines its
        // last.
        let first = lightmaps.wall_texel(0, 0);
        let last = lightmaps.wall_texel(0, WALL_LIGHTMAP_WIDTH - 1);
        assert!(first > last);

        // UVs address distinct rows of one atlas.
        let static_uv = lightmaps.wall_uv(lightmaps.static_wall_row(0));
        let dynamic_uv = lightmaps.wall_uv(lightmaps.dynamic_wall_row(0));
        assert!(static_uv[0][1] < dynamic_uv[0][1]);
    }
}
