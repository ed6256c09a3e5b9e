//! Which walls the player has ever seen, for the minimap overlay.

use glam::Vec2;

use chasm_core::map::MapDataPtr;

/// Walls within this distance and view cone flip to "seen".
const VIEW_DISTANCE: f32 = 16.0;
const VIEW_CONE_COS: f32 = 0.2; // a bit wider than a right angle

pub struct MinimapState {
    map_data: MapDataPtr,
    static_walls_seen: Vec<bool>,
    dynamic_walls_seen: Vec<bool>,
}

fn wall_in_view(camera_position: Vec2, view_direction: Vec2, v0: Vec2, v1: Vec2) -> bool {
    for vertex in [v0, v1, (v0 + v1) * 0.5] {
        let to_vertex = vertex - camera_position;
        let distance = to_vertex.length();
        if distance > VIEW_DISTANCE {
            continue;
        }
        if distance < 1.0 || to_vertex.normalize().dot(view_direction) > VIEW_CONE_COS {
            return true;
        }
    }
    false
}

impl MinimapState {
    pub fn new(map_data: MapDataPtr) -> MinimapState {
        MinimapState {
            static_walls_seen: vec![false; map_data.static_walls.len()],
            dynamic_walls_seen: vec![false; map_data.dynamic_walls.len()],
            map_data,
        }
    }

    /// Flip walls inside the current view cone to seen. The set only grows.
    pub fn update(&mut self, camera_position: Vec2, view_angle: f32) {
        let view_direction = Vec2::new(-view_angle.sin(), view_angle.cos());

        for (index, wall) in self.map_data.static_walls.iter().enumerate() {
            if !self.static_walls_seen[index]
                && wall_in_view(camera_position, view_direction, wall.vert_pos[0], wall.vert_pos[1])
            {
                self.static_walls_seen[index] = true;
            }
        }
        for (index, wall) in self.map_data.dynamic_walls.iter().enumerate() {
            if !self.dynamic_walls_seen[index]
                && wall_in_view(camera_position, view_direction, wall.vert_pos[0], wall.vert_pos[1])
            {
                self.dynamic_walls_seen[index] = true;
            }
        }
    }

    pub fn static_wall_seen(&self, index: usize) -> bool {
        self.static_walls_seen.get(index).copied().unwrap_or(false)
    }

    pub fn dynamic_wall_seen(&self, index: usize) -> bool {
        self.dynamic_walls_seen.get(index).copied().unwrap_or(false)
    }

    pub fn seen_count(&self) -> usize {
        self.static_walls_seen.iter().filter(|&&s| s).count()
            + self.dynamic_walls_seen.iter().filter(|&&s| s).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::{MapData, Wall};
    use std::rc::Rc;

    fn map_with_walls() -> MapDataPtr {
        let mut map = MapData::empty(1);
        map.static_walls = vec![
            Wall {
                vert_pos: [Vec2::new(10.0, 14.0), Vec2::new(12.0, 14.0)],
                texture_id: 0,
                vert_tex_coord: [0, 1],
            },
            Wall {
                vert_pos: [Vec2::new(10.0, 60.0), Vec2::new(12.0, 60.0)],
                texture_id: 0,
                vert_tex_coord: [0, 1],
            },
        ];
        Rc::new(map)
    }

    #[test]
    fn walls_in_the_cone_become_seen_and_stay_seen() {
        let mut minimap = MinimapState::new(map_with_walls());

        // Looking +Y from below the first wall.
        minimap.update(Vec2::new(11.0, 10.0), 0.0);
        assert!(minimap.static_wall_seen(0));
        assert!(!minimap.static_wall_seen(1)); // beyond view distance

        // Turning away never unsees anything.
        let before = minimap.seen_count();
        minimap.update(Vec2::new(11.0, 10.0), std::f32::consts::PI);
        assert!(minimap.static_wall_seen(0));
        assert!(minimap.seen_count() >= before);
    }

    #[test]
    fn seen_set_only_grows_over_a_walk() {
        let mut minimap = MinimapState::new(map_with_walls());
        let mut previous = 0;
        for step in 0..40 {
            let pos = Vec2::new(11.0, 5.0 + step as f32 * 1.5);
            minimap.update(pos, 0.0);
            let count = minimap.seen_count();
            assert!(count >= previous);
            previous = count;
        }
        assert!(minimap.static_wall_seen(0));
        assert!(minimap.static_wall_seen(1));
    }
}
