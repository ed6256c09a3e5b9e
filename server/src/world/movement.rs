//! Collision resolution against the static map.
//!
//! Movers are vertical cylinders tested as circles in the XY plane. A move is
//! resolved by pushing the circle out of every wall and solid model it
//! penetrates; each push records a restriction normal, and any further motion
//! with a positive component into a recorded normal is cancelled, which gives
//! slide-along-wall behaviour.

use glam::Vec2;

use chasm_core::map::{IndexElementKind, MapData};

pub const MAX_RESTRICTION_PLANES: usize = 8;

#[derive(Default)]
pub struct MovementRestriction {
    normals: [Vec2; MAX_RESTRICTION_PLANES],
    planes_count: usize,
}

impl MovementRestriction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_restriction(&mut self, normal: Vec2) {
        if self.planes_count < MAX_RESTRICTION_PLANES {
            self.normals[self.planes_count] = normal;
            self.planes_count += 1;
        }
    }

    /// True when the horizontal movement direction presses into any recorded
    /// plane.
    pub fn movement_is_blocked(&self, movement_direction: Vec2) -> bool {
        self.normals[..self.planes_count]
            .iter()
            .any(|normal| normal.dot(movement_direction) < 0.0)
    }

    /// Remove the components of `velocity` pointing into recorded planes.
    pub fn restrict_velocity(&self, mut velocity: Vec2) -> Vec2 {
        for normal in &self.normals[..self.planes_count] {
            let into = velocity.dot(*normal);
            if into < 0.0 {
                velocity -= *normal * into;
            }
        }
        velocity
    }
}

fn closest_point_on_segment(p: Vec2, v0: Vec2, v1: Vec2) -> Vec2 {
    let dir = v1 - v0;
    let square_length = dir.length_squared();
    if square_length == 0.0 {
        return v0;
    }
    let t = ((p - v0).dot(dir) / square_length).clamp(0.0, 1.0);
    v0 + dir * t
}

fn push_out_of_segment(
    pos: &mut Vec2,
    radius: f32,
    v0: Vec2,
    v1: Vec2,
    restriction: &mut MovementRestriction,
) -> bool {
    let closest = closest_point_on_segment(*pos, v0, v1);
    let to_center = *pos - closest;
    let distance = to_center.length();
    if distance >= radius || distance == 0.0 {
        return false;
    }
    let normal = to_center / distance;
    *pos = closest + normal * radius;
    restriction.add_restriction(normal);
    true
}

fn push_out_of_circle(
    pos: &mut Vec2,
    radius: f32,
    center: Vec2,
    obstacle_radius: f32,
    restriction: &mut MovementRestriction,
) -> bool {
    let to_center = *pos - center;
    let distance = to_center.length();
    let min_distance = radius + obstacle_radius;
    if distance >= min_distance || distance == 0.0 {
        return false;
    }
    let normal = to_center / distance;
    *pos = center + normal * min_distance;
    restriction.add_restriction(normal);
    true
}

/// Resolve a circle at `pos` against static walls, solid models and currently
/// collidable dynamic walls. Returns the corrected position and the collected
/// restriction planes.
pub fn collide_with_map(
    map_data: &MapData,
    dynamic_wall_positions: &[[Vec2; 2]],
    pos: Vec2,
    radius: f32,
) -> (Vec2, MovementRestriction) {
    let mut result = pos;
    let mut restriction = MovementRestriction::new();

    // A couple of passes settles corner cases where the first push moves the
    // circle into a neighbouring wall.
    for _ in 0..2 {
        let min = result - Vec2::splat(radius);
        let max = result + Vec2::splat(radius);

        let mut wall_hits: Vec<(Vec2, Vec2)> = Vec::new();
        let mut model_hits: Vec<(Vec2, f32)> = Vec::new();

        map_data.collision_index.for_each_in_box(min, max, |element| {
            match element.kind {
                IndexElementKind::StaticWall => {
                    let wall = &map_data.static_walls[element.index as usize];
                    wall_hits.push((wall.vert_pos[0], wall.vert_pos[1]));
                }
                IndexElementKind::StaticModel => {
                    let model = &map_data.static_models[element.index as usize];
                    let model_radius = map_data
                        .models_description
                        .get(model.model_id as usize)
                        .map(|d| d.radius)
                        .unwrap_or(0.0);
                    model_hits.push((Vec2::new(model.pos.x, model.pos.y), model_radius));
                }
            }
        });

        let mut any = false;
        for (v0, v1) in wall_hits {
            any |= push_out_of_segment(&mut result, radius, v0, v1, &mut restriction);
        }
        for (center, model_radius) in model_hits {
            any |= push_out_of_circle(&mut result, radius, center, model_radius, &mut restriction);
        }
        for wall in dynamic_wall_positions {
            any |= push_out_of_segment(&mut result, radius, wall[0], wall[1], &mut restriction);
        }

        if !any {
            break;
        }
    }

    (result, restriction)
}

/// True when the segment from `from` to `to` crosses no static wall.
pub fn line_of_sight(map_data: &MapData, from: Vec2, to: Vec2) -> bool {
    let mut blocked = false;
    map_data.collision_index.for_each_on_line(from, to, |element| {
        if blocked || element.kind != IndexElementKind::StaticWall {
            return;
        }
        let wall = &map_data.static_walls[element.index as usize];
        if segments_intersect(from, to, wall.vert_pos[0], wall.vert_pos[1]) {
            blocked = true;
        }
    });
    !blocked
}

/// Nearest static-wall hit along the ray, as a parameter in [0, 1] of the
/// segment, with the wall index.
pub fn cast_ray(map_data: &MapData, from: Vec2, to: Vec2) -> Option<(f32, u16)> {
    let mut nearest: Option<(f32, u16)> = None;
    map_data.collision_index.for_each_on_line(from, to, |element| {
        if element.kind != IndexElementKind::StaticWall {
            return;
        }
        let wall = &map_data.static_walls[element.index as usize];
        if let Some(t) = segment_intersection_param(from, to, wall.vert_pos[0], wall.vert_pos[1]) {
            if nearest.map(|(best, _)| t < best).unwrap_or(true) {
                nearest = Some((t, element.index));
            }
        }
    });
    nearest
}

fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Parameter along `a0->a1` of its intersection with `b0->b1`.
fn segment_intersection_param(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> Option<f32> {
    let r = a1 - a0;
    let s = b1 - b0;
    let denominator = cross(r, s);
    if denominator == 0.0 {
        return None;
    }
    let t = cross(b0 - a0, s) / denominator;
    let u = cross(b0 - a0, r) / denominator;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}

fn segments_intersect(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> bool {
    segment_intersection_param(a0, a1, b0, b1).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::map::{CollisionIndex, Wall};

    fn map_with_wall(x0: f32, y0: f32, x1: f32, y1: f32) -> MapData {
        let mut map = MapData::empty(1);
        map.static_walls.push(Wall {
            vert_pos: [Vec2::new(x0, y0), Vec2::new(x1, y1)],
            texture_id: 0,
            vert_tex_coord: [0, 1],
        });
        map.collision_index = CollisionIndex::build(&map);
        map
    }

    #[test]
    fn circle_is_pushed_out_of_a_wall() {
        let map = map_with_wall(2.0, 1.0, 2.0, 2.0);
        let radius = 0.25;

        let (pos, restriction) =
            collide_with_map(&map, &[], Vec2::new(1.95, 1.5), radius);

        assert!((pos.x - (2.0 - radius)).abs() < 1e-4);
        assert!((pos.y - 1.5).abs() < 1e-4);
        assert!(restriction.movement_is_blocked(Vec2::new(1.0, 0.0)));
        assert!(!restriction.movement_is_blocked(Vec2::new(0.0, 1.0)));
        assert!(!restriction.movement_is_blocked(Vec2::new(-1.0, 0.0)));
    }

    #[test]
    fn free_space_is_untouched() {
        let map = map_with_wall(2.0, 1.0, 2.0, 2.0);
        let (pos, restriction) = collide_with_map(&map, &[], Vec2::new(10.0, 10.0), 0.25);
        assert_eq!(pos, Vec2::new(10.0, 10.0));
        assert!(!restriction.movement_is_blocked(Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn restricted_velocity_slides_along_the_wall() {
        let mut restriction = MovementRestriction::new();
        restriction.add_restriction(Vec2::new(-1.0, 0.0));

        let velocity = restriction.restrict_velocity(Vec2::new(3.0, 2.0));
        assert!((velocity.x - 0.0).abs() < 1e-6);
        assert!((velocity.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn line_of_sight_respects_walls() {
        let map = map_with_wall(5.0, 0.0, 5.0, 10.0);
        assert!(!line_of_sight(&map, Vec2::new(1.0, 5.0), Vec2::new(9.0, 5.0)));
        assert!(line_of_sight(&map, Vec2::new(1.0, 5.0), Vec2::new(4.0, 5.0)));
        assert!(line_of_sight(&map, Vec2::new(6.0, 1.0), Vec2::new(9.0, 9.0)));
    }

    #[test]
    fn cast_ray_returns_the_nearest_hit() {
        let mut map = map_with_wall(5.0, 0.0, 5.0, 10.0);
        map.static_walls.push(Wall {
            vert_pos: [Vec2::new(7.0, 0.0), Vec2::new(7.0, 10.0)],
            texture_id: 0,
            vert_tex_coord: [0, 1],
        });
        map.collision_index = CollisionIndex::build(&map);

        let hit = cast_ray(&map, Vec2::new(1.0, 5.0), Vec2::new(9.0, 5.0)).unwrap();
        assert_eq!(hit.1, 0);
        assert!((hit.0 - 0.5).abs() < 1e-4);
    }

    #[test]
    fn dynamic_walls_collide_at_their_current_pose() {
        let map = MapData::empty(1);
        let dynamic = [[Vec2::new(3.0, 1.0), Vec2::new(3.0, 2.0)]];

        let (pos, _) = collide_with_map(&map, &dynamic, Vec2::new(2.9, 1.5), 0.25);
        assert!((pos.x - 2.75).abs() < 1e-4);
    }
}
