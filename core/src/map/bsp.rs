//! Binary space partition over static walls.
//!
//! Built once per map for the software renderer: traversal from any camera
//! position yields wall segments strictly front to back. Segments cut by a
//! splitter plane record their `[start, end]` parameter range along the
//! original wall, so lightmap coordinates survive the split.

use glam::Vec2;

use super::MapData;

const PLANE_EPS: f32 = 1.0 / 256.0;

#[derive(Debug, Clone, Copy)]
pub struct Plane2 {
    pub normal: Vec2,
    pub dist: f32,
}

impl Plane2 {
    fn from_segment(v0: Vec2, v1: Vec2) -> Option<Plane2> {
        let dir = v1 - v0;
        let length = dir.length();
        if length == 0.0 {
            return None;
        }
        let normal = Vec2::new(dir.y, -dir.x) / length;
        Some(Plane2 {
            normal,
            dist: -normal.dot(v0),
        })
    }

    pub fn signed_distance(&self, point: Vec2) -> f32 {
        self.normal.dot(point) + self.dist
    }
}

#[derive(Debug, Clone)]
pub struct WallSegment {
    pub wall_index: u32,
    /// Parameter range along the original wall, in [0, 1].
    pub start: f32,
    pub end: f32,
    pub vert_pos: [Vec2; 2],
}

pub const NULL_NODE: u32 = 0;

struct Node {
    plane: Plane2,
    first_segment: u32,
    segment_count: u32,
    node_front: u32,
    node_back: u32,
}

pub struct MapBspTree {
    segments: Vec<WallSegment>,
    nodes: Vec<Node>,
    root_node: u32,
}

impl MapBspTree {
    /// Placeholder with no segments; used while a map is under construction.
    pub fn build_empty() -> MapBspTree {
        MapBspTree {
            segments: Vec::new(),
            nodes: vec![Node {
                plane: Plane2 {
                    normal: Vec2::ZERO,
                    dist: 0.0,
                },
                first_segment: 0,
                segment_count: 0,
                node_front: NULL_NODE,
                node_back: NULL_NODE,
            }],
            root_node: NULL_NODE,
        }
    }

    pub fn build(map_data: &MapData) -> MapBspTree {
        let mut build_segments = Vec::with_capacity(map_data.static_walls.len());
        for (wall_index, wall) in map_data.static_walls.iter().enumerate() {
            if wall.vert_pos[0] == wall.vert_pos[1] {
                continue;
            }
            build_segments.push(WallSegment {
                wall_index: wall_index as u32,
                start: 0.0,
                end: 1.0,
                vert_pos: wall.vert_pos,
            });
        }

        let mut tree = MapBspTree {
            segments: Vec::new(),
            // Node 0 is the null node; never dereferenced.
            nodes: vec![Node {
                plane: Plane2 {
                    normal: Vec2::ZERO,
                    dist: 0.0,
                },
                first_segment: 0,
                segment_count: 0,
                node_front: NULL_NODE,
                node_back: NULL_NODE,
            }],
            root_node: NULL_NODE,
        };
        tree.root_node = tree.build_r(build_segments);
        tree
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn build_r(&mut self, build_segments: Vec<WallSegment>) -> u32 {
        if build_segments.is_empty() {
            return NULL_NODE;
        }

        // Splitter choice: the segment whose plane splits fewest others.
        let mut best = 0usize;
        let mut best_score = u32::MAX;
        for (i, candidate) in build_segments.iter().enumerate() {
            let Some(plane) = Plane2::from_segment(candidate.vert_pos[0], candidate.vert_pos[1])
            else {
                continue;
            };
            let mut score = 0u32;
            for other in &build_segments {
                let d0 = plane.signed_distance(other.vert_pos[0]);
                let d1 = plane.signed_distance(other.vert_pos[1]);
                if (d0 > PLANE_EPS && d1 < -PLANE_EPS) || (d0 < -PLANE_EPS && d1 > PLANE_EPS) {
                    score += 1;
                }
            }
            if score < best_score {
                best_score = score;
                best = i;
            }
        }

        let plane = Plane2::from_segment(
            build_segments[best].vert_pos[0],
            build_segments[best].vert_pos[1],
        )
        .expect("degenerate splitter");

        let mut on_plane = Vec::new();
        let mut front = Vec::new();
        let mut back = Vec::new();

        for segment in build_segments {
            let d0 = plane.signed_distance(segment.vert_pos[0]);
            let d1 = plane.signed_distance(segment.vert_pos[1]);

            if d0.abs() <= PLANE_EPS && d1.abs() <= PLANE_EPS {
                on_plane.push(segment);
            } else if d0 >= -PLANE_EPS && d1 >= -PLANE_EPS {
                front.push(segment);
            } else if d0 <= PLANE_EPS && d1 <= PLANE_EPS {
                back.push(segment);
            } else {
                // Straddling: split at the plane crossing.
                let t = d0 / (d0 - d1);
                let split_pos = segment.vert_pos[0].lerp(segment.vert_pos[1], t);
                let split_param = segment.start + t * (segment.end - segment.start);

                let first = WallSegment {
                    wall_index: segment.wall_index,
                    start: segment.start,
                    end: split_param,
                    vert_pos: [segment.vert_pos[0], split_pos],
                };
                let second = WallSegment {
                    wall_index: segment.wall_index,
                    start: split_param,
                    end: segment.end,
                    vert_pos: [split_pos, segment.vert_pos[1]],
                };

                if d0 > 0.0 {
                    front.push(first);
                    back.push(second);
                } else {
                    back.push(first);
                    front.push(second);
                }
            }
        }

        let first_segment = self.segments.len() as u32;
        let segment_count = on_plane.len() as u32;
        self.segments.extend(on_plane);

        let node_index = self.nodes.len() as u32;
        self.nodes.push(Node {
            plane,
            first_segment,
            segment_count,
            node_front: NULL_NODE,
            node_back: NULL_NODE,
        });

        let node_front = self.build_r(front);
        let node_back = self.build_r(back);
        self.nodes[node_index as usize].node_front = node_front;
        self.nodes[node_index as usize].node_back = node_back;

        node_index
    }

    /// Visit every segment, nearest subtree first.
    pub fn enumerate_segments_front_to_back(
        &self,
        camera_position: Vec2,
        func: &mut impl FnMut(&WallSegment),
    ) {
        self.enumerate_r(self.root_node, camera_position, func);
    }

    fn enumerate_r(&self, node_index: u32, camera_position: Vec2, func: &mut impl FnMut(&WallSegment)) {
        if node_index == NULL_NODE {
            return;
        }
        let node = &self.nodes[node_index as usize];

        let (near, far) = if node.plane.signed_distance(camera_position) >= 0.0 {
            (node.node_front, node.node_back)
        } else {
            (node.node_back, node.node_front)
        };

        self.enumerate_r(near, camera_position, func);
        for segment in
            &self.segments[node.first_segment as usize..(node.first_segment + node.segment_count) as usize]
        {
            func(segment);
        }
        self.enumerate_r(far, camera_position, func);
    }
}
