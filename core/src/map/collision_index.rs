//! 64×64 bucket grid over walls and solid static models.
//!
//! Each static wall is rasterised into the grid with a major-axis DDA; each
//! solid model stamps the cells of its bounding square. Buckets are singly
//! linked lists inside one element arena. Breakable and dynamic models are
//! kept out of the grid in a separate linear list, since their collidability
//! changes at runtime.

use glam::Vec2;

use super::{MapData, MAP_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexElementKind {
    StaticWall,
    StaticModel,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexElement {
    pub kind: IndexElementKind,
    pub index: u16,
}

struct LinkedElement {
    element: IndexElement,
    next: u16,
}

const DUMMY_NEXT: u16 = u16::MAX;

pub struct CollisionIndex {
    index_field: Vec<u16>,
    elements: Vec<LinkedElement>,
    /// Breakable or dynamic models, checked linearly.
    dynamic_models_indices: Vec<u16>,
}

fn clamp_cell(c: f32) -> i32 {
    (c.floor() as i32).clamp(0, MAP_SIZE as i32 - 1)
}

impl CollisionIndex {
    /// Placeholder with no elements; used while a map is under construction.
    pub fn build_empty() -> CollisionIndex {
        CollisionIndex {
            index_field: vec![DUMMY_NEXT; MAP_SIZE * MAP_SIZE],
            elements: Vec::new(),
            dynamic_models_indices: Vec::new(),
        }
    }

    pub fn build(map_data: &MapData) -> CollisionIndex {
        let mut index = CollisionIndex {
            index_field: vec![DUMMY_NEXT; MAP_SIZE * MAP_SIZE],
            elements: Vec::new(),
            dynamic_models_indices: Vec::new(),
        };

        for (wall_index, wall) in map_data.static_walls.iter().enumerate() {
            if wall.vert_pos[0] == wall.vert_pos[1] {
                continue;
            }
            index.rasterize_segment(
                wall.vert_pos[0],
                wall.vert_pos[1],
                IndexElement {
                    kind: IndexElementKind::StaticWall,
                    index: wall_index as u16,
                },
            );
        }

        for (model_index, model) in map_data.static_models.iter().enumerate() {
            let description = map_data
                .models_description
                .get(model.model_id as usize);

            let solid = !model.is_dynamic
                && description.map(|d| d.blow_effect == 0).unwrap_or(false);
            if !solid {
                index.dynamic_models_indices.push(model_index as u16);
                continue;
            }

            let radius = description.map(|d| d.radius).unwrap_or(0.0);
            let element = IndexElement {
                kind: IndexElementKind::StaticModel,
                index: model_index as u16,
            };

            let x_start = clamp_cell(model.pos.x - radius);
            let x_end = clamp_cell(model.pos.x + radius);
            let y_start = clamp_cell(model.pos.y - radius);
            let y_end = clamp_cell(model.pos.y + radius);
            for y in y_start..=y_end {
                for x in x_start..=x_end {
                    index.add_element(x as usize, y as usize, element);
                }
            }
        }

        index
    }

    /// Walk the segment cell by cell along its major axis, covering every cell
    /// the line passes through.
    fn rasterize_segment(&mut self, p0: Vec2, p1: Vec2, element: IndexElement) {
        let dir = p1 - p0;

        if dir.x.abs() >= dir.y.abs() {
            let (v0, v1) = if dir.x > 0.0 { (p0, p1) } else { (p1, p0) };
            let dy_dx = (v1.y - v0.y) / (v1.x - v0.x);

            let start_x = clamp_cell(v0.x).max(0);
            let end_x = clamp_cell(v1.x);
            for x in start_x..=end_x {
                let cell_x_start = (x as f32).max(v0.x);
                let cell_x_end = ((x + 1) as f32).min(v1.x);

                let mut cell_y_start = v0.y + dy_dx * (cell_x_start - v0.x);
                let mut cell_y_end = v0.y + dy_dx * (cell_x_end - v0.x);
                if cell_y_start > cell_y_end {
                    std::mem::swap(&mut cell_y_start, &mut cell_y_end);
                }

                for y in clamp_cell(cell_y_start)..=clamp_cell(cell_y_end) {
                    self.add_element(x as usize, y as usize, element);
                }
            }
        } else {
            let (v0, v1) = if dir.y > 0.0 { (p0, p1) } else { (p1, p0) };
            let dx_dy = (v1.x - v0.x) / (v1.y - v0.y);

            let start_y = clamp_cell(v0.y).max(0);
            let end_y = clamp_cell(v1.y);
            for y in start_y..=end_y {
                let cell_y_start = (y as f32).max(v0.y);
                let cell_y_end = ((y + 1) as f32).min(v1.y);

                let mut cell_x_start = v0.x + dx_dy * (cell_y_start - v0.y);
                let mut cell_x_end = v0.x + dx_dy * (cell_y_end - v0.y);
                if cell_x_start > cell_x_end {
                    std::mem::swap(&mut cell_x_start, &mut cell_x_end);
                }

                for x in clamp_cell(cell_x_start)..=clamp_cell(cell_x_end) {
                    self.add_element(x as usize, y as usize, element);
                }
            }
        }
    }

    fn add_element(&mut self, x: usize, y: usize, element: IndexElement) {
        debug_assert!(x < MAP_SIZE && y < MAP_SIZE);

        let cell = x + y * MAP_SIZE;
        self.elements.push(LinkedElement {
            element,
            next: self.index_field[cell],
        });
        self.index_field[cell] = (self.elements.len() - 1) as u16;
    }

    pub fn for_each_in_cell(&self, x: i32, y: i32, mut f: impl FnMut(IndexElement)) {
        if x < 0 || y < 0 || x >= MAP_SIZE as i32 || y >= MAP_SIZE as i32 {
            return;
        }
        let mut cursor = self.index_field[x as usize + y as usize * MAP_SIZE];
        while cursor != DUMMY_NEXT {
            let linked = &self.elements[cursor as usize];
            f(linked.element);
            cursor = linked.next;
        }
    }

    /// Every element in cells touched by the axis-aligned box, with
    /// duplicates across cells left to the caller.
    pub fn for_each_in_box(&self, min: Vec2, max: Vec2, mut f: impl FnMut(IndexElement)) {
        for y in clamp_cell(min.y)..=clamp_cell(max.y) {
            for x in clamp_cell(min.x)..=clamp_cell(max.x) {
                self.for_each_in_cell(x, y, &mut f);
            }
        }
    }

    /// Every element in cells crossed by the segment.
    pub fn for_each_on_line(&self, p0: Vec2, p1: Vec2, mut f: impl FnMut(IndexElement)) {
        let dir = p1 - p0;
        if dir.x.abs() >= dir.y.abs() {
            let (v0, v1) = if dir.x > 0.0 { (p0, p1) } else { (p1, p0) };
            if v1.x == v0.x {
                return self.for_each_in_cell(clamp_cell(v0.x), clamp_cell(v0.y), f);
            }
            let dy_dx = (v1.y - v0.y) / (v1.x - v0.x);
            for x in clamp_cell(v0.x)..=clamp_cell(v1.x) {
                let cell_x_start = (x as f32).max(v0.x);
                let cell_x_end = ((x + 1) as f32).min(v1.x);
                let mut y0 = v0.y + dy_dx * (cell_x_start - v0.x);
                let mut y1 = v0.y + dy_dx * (cell_x_end - v0.x);
                if y0 > y1 {
                    std::mem::swap(&mut y0, &mut y1);
                }
                for y in clamp_cell(y0)..=clamp_cell(y1) {
                    self.for_each_in_cell(x, y, &mut f);
                }
            }
        } else {
            let (v0, v1) = if dir.y > 0.0 { (p0, p1) } else { (p1, p0) };
            let dx_dy = (v1.x - v0.x) / (v1.y - v0.y);
            for y in clamp_cell(v0.y)..=clamp_cell(v1.y) {
                let cell_y_start = (y as f32).max(v0.y);
                let cell_y_end = ((y + 1) as f32).min(v1.y);
                let mut x0 = v0.x + dx_dy * (cell_y_start - v0.y);
                let mut x1 = v0.x + dx_dy * (cell_y_end - v0.y);
                if x0 > x1 {
                    std::mem::swap(&mut x0, &mut x1);
                }
                for x in clamp_cell(x0)..=clamp_cell(x1) {
                    self.for_each_in_cell(x, y, &mut f);
                }
            }
        }
    }

    pub fn dynamic_models_indices(&self) -> &[u16] {
        &self.dynamic_models_indices
    }
}
