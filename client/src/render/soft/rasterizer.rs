//! Span-correct software triangle rasteriser.
//!
//! Inner loops run in 16.16 fixed point. Perspective correction recomputes
//! `u` and `v` from `u/z` and `1/z` once per 16-pixel span and interpolates
//! linearly in between. A 16-bit depth buffer stores scaled `1/z` (larger is
//! nearer); a 6-level min-depth pyramid answers coarse "is this box hidden"
//! queries, and a 1-bit occlusion buffer with a 3-level 4×4-block hierarchy
//! culls opaque wall fragments before per-pixel work.

use chasm_core::fixed::{Fixed16, FIXED16_BASE, FIXED16_ONE};

/// Texels with this mask zeroed are transparent.
pub const ALPHA_MASK: u32 = 0xFF00_0000;

/// 1/z is carried with this many fractional bits.
const INV_Z_SHIFT: i32 = 26;
/// Depth buffer values are 1/z in 4.12.
const DEPTH_SHIFT: i32 = INV_Z_SHIFT - 12;

/// Perspective respan length.
pub const Z_CORRECT_SPAN_SIZE_LOG2: i32 = 4;
pub const Z_CORRECT_SPAN_SIZE: i32 = 1 << Z_CORRECT_SPAN_SIZE_LOG2;

const DEPTH_HIERARCHY_LEVELS: usize = 6;
const FIRST_DEPTH_HIERARCHY_LEVEL_SIZE: usize = 4;

const OCCLUSION_HIERARCHY_LEVELS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterizerVertex {
    /// Screen space, 16.16.
    pub x: Fixed16,
    pub y: Fixed16,
    /// Texels, 16.16.
    pub u: Fixed16,
    pub v: Fixed16,
    /// View-space depth, world units.
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawOptions {
    pub depth_test: bool,
    pub depth_write: bool,
    pub alpha_test: bool,
    pub occlusion_test: bool,
    pub occlusion_write: bool,
}

impl DrawOptions {
    pub const OPAQUE: DrawOptions = DrawOptions {
        depth_test: true,
        depth_write: true,
        alpha_test: false,
        occlusion_test: false,
        occlusion_write: false,
    };

    pub const WALL: DrawOptions = DrawOptions {
        depth_test: false,
        depth_write: true,
        alpha_test: false,
        occlusion_test: true,
        occlusion_write: true,
    };

    pub const SPRITE: DrawOptions = DrawOptions {
        depth_test: true,
        depth_write: false,
        alpha_test: true,
        occlusion_test: false,
        occlusion_write: false,
    };
}

struct HierarchyLevel<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

pub struct Rasterizer {
    viewport_size_x: i32,
    viewport_size_y: i32,

    color_buffer: Vec<u32>,
    depth_buffer: Vec<u16>,
    depth_hierarchy: Vec<HierarchyLevel<u16>>,

    occlusion_buffer: Vec<u64>, // bit per pixel, 64 pixels per word
    occlusion_words_per_row: usize,
    occlusion_hierarchy: Vec<HierarchyLevel<u16>>,

    texture_size_x: i32,
    texture_size_y: i32,
    texture_data: Vec<u32>,

    light: Fixed16,
}

impl Rasterizer {
    pub fn new(viewport_size_x: u32, viewport_size_y: u32) -> Rasterizer {
        let pixels = (viewport_size_x * viewport_size_y) as usize;

        let mut depth_hierarchy = Vec::with_capacity(DEPTH_HIERARCHY_LEVELS);
        let mut cell = FIRST_DEPTH_HIERARCHY_LEVEL_SIZE;
        for _ in 0..DEPTH_HIERARCHY_LEVELS {
            let width = (viewport_size_x as usize).div_ceil(cell);
            let height = (viewport_size_y as usize).div_ceil(cell);
            depth_hierarchy.push(HierarchyLevel {
                data: vec![0u16; width * height],
                width,
                height,
            });
            cell *= 2;
        }

        let occlusion_words_per_row = (viewport_size_x as usize).div_ceil(64);
        let mut occlusion_hierarchy = Vec::with_capacity(OCCLUSION_HIERARCHY_LEVELS);
        // One 16-bit word covers a 4x4 group of the level below; the finest
        // level's bits are 4x4-pixel blocks.
        let mut word_span = 16usize;
        for _ in 0..OCCLUSION_HIERARCHY_LEVELS {
            let width = (viewport_size_x as usize).div_ceil(word_span);
            let height = (viewport_size_y as usize).div_ceil(word_span);
            occlusion_hierarchy.push(HierarchyLevel {
                data: vec![0u16; width * height],
                width,
                height,
            });
            word_span *= 4;
        }

        Rasterizer {
            viewport_size_x: viewport_size_x as i32,
            viewport_size_y: viewport_size_y as i32,
            color_buffer: vec![0; pixels],
            depth_buffer: vec![0; pixels],
            depth_hierarchy,
            occlusion_buffer: vec![0; occlusion_words_per_row * viewport_size_y as usize],
            occlusion_words_per_row,
            occlusion_hierarchy,
            texture_size_x: 0,
            texture_size_y: 0,
            texture_data: Vec::new(),
            light: FIXED16_ONE,
        }
    }

    pub fn viewport_size(&self) -> (i32, i32) {
        (self.viewport_size_x, self.viewport_size_y)
    }

    pub fn color_buffer(&self) -> &[u32] {
        &self.color_buffer
    }

    pub fn color_buffer_mut(&mut self) -> &mut [u32] {
        &mut self.color_buffer
    }

    pub fn clear_color_buffer(&mut self, color: u32) {
        self.color_buffer.fill(color);
    }

    pub fn clear_depth_buffer(&mut self) {
        self.depth_buffer.fill(0);
    }

    pub fn clear_occlusion_buffer(&mut self) {
        self.occlusion_buffer.fill(0);
        for level in &mut self.occlusion_hierarchy {
            level.data.fill(0);
        }
    }

    pub fn set_texture(&mut self, size_x: u32, size_y: u32, data: &[u32]) {
        debug_assert!(data.len() >= (size_x * size_y) as usize);
        self.texture_size_x = size_x as i32;
        self.texture_size_y = size_y as i32;
        self.texture_data.clear();
        self.texture_data.extend_from_slice(data);
    }

    /// `final_color = (light * color) >> 16` per channel; 1.0 passes through.
    pub fn set_light(&mut self, light: Fixed16) {
        self.light = light;
    }

    fn apply_light(&self, texel: u32) -> u32 {
        if self.light == FIXED16_ONE {
            return texel;
        }
        let l = self.light.clamp(0, 2 * FIXED16_ONE) as u32;
        let r = (((texel >> 16) & 0xFF) * l >> FIXED16_BASE).min(255);
        let g = (((texel >> 8) & 0xFF) * l >> FIXED16_BASE).min(255);
        let b = ((texel & 0xFF) * l >> FIXED16_BASE).min(255);
        (texel & ALPHA_MASK) | (r << 16) | (g << 8) | b
    }

    #[inline]
    fn fetch_texel(&self, u: Fixed16, v: Fixed16) -> u32 {
        let mut tu = u >> FIXED16_BASE;
        let mut tv = v >> FIXED16_BASE;
        tu = tu.clamp(0, self.texture_size_x - 1);
        tv = tv.clamp(0, self.texture_size_y - 1);
        self.texture_data[(tu + tv * self.texture_size_x) as usize]
    }

    // ---- depth hierarchy ----

    /// Collapse the depth buffer into the min-pyramid; call after the opaque
    /// geometry pass, before model culling queries.
    pub fn build_depth_buffer_hierarchy(&mut self) {
        let cell = FIRST_DEPTH_HIERARCHY_LEVEL_SIZE;
        let level0_width = self.depth_hierarchy[0].width;
        for cy in 0..self.depth_hierarchy[0].height {
            for cx in 0..level0_width {
                let mut min_depth = u16::MAX;
                for py in 0..cell {
                    let y = cy * cell + py;
                    if y >= self.viewport_size_y as usize {
                        min_depth = 0;
                        break;
                    }
                    for px in 0..cell {
                        let x = cx * cell + px;
                        if x >= self.viewport_size_x as usize {
                            min_depth = 0;
                            break;
                        }
                        min_depth =
                            min_depth.min(self.depth_buffer[x + y * self.viewport_size_x as usize]);
                    }
                }
                self.depth_hierarchy[0].data[cx + cy * level0_width] = min_depth;
            }
        }

        for level in 1..DEPTH_HIERARCHY_LEVELS {
            let (lower, upper) = self.depth_hierarchy.split_at_mut(level);
            let src = &lower[level - 1];
            let dst = &mut upper[0];
            for cy in 0..dst.height {
                for cx in 0..dst.width {
                    let mut min_depth = u16::MAX;
                    for py in 0..2 {
                        for px in 0..2 {
                            let x = (cx * 2 + px).min(src.width - 1);
                            let y = (cy * 2 + py).min(src.height - 1);
                            min_depth = min_depth.min(src.data[x + y * src.width]);
                        }
                    }
                    dst.data[cx + cy * dst.width] = min_depth;
                }
            }
        }
    }

    /// Conservative test: true when the screen box at depth `z_min` (its
    /// nearest point) lies behind everything already drawn there.
    pub fn is_depth_occluded(
        &self,
        x_min: Fixed16,
        y_min: Fixed16,
        x_max: Fixed16,
        y_max: Fixed16,
        z_min: f32,
    ) -> bool {
        if z_min <= 0.0 {
            return false;
        }
        let box_depth = depth_value(1.0 / z_min);

        let x0 = (x_min >> FIXED16_BASE).max(0);
        let y0 = (y_min >> FIXED16_BASE).max(0);
        let x1 = (x_max >> FIXED16_BASE).min(self.viewport_size_x - 1);
        let y1 = (y_max >> FIXED16_BASE).min(self.viewport_size_y - 1);
        if x0 > x1 || y0 > y1 {
            return true; // fully off screen
        }

        // Pick the smallest level whose cells still cover the box with few
        // lookups.
        let box_size = ((x1 - x0).max(y1 - y0) as usize).max(1);
        let mut level = 0;
        let mut cell = FIRST_DEPTH_HIERARCHY_LEVEL_SIZE;
        while level + 1 < DEPTH_HIERARCHY_LEVELS && cell * 4 < box_size {
            level += 1;
            cell *= 2;
        }

        let hierarchy = &self.depth_hierarchy[level];
        for cy in (y0 as usize / cell)..=(y1 as usize / cell) {
            for cx in (x0 as usize / cell)..=(x1 as usize / cell) {
                let cell_depth = hierarchy.data[cx.min(hierarchy.width - 1)
                    + cy.min(hierarchy.height - 1) * hierarchy.width];
                if box_depth >= cell_depth {
                    return false; // the box may be nearer than this cell
                }
            }
        }
        true
    }

    // ---- occlusion buffer ----

    #[inline]
    fn occlusion_bit(&self, x: i32, y: i32) -> bool {
        let word = &self.occlusion_buffer[(x as usize >> 6)
            + y as usize * self.occlusion_words_per_row];
        word & (1u64 << (x & 63)) != 0
    }

    #[inline]
    fn set_occlusion_bit(&mut self, x: i32, y: i32) {
        self.occlusion_buffer[(x as usize >> 6) + y as usize * self.occlusion_words_per_row] |=
            1u64 << (x & 63);
    }

    fn occlusion_block_full(&self, bx: usize, by: usize) -> bool {
        // A 4x4 pixel block.
        for py in 0..4usize {
            let y = by * 4 + py;
            if y >= self.viewport_size_y as usize {
                continue;
            }
            for px in 0..4usize {
                let x = bx * 4 + px;
                if x >= self.viewport_size_x as usize {
                    continue;
                }
                if !self.occlusion_bit(x as i32, y as i32) {
                    return false;
                }
            }
        }
        true
    }

    /// Refresh the hierarchy words covering the polygon's bounding box. Call
    /// after rasterising an opaque wall with occlusion write.
    pub fn update_occlusion_hierarchy(&mut self, vertices: &[RasterizerVertex]) {
        let (x0, y0, x1, y1) = polygon_screen_box(vertices, self.viewport_size_x, self.viewport_size_y);
        if x0 > x1 || y0 > y1 {
            return;
        }

        // Level 0: each bit of a word is one 4x4 pixel block of a 16x16 area.
        for wy in (y0 as usize / 16)..=(y1 as usize / 16) {
            for wx in (x0 as usize / 16)..=(x1 as usize / 16) {
                if wx >= self.occlusion_hierarchy[0].width
                    || wy >= self.occlusion_hierarchy[0].height
                {
                    continue;
                }
                let mut word = 0u16;
                for by in 0..4usize {
                    for bx in 0..4usize {
                        if self.occlusion_block_full(wx * 4 + bx, wy * 4 + by) {
                            word |= 1 << (bx + by * 4);
                        }
                    }
                }
                let width = self.occlusion_hierarchy[0].width;
                self.occlusion_hierarchy[0].data[wx + wy * width] = word;
            }
        }

        for level in 1..OCCLUSION_HIERARCHY_LEVELS {
            let (lower, upper) = self.occlusion_hierarchy.split_at_mut(level);
            let src = &lower[level - 1];
            let dst = &mut upper[0];
            let cell = 16usize << (2 * level);
            for wy in (y0 as usize / cell)..=(y1 as usize / cell) {
                for wx in (x0 as usize / cell)..=(x1 as usize / cell) {
                    if wx >= dst.width || wy >= dst.height {
                        continue;
                    }
                    let mut word = 0u16;
                    for by in 0..4usize {
                        for bx in 0..4usize {
                            let sx = (wx * 4 + bx).min(src.width - 1);
                            let sy = (wy * 4 + by).min(src.height - 1);
                            if src.data[sx + sy * src.width] == u16::MAX {
                                word |= 1 << (bx + by * 4);
                            }
                        }
                    }
                    dst.data[wx + wy * dst.width] = word;
                }
            }
        }
    }

    /// Conservative: true when every pixel of the polygon's bounding box is
    /// already covered by opaque walls.
    pub fn is_occluded(&self, vertices: &[RasterizerVertex]) -> bool {
        let (x0, y0, x1, y1) = polygon_screen_box(vertices, self.viewport_size_x, self.viewport_size_y);
        if x0 > x1 || y0 > y1 {
            return true;
        }
        for by in (y0 as usize / 4)..=(y1 as usize / 4) {
            for bx in (x0 as usize / 4)..=(x1 as usize / 4) {
                let level = &self.occlusion_hierarchy[0];
                let wx = (bx / 4).min(level.width.saturating_sub(1));
                let wy = (by / 4).min(level.height.saturating_sub(1));
                let word = level.data[wx + wy * level.width];
                let bit = (bx & 3) + (by & 3) * 4;
                if word & (1 << bit) == 0 {
                    return false;
                }
            }
        }
        true
    }

    // ---- triangles ----

    pub fn draw_affine_colored_triangle(&mut self, vertices: &[RasterizerVertex; 3], color: u32) {
        self.draw_triangle_impl(
            vertices,
            DrawOptions {
                depth_test: false,
                depth_write: false,
                alpha_test: false,
                occlusion_test: false,
                occlusion_write: false,
            },
            Some(color),
        );
    }

    /// Perspective-corrected textured triangle.
    pub fn draw_textured_triangle_span_corrected(
        &mut self,
        vertices: &[RasterizerVertex; 3],
        options: DrawOptions,
    ) {
        self.draw_triangle_impl(vertices, options, None);
    }

    fn draw_triangle_impl(
        &mut self,
        vertices: &[RasterizerVertex; 3],
        options: DrawOptions,
        flat_color: Option<u32>,
    ) {
        // Attribute gradients are constant across the triangle; compute them
        // once in floating point, then step in fixed point per scanline.
        let x = [
            vertices[0].x as f32 / FIXED16_ONE as f32,
            vertices[1].x as f32 / FIXED16_ONE as f32,
            vertices[2].x as f32 / FIXED16_ONE as f32,
        ];
        let y = [
            vertices[0].y as f32 / FIXED16_ONE as f32,
            vertices[1].y as f32 / FIXED16_ONE as f32,
            vertices[2].y as f32 / FIXED16_ONE as f32,
        ];

        let area = (x[1] - x[0]) * (y[2] - y[0]) - (x[2] - x[0]) * (y[1] - y[0]);
        if area.abs() < 1e-6 {
            return;
        }
        let inv_area = 1.0 / area;

        let mut inv_z = [0.0f32; 3];
        let mut u_div_z = [0.0f32; 3];
        let mut v_div_z = [0.0f32; 3];
        for i in 0..3 {
            let z = vertices[i].z.max(1.0 / 16.0);
            inv_z[i] = 1.0 / z;
            u_div_z[i] = vertices[i].u as f32 / FIXED16_ONE as f32 * inv_z[i];
            v_div_z[i] = vertices[i].v as f32 / FIXED16_ONE as f32 * inv_z[i];
        }

        let gradient = |a: [f32; 3]| -> (f32, f32) {
            let ddx = ((a[1] - a[0]) * (y[2] - y[0]) - (a[2] - a[0]) * (y[1] - y[0])) * inv_area;
            let ddy = ((a[2] - a[0]) * (x[1] - x[0]) - (a[1] - a[0]) * (x[2] - x[0])) * inv_area;
            (ddx, ddy)
        };
        let (d_iz_dx, d_iz_dy) = gradient(inv_z);
        let (d_uz_dx, d_uz_dy) = gradient(u_div_z);
        let (d_vz_dx, d_vz_dy) = gradient(v_div_z);

        let attr_at = |px: f32, py: f32, a0: f32, ddx: f32, ddy: f32| -> f32 {
            a0 + ddx * (px - x[0]) + ddy * (py - y[0])
        };

        // Sort by y, walk the two edge pairs.
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| y[a].total_cmp(&y[b]));
        let (top, mid, bottom) = (order[0], order[1], order[2]);

        let y_start = (y[top].ceil() as i32).max(0);
        let y_end = (y[bottom].ceil() as i32).min(self.viewport_size_y);

        for py in y_start..y_end {
            let fy = py as f32;

            // Long edge x at this scanline.
            let long_span = y[bottom] - y[top];
            if long_span <= 0.0 {
                continue;
            }
            let x_long = x[top] + (x[bottom] - x[top]) * (fy - y[top]) / long_span;

            // Short edge (top-mid or mid-bottom).
            let x_short = if fy < y[mid] {
                let span = y[mid] - y[top];
                if span <= 0.0 {
                    continue;
                }
                x[top] + (x[mid] - x[top]) * (fy - y[top]) / span
            } else {
                let span = y[bottom] - y[mid];
                if span <= 0.0 {
                    continue;
                }
                x[mid] + (x[bottom] - x[mid]) * (fy - y[mid]) / span
            };

            let (mut x_left, mut x_right) = (x_long.min(x_short), x_long.max(x_short));
            x_left = x_left.max(0.0);
            x_right = x_right.min(self.viewport_size_x as f32);
            let px_start = x_left.ceil() as i32;
            let px_end = x_right.ceil() as i32;
            if px_start >= px_end {
                continue;
            }

            let fx = px_start as f32;
            let iz0 = attr_at(fx, fy, inv_z[top], d_iz_dx, d_iz_dy);
            let uz0 = attr_at(fx, fy, u_div_z[top], d_uz_dx, d_uz_dy);
            let vz0 = attr_at(fx, fy, v_div_z[top], d_vz_dx, d_vz_dy);

            let mut iz_fixed = (iz0 * (1u64 << INV_Z_SHIFT) as f32) as i64;
            let iz_step = (d_iz_dx * (1u64 << INV_Z_SHIFT) as f32) as i64;

            // Texel coordinates recomputed exactly at span boundaries and
            // interpolated linearly inside each span.
            let uv_at = |offset: i32| -> (Fixed16, Fixed16) {
                let f = offset as f32;
                let iz = iz0 + d_iz_dx * f;
                let uz = uz0 + d_uz_dx * f;
                let vz = vz0 + d_vz_dx * f;
                let z = 1.0 / iz.max(1e-6);
                (
                    (uz * z * FIXED16_ONE as f32) as Fixed16,
                    (vz * z * FIXED16_ONE as f32) as Fixed16,
                )
            };

            let row = (py * self.viewport_size_x) as usize;
            let mut offset = 0i32;
            let span_count = px_end - px_start;

            while offset < span_count {
                let span_len = (span_count - offset).min(Z_CORRECT_SPAN_SIZE);
                let (u_begin, v_begin) = uv_at(offset);
                let (u_end, v_end) = uv_at(offset + span_len);
                let du = (u_end - u_begin) / span_len;
                let dv = (v_end - v_begin) / span_len;

                let mut u = u_begin;
                let mut v = v_begin;
                for i in 0..span_len {
                    let px = px_start + offset + i;
                    let index = row + px as usize;
                    let depth = (iz_fixed >> DEPTH_SHIFT).clamp(0, 65535) as u16;

                    let mut draw = true;
                    if options.depth_test && depth <= self.depth_buffer[index] {
                        draw = false;
                    }
                    if draw && options.occlusion_test && self.occlusion_bit(px, py) {
                        draw = false;
                    }

                    if draw {
                        let texel = match flat_color {
                            Some(color) => color,
                            None => self.fetch_texel(u, v),
                        };
                        if !options.alpha_test || texel & ALPHA_MASK != 0 {
                            self.color_buffer[index] = self.apply_light(texel);
                            if options.depth_write {
                                self.depth_buffer[index] = depth;
                            }
                            if options.occlusion_write {
                                self.set_occlusion_bit(px, py);
                            }
                        }
                    }

                    u += du;
                    v += dv;
                    iz_fixed += iz_step;
                }
                offset += span_len;
            }
        }
    }
}

fn polygon_screen_box(
    vertices: &[RasterizerVertex],
    viewport_size_x: i32,
    viewport_size_y: i32,
) -> (i32, i32, i32, i32) {
    let mut x0 = i32::MAX;
    let mut y0 = i32::MAX;
    let mut x1 = i32::MIN;
    let mut y1 = i32::MIN;
    for v in vertices {
        x0 = x0.min(v.x >> FIXED16_BASE);
        y0 = y0.min(v.y >> FIXED16_BASE);
        x1 = x1.max(v.x >> FIXED16_BASE);
        y1 = y1.max(v.y >> FIXED16_BASE);
    }
    (
        x0.max(0),
        y0.max(0),
        x1.min(viewport_size_x - 1),
        y1.min(viewport_size_y - 1),
    )
}

/// 1/z to depth buffer units.
fn depth_value(inv_z: f32) -> u16 {
    (inv_z * 4096.0).clamp(0.0, 65535.0) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use chasm_core::fixed::fixed16_from_float;

    fn vertex(x: f32, y: f32, u: f32, v: f32, z: f32) -> RasterizerVertex {
        RasterizerVertex {
            x: fixed16_from_float(x),
            y: fixed16_from_float(y),
            u: fixed16_from_float(u),
            v: fixed16_from_float(v),
            z,
        }
    }

    fn full_quad(r: &mut Rasterizer, z: f32, color: u32) {
        let (w, h) = r.viewport_size();
        let t = [
            vertex(0.0, 0.0, 0.0, 0.0, z),
            vertex(w as f32, 0.0, 0.0, 0.0, z),
            vertex(0.0, h as f32, 0.0, 0.0, z),
        ];
        r.set_texture(1, 1, &[color]);
        r.draw_textured_triangle_span_corrected(&t, DrawOptions::OPAQUE);
        let t2 = [
            vertex(w as f32, 0.0, 0.0, 0.0, z),
            vertex(w as f32, h as f32, 0.0, 0.0, z),
            vertex(0.0, h as f32, 0.0, 0.0, z),
        ];
        r.draw_textured_triangle_span_corrected(&t2, DrawOptions::OPAQUE);
    }

    #[test]
    fn triangle_fills_inside_pixels_only() {
        let mut r = Rasterizer::new(16, 16);
        r.clear_color_buffer(0);
        r.clear_depth_buffer();
        r.set_texture(1, 1, &[0xFFFF_FFFF]);

        let t = [
            vertex(2.0, 2.0, 0.0, 0.0, 1.0),
            vertex(10.0, 2.0, 0.0, 0.0, 1.0),
            vertex(2.0, 10.0, 0.0, 0.0, 1.0),
        ];
        r.draw_textured_triangle_span_corrected(&t, DrawOptions::OPAQUE);

        let at = |x: usize, y: usize| r.color_buffer()[x + y * 16];
        assert_ne!(at(3, 3), 0);
        assert_eq!(at(0, 0), 0);
        assert_eq!(at(12, 12), 0);
    }

    #[test]
    fn nearer_geometry_wins_the_depth_test() {
        let mut r = Rasterizer::new(8, 8);
        r.clear_color_buffer(0);
        r.clear_depth_buffer();

        full_quad(&mut r, 4.0, 0x00FF_0000);
        full_quad(&mut r, 2.0, 0x0000_FF00); // nearer, overwrites
        let center = r.color_buffer()[4 + 4 * 8];
        assert_eq!(center & 0x00FF_FFFF, 0x0000_FF00);

        full_quad(&mut r, 6.0, 0x0000_00FF); // farther, rejected
        let center = r.color_buffer()[4 + 4 * 8];
        assert_eq!(center & 0x00FF_FFFF, 0x0000_FF00);
    }

    #[test]
    fn perspective_correction_matches_the_exact_solution_at_span_bounds() {
        // A long horizontal strip whose right edge is much deeper; u runs
        // 0..64 texels. At span boundaries (every 16 px) the rasteriser
        // recomputes u exactly, so a 64x1 gradient texture must land on the
        // perspective-exact texel there.
        let width = 64i32;
        let mut r = Rasterizer::new(width as u32, 4);
        r.clear_color_buffer(0);
        r.clear_depth_buffer();

        let mut texture = vec![0u32; 64];
        for (i, t) in texture.iter_mut().enumerate() {
            *t = 0xFF00_0000 | i as u32;
        }
        r.set_texture(64, 1, &texture);

        let z_near = 1.0;
        let z_far = 8.0;
        let t1 = [
            vertex(0.0, 0.0, 0.0, 0.0, z_near),
            vertex(width as f32, 0.0, 64.0, 0.0, z_far),
            vertex(0.0, 4.0, 0.0, 0.0, z_near),
        ];
        let t2 = [
            vertex(width as f32, 0.0, 64.0, 0.0, z_far),
            vertex(width as f32, 4.0, 64.0, 0.0, z_far),
            vertex(0.0, 4.0, 0.0, 0.0, z_near),
        ];
        r.draw_textured_triangle_span_corrected(&t1, DrawOptions::OPAQUE);
        r.draw_textured_triangle_span_corrected(&t2, DrawOptions::OPAQUE);

        for x in [16i32, 32, 48] {
            let k = x as f32 / width as f32;
            // Perspective-correct parameter at that column.
            let inv_z = (1.0 - k) / z_near + k / z_far;
            let u_exact = (k * (64.0 / z_far)) / inv_z;

            let texel = r.color_buffer()[x as usize + 64] & 0xFF;
            assert!(
                (texel as f32 - u_exact).abs() <= 1.5,
                "x={}: texel {} vs exact {}",
                x,
                texel,
                u_exact
            );
        }

        // Pure affine interpolation would land far off at the middle.
        let affine_mid = 32.0;
        let mid_texel = (r.color_buffer()[32 + 64] & 0xFF) as f32;
        assert!((mid_texel - affine_mid).abs() > 4.0);
    }

    #[test]
    fn occlusion_buffer_culls_covered_polygons() {
        let mut r = Rasterizer::new(32, 32);
        r.clear_color_buffer(0);
        r.clear_depth_buffer();
        r.clear_occlusion_buffer();
        r.set_texture(1, 1, &[0xFFFF_FFFF]);

        let quad = [
            vertex(0.0, 0.0, 0.0, 0.0, 1.0),
            vertex(32.0, 0.0, 0.0, 0.0, 1.0),
            vertex(0.0, 32.0, 0.0, 0.0, 1.0),
        ];
        let quad2 = [
            vertex(32.0, 0.0, 0.0, 0.0, 1.0),
            vertex(32.0, 32.0, 0.0, 0.0, 1.0),
            vertex(0.0, 32.0, 0.0, 0.0, 1.0),
        ];

        let small = [
            vertex(8.0, 8.0, 0.0, 0.0, 2.0),
            vertex(16.0, 8.0, 0.0, 0.0, 2.0),
            vertex(8.0, 16.0, 0.0, 0.0, 2.0),
        ];
        assert!(!r.is_occluded(&small));

        r.draw_textured_triangle_span_corrected(&quad, DrawOptions::WALL);
        r.draw_textured_triangle_span_corrected(&quad2, DrawOptions::WALL);
        r.update_occlusion_hierarchy(&quad);
        r.update_occlusion_hierarchy(&quad2);

        assert!(r.is_occluded(&small));
    }

    #[test]
    fn depth_hierarchy_rejects_far_boxes_and_keeps_near_ones() {
        let mut r = Rasterizer::new(32, 32);
        r.clear_color_buffer(0);
        r.clear_depth_buffer();
        full_quad(&mut r, 2.0, 0x00FF_FFFF);
        r.build_depth_buffer_hierarchy();

        let f = |v: f32| fixed16_from_float(v);
        // Behind the full-screen wall at z=2.
        assert!(r.is_depth_occluded(f(4.0), f(4.0), f(20.0), f(20.0), 5.0));
        // In front of it.
        assert!(!r.is_depth_occluded(f(4.0), f(4.0), f(20.0), f(20.0), 1.0));
    }
}
