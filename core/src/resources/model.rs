//! Animated model decoding.
//!
//! Two containers share one body layout: `.3o` files (items, weapons, rockets,
//! gibs) carry the body alone and may be extended with standalone animation
//! files, whose frames are concatenated after the body's; `.car` files
//! (monsters) prefix the body with an animation table and a sound index table.
//!
//! Body layout, little-endian:
//! `u16 vertex_count, u16 triangle_count, u16 frame_count,
//! u16 skin_width, u16 skin_height`, then `triangle_count` records of
//! `{u16 idx[3], u16 uv[3][2], u16 flags}`, the indexed skin, and
//! `frame_count * vertex_count` vertex positions as 8.8 `i16[3]`.

pub const ANIMATIONS_FPS: f32 = 20.0;

/// Triangle flag: rendered translucent, after opaque geometry.
pub const TRIANGLE_FLAG_TRANSLUCENT: u16 = 1 << 0;

#[derive(Clone, Copy)]
pub struct ModelTriangle {
    pub vertex_indices: [u16; 3],
    pub tex_coords: [[u16; 2]; 3],
    pub flags: u16,
}

#[derive(Clone, Copy)]
pub struct ModelAnimation {
    pub first_frame: u32,
    pub frame_count: u32,
}

pub struct Model {
    pub vertex_count: u32,
    pub frame_count: u32,
    pub triangles: Vec<ModelTriangle>,
    pub skin_size: [u32; 2],
    pub skin: Vec<u8>,
    /// 8.8 positions, `frame_count * vertex_count` entries.
    pub frame_vertices: Vec<[i16; 3]>,
    pub animations: Vec<ModelAnimation>,
    /// Axis-aligned bounds over all frames, world units.
    pub bbox_min: [f32; 3],
    pub bbox_max: [f32; 3],
}

impl Model {
    pub fn empty() -> Self {
        Model {
            vertex_count: 0,
            frame_count: 0,
            triangles: Vec::new(),
            skin_size: [0, 0],
            skin: Vec::new(),
            frame_vertices: Vec::new(),
            animations: Vec::new(),
            bbox_min: [0.0; 3],
            bbox_max: [0.0; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    pub fn frame_vertices(&self, frame: u32) -> &[[i16; 3]] {
        let n = self.vertex_count as usize;
        &self.frame_vertices[frame as usize * n..][..n]
    }

    fn update_bbox(&mut self) {
        if self.frame_vertices.is_empty() {
            return;
        }
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for v in &self.frame_vertices {
            for j in 0..3 {
                let c = v[j] as f32 / 256.0;
                min[j] = min[j].min(c);
                max[j] = max[j].max(c);
            }
        }
        self.bbox_min = min;
        self.bbox_max = max;
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn u16(&mut self) -> Option<u16> {
        let v = u16::from_le_bytes(self.bytes.get(self.pos..self.pos + 2)?.try_into().ok()?);
        self.pos += 2;
        Some(v)
    }

    fn i16(&mut self) -> Option<i16> {
        self.u16().map(|v| v as i16)
    }

    fn slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let s = self.bytes.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(s)
    }
}

fn load_body(cursor: &mut Cursor) -> Option<Model> {
    let vertex_count = cursor.u16()? as u32;
    let triangle_count = cursor.u16()? as u32;
    let frame_count = cursor.u16()? as u32;
    let skin_width = cursor.u16()? as u32;
    let skin_height = cursor.u16()? as u32;

    let mut triangles = Vec::with_capacity(triangle_count as usize);
    for _ in 0..triangle_count {
        let vertex_indices = [cursor.u16()?, cursor.u16()?, cursor.u16()?];
        let mut tex_coords = [[0u16; 2]; 3];
        for tc in &mut tex_coords {
            tc[0] = cursor.u16()?;
            tc[1] = cursor.u16()?;
        }
        let flags = cursor.u16()?;
        if vertex_indices.iter().any(|&i| i as u32 >= vertex_count) {
            return None;
        }
        triangles.push(ModelTriangle {
            vertex_indices,
            tex_coords,
            flags,
        });
    }

    let skin = cursor.slice((skin_width * skin_height) as usize)?.to_vec();

    let mut frame_vertices = Vec::with_capacity((frame_count * vertex_count) as usize);
    for _ in 0..frame_count * vertex_count {
        frame_vertices.push([cursor.i16()?, cursor.i16()?, cursor.i16()?]);
    }

    let mut model = Model {
        vertex_count,
        frame_count,
        triangles,
        skin_size: [skin_width, skin_height],
        skin,
        frame_vertices,
        animations: vec![ModelAnimation {
            first_frame: 0,
            frame_count,
        }],
        bbox_min: [0.0; 3],
        bbox_max: [0.0; 3],
    };
    model.update_bbox();
    Some(model)
}

/// Extra frames in an animation file: `u16 frame_count`, then frames in the
/// body's vertex layout.
fn append_animation(model: &mut Model, animation_file: &[u8]) -> Option<()> {
    let mut cursor = Cursor::new(animation_file);
    let frame_count = cursor.u16()? as u32;

    let first_frame = model.frame_count;
    for _ in 0..frame_count * model.vertex_count {
        model
            .frame_vertices
            .push([cursor.i16()?, cursor.i16()?, cursor.i16()?]);
    }
    model.frame_count += frame_count;
    model.animations.push(ModelAnimation {
        first_frame,
        frame_count,
    });
    Some(())
}

/// Load a `.3o` model, concatenating any animation files after the embedded
/// frames. Missing or corrupt input yields the empty model.
pub fn load_model_o3(model_file: &[u8], animation_files: &[&[u8]]) -> Model {
    let mut cursor = Cursor::new(model_file);
    let mut model = match load_body(&mut cursor) {
        Some(model) => model,
        None => {
            if !model_file.is_empty() {
                log::warn!("invalid 3o model ({} bytes)", model_file.len());
            }
            return Model::empty();
        }
    };

    for animation_file in animation_files {
        if animation_file.is_empty() {
            continue;
        }
        if append_animation(&mut model, animation_file).is_none() {
            log::warn!("invalid model animation file, skipped");
        }
    }

    model.update_bbox();
    model
}

/// Load a `.car` monster model: `u16 animation_count`, animation table of
/// `{u16 first_frame, u16 frame_count}`, `u16 sound_ids[8]`, then the body.
pub fn load_model_car(model_file: &[u8]) -> Model {
    let mut cursor = Cursor::new(model_file);

    let parse = |cursor: &mut Cursor| -> Option<Model> {
        let animation_count = cursor.u16()? as usize;
        let mut animations = Vec::with_capacity(animation_count);
        for _ in 0..animation_count {
            animations.push(ModelAnimation {
                first_frame: cursor.u16()? as u32,
                frame_count: cursor.u16()? as u32,
            });
        }
        for _ in 0..8 {
            cursor.u16()?; // sound table, consumed by the sound engine
        }

        let mut model = load_body(cursor)?;
        if !animations.is_empty() {
            for animation in &animations {
                if animation.first_frame + animation.frame_count > model.frame_count {
                    return None;
                }
            }
            model.animations = animations;
        }
        Some(model)
    };

    match parse(&mut cursor) {
        Some(model) => model,
        None => {
            if !model_file.is_empty() {
                log::warn!("invalid car model ({} bytes)", model_file.len());
            }
            Model::empty()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Single-triangle body with the given frames of three vertices each.
    pub(crate) fn build_body(frames: &[[[i16; 3]; 3]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&3u16.to_le_bytes()); // vertices
        out.extend_from_slice(&1u16.to_le_bytes()); // triangles
        out.extend_from_slice(&(frames.len() as u16).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes()); // skin 2x2
        out.extend_from_slice(&2u16.to_le_bytes());

        for idx in [0u16, 1, 2] {
            out.extend_from_slice(&idx.to_le_bytes());
        }
        for _ in 0..6 {
            out.extend_from_slice(&0u16.to_le_bytes()); // uv
        }
        out.extend_from_slice(&0u16.to_le_bytes()); // flags

        out.extend_from_slice(&[9u8; 4]); // skin

        for frame in frames {
            for v in frame {
                for c in v {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
        }
        out
    }

    #[test]
    fn o3_decodes_frames_and_bbox() {
        let body = build_body(&[
            [[0, 0, 0], [256, 0, 0], [0, 256, 0]],
            [[0, 0, 128], [256, 0, 128], [0, 256, 128]],
        ]);
        let model = load_model_o3(&body, &[]);

        assert_eq!(model.vertex_count, 3);
        assert_eq!(model.frame_count, 2);
        assert_eq!(model.frame_vertices(1)[0], [0, 0, 128]);
        assert_eq!(model.bbox_max, [1.0, 1.0, 0.5]);
    }

    #[test]
    fn animation_files_concatenate_after_embedded_frames() {
        let body = build_body(&[[[0, 0, 0], [1, 0, 0], [0, 1, 0]]]);

        let mut animation = Vec::new();
        animation.extend_from_slice(&2u16.to_le_bytes());
        for _ in 0..2 * 3 {
            for c in [5i16, 6, 7] {
                animation.extend_from_slice(&c.to_le_bytes());
            }
        }

        let model = load_model_o3(&body, &[&animation]);
        assert_eq!(model.frame_count, 3);
        assert_eq!(model.animations.len(), 2);
        assert_eq!(model.animations[1].first_frame, 1);
        assert_eq!(model.animations[1].frame_count, 2);
    }

    #[test]
    fn car_reads_the_animation_table() {
        let mut out = Vec::new();
        out.extend_from_slice(&2u16.to_le_bytes()); // animations
        for (first, count) in [(0u16, 1u16), (1, 1)] {
            out.extend_from_slice(&first.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
        }
        for _ in 0..8 {
            out.extend_from_slice(&0u16.to_le_bytes()); // sounds
        }
        out.extend_from_slice(&build_body(&[
            [[0, 0, 0], [1, 0, 0], [0, 1, 0]],
            [[0, 0, 1], [1, 0, 1], [0, 1, 1]],
        ]));

        let model = load_model_car(&out);
        assert_eq!(model.frame_count, 2);
        assert_eq!(model.animations.len(), 2);
        assert_eq!(model.animations[1].first_frame, 1);
    }

    #[test]
    fn corrupt_input_yields_empty_model() {
        assert!(load_model_o3(&[1, 2, 3], &[]).is_empty());
        assert!(load_model_car(&[0xFF; 5]).is_empty());
        assert!(load_model_o3(&[], &[]).is_empty());
    }
}
