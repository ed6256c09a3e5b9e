//! Obj-sprite decoding.
//!
//! An obj file is a `u16` frame count followed by frames of
//! `{u16 size[2], u16 x_center}` headers and column-major indexed pixels.
//! Frames are unpacked into one common-size buffer, centred on `x_center`,
//! with index 255 filling the margins.

pub struct ObjSprite {
    pub size: [u32; 2],
    pub frame_count: u32,
    /// `size[0] * size[1]` indexed pixels per frame, frames back to back.
    pub data: Vec<u8>,
}

impl ObjSprite {
    pub fn empty() -> Self {
        ObjSprite {
            size: [0, 0],
            frame_count: 0,
            data: Vec::new(),
        }
    }

    pub fn frame(&self, f: u32) -> &[u8] {
        let frame_size = (self.size[0] * self.size[1]) as usize;
        &self.data[frame_size * f as usize..][..frame_size]
    }
}

const FRAME_HEADER_SIZE: usize = 6;

struct FrameHeader {
    size: [u16; 2],
    x_center: u16,
}

fn read_frame_header(bytes: &[u8]) -> FrameHeader {
    FrameHeader {
        size: [
            u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
        ],
        x_center: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
    }
}

pub fn load_obj_sprite(obj_file: &[u8]) -> ObjSprite {
    if obj_file.len() < 2 {
        return ObjSprite::empty();
    }
    let frame_count = u16::from_le_bytes(obj_file[0..2].try_into().unwrap()) as u32;

    // First pass - common size.
    let mut max_size = [0u32; 2];
    let mut ptr = 2usize;
    for _ in 0..frame_count {
        if ptr + FRAME_HEADER_SIZE > obj_file.len() {
            log::warn!("truncated obj sprite");
            return ObjSprite::empty();
        }
        let header = read_frame_header(&obj_file[ptr..]);
        max_size[0] = max_size[0]
            .max(header.size[0] as u32)
            .max(header.x_center as u32 * 2);
        max_size[1] = max_size[1].max(header.size[1] as u32);
        ptr += FRAME_HEADER_SIZE + header.size[0] as usize * header.size[1] as usize;
        if ptr > obj_file.len() {
            log::warn!("truncated obj sprite");
            return ObjSprite::empty();
        }
    }

    let mut sprite = ObjSprite {
        size: max_size,
        frame_count,
        data: vec![255u8; (max_size[0] * max_size[1]) as usize * frame_count as usize],
    };

    // Second pass - unpack, centre and flip columns into rows.
    let mut ptr = 2usize;
    for f in 0..frame_count {
        let header = read_frame_header(&obj_file[ptr..]);
        let width = header.size[0] as usize;
        let height = header.size[1] as usize;
        let x_offset = (sprite.size[0] / 2).saturating_sub(header.x_center as u32) as usize;

        let src = &obj_file[ptr + FRAME_HEADER_SIZE..][..width * height];
        let frame_size = (sprite.size[0] * sprite.size[1]) as usize;
        let dst = &mut sprite.data[frame_size * f as usize..][..frame_size];

        for y in 0..height {
            for x in 0..width {
                dst[x_offset + x + y * sprite.size[0] as usize] = src[(height - 1 - y) + x * height];
            }
        }

        ptr += FRAME_HEADER_SIZE + width * height;
    }

    sprite
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_obj(frames: &[(u16, u16, u16, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(frames.len() as u16).to_le_bytes());
        for (w, h, x_center, pixels) in frames {
            out.extend_from_slice(&w.to_le_bytes());
            out.extend_from_slice(&h.to_le_bytes());
            out.extend_from_slice(&x_center.to_le_bytes());
            out.extend_from_slice(pixels);
        }
        out
    }

    #[test]
    fn single_frame_is_flipped_from_columns() {
        // 2x2 frame stored column-major bottom-up: columns [a,b], [c,d].
        let file = build_obj(&[(2, 2, 1, &[1, 2, 3, 4])]);
        let sprite = load_obj_sprite(&file);

        assert_eq!(sprite.size, [2, 2]);
        assert_eq!(sprite.frame_count, 1);
        // dst[x + y*w] = src[(h-1-y) + x*h]
        assert_eq!(sprite.frame(0), &[2, 4, 1, 3]);
    }

    #[test]
    fn frames_share_the_max_size_with_transparent_margins() {
        let file = build_obj(&[(2, 2, 1, &[1, 2, 3, 4]), (4, 1, 2, &[5, 6, 7, 8])]);
        let sprite = load_obj_sprite(&file);

        assert_eq!(sprite.size, [4, 2]);
        // Small frame centred: x_offset = 4/2 - 1 = 1; untouched cells are 255.
        let frame0 = sprite.frame(0);
        assert_eq!(frame0[0], 255);
        assert_eq!(frame0[1], 2);
    }

    #[test]
    fn truncated_file_yields_empty_sprite() {
        let mut file = build_obj(&[(4, 4, 2, &[0u8; 16])]);
        file.truncate(10);
        let sprite = load_obj_sprite(&file);
        assert_eq!(sprite.frame_count, 0);
        assert!(sprite.data.is_empty());
    }
}
