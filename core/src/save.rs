//! Save-file container: fixed header, comment block, opaque content.
//!
//! Layout on disk, all little-endian:
//! `"PanChSv\0"` magic, `u32` version, `u32` content size, `u32` CRC-32 of the
//! content, a fixed-size comment block, then the content bytes. Any mismatch
//! refuses the load and leaves the running game untouched.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub const SAVE_ID: [u8; 8] = *b"PanChSv\0";
pub const SAVE_VERSION: u32 = 0x105;
pub const SAVE_COMMENT_SIZE: usize = 32;
const HEADER_SIZE: usize = 8 + 4 + 4 + 4;

pub type SaveComment = [u8; SAVE_COMMENT_SIZE];

/// CRC-32 (polynomial 0xEDB88320) in the register convention: initial value
/// 0xFFFFFFFF, no final XOR-out. The empty buffer hashes to 0xFFFFFFFF.
pub fn calculate_hash(data: &[u8]) -> u32 {
    crc32fast::hash(data) ^ 0xFFFF_FFFF
}

pub fn save_file_name_for_slot(slot_number: u32) -> PathBuf {
    PathBuf::from(format!("save_{:02}.sav", slot_number))
}

pub fn make_comment(text: &str) -> SaveComment {
    let mut comment = [0u8; SAVE_COMMENT_SIZE];
    let bytes = text.as_bytes();
    let n = bytes.len().min(SAVE_COMMENT_SIZE - 1);
    comment[..n].copy_from_slice(&bytes[..n]);
    comment
}

pub fn save_data(file_name: &PathBuf, comment: &SaveComment, content: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(HEADER_SIZE + SAVE_COMMENT_SIZE + content.len());
    out.extend_from_slice(&SAVE_ID);
    out.extend_from_slice(&SAVE_VERSION.to_le_bytes());
    out.extend_from_slice(&(content.len() as u32).to_le_bytes());
    out.extend_from_slice(&calculate_hash(content).to_le_bytes());
    out.extend_from_slice(comment);
    out.extend_from_slice(content);

    std::fs::write(file_name, out)
        .with_context(|| format!("can not write save file \"{}\"", file_name.display()))
}

pub fn load_data(file_name: &PathBuf) -> Result<Vec<u8>> {
    let data = std::fs::read(file_name)
        .with_context(|| format!("can not read save file \"{}\"", file_name.display()))?;

    if data.len() < HEADER_SIZE + SAVE_COMMENT_SIZE {
        bail!("save file too short");
    }
    if data[0..8] != SAVE_ID {
        bail!("not a savegame file");
    }

    let version = u32::from_le_bytes(data[8..12].try_into().unwrap());
    if version != SAVE_VERSION {
        bail!("savegame version mismatch: {:#x}", version);
    }

    let content_size = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
    let content_hash = u32::from_le_bytes(data[16..20].try_into().unwrap());

    let content_start = HEADER_SIZE + SAVE_COMMENT_SIZE;
    if data.len() - content_start != content_size {
        bail!("savegame content truncated");
    }

    let content = &data[content_start..];
    if calculate_hash(content) != content_hash {
        bail!("savegame checksum mismatch");
    }

    Ok(content.to_vec())
}

pub fn load_comment(file_name: &PathBuf) -> Result<SaveComment> {
    let data = std::fs::read(file_name)
        .with_context(|| format!("can not read save file \"{}\"", file_name.display()))?;
    if data.len() < HEADER_SIZE + SAVE_COMMENT_SIZE || data[0..8] != SAVE_ID {
        bail!("not a savegame file");
    }
    Ok(data[HEADER_SIZE..HEADER_SIZE + SAVE_COMMENT_SIZE]
        .try_into()
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_empty_buffer_is_all_ones() {
        assert_eq!(calculate_hash(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn hash_of_single_zero_byte_matches_reference() {
        // Reference register value for [0x00] with poly 0xEDB88320: the
        // standard CRC-32 of that byte, un-XORed.
        let mut crc: u32 = 0xFFFF_FFFF;
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut c = i as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 { (c >> 1) ^ 0xEDB8_8320 } else { c >> 1 };
            }
            *entry = c;
        }
        crc = table[(crc ^ 0x00) as usize & 0xFF] ^ (crc >> 8);

        assert_eq!(calculate_hash(&[0x00]), crc);
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save_00.sav");
        let content = b"world state".to_vec();

        save_data(&path, &make_comment("map 1"), &content).unwrap();
        assert_eq!(load_data(&path).unwrap(), content);

        let comment = load_comment(&path).unwrap();
        assert_eq!(&comment[..5], b"map 1");
    }

    #[test]
    fn corrupted_content_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save_00.sav");
        save_data(&path, &make_comment(""), b"state").unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(load_data(&path).is_err());
    }

    #[test]
    fn truncated_content_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save_00.sav");
        save_data(&path, &make_comment(""), b"longer state").unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(load_data(&path).is_err());
    }

    #[test]
    fn wrong_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save_00.sav");
        save_data(&path, &make_comment(""), b"state").unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8] ^= 1;
        std::fs::write(&path, &bytes).unwrap();

        assert!(load_data(&path).is_err());
    }
}
