//! Read-only virtual filesystem over the game archive.
//!
//! The archive is a flat directory: `"CSid"` magic, a `u16` file count, then
//! fixed records of `{u8 name_len, name[12], u32 size, u32 offset}`. Lookups
//! compare at most the first 12 bytes of the basename, case-insensitively.
//! An optional addon directory overlays the archive: any full requested path
//! found there wins over the archive entry.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};

const ARCHIVE_MAGIC: &[u8; 4] = b"CSid";
const NAME_LENGTH: usize = 12;
const DIRECTORY_RECORD_SIZE: usize = 1 + NAME_LENGTH + 4 + 4;

struct VirtualFile {
    name: [u8; NAME_LENGTH],
    name_len: u8,
    size: u32,
    offset: u32,
}

pub struct Vfs {
    archive: Mutex<File>,
    files: Vec<VirtualFile>,
    addon_paths: Vec<PathBuf>,
}

fn names_equal(record_name: &[u8], record_len: u8, requested: &[u8]) -> bool {
    let record = &record_name[..record_len.min(NAME_LENGTH as u8) as usize];
    let requested = &requested[..requested.len().min(NAME_LENGTH)];
    record.len() == requested.len()
        && record
            .iter()
            .zip(requested)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn extract_basename(file_path: &str) -> &str {
    match file_path.rfind(['/', '\\']) {
        Some(pos) => &file_path[pos + 1..],
        None => file_path,
    }
}

impl Vfs {
    /// Open the archive and parse its directory. A missing or corrupt archive
    /// is fatal.
    pub fn open(archive_file_name: &Path, addon_paths: &[PathBuf]) -> Result<Vfs> {
        let mut archive = File::open(archive_file_name)
            .with_context(|| format!("could not open archive \"{}\"", archive_file_name.display()))?;

        let mut header = [0u8; 4];
        archive
            .read_exact(&mut header)
            .context("archive too short for header")?;
        if &header != ARCHIVE_MAGIC {
            bail!(
                "\"{}\" is not a \"Chasm: The Rift\" archive",
                archive_file_name.display()
            );
        }

        let mut count_bytes = [0u8; 2];
        archive
            .read_exact(&mut count_bytes)
            .context("archive too short for file count")?;
        let file_count = u16::from_le_bytes(count_bytes) as usize;

        let mut directory = vec![0u8; file_count * DIRECTORY_RECORD_SIZE];
        archive
            .read_exact(&mut directory)
            .context("archive too short for directory")?;

        let mut files = Vec::with_capacity(file_count);
        for record in directory.chunks_exact(DIRECTORY_RECORD_SIZE) {
            let name_len = record[0].min(NAME_LENGTH as u8);
            let mut name = [0u8; NAME_LENGTH];
            name.copy_from_slice(&record[1..1 + NAME_LENGTH]);
            let size = u32::from_le_bytes(record[13..17].try_into().unwrap());
            let offset = u32::from_le_bytes(record[17..21].try_into().unwrap());
            files.push(VirtualFile {
                name,
                name_len,
                size,
                offset,
            });
        }

        Ok(Vfs {
            archive: Mutex::new(archive),
            files,
            addon_paths: addon_paths.to_vec(),
        })
    }

    /// Read a whole file. The addon overlay is consulted first with the full
    /// requested path; the archive with the basename only. A missing file
    /// yields an empty vector (callers substitute an empty asset).
    pub fn read_file(&self, file_path: &str) -> Vec<u8> {
        for addon_path in &self.addon_paths {
            let fs_path = addon_path.join(file_path);
            if let Ok(mut file) = File::open(&fs_path) {
                let mut content = Vec::new();
                if file.read_to_end(&mut content).is_ok() {
                    return content;
                }
            }
        }

        let basename = extract_basename(file_path);

        // First record wins on duplicate names.
        for file in &self.files {
            if !names_equal(&file.name, file.name_len, basename.as_bytes()) {
                continue;
            }

            let mut content = vec![0u8; file.size as usize];
            let mut archive = self.archive.lock().unwrap();
            if archive.seek(SeekFrom::Start(file.offset as u64)).is_err()
                || archive.read_exact(&mut content).is_err()
            {
                log::warn!("short read for \"{}\" in archive", file_path);
                return Vec::new();
            }
            return content;
        }

        log::warn!("file \"{}\" not found", file_path);
        Vec::new()
    }

    /// Directory of (name, size) pairs, in archive order.
    pub fn directory(&self) -> impl Iterator<Item = (String, u32)> + '_ {
        self.files.iter().map(|f| {
            (
                String::from_utf8_lossy(&f.name[..f.name_len as usize]).into_owned(),
                f.size,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::write_archive;

    #[test]
    fn directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_archive(
            &archive_path,
            &[("FLOOR01.CEL", b"abc"), ("CHASM2.PAL", &[7u8; 768])],
        );

        let vfs = Vfs::open(&archive_path, &[]).unwrap();
        for (name, size) in vfs.directory().collect::<Vec<_>>() {
            assert_eq!(vfs.read_file(&name).len(), size as usize);
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_basename_only() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_archive(&archive_path, &[("MODEL.3O", b"model-bytes")]);

        let vfs = Vfs::open(&archive_path, &[]).unwrap();
        assert_eq!(vfs.read_file("model.3o"), b"model-bytes");
        assert_eq!(vfs.read_file("MODELS/MODEL.3O"), b"model-bytes");
        assert_eq!(vfs.read_file("MODELS\\Model.3o"), b"model-bytes");
    }

    #[test]
    fn first_record_wins_on_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_archive(&archive_path, &[("A.CEL", b"first"), ("A.CEL", b"second")]);

        let vfs = Vfs::open(&archive_path, &[]).unwrap();
        assert_eq!(vfs.read_file("A.CEL"), b"first");
    }

    #[test]
    fn addon_overlay_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_archive(&archive_path, &[("A.CEL", b"archive")]);

        let addon = dir.path().join("addon");
        std::fs::create_dir_all(addon.join("SUB")).unwrap();
        std::fs::write(addon.join("SUB").join("A.CEL"), b"overlay").unwrap();

        let vfs = Vfs::open(&archive_path, &[addon]).unwrap();
        assert_eq!(vfs.read_file("SUB/A.CEL"), b"overlay");
        // Full-path overlay lookup only; the bare name still hits the archive.
        assert_eq!(vfs.read_file("A.CEL"), b"archive");
    }

    #[test]
    fn missing_file_yields_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_archive(&archive_path, &[]);

        let vfs = Vfs::open(&archive_path, &[]).unwrap();
        assert!(vfs.read_file("NOPE.CEL").is_empty());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("BAD.BIN");
        std::fs::write(&archive_path, b"NOPE\x00\x00").unwrap();
        assert!(Vfs::open(&archive_path, &[]).is_err());
    }
}
