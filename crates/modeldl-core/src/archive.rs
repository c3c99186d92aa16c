//! Archive Extractor: zip detection and extraction (spec §4.4).
//!
//! Extraction runs before finalization; on failure the original archive is
//! preserved and any partial extraction directory is removed so the
//! `PersistedDownload` never transitions to `completed` over a half-unpacked
//! payload.

use crate::{DownloadError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Case-insensitive extension check; does not touch the file contents.
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Magic-number check: a zip file (or empty zip) begins with `PK\x03\x04`,
/// `PK\x05\x06`, or `PK\x07\x08`.
pub fn is_valid_zip(path: &Path) -> Result<bool> {
    use std::io::Read;
    let mut file = File::open(path).map_err(|e| DownloadError::io_with_path(e, path))?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return Ok(false);
    }
    Ok(matches!(
        magic,
        [0x50, 0x4b, 0x03, 0x04] | [0x50, 0x4b, 0x05, 0x06] | [0x50, 0x4b, 0x07, 0x08]
    ))
}

/// Extract `at` into a fresh directory `to`. On failure, `to` is removed and
/// `at` is left untouched so the caller can retry or inspect it.
pub fn extract_zip(at: &Path, to: &Path) -> Result<PathBuf> {
    match extract_zip_inner(at, to) {
        Ok(()) => Ok(to.to_path_buf()),
        Err(e) => {
            std::fs::remove_dir_all(to).ok();
            Err(e)
        }
    }
}

fn extract_zip_inner(at: &Path, to: &Path) -> Result<()> {
    if !is_valid_zip(at)? {
        return Err(DownloadError::ArchiveInvalid(at.to_path_buf()));
    }

    std::fs::create_dir_all(to).map_err(|e| DownloadError::io_with_path(e, to))?;

    let file = File::open(at).map_err(|e| DownloadError::io_with_path(e, at))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| DownloadError::ExtractionFailed {
        path: at.to_path_buf(),
        message: e.to_string(),
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| DownloadError::ExtractionFailed {
            path: at.to_path_buf(),
            message: format!("reading entry {}: {}", i, e),
        })?;

        let outpath = match entry.enclosed_name() {
            Some(path) => to.join(path),
            None => continue, // reject entries escaping the extraction root
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| DownloadError::io_with_path(e, outpath.clone()))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DownloadError::io_with_path(e, parent.to_path_buf()))?;
            }
            let mut outfile =
                File::create(&outpath).map_err(|e| DownloadError::io_with_path(e, outpath.clone()))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| DownloadError::io_with_path(e, outpath.clone()))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::{FileOptions, ZipWriter};

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn is_zip_is_case_insensitive() {
        assert!(is_zip(Path::new("model.ZIP")));
        assert!(is_zip(Path::new("model.zip")));
        assert!(!is_zip(Path::new("model.gguf")));
    }

    #[test]
    fn extract_zip_writes_nested_file() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("model.zip");
        make_zip(&zip_path, &[("model.mlmodelc/model", b"weights")]);

        let dest = tmp.path().join("extracted");
        let result = extract_zip(&zip_path, &dest).unwrap();

        assert_eq!(result, dest);
        assert!(dest.join("model.mlmodelc").join("model").exists());
        assert!(zip_path.exists(), "original archive must be preserved");
    }

    #[test]
    fn extract_zip_invalid_archive_preserves_original_and_cleans_dest() {
        let tmp = TempDir::new().unwrap();
        let not_a_zip = tmp.path().join("bad.zip");
        std::fs::write(&not_a_zip, b"not a zip").unwrap();

        let dest = tmp.path().join("extracted");
        let result = extract_zip(&not_a_zip, &dest);

        assert!(result.is_err());
        assert!(not_a_zip.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn is_valid_zip_checks_magic_bytes() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("real.zip");
        make_zip(&zip_path, &[("a.txt", b"hi")]);
        assert!(is_valid_zip(&zip_path).unwrap());

        let fake = tmp.path().join("fake.zip");
        std::fs::write(&fake, b"PKxx").unwrap();
        assert!(!is_valid_zip(&fake).unwrap());
    }
}
