//! Whole-document atomic writes
//!
//! Documents are written to a sibling temp file, synced, then renamed over the
//! target. Readers observe either the old document or the new one.

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `bytes`
///
/// # Errors
/// Any I/O failure while creating, writing, syncing or renaming the temp file.
/// On error the previous document at `path` is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    write_atomic_with(path, bytes, |_| Ok(()))
}

/// [`write_atomic`] with a hook run on the synced temp file before the rename
///
/// An error from the hook aborts the write; the temp file is removed and the
/// target is not touched.
pub(crate) fn write_atomic_with<F>(
    path: &Path,
    bytes: &[u8],
    before_persist: F,
) -> std::io::Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    before_persist(tmp.path())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and atomically replace `path`
///
/// # Errors
/// Serialization failures are reported as `InvalidData`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    write_atomic(path, &json_bytes(value)?)
}

pub(crate) fn json_bytes<T: Serialize>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn replaces_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn failing_hook_keeps_target_and_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"first").unwrap();

        let mut staged = PathBuf::new();
        let err = write_atomic_with(&path, b"second", |tmp| {
            staged = tmp.to_path_buf();
            assert_eq!(std::fs::read(tmp)?, b"second");
            Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "stop"))
        })
        .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        assert!(!staged.exists());
    }

    #[test]
    fn creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_json_atomic(&path, &serde_json::json!({"k": 1})).unwrap();
        assert!(path.exists());
    }
}
