use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while rewriting a single file in place.
#[derive(Error, Debug)]
pub enum EditError {
    #[error("File I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("File is not valid UTF-8: {path}")]
    Utf8 {
        path: PathBuf,
        source: std::string::FromUtf8Error,
    },

    #[error("Path has no parent directory: {0}")]
    NoParent(PathBuf),
}

impl EditError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        EditError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when the file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EditError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result of rewriting a file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "EditResult should be checked for rewritten/unchanged"]
pub enum EditResult {
    /// New content was written
    Rewritten { file: PathBuf, bytes_written: usize },
    /// Transform produced identical content; the file was not touched
    Unchanged { file: PathBuf },
}

impl EditResult {
    pub fn is_rewritten(&self) -> bool {
        matches!(self, EditResult::Rewritten { .. })
    }
}

/// Rewrite a text file in place.
///
/// `transform` receives the current content and returns the new content, or
/// `None` when there is nothing to change. A file whose content would not
/// change is never written, so its bytes and mtime stay as they were.
pub fn rewrite_file<F>(path: &Path, transform: F) -> Result<EditResult, EditError>
where
    F: FnOnce(&str) -> Option<String>,
{
    let raw = fs::read(path).map_err(|e| EditError::io(path, e))?;
    let content = String::from_utf8(raw).map_err(|source| EditError::Utf8 {
        path: path.to_path_buf(),
        source,
    })?;

    let new_content = transform(&content).map(String::into_bytes);
    commit(path, content.as_bytes(), new_content)
}

/// Rewrite a file in place without decoding it.
///
/// Same contract as [`rewrite_file`], for sources whose encoding is unknown.
pub fn rewrite_bytes<F>(path: &Path, transform: F) -> Result<EditResult, EditError>
where
    F: FnOnce(&[u8]) -> Option<Vec<u8>>,
{
    let raw = fs::read(path).map_err(|e| EditError::io(path, e))?;
    let new_content = transform(&raw);
    commit(path, &raw, new_content)
}

fn commit(
    path: &Path,
    current: &[u8],
    new_content: Option<Vec<u8>>,
) -> Result<EditResult, EditError> {
    let new_content = match new_content {
        Some(new_content) if new_content != current => new_content,
        _ => {
            return Ok(EditResult::Unchanged {
                file: path.to_path_buf(),
            })
        }
    };

    atomic_write(path, &new_content)?;

    // Update mtime so build systems pick up the rewrite
    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now).map_err(|e| EditError::io(path, e))?;

    Ok(EditResult::Rewritten {
        file: path.to_path_buf(),
        bytes_written: new_content.len(),
    })
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the original file is left untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = path
        .parent()
        .ok_or_else(|| EditError::NoParent(path.to_path_buf()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| EditError::io(path, e))?;

    temp.write_all(content).map_err(|e| EditError::io(path, e))?;

    // Flush to disk (fsync)
    temp.as_file()
        .sync_all()
        .map_err(|e| EditError::io(path, e))?;

    // Keep the original permissions; NamedTempFile creates 0600 files
    if let Ok(metadata) = fs::metadata(path) {
        let _ = fs::set_permissions(temp.path(), metadata.permissions());
    }

    // Atomic rename
    temp.persist(path).map_err(|e| EditError::io(path, e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_integration() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"original content").unwrap();

        let result = rewrite_file(&file_path, |c| Some(c.replace("original", "modified"))).unwrap();

        assert!(matches!(result, EditResult::Rewritten { .. }));
        let new_content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(new_content, "modified content");
    }

    #[test]
    fn test_identical_content_is_not_written() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"hello world").unwrap();
        let before = filetime::FileTime::from_last_modification_time(
            &fs::metadata(&file_path).unwrap(),
        );

        let result = rewrite_file(&file_path, |c| Some(c.to_string())).unwrap();

        assert!(matches!(result, EditResult::Unchanged { .. }));
        let after = filetime::FileTime::from_last_modification_time(
            &fs::metadata(&file_path).unwrap(),
        );
        assert_eq!(before, after);
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "hello world");
    }

    #[test]
    fn test_none_transform_is_unchanged() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"hello").unwrap();

        let result = rewrite_file(&file_path, |_| None).unwrap();
        assert!(!result.is_rewritten());
    }

    #[test]
    fn test_missing_file_reports_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = rewrite_file(&temp_dir.path().join("absent.h"), |_| None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_non_utf8_file_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("latin1.h");
        fs::write(&file_path, [0x23, 0xe9, 0xff, 0x0a]).unwrap();

        let err = rewrite_file(&file_path, |c| Some(c.to_uppercase())).unwrap_err();
        assert!(matches!(err, EditError::Utf8 { .. }));
        assert_eq!(fs::read(&file_path).unwrap(), vec![0x23, 0xe9, 0xff, 0x0a]);
    }

    #[test]
    fn test_rewrite_bytes_keeps_undecodable_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("latin1.h");
        fs::write(&file_path, b"// \xa9 2012\nold\n").unwrap();

        let result = rewrite_bytes(&file_path, |raw| {
            let mut new_content = raw.to_vec();
            new_content.truncate(raw.len() - 4);
            new_content.extend_from_slice(b"new\n");
            Some(new_content)
        })
        .unwrap();

        assert!(result.is_rewritten());
        assert_eq!(fs::read(&file_path).unwrap(), b"// \xa9 2012\nnew\n");
    }
}
