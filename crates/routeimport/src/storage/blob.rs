use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{Datelike, Utc};

use crate::error::StorageError;
use crate::spreadsheet::ReadSeek;

/// Durable store for uploaded spreadsheet bytes.
///
/// `put` returns an opaque handle (a path relative to the store) that is
/// persisted on the file record and later passed back to `open`.
pub trait BlobStore: Send + Sync {
    fn put(&self, original_name: &str, content: &[u8]) -> Result<String, StorageError>;
    fn open(&self, handle: &str) -> Result<Box<dyn ReadSeek>, StorageError>;
}

/// Blob store backed by a directory tree: `<root>/<yyyy-mm-dd>/<name>`.
pub struct FileSystemBlobStore {
    root: PathBuf,
}

impl FileSystemBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Creates the file with O_EXCL, trying `name`, `name_2`, `name_3`, ...
    /// so two concurrent uploads of the same name never overwrite each other.
    fn create_unique(
        &self,
        dir_path: &Path,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let (base, ext) = match filename.rfind('.') {
            Some(dot_pos) if dot_pos > 0 => (&filename[..dot_pos], Some(&filename[dot_pos..])),
            _ => (filename, None),
        };

        for counter in 1..=1000 {
            let try_filename = if counter == 1 {
                filename.to_string()
            } else {
                match ext {
                    Some(ext) => format!("{}_{}{}", base, counter, ext),
                    None => format!("{}_{}", base, counter),
                }
            };

            let try_path = dir_path.join(&try_filename);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&try_path)
            {
                Ok(mut file) => {
                    file.write_all(content)
                        .map_err(|e| StorageError::WriteFile {
                            path: try_path.clone(),
                            source: e,
                        })?;
                    return Ok(try_path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::WriteFile {
                        path: try_path,
                        source: e,
                    });
                }
            }
        }

        Err(StorageError::NameExhausted(filename.to_string()))
    }
}

/// Keeps only the final path component of a client-supplied name.
fn sanitize_name(original_name: &str) -> Result<String, StorageError> {
    let name = Path::new(original_name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(StorageError::InvalidName(original_name.to_string()));
    }
    Ok(name)
}

/// Handles must be relative and stay inside the store.
fn validate_handle(handle: &str) -> Result<&Path, StorageError> {
    let path = Path::new(handle);
    let inside = !handle.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if inside {
        Ok(path)
    } else {
        Err(StorageError::InvalidName(handle.to_string()))
    }
}

impl BlobStore for FileSystemBlobStore {
    fn put(&self, original_name: &str, content: &[u8]) -> Result<String, StorageError> {
        let filename = sanitize_name(original_name)?;

        let now = Utc::now();
        let day = format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day());
        let dir_path = self.root.join(&day);
        self.ensure_directory(&dir_path)?;

        let stored = self.create_unique(&dir_path, &filename, content)?;
        let stored_name = stored
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidName(filename.clone()))?;

        log::debug!("Stored blob {} as {}/{}", original_name, day, stored_name);
        Ok(format!("{}/{}", day, stored_name))
    }

    fn open(&self, handle: &str) -> Result<Box<dyn ReadSeek>, StorageError> {
        let relative = validate_handle(handle)?;
        let path = self.root.join(relative);
        let file = std::fs::File::open(&path).map_err(|e| StorageError::OpenBlob { path, source: e })?;
        Ok(Box::new(file))
    }
}
