//! Crash-safe JSON documents on disk.
//!
//! A write serializes into a uniquely named temporary file in the target's
//! directory, syncs it and persists it over the target with a rename. Any
//! number of writers may race on one path: each rename is atomic, so a reader
//! sees one complete document or another, never a mix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use seekchat_core::error::ChatError;
use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum JsonFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not lock {}: {source}", path.display())]
    Lock { path: PathBuf, source: io::Error },
}

impl From<JsonFileError> for ChatError {
    fn from(e: JsonFileError) -> Self {
        match e {
            JsonFileError::Io(err) => ChatError::from(err),
            JsonFileError::Json(err) => ChatError::from(err),
            lock @ JsonFileError::Lock { .. } => ChatError::storage(lock.to_string()),
        }
    }
}

/// Typed handle to one JSON document.
///
/// Writers to the same path are serialized through an advisory lock on a
/// `.{name}.lock` sibling, which stays on disk between writes.
pub struct AtomicJsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AtomicJsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document. A missing or empty file reads as `None`.
    pub fn load(&self) -> Result<Option<T>, JsonFileError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Replaces the document with `value`.
    pub fn save(&self, value: &T) -> Result<(), JsonFileError> {
        let _guard = self.lock()?;
        self.write(value)
    }

    /// Deletes the document. Deleting a missing file succeeds.
    pub fn remove(&self) -> Result<(), JsonFileError> {
        let _guard = self.lock()?;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Read-modify-write under the lock, starting from `default` when the
    /// file does not exist yet.
    pub fn update<F, R>(&self, default: T, f: F) -> Result<R, JsonFileError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.lock()?;
        let mut value = self.load()?.unwrap_or(default);
        let out = f(&mut value);
        self.write(&value)?;
        Ok(out)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn lock(&self) -> Result<File, JsonFileError> {
        fs::create_dir_all(self.dir())?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = self.dir().join(format!(".{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()
            .map_err(|source| JsonFileError::Lock { path, source })?;
        // Released when the handle is dropped.
        Ok(file)
    }

    fn write(&self, value: &T) -> Result<(), JsonFileError> {
        let json = serde_json::to_vec(value)?;
        let mut tmp = NamedTempFile::new_in(self.dir())?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
