//! Cache file on disk
//!
//! Uses the write-fsync-rename pattern so a crash never leaves a partially
//! written cache behind under the final name.
//!
//! # Crash Safety
//!
//! 1. Write to a temporary file (`.<name>.tmp`) in the same directory
//! 2. fsync the temporary file
//! 3. Atomic rename to the final path
//! 4. fsync the directory
//!
//! A temporary file left by a crash is removed by
//! [`CacheFile::cleanup_temp_files`] or overwritten by the next save.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::serializer::{CacheSerializer, SerializationResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wsmodel_storage::{Builder, Snapshot};

/// Outcome of loading a cache file
#[derive(Debug)]
pub enum CacheLoad {
    /// Cache restored
    Loaded(Builder),
    /// No usable cache: missing file, other format version or changed
    /// contributors. Rebuild from the source of truth.
    Miss,
    /// Cache unreadable; the file has been deleted unless the failure was
    /// an I/O error
    Discarded(CacheError),
}

/// Cache file inside a directory
#[derive(Debug, Clone)]
pub struct CacheFile {
    dir: PathBuf,
    name: String,
    buffer_size: usize,
}

impl CacheFile {
    /// Cache file in `dir`, named by `config`
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(dir: impl Into<PathBuf>, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(CacheFile {
            dir,
            name: config.cache_file_name.clone(),
            buffer_size: config.buffer_size,
        })
    }

    /// Final path of the cache
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.tmp", self.name))
    }

    /// Directory holding the cache
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a cache has been saved
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Serialize `snapshot` and atomically replace the cache
    ///
    /// On failure the previous cache, if any, is left in place.
    pub fn save(&self, serializer: &CacheSerializer, snapshot: &Snapshot) -> SerializationResult {
        let temp_path = self.temp_path();
        let result = self.write_temp(serializer, snapshot, &temp_path);
        match result {
            Ok(SerializationResult::Success { size }) => match self.publish(&temp_path) {
                Ok(()) => {
                    debug!(path = %self.path().display(), size, "Saved workspace model cache");
                    SerializationResult::Success { size }
                }
                Err(e) => {
                    warn!(path = %self.path().display(), error = %e, "Failed to publish cache");
                    let _ = fs::remove_file(&temp_path);
                    SerializationResult::Fail(e.to_string())
                }
            },
            Ok(fail @ SerializationResult::Fail(_)) => {
                let _ = fs::remove_file(&temp_path);
                fail
            }
            Err(e) => {
                warn!(path = %temp_path.display(), error = %e, "Failed to write cache");
                let _ = fs::remove_file(&temp_path);
                SerializationResult::Fail(e.to_string())
            }
        }
    }

    fn write_temp(
        &self,
        serializer: &CacheSerializer,
        snapshot: &Snapshot,
        temp_path: &Path,
    ) -> io::Result<SerializationResult> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp_path)?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let result = serializer.serialize_cache(&mut writer, snapshot);
        if result.is_success() {
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        Ok(result)
    }

    fn publish(&self, temp_path: &Path) -> io::Result<()> {
        fs::rename(temp_path, self.path())?;
        let dir = File::open(&self.dir)?;
        dir.sync_all()
    }

    /// Load the cache
    ///
    /// A cache that fails structurally is deleted so it is never read again.
    pub fn load(&self, serializer: &CacheSerializer) -> CacheLoad {
        let path = self.path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No workspace model cache");
                return CacheLoad::Miss;
            }
            Err(e) => return CacheLoad::Discarded(CacheError::Io(e)),
        };
        let mut reader = BufReader::with_capacity(self.buffer_size, file);
        match serializer.deserialize_cache(&mut reader) {
            Ok(Some(builder)) => {
                debug!(path = %path.display(), "Loaded workspace model cache");
                CacheLoad::Loaded(builder)
            }
            Ok(None) => CacheLoad::Miss,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding workspace model cache");
                if e.invalidates_cache() {
                    if let Err(remove) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %remove, "Failed to delete cache");
                    }
                }
                CacheLoad::Discarded(e)
            }
        }
    }

    /// Delete the cache, returning whether it existed
    pub fn remove(&self) -> io::Result<bool> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove temporary files left behind by interrupted saves
    pub fn cleanup_temp_files(&self) -> io::Result<usize> {
        let mut count = 0;

        if !self.dir.exists() {
            return Ok(0);
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') && name.ends_with(".tmp") {
                fs::remove_file(entry.path())?;
                count += 1;
            }
        }

        Ok(count)
    }
}
