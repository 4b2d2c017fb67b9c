use crate::storage::{StorageBackend, StorageError};
use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::warn;

/// File-backed store: the whole namespace lives in one JSON document,
/// rewritten atomically on every mutation.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at the platform data directory.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(Self::default_path())
    }

    /// Open a store at an explicit path, creating an empty namespace if the
    /// file does not exist. A file that exists but does not parse is treated
    /// as empty rather than fatal: losing a corrupt store beats refusing to
    /// start.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| StorageError::Read {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "store did not parse; starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_path() -> PathBuf {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "mimir")
            .expect("Failed to determine data directory");
        proj_dirs.data_dir().join("store.json")
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let parent = self.path.parent().filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        let contents =
            serde_json::to_string_pretty(entries).map_err(|source| StorageError::Serialize { source })?;

        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })?;

        temp_file
            .write_all(contents.as_bytes())
            .and_then(|_| temp_file.as_file_mut().sync_all())
            .map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;

        temp_file
            .persist(&self.path)
            .map_err(|err| StorageError::Write {
                path: self.path.clone(),
                source: err.error,
            })?;

        Ok(())
    }
}

impl StorageBackend for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write_all(&entries)
    }
}
