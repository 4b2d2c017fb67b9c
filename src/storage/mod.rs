//! Local key-value persistence.
//!
//! All durable state lives in a single string-keyed namespace: the settings
//! object, the chat collection, the transient typing checkpoint, and cached
//! generated images. Values are JSON strings; writes are full-value
//! overwrites (last writer wins).

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage key for the persisted [`Settings`](crate::core::settings::Settings) object.
pub const SETTINGS_KEY: &str = "settings";

/// Storage key for the persisted chat collection.
pub const CHATS_KEY: &str = "chats";

/// Storage key for the transient typing-playback checkpoint.
pub const TYPING_STATE_KEY: &str = "typingState";

/// Storage key for a generated image cached by message id.
pub fn image_cache_key(message_id: &str) -> String {
    format!("image-{message_id}")
}

/// Errors that can occur when persisting to the backing store.
#[derive(Debug)]
pub enum StorageError {
    /// Failed to read the store from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the store to disk.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a value before writing it.
    Serialize { source: serde_json::Error },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Read { path, source } => {
                write!(f, "Failed to read store at {}: {}", path.display(), source)
            }
            StorageError::Write { path, source } => {
                write!(f, "Failed to write store at {}: {}", path.display(), source)
            }
            StorageError::Serialize { source } => {
                write!(f, "Failed to serialize value: {source}")
            }
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StorageError::Read { source, .. } => Some(source),
            StorageError::Write { source, .. } => Some(source),
            StorageError::Serialize { source } => Some(source),
        }
    }
}

/// A string key-value namespace with get/set/remove semantics.
///
/// Reads are infallible by contract: backends load their contents up front
/// and serve lookups from memory, so I/O failures surface when the store is
/// opened or written, never on `get`.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
