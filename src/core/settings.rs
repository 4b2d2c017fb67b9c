//! Session-wide settings and their persisting store.
//!
//! Settings load once at startup (hard-coded defaults when the stored value
//! is absent or does not parse) and every mutation rewrites the stored value
//! before returning. All writes go through [`SettingsStore::mutate`]; the
//! rest of the crate reads snapshots.

use crate::core::registry::ModelRef;
use crate::storage::{StorageBackend, StorageError, SETTINGS_KEY};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Model assigned to newly created threads, stored as its identifying
    /// subset. `None` means the registry default.
    pub default_model: Option<ModelRef>,

    pub gemini_api_key: String,
    /// Secondary Gemini keys, in rotation order.
    pub gemini_api_keys: Vec<String>,
    /// Rotation cursor over the Gemini candidate keys.
    pub current_gemini_key_index: usize,

    pub openrouter_api_key: String,

    pub username: String,
    pub theme: String,
    pub main_font: String,
    pub code_font: String,

    /// Completions served so far by the shared free-tier keys.
    pub free_messages_used: u32,

    pub enable_thinking: bool,
    pub enable_web_search: bool,
    pub enable_image_generation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: None,
            gemini_api_key: String::new(),
            gemini_api_keys: Vec::new(),
            current_gemini_key_index: 0,
            openrouter_api_key: String::new(),
            username: String::new(),
            theme: "dark".to_string(),
            main_font: "Inter".to_string(),
            code_font: "JetBrains Mono".to_string(),
            free_messages_used: 0,
            enable_thinking: true,
            enable_web_search: false,
            enable_image_generation: true,
        }
    }
}

impl Settings {
    /// Replace the secondary Gemini keys from a comma-separated input,
    /// dropping empty entries and resetting the rotation cursor.
    pub fn set_gemini_api_keys(&mut self, input: &str) {
        self.gemini_api_keys = input
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();
        self.current_gemini_key_index = 0;
    }
}

/// Owner of the settings singleton. Shared via `Arc`; reads take a snapshot,
/// writes go through [`Self::mutate`] and persist before returning.
pub struct SettingsStore {
    storage: Arc<dyn StorageBackend>,
    state: Mutex<Settings>,
}

impl SettingsStore {
    /// Load settings from storage, falling back to defaults when the stored
    /// value is missing or corrupt.
    pub fn load(storage: Arc<dyn StorageBackend>) -> Self {
        let settings = match storage.get(SETTINGS_KEY) {
            Some(raw) => match serde_json::from_str::<Settings>(&raw) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(error = %err, "stored settings did not parse; using defaults");
                    Settings::default()
                }
            },
            None => Settings::default(),
        };
        Self {
            storage,
            state: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.state.lock().unwrap().clone()
    }

    /// Apply a mutation and persist the result. The lock is held across the
    /// write so snapshots never observe an unpersisted intermediate state.
    pub fn mutate<T>(&self, mutator: impl FnOnce(&mut Settings) -> T) -> Result<T, StorageError> {
        let mut state = self.state.lock().unwrap();
        let result = mutator(&mut state);
        let serialized =
            serde_json::to_string(&*state).map_err(|source| StorageError::Serialize { source })?;
        self.storage.set(SETTINGS_KEY, &serialized)?;
        Ok(result)
    }
}
