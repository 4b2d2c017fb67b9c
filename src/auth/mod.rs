//! Credential resolution and rotation.
//!
//! The vault resolves an ordered list of candidate keys per provider and a
//! rotation cursor for round-robin rotation on rate-limit failures. Gemini
//! candidates are [primary user key, secondary user keys..., shared
//! free-tier keys...]; OpenRouter has a single user key and never rotates.
//!
//! Shared free-tier keys come from the operator environment and let the
//! product offer a limited trial without sign-up. Once the free-message
//! quota is exhausted, traffic must shift to user-owned keys.

use crate::core::registry::Provider;
use crate::core::settings::SettingsStore;
use crate::storage::StorageError;
use std::sync::Arc;

/// Environment variable holding comma-separated shared free-tier Gemini keys.
pub const SHARED_KEYS_ENV: &str = "MIMIR_SHARED_GEMINI_KEYS";

/// Environment variable overriding the free-message allowance.
pub const FREE_LIMIT_ENV: &str = "MIMIR_FREE_MESSAGE_LIMIT";

const DEFAULT_FREE_MESSAGE_LIMIT: u32 = 10;

/// A resolved credential plus whether it belongs to the shared free-tier
/// pool (shared-key completions count against the free-message quota).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveKey {
    pub key: String,
    pub shared: bool,
}

pub struct KeyVault {
    settings: Arc<SettingsStore>,
    shared_gemini_keys: Vec<String>,
    free_message_limit: u32,
}

impl KeyVault {
    /// Build a vault with the shared pool and quota taken from the
    /// environment.
    pub fn from_env(settings: Arc<SettingsStore>) -> Self {
        let shared = std::env::var(SHARED_KEYS_ENV)
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();
        let limit = std::env::var(FREE_LIMIT_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_FREE_MESSAGE_LIMIT);
        Self::new(settings, shared, limit)
    }

    pub fn new(
        settings: Arc<SettingsStore>,
        shared_gemini_keys: Vec<String>,
        free_message_limit: u32,
    ) -> Self {
        Self {
            settings,
            shared_gemini_keys,
            free_message_limit,
        }
    }

    pub fn free_message_limit(&self) -> u32 {
        self.free_message_limit
    }

    /// Ordered candidate keys for a provider, empty entries dropped.
    pub fn candidate_keys(&self, provider: Provider) -> Vec<String> {
        let settings = self.settings.snapshot();
        match provider {
            Provider::Gemini => {
                let mut keys = Vec::new();
                if !settings.gemini_api_key.trim().is_empty() {
                    keys.push(settings.gemini_api_key.trim().to_string());
                }
                keys.extend(
                    settings
                        .gemini_api_keys
                        .iter()
                        .map(|key| key.trim())
                        .filter(|key| !key.is_empty())
                        .map(str::to_string),
                );
                keys.extend(self.shared_gemini_keys.iter().cloned());
                keys
            }
            Provider::OpenRouter => {
                let key = settings.openrouter_api_key.trim();
                if key.is_empty() {
                    Vec::new()
                } else {
                    vec![key.to_string()]
                }
            }
        }
    }

    /// The key the next request should use, or `None` when no usable key
    /// exists.
    ///
    /// Picks `candidates[cursor % len]`. When that lands on a shared
    /// free-tier key but the free-message quota is spent, the first
    /// user-owned key is used instead; with no user-owned key the provider
    /// is unusable.
    pub fn active_key(&self, provider: Provider) -> Option<ActiveKey> {
        let candidates = self.candidate_keys(provider);
        if candidates.is_empty() {
            return None;
        }

        let settings = self.settings.snapshot();
        let index = match provider {
            Provider::Gemini => settings.current_gemini_key_index % candidates.len(),
            Provider::OpenRouter => 0,
        };
        let picked = &candidates[index];
        let shared = self.is_shared(provider, picked);

        if shared && settings.free_messages_used >= self.free_message_limit {
            return candidates
                .iter()
                .find(|key| !self.is_shared(provider, key))
                .map(|key| ActiveKey {
                    key: key.clone(),
                    shared: false,
                });
        }

        Some(ActiveKey {
            key: picked.clone(),
            shared,
        })
    }

    /// Advance the rotation cursor. A no-op when the provider has at most
    /// one candidate.
    pub fn rotate(&self, provider: Provider) -> Result<(), StorageError> {
        if provider != Provider::Gemini {
            return Ok(());
        }
        let count = self.candidate_keys(provider).len();
        if count <= 1 {
            return Ok(());
        }
        self.settings.mutate(|settings| {
            settings.current_gemini_key_index = (settings.current_gemini_key_index + 1) % count;
        })?;
        Ok(())
    }

    fn is_shared(&self, provider: Provider, key: &str) -> bool {
        provider == Provider::Gemini && self.shared_gemini_keys.iter().any(|shared| shared == key)
    }
}

/// Split a comma-separated key list, dropping empty entries.
pub fn parse_key_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::utils::test_utils::TestEnvVarGuard;

    fn fresh_settings() -> Arc<SettingsStore> {
        Arc::new(SettingsStore::load(Arc::new(MemoryStore::new())))
    }

    fn vault_with(
        primary: &str,
        secondaries: &[&str],
        shared: &[&str],
        free_used: u32,
    ) -> KeyVault {
        let settings = Arc::new(SettingsStore::load(Arc::new(MemoryStore::new())));
        settings
            .mutate(|s| {
                s.gemini_api_key = primary.to_string();
                s.gemini_api_keys = secondaries.iter().map(|k| k.to_string()).collect();
                s.free_messages_used = free_used;
            })
            .unwrap();
        KeyVault::new(
            settings,
            shared.iter().map(|k| k.to_string()).collect(),
            DEFAULT_FREE_MESSAGE_LIMIT,
        )
    }

    #[test]
    fn candidates_order_primary_secondary_shared() {
        let vault = vault_with("primary", &["s1", "s2"], &["shared1"], 0);
        assert_eq!(
            vault.candidate_keys(Provider::Gemini),
            vec!["primary", "s1", "s2", "shared1"]
        );
    }

    #[test]
    fn empty_entries_are_dropped() {
        let vault = vault_with("  ", &["", "s1"], &[], 0);
        assert_eq!(vault.candidate_keys(Provider::Gemini), vec!["s1"]);
    }

    #[test]
    fn openrouter_has_a_single_candidate() {
        let settings = Arc::new(SettingsStore::load(Arc::new(MemoryStore::new())));
        let vault = KeyVault::new(settings.clone(), vec![], DEFAULT_FREE_MESSAGE_LIMIT);
        assert!(vault.candidate_keys(Provider::OpenRouter).is_empty());
        assert!(vault.active_key(Provider::OpenRouter).is_none());

        settings
            .mutate(|s| s.openrouter_api_key = "or-key".to_string())
            .unwrap();
        let active = vault.active_key(Provider::OpenRouter).unwrap();
        assert_eq!(active.key, "or-key");
        assert!(!active.shared);
    }

    #[test]
    fn rotation_advances_modulo_candidate_count() {
        let vault = vault_with("primary", &["s1"], &[], 0);

        assert_eq!(vault.active_key(Provider::Gemini).unwrap().key, "primary");
        vault.rotate(Provider::Gemini).unwrap();
        assert_eq!(vault.active_key(Provider::Gemini).unwrap().key, "s1");
        vault.rotate(Provider::Gemini).unwrap();
        assert_eq!(vault.active_key(Provider::Gemini).unwrap().key, "primary");
    }

    #[test]
    fn rotation_is_a_noop_with_one_candidate() {
        let vault = vault_with("only", &[], &[], 0);
        vault.rotate(Provider::Gemini).unwrap();
        assert_eq!(vault.active_key(Provider::Gemini).unwrap().key, "only");
    }

    #[test]
    fn shared_key_is_flagged_and_served_under_quota() {
        let vault = vault_with("", &[], &["shared1"], 0);
        let active = vault.active_key(Provider::Gemini).unwrap();
        assert_eq!(active.key, "shared1");
        assert!(active.shared);
    }

    #[test]
    fn exhausted_quota_falls_through_to_user_key() {
        let vault = vault_with("", &["user1"], &["shared1"], DEFAULT_FREE_MESSAGE_LIMIT);

        // Cursor parked on the shared key: quota spent, so the user key wins.
        vault
            .settings
            .mutate(|s| s.current_gemini_key_index = 1)
            .unwrap();
        let active = vault.active_key(Provider::Gemini).unwrap();
        assert_eq!(active.key, "user1");
        assert!(!active.shared);
    }

    #[test]
    fn exhausted_quota_with_no_user_key_yields_none() {
        let vault = vault_with("", &[], &["shared1"], DEFAULT_FREE_MESSAGE_LIMIT);
        assert!(vault.active_key(Provider::Gemini).is_none());
    }

    #[test]
    fn key_list_parsing_trims_and_drops_empties() {
        assert_eq!(parse_key_list("a, b ,,c,"), vec!["a", "b", "c"]);
        assert!(parse_key_list("  ,").is_empty());
    }

    #[test]
    fn from_env_reads_shared_keys_and_limit() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.set_var(SHARED_KEYS_ENV, "pool-a, pool-b,");
        env_guard.set_var(FREE_LIMIT_ENV, "25");

        let vault = KeyVault::from_env(fresh_settings());

        assert_eq!(
            vault.candidate_keys(Provider::Gemini),
            vec!["pool-a", "pool-b"]
        );
        assert_eq!(vault.free_message_limit(), 25);
    }

    #[test]
    fn from_env_defaults_when_the_variables_are_unset() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.remove_var(SHARED_KEYS_ENV);
        env_guard.remove_var(FREE_LIMIT_ENV);

        let vault = KeyVault::from_env(fresh_settings());

        assert!(vault.candidate_keys(Provider::Gemini).is_empty());
        assert_eq!(vault.free_message_limit(), DEFAULT_FREE_MESSAGE_LIMIT);
    }

    #[test]
    fn from_env_ignores_a_non_numeric_limit() {
        let mut env_guard = TestEnvVarGuard::new();
        env_guard.remove_var(SHARED_KEYS_ENV);
        env_guard.set_var(FREE_LIMIT_ENV, "plenty");

        let vault = KeyVault::from_env(fresh_settings());

        assert_eq!(vault.free_message_limit(), DEFAULT_FREE_MESSAGE_LIMIT);
    }
}
