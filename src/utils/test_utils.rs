#[cfg(test)]
use std::sync::{Mutex, MutexGuard};

/// Serializes tests that touch process environment variables.
#[cfg(test)]
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that sets environment variables for the duration of a test and
/// restores the previous values on drop. Holding the guard also holds a
/// process-wide lock so env-dependent tests cannot interleave.
#[cfg(test)]
pub struct TestEnvVarGuard {
    saved: Vec<(String, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

#[cfg(test)]
impl TestEnvVarGuard {
    pub fn new() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            saved: Vec::new(),
            _lock: lock,
        }
    }

    pub fn set_var(&mut self, key: &str, value: &str) {
        self.save_once(key);
        std::env::set_var(key, value);
    }

    pub fn remove_var(&mut self, key: &str) {
        self.save_once(key);
        std::env::remove_var(key);
    }

    fn save_once(&mut self, key: &str) {
        if !self.saved.iter().any(|(k, _)| k == key) {
            self.saved.push((key.to_string(), std::env::var(key).ok()));
        }
    }
}

#[cfg(test)]
impl Drop for TestEnvVarGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}
