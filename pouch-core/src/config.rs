//! Minimal string key/value configuration.
//!
//! Mirrors an `app.set()` / `app.get()` style store: the binary layers
//! environment variables over defaults, then hands immutable snapshots to
//! the components that need them.
//!
//! ```rust
//! use pouch_core::PouchConfig;
//!
//! let mut config = PouchConfig::new();
//! config.set("uploads.max_bytes", "52428800");
//! config.set("image_cache_ttl", "300");
//!
//! let snap = config.snapshot();
//! assert_eq!(snap.get_u64("image_cache_ttl"), Some(300));
//! ```
//!
//! Environment overrides use a double-underscore convention:
//! `POUCH__UPLOADS__MAX_BYTES=1048576` becomes `uploads.max_bytes`.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PouchConfig {
    values: HashMap<String, String>,
}

impl PouchConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Layer `PREFIX__SECTION__KEY` environment variables over the store.
    pub fn load_env(&mut self, prefix: &str) {
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    pub fn snapshot(&self) -> PouchConfigSnapshot {
        PouchConfigSnapshot::new(self.values.clone())
    }
}

/// Immutable view handed to components at construction time.
#[derive(Debug, Clone, Default)]
pub struct PouchConfigSnapshot {
    map: HashMap<String, String>,
}

impl PouchConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }
}
