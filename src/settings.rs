//! Persisted key-value settings
//!
//! Settings are grouped by a named group and stored as strings. Every component
//! that needs persistence receives a [`SharedSettings`] handle instead of
//! reaching for process-wide state; the handle lives as long as the run.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, error, info};

/// Settings handle shared between the coordinator, shadows and installers
pub type SharedSettings = Rc<RefCell<dyn SettingsStore>>;

/// Group-scoped key-value persistence
pub trait SettingsStore: std::fmt::Debug {
    fn get(&self, group: &str, key: &str) -> Option<String>;

    fn set(&mut self, group: &str, key: &str, value: &str);

    /// Remove one key, returning whether it existed
    fn remove(&mut self, group: &str, key: &str) -> bool;

    /// All keys currently stored in `group`, sorted
    fn keys(&self, group: &str) -> Vec<String>;

    fn get_bool(&self, group: &str, key: &str) -> Option<bool> {
        self.get(group, key).and_then(|v| match v.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            other => {
                error!(group = %group, key = %key, value = %other, "Ignoring non-boolean setting");
                None
            }
        })
    }

    fn get_bool_or(&self, group: &str, key: &str, default: bool) -> bool {
        self.get_bool(group, key).unwrap_or(default)
    }

    fn set_bool(&mut self, group: &str, key: &str, value: bool) {
        self.set(group, key, if value { "true" } else { "false" });
    }
}

type Groups = BTreeMap<String, BTreeMap<String, String>>;

/// Volatile store used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySettings {
    groups: Groups,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSettings {
        Rc::new(RefCell::new(Self::new()))
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, group: &str, key: &str) -> Option<String> {
        self.groups.get(group)?.get(key).cloned()
    }

    fn set(&mut self, group: &str, key: &str, value: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, group: &str, key: &str) -> bool {
        let Some(entries) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = entries.remove(key).is_some();
        if entries.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    fn keys(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// JSON document on disk, rewritten on every change (last writer wins)
#[derive(Debug)]
pub struct JsonSettings {
    path: PathBuf,
    inner: MemorySettings,
}

impl JsonSettings {
    /// Default settings path under the platform config directory
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::settings::APP_DIR);
        path.push(crate::constants::settings::FILENAME);
        path
    }

    /// Load settings from `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let groups = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str::<Groups>(&contents)
                .with_context(|| format!("Failed to parse settings JSON from {}", path.display()))?
        } else {
            info!(path = %path.display(), "Settings file not found, starting empty");
            Groups::new()
        };
        Ok(Self {
            path,
            inner: MemorySettings { groups },
        })
    }

    pub fn shared(path: impl Into<PathBuf>) -> Result<SharedSettings> {
        Ok(Rc::new(RefCell::new(Self::load(path)?)))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.inner.groups)
            .context("Failed to serialize settings to JSON")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        debug!(path = %self.path.display(), "Saved settings");
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            error!(error = ?e, "Failed to persist settings");
        }
    }
}

impl SettingsStore for JsonSettings {
    fn get(&self, group: &str, key: &str) -> Option<String> {
        self.inner.get(group, key)
    }

    fn set(&mut self, group: &str, key: &str, value: &str) {
        if self.inner.get(group, key).as_deref() == Some(value) {
            return;
        }
        self.inner.set(group, key, value);
        self.persist();
    }

    fn remove(&mut self, group: &str, key: &str) -> bool {
        let removed = self.inner.remove(group, key);
        if removed {
            self.persist();
        }
        removed
    }

    fn keys(&self, group: &str) -> Vec<String> {
        self.inner.keys(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_bool_roundtrip_and_defaults() {
        let mut store = MemorySettings::new();
        assert_eq!(store.get_bool("Monitors", "0_0_1920_1080"), None);
        assert!(store.get_bool_or("Monitors", "0_0_1920_1080", true));

        store.set_bool("Monitors", "0_0_1920_1080", false);
        assert_eq!(store.get_bool("Monitors", "0_0_1920_1080"), Some(false));
    }

    #[test]
    fn test_non_boolean_value_reads_as_missing() {
        let mut store = MemorySettings::new();
        store.set("Monitors", "k", "maybe");
        assert_eq!(store.get_bool("Monitors", "k"), None);
    }

    #[test]
    fn test_keys_are_group_scoped_and_sorted() {
        let mut store = MemorySettings::new();
        store.set_bool("Monitors", "b", true);
        store.set_bool("Monitors", "a", true);
        store.set_bool("Other", "c", true);
        assert_eq!(store.keys("Monitors"), vec!["a".to_string(), "b".to_string()]);
        assert!(store.remove("Monitors", "a"));
        assert!(!store.remove("Monitors", "a"));
        assert_eq!(store.keys("Monitors"), vec!["b".to_string()]);
        assert!(store.keys("Missing").is_empty());
    }

    #[test]
    fn test_json_settings_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut store = JsonSettings::load(&path).unwrap();
        store.set_bool("Monitors", "0_0_1920_1080_Main", true);
        assert!(path.exists());

        let reloaded = JsonSettings::load(&path).unwrap();
        assert_eq!(reloaded.get_bool("Monitors", "0_0_1920_1080_Main"), Some(true));
    }

    #[test]
    fn test_json_settings_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonSettings::load(&path).is_err());
    }
}
