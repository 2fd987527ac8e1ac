//! Persistent application settings consulted by the device sandbox.

use crate::error::{DeviceError, Result};
use nrfutil_sandbox::LogLevel;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Key holding the verbose-logging preference.
pub const VERBOSE_LOGGING_KEY: &str = "isLoggingVerbose";

/// A key-value settings store.
pub trait SettingsStore: Send + Sync {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Whether verbose logging is enabled. Absent or non-boolean means no.
pub fn is_logging_verbose(store: &dyn SettingsStore) -> bool {
    store
        .get(VERBOSE_LOGGING_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Tool log level for the current preference: `trace` when verbose,
/// `error` otherwise.
pub fn tool_log_level(store: &dyn SettingsStore) -> LogLevel {
    if is_logging_verbose(store) {
        LogLevel::Trace
    } else {
        LogLevel::Error
    }
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettings {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings persisted as a JSON object in a file.
///
/// Every `set` rewrites the whole file.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileSettings {
    /// Load settings from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                DeviceError::Settings(format!("{} is not a JSON object: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);

        let text = serde_json::to_string_pretty(&updated)
            .map_err(|e| DeviceError::Settings(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, text)?;

        // Only what reached the file is visible.
        *values = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_level_follows_preference() {
        let store = MemorySettings::new();
        assert_eq!(tool_log_level(&store), LogLevel::Error);

        store.set(VERBOSE_LOGGING_KEY, json!(true)).unwrap();
        assert_eq!(tool_log_level(&store), LogLevel::Trace);

        store.set(VERBOSE_LOGGING_KEY, json!("yes")).unwrap();
        assert!(!is_logging_verbose(&store));
    }

    #[test]
    fn test_json_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = JsonFileSettings::load(&path).unwrap();
        assert!(store.get(VERBOSE_LOGGING_KEY).is_none());
        store.set(VERBOSE_LOGGING_KEY, json!(true)).unwrap();

        let reloaded = JsonFileSettings::load(&path).unwrap();
        assert!(is_logging_verbose(&reloaded));
    }

    #[test]
    fn test_failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileSettings::load(&path).unwrap();
        store.set(VERBOSE_LOGGING_KEY, json!(false)).unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(store.set(VERBOSE_LOGGING_KEY, json!(true)).is_err());

        assert_eq!(store.get(VERBOSE_LOGGING_KEY), Some(json!(false)));
    }

    #[test]
    fn test_json_file_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(matches!(
            JsonFileSettings::load(&path),
            Err(DeviceError::Settings(_))
        ));
    }
}
