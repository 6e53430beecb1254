//! JSON file settings store.

use std::fs;
use std::path::{Path, PathBuf};

use tgate_core::{ChannelError, Settings, SettingsStore};

/// Settings persisted as one JSON object. A missing file reads as defaults.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn load(&self) -> Result<Settings, ChannelError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| ChannelError::Storage(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ChannelError::Storage(e.to_string()))
    }

    fn save(&self, settings: &Settings) -> Result<(), ChannelError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ChannelError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| ChannelError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| ChannelError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSettings::new(dir.path().join("settings.json"));
        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn save_then_load_keeps_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSettings::new(dir.path().join("nested/settings.json"));
        let settings = Settings {
            block_history: false,
            keepalive_minutes: 9.0,
            ..Settings::default()
        };
        store.save(&settings).expect("save");
        assert_eq!(store.load().expect("load"), settings);

        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(raw.contains("\"blockHistory\": false"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"allowReloads": true}"#).expect("write");
        let loaded = FileSettings::new(&path).load().expect("load");
        assert!(loaded.allow_reloads);
        assert!(loaded.block_history);
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            FileSettings::new(&path).load(),
            Err(ChannelError::Storage(_))
        ));
    }
}
