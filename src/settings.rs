use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

pub const DEFAULT_ENDPOINT: &str = "https://api.zhconvert.org/convert";
pub const DEFAULT_PROFILE: &str = "Taiwan";
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConverterSettings {
    pub endpoint: String,
    /// Converter profile sent with every request.
    pub profile: String,
    /// Quiet window between the last mutation and the next scan.
    pub quiet_window_ms: u64,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            profile: DEFAULT_PROFILE.into(),
            quiet_window_ms: DEFAULT_QUIET_WINDOW_MS,
        }
    }
}

impl ConverterSettings {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub is_enabled: bool,
    pub converter: ConverterSettings,
}

/// Extension-local storage: a JSON file read once and rewritten on change.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn snapshot(&self) -> Result<UserSettings> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.clone())
    }

    pub fn is_enabled(&self) -> Result<bool> {
        Ok(self.snapshot()?.is_enabled)
    }

    pub fn converter(&self) -> Result<ConverterSettings> {
        Ok(self.snapshot()?.converter)
    }

    pub fn set_enabled(&self, is_enabled: bool) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.is_enabled = is_enabled;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_disabled_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.snapshot().unwrap();
        assert!(!settings.is_enabled);
        assert_eq!(settings.converter, ConverterSettings::default());
        assert_eq!(settings.converter.quiet_window(), Duration::from_millis(200));
    }

    #[test]
    fn toggle_persists_under_is_enabled_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store.set_enabled(true).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["isEnabled"], serde_json::Value::Bool(true));
        assert_eq!(json["converter"]["quietWindowMs"], 200);

        let reopened = SettingsStore::new(path).unwrap();
        assert!(reopened.is_enabled().unwrap());
    }

    #[test]
    fn partial_or_corrupt_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{"isEnabled":true}"#).unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert!(store.is_enabled().unwrap());
        assert_eq!(store.converter().unwrap().profile, "Taiwan");

        fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert!(!store.is_enabled().unwrap());
    }
}
