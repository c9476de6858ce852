use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

pub const DEFAULT_FOCUS_TIME_SECS: u64 = 30 * 60;
pub const DEFAULT_BREAK_TIME_SECS: u64 = 5 * 60;
pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.8;

/// Effective settings view: defaults overlaid with any stored overrides.
/// Missing keys never surface as absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub default_focus_time: u64,
    pub default_break_time: u64,
    pub probability_threshold: f64,
    pub arduino_port: Option<String>,
    pub last_selected_camera: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_focus_time: DEFAULT_FOCUS_TIME_SECS,
            default_break_time: DEFAULT_BREAK_TIME_SECS,
            probability_threshold: DEFAULT_PROBABILITY_THRESHOLD,
            arduino_port: None,
            last_selected_camera: None,
        }
    }
}

/// What actually lands on disk: overrides only. The effective view is
/// recomputed against current defaults on every read, so shipping a new
/// default never gets shadowed by an old merged blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    default_focus_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_break_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    probability_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arduino_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_selected_camera: Option<String>,
}

impl StoredOverrides {
    fn overlay(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            default_focus_time: self.default_focus_time.unwrap_or(defaults.default_focus_time),
            default_break_time: self.default_break_time.unwrap_or(defaults.default_break_time),
            probability_threshold: self
                .probability_threshold
                .unwrap_or(defaults.probability_threshold),
            arduino_port: self.arduino_port.clone().or(defaults.arduino_port),
            last_selected_camera: self
                .last_selected_camera
                .clone()
                .or(defaults.last_selected_camera),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<StoredOverrides>,
}

impl SettingsStore {
    /// A malformed file falls back to defaults with a warning rather than
    /// blocking startup.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(
                        "settings file {} is malformed ({err}), falling back to defaults",
                        path.display()
                    );
                    StoredOverrides::default()
                }
            }
        } else {
            StoredOverrides::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn effective(&self) -> Settings {
        self.data.read().unwrap().overlay()
    }

    pub fn default_focus_time(&self) -> u64 {
        self.effective().default_focus_time
    }

    pub fn default_break_time(&self) -> u64 {
        self.effective().default_break_time
    }

    pub fn probability_threshold(&self) -> f64 {
        self.effective().probability_threshold
    }

    pub fn arduino_port(&self) -> Option<String> {
        self.effective().arduino_port
    }

    pub fn last_selected_camera(&self) -> Option<String> {
        self.effective().last_selected_camera
    }

    pub fn set_default_focus_time(&self, seconds: u64) -> Result<()> {
        self.update(|data| data.default_focus_time = Some(seconds))
    }

    pub fn set_default_break_time(&self, seconds: u64) -> Result<()> {
        self.update(|data| data.default_break_time = Some(seconds))
    }

    pub fn set_probability_threshold(&self, threshold: f64) -> Result<()> {
        self.update(|data| data.probability_threshold = Some(threshold))
    }

    pub fn set_arduino_port(&self, port: Option<String>) -> Result<()> {
        self.update(|data| data.arduino_port = port)
    }

    pub fn set_last_selected_camera(&self, camera_id: Option<String>) -> Result<()> {
        self.update(|data| data.last_selected_camera = camera_id)
    }

    /// Read-merge-write: mutate the current override map, persist the whole
    /// map, keep the in-memory copy only if the write succeeded.
    fn update(&self, apply: impl FnOnce(&mut StoredOverrides)) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn persist(&self, data: &StoredOverrides) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: StoredOverrides = serde_json::from_str(&contents)?;
        *self.data.write().unwrap() = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let settings = store.effective();
        assert_eq!(settings, Settings::default());
        assert_eq!(store.default_focus_time(), DEFAULT_FOCUS_TIME_SECS);
        assert_eq!(store.last_selected_camera(), None);
    }

    #[test]
    fn overrides_survive_reopen_and_only_overrides_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store.set_probability_threshold(0.6).unwrap();
        store.set_last_selected_camera(Some("cam-1".into())).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["probabilityThreshold"], 0.6);
        assert_eq!(raw["lastSelectedCamera"], "cam-1");
        // Untouched keys stay out of the file so default changes win later.
        assert!(raw.get("defaultFocusTime").is_none());

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.probability_threshold(), 0.6);
        assert_eq!(reopened.last_selected_camera(), Some("cam-1".into()));
        assert_eq!(reopened.default_focus_time(), DEFAULT_FOCUS_TIME_SECS);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.effective(), Settings::default());
    }

    #[test]
    fn set_performs_read_merge_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store.set_default_focus_time(25 * 60).unwrap();
        store.set_default_break_time(10 * 60).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.default_focus_time(), 25 * 60);
        assert_eq!(reopened.default_break_time(), 10 * 60);
    }
}
