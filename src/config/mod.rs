//! Configuration module for the I-7000 bus controller
//!
//! Preferences are a flat, ordered map of dotted string keys to string
//! values. Acquisition parameters, the running-experiment markers and the
//! chart start time all live here, and the experiment header mirrors a
//! subset of them into every acquisition file.
//!
//! # App Data Location
//!
//! Preferences are stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/i7000-daq/`
//! - **macOS**: `~/Library/Application Support/i7000-daq/`
//! - **Windows**: `%APPDATA%\i7000-daq\`
//!
//! # Files
//!
//! - `preferences.toml` - All preference keys, see [`keys`]
//!
//! # Example
//!
//! ```no_run
//! use i7000_daq::config::{keys, Preferences};
//!
//! let mut prefs = Preferences::load_or_default();
//! prefs.set(keys::RESPONSE_TIMEOUT, 250);
//! prefs.save()?;
//! # Ok::<(), i7000_daq::DaqError>(())
//! ```

pub mod settings;

pub use settings::AcquisitionSettings;

use crate::error::{DaqError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Application identifier for data directories
pub const APP_ID: &str = "i7000-daq";

/// Preferences filename
pub const PREFERENCES_FILE: &str = "preferences.toml";

/// Preference keys
pub mod keys {
    /// Number of input modules recorded per row
    pub const MODULE_COUNT: &str = "runtime.count.modules";
    /// Sampling interval in milliseconds
    pub const RESPONSE_TIMEOUT: &str = "response.timeout";
    pub const ANALOG_INPUT_TYPE: &str = "analog.input.type";
    pub const SIGNAL_OUT_RANGE: &str = "signal.out.range";
    /// Signal form code, see [`SignalForm`](crate::signal::SignalForm)
    pub const SIGNAL_FORM: &str = "signal.form";
    pub const SIGNAL_PERIOD: &str = "signal.form.period";
    pub const SIGNAL_MIN: &str = "signal.form.min";
    pub const SIGNAL_MAX: &str = "signal.form.max";
    pub const SIGNAL_TAU: &str = "signal.form.tau";
    /// Whether an experiment is recording right now
    pub const EXPERIMENT_RUNNING: &str = "runtime.experiment.running";
    /// Name of the experiment that was last started
    pub const LAST_EXPERIMENT_RUNNING: &str = "runtime.last.experiment.running";
    /// Acquisition file of a recording in progress; empty once stopped
    pub const LAST_EXPERIMENT_PATH: &str = "last.experiment.path";
    /// Creation time of the loaded acquisition file
    pub const RUNTIME_TIME: &str = "runtime.time";
    pub const RUNTIME_MAP_OF_AXES: &str = "runtime.map.of.axes";
    /// First timestamp on the chart, epoch milliseconds
    pub const CHART_TIME_START: &str = "chart.time.start";
    pub const CHECKSUM_ENABLED: &str = "bus.checksum.enabled";
}

/// Default values applied to fresh preferences
const DEFAULTS: &[(&str, &str)] = &[
    (keys::MODULE_COUNT, "0"),
    (keys::RESPONSE_TIMEOUT, "200"),
    (keys::ANALOG_INPUT_TYPE, "0"),
    (keys::SIGNAL_OUT_RANGE, "0"),
    (keys::SIGNAL_FORM, "0"),
    (keys::SIGNAL_PERIOD, "2000"),
    (keys::SIGNAL_MIN, "0"),
    (keys::SIGNAL_MAX, "5"),
    (keys::SIGNAL_TAU, "1000"),
    (keys::EXPERIMENT_RUNNING, "false"),
    (keys::CHECKSUM_ENABLED, "false"),
];

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| DaqError::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            DaqError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the preferences file
pub fn preferences_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(PREFERENCES_FILE))
}

// ==================== Preferences ====================

/// Process-wide preferences store
pub type SharedPreferences = Arc<RwLock<Preferences>>;

/// String key/value preferences with typed accessors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences {
    values: BTreeMap<String, String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            values: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Preferences {
    /// Preferences with no keys at all, not even defaults
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Wrap into the shared process-wide handle
    pub fn into_shared(self) -> SharedPreferences {
        Arc::new(RwLock::new(self))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Integer value; `None` when absent or not an integer
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_double_or(&self, key: &str, default: f64) -> f64 {
        self.get_double(key).unwrap_or(default)
    }

    /// Boolean value; accepts `true`/`false` in any case
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load preferences from a TOML file
    ///
    /// Keys missing from the file keep their default value.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DaqError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let stored: Preferences = toml::from_str(&content)
            .map_err(|e| DaqError::Config(format!("Failed to parse {:?}: {}", path, e)))?;

        let mut prefs = Self::default();
        prefs.values.extend(stored.values);
        Ok(prefs)
    }

    /// Save preferences to a TOML file
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DaqError::Serialization(format!("Failed to serialize preferences: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| DaqError::Config(format!("Failed to write preferences: {}", e)))
    }

    /// Load preferences from the default location
    pub fn load() -> Result<Self> {
        let path = preferences_path()
            .ok_or_else(|| DaqError::Config("Could not determine preferences path".to_string()))?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load preferences, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load preferences, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save preferences to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(PREFERENCES_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let prefs = Preferences::default();
        assert_eq!(prefs.get_int(keys::RESPONSE_TIMEOUT), Some(200));
        assert_eq!(prefs.get_int(keys::MODULE_COUNT), Some(0));
        assert!(!prefs.get_bool(keys::EXPERIMENT_RUNNING));
        assert_eq!(prefs.get(keys::LAST_EXPERIMENT_PATH), None);
    }

    #[test]
    fn test_typed_accessors() {
        let mut prefs = Preferences::empty();
        prefs.set(keys::SIGNAL_MIN, -1.25);
        prefs.set(keys::MODULE_COUNT, " 3 ");
        prefs.set_bool(keys::CHECKSUM_ENABLED, true);
        prefs.set(keys::SIGNAL_FORM, "sine");

        assert_eq!(prefs.get_double(keys::SIGNAL_MIN), Some(-1.25));
        assert_eq!(prefs.get_int(keys::MODULE_COUNT), Some(3));
        assert!(prefs.get_bool(keys::CHECKSUM_ENABLED));
        assert_eq!(prefs.get_int(keys::SIGNAL_FORM), None);
        assert_eq!(prefs.get_int_or(keys::SIGNAL_FORM, 2), 2);
        assert_eq!(prefs.get_or(keys::RUNTIME_TIME, "never"), "never");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);

        let mut prefs = Preferences::default();
        prefs.set(keys::LAST_EXPERIMENT_PATH, "/tmp/exp/exp.fim");
        prefs.set(keys::RESPONSE_TIMEOUT, 150);
        prefs.save_to(&path).unwrap();

        let loaded = Preferences::load_from(&path).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn test_load_fills_missing_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);
        std::fs::write(&path, "\"signal.form\" = \"2\"\n").unwrap();

        let loaded = Preferences::load_from(&path).unwrap();
        assert_eq!(loaded.get_int(keys::SIGNAL_FORM), Some(2));
        assert_eq!(loaded.get_int(keys::RESPONSE_TIMEOUT), Some(200));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PREFERENCES_FILE);
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(matches!(
            Preferences::load_from(&path),
            Err(DaqError::Config(_))
        ));
    }

    #[test]
    fn test_shared_handle() {
        let shared = Preferences::default().into_shared();
        shared.write().unwrap().set(keys::MODULE_COUNT, 4);
        assert_eq!(shared.read().unwrap().get_int(keys::MODULE_COUNT), Some(4));
    }
}
