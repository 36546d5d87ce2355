//! Durable key/value preferences.
//!
//! The scheduler reconstructs everything it needs from here when a timer fires,
//! since the process may have been restarted in between.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod keys {
    pub const WATER_ENABLED: &str = "water_reminder";
    pub const WATER_INTERVAL_MINUTES: &str = "water_interval_minutes";
    pub const WATER_TRIGGER_AT: &str = "water_trigger_at";
    pub const WATER_LAST_FIRED_AT: &str = "water_last_fired_at";
    pub const PERIOD_ENABLED: &str = "period_reminder";
    pub const PERIOD_TRIGGER_AT: &str = "period_reminder_time";
    pub const LAST_PERIOD_NOTIFY: &str = "last_period_notify";
}

pub const MIN_WATER_INTERVAL_MINUTES: u32 = 1;
pub const MAX_WATER_INTERVAL_MINUTES: u32 = 120;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SettingValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    String(String),
}

pub type SettingsListener = Arc<dyn Fn(&str) + Send + Sync>;

/// String-keyed preferences. Reads fall back to `default` when the key is missing
/// or holds a value of another type.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<SettingValue>;
    fn set(&self, key: &str, value: SettingValue) -> Result<(), SettingsError>;
    fn remove(&self, key: &str) -> Result<(), SettingsError>;
    fn subscribe(&self, listener: SettingsListener);

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(SettingValue::Bool(v)) => v,
            _ => default,
        }
    }

    fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.get(key) {
            Some(SettingValue::Int(v)) => v,
            _ => default,
        }
    }

    fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(SettingValue::Long(v)) => Some(v),
            _ => None,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(SettingValue::String(v)) => Some(v),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.set(key, SettingValue::Bool(value))
    }

    fn set_int(&self, key: &str, value: i32) -> Result<(), SettingsError> {
        self.set(key, SettingValue::Int(value))
    }

    fn set_long(&self, key: &str, value: i64) -> Result<(), SettingsError> {
        self.set(key, SettingValue::Long(value))
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.set(key, SettingValue::String(value.to_owned()))
    }
}

/// Settings kept as a JSON object on disk, or only in memory for tests.
pub struct JsonSettingsStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, SettingValue>>,
    listeners: Mutex<Vec<SettingsListener>>,
}

impl JsonSettingsStore {
    /// Load `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        debug!(path = %path.display(), "Opened settings");
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn write(&self, values: &BTreeMap<String, SettingValue>) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io = |source| SettingsError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, serde_json::to_vec_pretty(values)?).map_err(io)?;
        fs::rename(&staging, path).map_err(io)
    }

    fn mutate(
        &self,
        key: &str,
        change: impl FnOnce(&mut BTreeMap<String, SettingValue>) -> bool,
    ) -> Result<(), SettingsError> {
        {
            let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
            if !change(&mut values) {
                return Ok(());
            }
            self.write(&values)?;
        }
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in listeners {
            listener(key);
        }
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        self.mutate(key, |values| {
            values.get(key) != Some(&value) && {
                values.insert(key.to_owned(), value);
                true
            }
        })
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        self.mutate(key, |values| values.remove(key).is_some())
    }

    fn subscribe(&self, listener: SettingsListener) {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }
}

/// Typed view of the reminder preferences, with the defaults a fresh install uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub hydration_enabled: bool,
    pub hydration_interval_minutes: u32,
    pub cycle_onset_enabled: bool,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            hydration_enabled: true,
            hydration_interval_minutes: MIN_WATER_INTERVAL_MINUTES,
            cycle_onset_enabled: true,
        }
    }
}

impl ReminderSettings {
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();
        Self {
            hydration_enabled: store.get_bool(keys::WATER_ENABLED, defaults.hydration_enabled),
            hydration_interval_minutes: clamp_interval(i64::from(store.get_int(
                keys::WATER_INTERVAL_MINUTES,
                defaults.hydration_interval_minutes as i32,
            ))),
            cycle_onset_enabled: store.get_bool(keys::PERIOD_ENABLED, defaults.cycle_onset_enabled),
        }
    }
}

pub fn clamp_interval(minutes: i64) -> u32 {
    minutes.clamp(
        i64::from(MIN_WATER_INTERVAL_MINUTES),
        i64::from(MAX_WATER_INTERVAL_MINUTES),
    ) as u32
}
