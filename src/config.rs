use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POLL_SECS: u64 = 15;
pub const DEFAULT_LOG_FILTER: &str = "cykel_core=info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("data directory not found")]
    NoDataDir,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process configuration for the reminder daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub log_filter: String,
}

impl Config {
    /// Resolve from the process environment.
    ///
    /// `CYKEL_DATA_DIR` overrides the data directory, otherwise the platform's local
    /// data dir is used (`cykel`, or `cykel-dev` when `CYKEL_ENV=dev`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = match lookup("CYKEL_DATA_DIR").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let name = if lookup("CYKEL_ENV").as_deref() == Some("dev") {
                    "cykel-dev"
                } else {
                    "cykel"
                };
                dirs::data_local_dir()
                    .ok_or(ConfigError::NoDataDir)?
                    .join(name)
            }
        };

        let poll_secs = match lookup("CYKEL_POLL_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "CYKEL_POLL_SECS",
                value: raw.clone(),
            })?,
            None => DEFAULT_POLL_SECS,
        };

        let log_filter = lookup("CYKEL_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            data_dir,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            log_filter,
        })
    }

    /// Create the data directory if it is missing.
    pub fn ensure_data_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn timers_path(&self) -> PathBuf {
        self.data_dir.join("timers.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.cykel")
    }
}
