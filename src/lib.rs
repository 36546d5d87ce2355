//! # Cykel Core
//!
//! On-device cycle analytics and durable reminder scheduling.
//!
//! ## Architecture
//!
//! - **Analytics**: pure functions over logged Start/End events that derive average
//!   cycle and period lengths, a regularity score and the next predicted onset
//! - **Storage**: a passphrase-sealed event file with a single writer thread, plus a
//!   JSON settings file for reminder preferences
//! - **Scheduler**: a per-reminder state machine that arms wake-capable timers,
//!   survives restarts and raises strong alerts
//!
//! ## Key Components
//!
//! - [`prediction`]: cycle analytics engine
//! - [`ReminderScheduler`]: hydration and week-ahead cycle reminders
//! - [`Tracker`]: keeps the prediction and the scheduler in step with the event store
//! - [`VaultEventStore`]: encrypted event persistence

pub mod alert;
pub mod config;
pub mod dates;
pub mod models;
pub mod prediction;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod timer;
pub mod tracker;
pub mod vault;

pub use alert::{AlertChannel, AlertSink, TracingAlertSink};
pub use config::{Config, ConfigError};
pub use dates::{Clock, SystemClock};
pub use models::{
    AppData, CurrentStatus, CycleEvent, CycleStatistics, EventKind, FlowIntensity, PainLevel,
    PeriodInterval,
};
pub use scheduler::{FireOutcome, ReminderKind, ReminderScheduler, ReminderState};
pub use settings::{JsonSettingsStore, ReminderSettings, SettingValue, SettingsError, SettingsStore};
pub use storage::{EventStore, StorageError, StoreChange, VaultEventStore};
pub use timer::{BoundedWakeLock, DurableTimer, PlatformTimer, TimerClass, TimerError};
pub use tracker::{OnsetOutlook, Snapshot, Tracker};
pub use vault::{Vault, VaultError};
