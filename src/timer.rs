//! Wake-capable timers that outlive the process that armed them.
//!
//! On a headless host the durable form is a table of next-fire times on disk that
//! a long-running process polls. Each entry records which timer class armed it so
//! the fallback chain stays observable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Timer flavours from most to least wake-reliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerClass {
    /// User-visible alarm clock; exempt from idle batching.
    AlarmClock,
    /// Exact wake-up that is still allowed while the device idles.
    ExactAllowWhileIdle,
    /// Best-effort wake-up; may be deferred by power management.
    Inexact,
}

impl TimerClass {
    pub const FALLBACK_ORDER: [TimerClass; 3] = [
        TimerClass::AlarmClock,
        TimerClass::ExactAllowWhileIdle,
        TimerClass::Inexact,
    ];
}

impl fmt::Display for TimerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerClass::AlarmClock => "alarm-clock",
            TimerClass::ExactAllowWhileIdle => "exact-while-idle",
            TimerClass::Inexact => "inexact",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("timer class {0} is not available")]
    Unsupported(TimerClass),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timer table is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("wake lock unavailable: {0}")]
    WakeLockUnavailable(String),
}

pub trait PlatformTimer: Send + Sync {
    /// Arm (or re-arm) the wake-up identified by `token`.
    fn schedule_wake(
        &self,
        class: TimerClass,
        at: DateTime<Utc>,
        token: &str,
    ) -> Result<(), TimerError>;

    /// Cancelling a token that is not armed succeeds.
    fn cancel(&self, token: &str) -> Result<(), TimerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWake {
    pub at: DateTime<Utc>,
    pub class: TimerClass,
}

/// Next-fire table persisted as JSON, one entry per token.
pub struct DurableTimer {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, PendingWake>>,
    disabled: HashSet<TimerClass>,
}

impl DurableTimer {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TimerError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(TimerError::Io { path, source }),
        };
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
            disabled: HashSet::new(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
            disabled: HashSet::new(),
        }
    }

    /// Refuse the given classes, as a host lacking those capabilities would.
    pub fn without(mut self, classes: impl IntoIterator<Item = TimerClass>) -> Self {
        self.disabled.extend(classes);
        self
    }

    pub fn pending(&self, token: &str) -> Option<PendingWake> {
        self.lock().get(token).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Earliest armed fire time, for sizing the poll sleep.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().values().map(|w| w.at).min()
    }

    /// Remove and return every token due at or before `now`, earliest first.
    pub fn poll_due(&self, now: DateTime<Utc>) -> Result<Vec<String>, TimerError> {
        let mut entries = self.lock();
        let mut due: Vec<(DateTime<Utc>, String)> = entries
            .iter()
            .filter(|(_, wake)| wake.at <= now)
            .map(|(token, wake)| (wake.at, token.clone()))
            .collect();
        if due.is_empty() {
            return Ok(Vec::new());
        }
        due.sort();
        for (_, token) in &due {
            entries.remove(token);
        }
        self.write(&entries)?;
        Ok(due.into_iter().map(|(_, token)| token).collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PendingWake>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self, entries: &BTreeMap<String, PendingWake>) -> Result<(), TimerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io = |source| TimerError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, serde_json::to_vec_pretty(entries)?).map_err(io)?;
        fs::rename(&staging, path).map_err(io)
    }
}

impl PlatformTimer for DurableTimer {
    fn schedule_wake(
        &self,
        class: TimerClass,
        at: DateTime<Utc>,
        token: &str,
    ) -> Result<(), TimerError> {
        if self.disabled.contains(&class) {
            return Err(TimerError::Unsupported(class));
        }
        let mut entries = self.lock();
        let previous = entries.insert(token.to_owned(), PendingWake { at, class });
        if let Err(e) = self.write(&entries) {
            match previous {
                Some(wake) => entries.insert(token.to_owned(), wake),
                None => entries.remove(token),
            };
            return Err(e);
        }
        debug!(token, %class, %at, "Wake armed");
        Ok(())
    }

    fn cancel(&self, token: &str) -> Result<(), TimerError> {
        let mut entries = self.lock();
        if entries.remove(token).is_some() {
            self.write(&entries)?;
            debug!(token, "Wake cancelled");
        }
        Ok(())
    }
}

/// Keeps the device awake until dropped or until its timeout passes, whichever
/// comes first.
pub struct WakeLockGuard {
    id: u64,
    tag: String,
    acquired: Instant,
    timeout: Duration,
    held: Arc<Mutex<HashMap<u64, Instant>>>,
}

impl WakeLockGuard {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// True once the lock has been force-released by its timeout.
    pub fn is_expired(&self) -> bool {
        self.acquired.elapsed() >= self.timeout
    }
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        let released = lock_deadlines(&self.held).remove(&self.id).is_some();
        let elapsed = self.acquired.elapsed();
        if !released || elapsed > self.timeout {
            warn!(tag = %self.tag, ?elapsed, timeout = ?self.timeout, "Wake lock outlived its bound");
        } else {
            debug!(tag = %self.tag, ?elapsed, "Wake lock released");
        }
    }
}

pub trait WakeLockProvider: Send + Sync {
    fn acquire(&self, tag: &str, timeout: Duration) -> Result<WakeLockGuard, TimerError>;
}

/// Process-local wake lock. A guard stops counting as held once its timeout
/// passes, even if it has not been dropped yet.
#[derive(Default)]
pub struct BoundedWakeLock {
    next_id: AtomicU64,
    held: Arc<Mutex<HashMap<u64, Instant>>>,
}

impl BoundedWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of guards currently holding the device awake.
    pub fn held(&self) -> usize {
        let mut deadlines = lock_deadlines(&self.held);
        let now = Instant::now();
        deadlines.retain(|_, deadline| *deadline > now);
        deadlines.len()
    }
}

impl WakeLockProvider for BoundedWakeLock {
    fn acquire(&self, tag: &str, timeout: Duration) -> Result<WakeLockGuard, TimerError> {
        if timeout.is_zero() {
            return Err(TimerError::WakeLockUnavailable(format!(
                "{tag}: zero timeout"
            )));
        }
        let acquired = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock_deadlines(&self.held).insert(id, acquired + timeout);
        debug!(tag, ?timeout, "Wake lock acquired");
        Ok(WakeLockGuard {
            id,
            tag: tag.to_owned(),
            acquired,
            timeout,
            held: Arc::clone(&self.held),
        })
    }
}

fn lock_deadlines(
    held: &Mutex<HashMap<u64, Instant>>,
) -> std::sync::MutexGuard<'_, HashMap<u64, Instant>> {
    held.lock().unwrap_or_else(|p| p.into_inner())
}
