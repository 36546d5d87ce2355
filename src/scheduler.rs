//! Reminder scheduling.
//!
//! Two independent reminders share one state machine:
//!
//! ```text
//! Disarmed -> Armed(at) -> Fired -> Armed(next) | Disarmed
//! ```
//!
//! Hydration re-arms itself from its own fire callback. The cycle-onset reminder
//! fires once per prediction and is re-armed only when a new prediction arrives.
//! Nothing here keeps a thread waiting between fires: every transition is a single
//! call, and everything a fire needs is read back from the settings store.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::alert::{AlertChannel, AlertSink};
use crate::dates::{self, Clock};
use crate::settings::{self, keys, ReminderSettings, SettingsStore};
use crate::timer::{BoundedWakeLock, PlatformTimer, TimerClass, WakeLockProvider};

/// The cycle reminder goes off this many days before the predicted onset.
pub const CYCLE_REMINDER_LEAD_DAYS: i64 = 7;
/// Targets closer than this are pushed out so they never land in the past.
pub const MIN_ARM_DELAY_SECS: i64 = 5;
pub const WAKE_LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Scheduler-private keys next to the user-facing ones in [`settings::keys`].
const PERIOD_ONSET_DAY: &str = "period_reminder_onset";
const PERIOD_FIRED_FOR: &str = "period_reminder_fired_for";

const HYDRATION_TITLE: &str = "💧 Hydration reminder";
const HYDRATION_BODY: &str = "Remember to drink some water and stay healthy!";
const CYCLE_TITLE: &str = "❤️ Cycle reminder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    Hydration,
    CycleOnset,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::Hydration, ReminderKind::CycleOnset];

    /// Identifies this reminder's wake-up in the platform timer.
    pub fn token(self) -> &'static str {
        match self {
            ReminderKind::Hydration => "hydration",
            ReminderKind::CycleOnset => "cycle_onset",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.token() == token)
    }

    pub fn channel(self) -> AlertChannel {
        match self {
            ReminderKind::Hydration => AlertChannel::Hydration,
            ReminderKind::CycleOnset => AlertChannel::CycleOnset,
        }
    }

    fn trigger_key(self) -> &'static str {
        match self {
            ReminderKind::Hydration => keys::WATER_TRIGGER_AT,
            ReminderKind::CycleOnset => keys::PERIOD_TRIGGER_AT,
        }
    }

    fn wake_tag(self) -> &'static str {
        match self {
            ReminderKind::Hydration => "cykel::hydration",
            ReminderKind::CycleOnset => "cykel::cycle_onset",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderState {
    Disarmed,
    Armed(DateTime<Utc>),
    Fired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Alert delivered (and, for hydration, the next one armed).
    Alerted,
    /// The reminder was switched off while its timer was in flight.
    Disabled,
    /// No persisted trigger to announce, or it was already announced.
    Nothing,
}

pub struct ReminderScheduler {
    settings: Arc<dyn SettingsStore>,
    timer: Arc<dyn PlatformTimer>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeLockProvider>,
    // One lock per kind keeps at most one pending timer each.
    hydration: Mutex<ReminderState>,
    cycle_onset: Mutex<ReminderState>,
}

impl ReminderScheduler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        timer: Arc<dyn PlatformTimer>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            timer,
            sink,
            clock,
            wake: Arc::new(BoundedWakeLock::new()),
            hydration: Mutex::new(ReminderState::Disarmed),
            cycle_onset: Mutex::new(ReminderState::Disarmed),
        }
    }

    pub fn with_wake_lock(mut self, wake: Arc<dyn WakeLockProvider>) -> Self {
        self.wake = wake;
        self
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn state(&self, kind: ReminderKind) -> ReminderState {
        *self.slot(kind)
    }

    /// Persisted trigger time of `kind`, if any.
    pub fn trigger_at(&self, kind: ReminderKind) -> Option<DateTime<Utc>> {
        self.settings
            .get_long(kind.trigger_key())
            .and_then(dates::from_millis)
    }

    /// Replace any pending timer for `kind` with one at `at`.
    ///
    /// Returns the timer class that accepted the wake-up, or `None` if every class
    /// refused and the reminder is left unarmed until the next recompute.
    pub fn arm(&self, kind: ReminderKind, at: DateTime<Utc>) -> Option<TimerClass> {
        let mut state = self.slot(kind);
        self.arm_locked(kind, at, &mut state)
    }

    pub fn disarm(&self, kind: ReminderKind) {
        let mut state = self.slot(kind);
        self.disarm_locked(kind, &mut state);
    }

    /// Entry point for the platform timer callback.
    pub fn on_fire(&self, kind: ReminderKind) -> FireOutcome {
        // Held until return, on every path.
        let _wake = match self.wake.acquire(kind.wake_tag(), WAKE_LOCK_TIMEOUT) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(%kind, error = %e, "Firing without a wake lock");
                None
            }
        };
        info!(%kind, at = %self.clock.now(), "Reminder fired");

        let mut state = self.slot(kind);
        match kind {
            ReminderKind::Hydration => self.fire_hydration(&mut state),
            ReminderKind::CycleOnset => self.fire_cycle_onset(&mut state),
        }
    }

    /// Re-arm after a reboot or process restart.
    ///
    /// The cycle trigger is replayed exactly as stored, even when it is already in
    /// the past, so an overdue reminder fires on the next poll instead of never.
    pub fn restore_on_boot(&self) {
        let prefs = ReminderSettings::load(self.settings.as_ref());

        if prefs.hydration_enabled {
            let at = self.clock.now() + Duration::minutes(i64::from(prefs.hydration_interval_minutes));
            self.arm(ReminderKind::Hydration, at);
        }

        if !prefs.cycle_onset_enabled {
            return;
        }
        let Some(trigger) = self.trigger_at(ReminderKind::CycleOnset) else {
            debug!("No cycle reminder to restore");
            return;
        };
        let onset = self.settings.get_string(PERIOD_ONSET_DAY);
        if onset.is_some() && onset == self.settings.get_string(PERIOD_FIRED_FOR) {
            debug!(%trigger, "Cycle reminder already delivered, not restoring");
            return;
        }
        info!(%trigger, "Restoring cycle reminder");
        self.arm(ReminderKind::CycleOnset, trigger);
    }

    /// Arm the cycle reminder a week ahead of `next_onset`.
    ///
    /// A prediction that was already announced is left alone, so recomputing
    /// statistics on the same day never produces a second alert.
    pub fn on_prediction_changed(&self, next_onset: NaiveDate) -> Option<TimerClass> {
        if !self.settings.get_bool(keys::PERIOD_ENABLED, true) {
            return None;
        }
        let onset_key = dates::day_key(next_onset);
        if self.settings.get_string(PERIOD_FIRED_FOR).as_deref() == Some(onset_key.as_str()) {
            debug!(onset = %onset_key, "Prediction already announced");
            // A timer armed for an onset that is no longer predicted must not fire.
            let mut state = self.slot(ReminderKind::CycleOnset);
            let armed_for = self.settings.get_string(PERIOD_ONSET_DAY);
            if armed_for.is_some_and(|armed| armed != onset_key) {
                info!(onset = %onset_key, "Dropping reminder for a superseded prediction");
                self.disarm_locked(ReminderKind::CycleOnset, &mut state);
            }
            return None;
        }

        let now = self.clock.now();
        let earliest = now + Duration::seconds(MIN_ARM_DELAY_SECS);
        let target = dates::local_day_start(next_onset) - Duration::days(CYCLE_REMINDER_LEAD_DAYS);
        let at = target.max(earliest);

        let mut state = self.slot(ReminderKind::CycleOnset);
        // Re-announcing the same prediction keeps an armed future trigger as is.
        if let ReminderState::Armed(current) = *state {
            let same_onset = self.settings.get_string(PERIOD_ONSET_DAY).as_deref()
                == Some(onset_key.as_str());
            if same_onset && current >= earliest {
                debug!(onset = %onset_key, %current, "Cycle reminder already armed");
                return None;
            }
        }
        self.persist(|s| s.set_string(PERIOD_ONSET_DAY, &onset_key));
        self.arm_locked(ReminderKind::CycleOnset, at, &mut state)
    }

    /// Apply a change to the hydration preferences.
    pub fn set_hydration(&self, enabled: bool, interval_minutes: u32) {
        let interval = settings::clamp_interval(i64::from(interval_minutes));
        self.persist(|s| s.set_bool(keys::WATER_ENABLED, enabled));
        self.persist(|s| s.set_int(keys::WATER_INTERVAL_MINUTES, interval as i32));

        if enabled {
            let at = self.clock.now() + Duration::minutes(i64::from(interval));
            self.arm(ReminderKind::Hydration, at);
        } else {
            self.disarm(ReminderKind::Hydration);
        }
    }

    /// Apply a change to the cycle reminder preference.
    pub fn set_cycle_onset_enabled(&self, enabled: bool, next_onset: Option<NaiveDate>) {
        self.persist(|s| s.set_bool(keys::PERIOD_ENABLED, enabled));
        match (enabled, next_onset) {
            (false, _) => self.disarm(ReminderKind::CycleOnset),
            (true, Some(onset)) => {
                self.on_prediction_changed(onset);
            }
            (true, None) => {}
        }
    }

    fn fire_hydration(&self, state: &mut ReminderState) -> FireOutcome {
        let prefs = ReminderSettings::load(self.settings.as_ref());
        if !prefs.hydration_enabled {
            info!("Hydration reminder disabled, cancelling");
            self.disarm_locked(ReminderKind::Hydration, state);
            return FireOutcome::Disabled;
        }

        let now = self.clock.now();
        self.alert(ReminderKind::Hydration, HYDRATION_TITLE, HYDRATION_BODY);
        *state = ReminderState::Fired;
        self.persist(|s| s.set_long(keys::WATER_LAST_FIRED_AT, dates::to_millis(now)));

        let next = now + Duration::minutes(i64::from(prefs.hydration_interval_minutes));
        debug!(%next, interval = prefs.hydration_interval_minutes, "Scheduling next hydration reminder");
        self.arm_locked(ReminderKind::Hydration, next, state);
        FireOutcome::Alerted
    }

    fn fire_cycle_onset(&self, state: &mut ReminderState) -> FireOutcome {
        *state = ReminderState::Disarmed;
        if !self.settings.get_bool(keys::PERIOD_ENABLED, true) {
            info!("Cycle reminder disabled");
            return FireOutcome::Disabled;
        }
        let Some(trigger) = self.trigger_at(ReminderKind::CycleOnset) else {
            info!("Cycle reminder fired with nothing scheduled");
            return FireOutcome::Nothing;
        };

        let onset_key = self
            .settings
            .get_string(PERIOD_ONSET_DAY)
            .unwrap_or_else(|| {
                dates::day_key(dates::day_of(trigger + Duration::days(CYCLE_REMINDER_LEAD_DAYS)))
            });
        if self.settings.get_string(PERIOD_FIRED_FOR).as_deref() == Some(onset_key.as_str()) {
            debug!(onset = %onset_key, "Cycle reminder already delivered");
            return FireOutcome::Nothing;
        }

        let body = format!(
            "Your next cycle is expected in about a week ({onset_key}). Plan ahead."
        );
        self.alert(ReminderKind::CycleOnset, CYCLE_TITLE, &body);
        self.persist(|s| s.set_string(PERIOD_FIRED_FOR, &onset_key));
        *state = ReminderState::Fired;
        FireOutcome::Alerted
    }

    fn arm_locked(
        &self,
        kind: ReminderKind,
        at: DateTime<Utc>,
        state: &mut ReminderState,
    ) -> Option<TimerClass> {
        if let Err(e) = self.timer.cancel(kind.token()) {
            warn!(%kind, error = %e, "Failed to cancel previous timer");
        }
        self.persist(|s| s.set_long(kind.trigger_key(), dates::to_millis(at)));
        if kind == ReminderKind::Hydration {
            let interval = ReminderSettings::load(self.settings.as_ref()).hydration_interval_minutes;
            self.persist(|s| s.set_int(keys::WATER_INTERVAL_MINUTES, interval as i32));
        }

        for class in TimerClass::FALLBACK_ORDER {
            match self.timer.schedule_wake(class, at, kind.token()) {
                Ok(()) => {
                    info!(%kind, %class, trigger_at = %at, "Reminder armed");
                    *state = ReminderState::Armed(at);
                    return Some(class);
                }
                Err(e) => {
                    warn!(%kind, %class, error = %e, "Timer class refused, trying next");
                }
            }
        }

        error!(%kind, trigger_at = %at, "All timer classes failed, reminder not armed");
        *state = ReminderState::Disarmed;
        None
    }

    fn disarm_locked(&self, kind: ReminderKind, state: &mut ReminderState) {
        if let Err(e) = self.timer.cancel(kind.token()) {
            warn!(%kind, error = %e, "Failed to cancel timer");
        }
        // Only the trigger is forgotten; enabled flags and the interval stay.
        self.persist(|s| s.remove(kind.trigger_key()));
        if kind == ReminderKind::CycleOnset {
            self.persist(|s| s.remove(PERIOD_ONSET_DAY));
        }
        *state = ReminderState::Disarmed;
        debug!(%kind, "Reminder disarmed");
    }

    fn alert(&self, kind: ReminderKind, title: &str, body: &str) {
        self.sink.ensure_channels();
        self.sink.notify(kind.channel(), title, body);
    }

    fn persist(&self, write: impl FnOnce(&dyn SettingsStore) -> Result<(), settings::SettingsError>) {
        if let Err(e) = write(self.settings.as_ref()) {
            warn!(error = %e, "Failed to persist reminder state");
        }
    }

    fn slot(&self, kind: ReminderKind) -> MutexGuard<'_, ReminderState> {
        let slot = match kind {
            ReminderKind::Hydration => &self.hydration,
            ReminderKind::CycleOnset => &self.cycle_onset,
        };
        slot.lock().unwrap_or_else(|p| p.into_inner())
    }
}
