//! Glue between the event store, the analytics and the reminder scheduler.
//!
//! Any change to Start or End events triggers a full recompute. A fresh prediction
//! is handed to the scheduler, and when the onset is two days away or less a
//! proximity alert goes out once per predicted day.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alert::{AlertChannel, AlertSink};
use crate::dates::{self, Clock};
use crate::models::{CurrentStatus, CycleEvent, CycleStatistics, EventKind};
use crate::prediction;
use crate::scheduler::{ReminderKind, ReminderScheduler, CYCLE_REMINDER_LEAD_DAYS};
use crate::settings::{keys, SettingsStore};
use crate::storage::{EventStore, StoreChange};

/// Days before onset at which the proximity alert kicks in.
const PROXIMITY_DAYS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub statistics: CycleStatistics,
    pub status: CurrentStatus,
}

/// How far away the next onset is, from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnsetOutlook {
    /// The week-ahead reminder is still this many days away.
    ReminderIn(i64),
    /// Inside the reminder week; onset in this many days.
    OnsetIn(i64),
    Imminent,
}

pub fn outlook(status: &CurrentStatus, today: NaiveDate) -> Option<OnsetOutlook> {
    let days = dates::days_between(today, status.next_predicted_onset?);
    Some(if days > CYCLE_REMINDER_LEAD_DAYS {
        OnsetOutlook::ReminderIn(days - CYCLE_REMINDER_LEAD_DAYS)
    } else if days > 0 {
        OnsetOutlook::OnsetIn(days)
    } else {
        OnsetOutlook::Imminent
    })
}

/// Share of the average period already elapsed, 0-100.
pub fn period_progress(status: &CurrentStatus, average_period_length: i64) -> f32 {
    if !status.is_active || average_period_length <= 0 {
        return 0.0;
    }
    (status.current_day as f32 * 100.0 / average_period_length as f32).min(100.0)
}

pub struct Tracker {
    store: Arc<dyn EventStore>,
    scheduler: Arc<ReminderScheduler>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    latest: Mutex<Option<Snapshot>>,
    last_prediction: Mutex<Option<NaiveDate>>,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn EventStore>,
        scheduler: Arc<ReminderScheduler>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scheduler,
            sink,
            clock,
            latest: Mutex::new(None),
            last_prediction: Mutex::new(None),
        })
    }

    /// Recompute whenever Start or End events change.
    pub fn attach(self: &Arc<Self>) {
        let tracker = Arc::downgrade(self);
        self.store.subscribe(Arc::new(move |change: &StoreChange| {
            if !(change.touches(EventKind::Start) || change.touches(EventKind::End)) {
                return;
            }
            if let Some(tracker) = tracker.upgrade() {
                tracker.recompute();
            }
        }));
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.latest.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Events of one calendar month, newest first. Invalid months are empty.
    pub fn month(&self, year: i32, month: u32) -> Vec<CycleEvent> {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return Vec::new();
        };
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let last = next_month
            .and_then(|d| d.pred_opt())
            .unwrap_or_else(|| dates::add_days(first, 30));
        self.store.query_by_date_range(first, last)
    }

    /// Full recompute from the current store snapshot.
    pub fn recompute(&self) -> Snapshot {
        let (starts, ends_newest_first): (Vec<CycleEvent>, Vec<CycleEvent>) = self
            .store
            .query_by_kinds(&[EventKind::Start, EventKind::End])
            .into_iter()
            .partition(|e| e.kind == EventKind::Start);
        // Earliest-match pairing: each Start takes the first End on or after it.
        let ends_oldest_first: Vec<CycleEvent> = ends_newest_first.iter().rev().cloned().collect();

        let today = self.clock.today();
        let statistics = prediction::cycle_statistics(&starts, &ends_oldest_first);
        let status = prediction::current_status(
            &starts,
            &ends_newest_first,
            statistics.average_cycle_length,
            today,
        );
        debug!(
            starts = starts.len(),
            ends = ends_newest_first.len(),
            average_cycle = statistics.average_cycle_length,
            average_period = statistics.average_period_length,
            regularity = statistics.regularity,
            "Statistics recomputed"
        );

        let snapshot = Snapshot { statistics, status };
        *self.latest.lock().unwrap_or_else(|p| p.into_inner()) = Some(snapshot.clone());

        if let Some(onset) = snapshot.status.next_predicted_onset {
            self.follow_prediction(onset, today);
        }
        snapshot
    }

    fn follow_prediction(&self, onset: NaiveDate, today: NaiveDate) {
        let settings = self.scheduler.settings();
        if !settings.get_bool(keys::PERIOD_ENABLED, true) {
            return;
        }

        let days_until = dates::days_between(today, onset);
        if days_until <= PROXIMITY_DAYS {
            self.proximity_alert(onset, days_until);
        }

        let mut last = self.last_prediction.lock().unwrap_or_else(|p| p.into_inner());
        let unarmed = self.scheduler.trigger_at(ReminderKind::CycleOnset).is_none();
        if *last != Some(onset) || unarmed {
            self.scheduler.on_prediction_changed(onset);
            *last = Some(onset);
        }
    }

    fn proximity_alert(&self, onset: NaiveDate, days_until: i64) {
        let settings = self.scheduler.settings();
        let key = dates::day_key(onset);
        if settings.get_string(keys::LAST_PERIOD_NOTIFY).as_deref() == Some(key.as_str()) {
            return;
        }

        let body = if days_until > 0 {
            format!("Expected to start in {days_until} days, get ready.")
        } else {
            "Your cycle is starting or has started, take care and rest.".to_string()
        };
        info!(onset = %key, days_until, "Cycle onset is near");
        self.sink.notify(AlertChannel::CycleOnset, "Cycle reminder", &body);
        if let Err(e) = settings.set_string(keys::LAST_PERIOD_NOTIFY, &key) {
            warn!(error = %e, "Failed to store proximity marker");
        }
    }
}
