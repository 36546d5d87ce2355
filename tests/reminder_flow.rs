use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use cykel_core::dates;
use cykel_core::settings::keys;
use cykel_core::{
    AlertChannel, AlertSink, Clock, CycleEvent, DurableTimer, EventKind, EventStore, FireOutcome,
    JsonSettingsStore, ReminderKind, ReminderScheduler, SettingsStore, TimerClass, Tracker,
    VaultEventStore,
};
use tempfile::TempDir;

struct StepClock(Mutex<DateTime<Utc>>);

impl StepClock {
    fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<(AlertChannel, String, String)>>);

impl CollectingSink {
    fn on(&self, channel: AlertChannel) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| *c == channel)
            .map(|(_, _, body)| body.clone())
            .collect()
    }
}

impl AlertSink for CollectingSink {
    fn ensure_channels(&self) {}

    fn notify(&self, channel: AlertChannel, title: &str, body: &str) {
        self.0
            .lock()
            .unwrap()
            .push((channel, title.to_owned(), body.to_owned()));
    }
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn noon(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(12, 0, 0).unwrap()
}

fn local_noon(date: NaiveDate) -> DateTime<Utc> {
    dates::local_to_utc(noon(date))
}

struct Harness {
    settings: Arc<JsonSettingsStore>,
    timer: Arc<DurableTimer>,
    sink: Arc<CollectingSink>,
    clock: Arc<StepClock>,
    scheduler: Arc<ReminderScheduler>,
}

fn harness(settings: JsonSettingsStore, timer: DurableTimer, now: DateTime<Utc>) -> Harness {
    let settings = Arc::new(settings);
    let timer = Arc::new(timer);
    let sink = Arc::new(CollectingSink::default());
    let clock = StepClock::at(now);
    let scheduler = Arc::new(ReminderScheduler::new(
        settings.clone(),
        timer.clone(),
        sink.clone(),
        clock.clone(),
    ));
    Harness {
        settings,
        timer,
        sink,
        clock,
        scheduler,
    }
}

#[test]
fn logged_cycles_drive_the_week_ahead_reminder() {
    let settings = JsonSettingsStore::in_memory();
    settings.set_bool(keys::WATER_ENABLED, false).unwrap();
    let h = harness(settings, DurableTimer::in_memory(), local_noon(day(2024, 3, 1)));

    let store = Arc::new(VaultEventStore::in_memory().unwrap());
    let tracker = Tracker::new(
        store.clone(),
        Arc::clone(&h.scheduler),
        h.sink.clone(),
        h.clock.clone(),
    );
    tracker.attach();

    for date in [day(2024, 2, 26), day(2024, 1, 29), day(2024, 1, 1)] {
        store.insert(CycleEvent::new(noon(date), EventKind::Start));
    }
    store.flush();

    let snapshot = tracker.snapshot().expect("recomputed on insert");
    assert_eq!(snapshot.statistics.average_cycle_length, 28);
    assert_eq!(snapshot.status.next_predicted_onset, Some(day(2024, 3, 25)));

    let expected = dates::local_day_start(day(2024, 3, 25)) - Duration::days(7);
    let wake = h.timer.pending(ReminderKind::CycleOnset.token()).unwrap();
    assert_eq!(wake.at, expected);
    assert_eq!(wake.class, TimerClass::AlarmClock);

    // Nothing is due until the trigger passes.
    assert!(h.timer.poll_due(h.clock.now()).unwrap().is_empty());
    h.clock.set(expected + Duration::seconds(1));
    let due = h.timer.poll_due(h.clock.now()).unwrap();
    assert_eq!(due, vec![ReminderKind::CycleOnset.token().to_string()]);

    let kind = ReminderKind::from_token(&due[0]).unwrap();
    assert_eq!(h.scheduler.on_fire(kind), FireOutcome::Alerted);
    let bodies = h.sink.on(AlertChannel::CycleOnset);
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("2024-03-25"));

    // Recomputing the same prediction does not announce it again.
    tracker.recompute();
    assert!(h.timer.pending(ReminderKind::CycleOnset.token()).is_none());
    assert_eq!(h.scheduler.on_fire(ReminderKind::CycleOnset), FireOutcome::Nothing);
    assert_eq!(h.sink.on(AlertChannel::CycleOnset).len(), 1);
    assert!(h.sink.on(AlertChannel::Hydration).is_empty());
}

#[test]
fn hydration_keeps_its_cadence_until_switched_off() {
    let start = local_noon(day(2024, 5, 10));
    let h = harness(JsonSettingsStore::in_memory(), DurableTimer::in_memory(), start);

    h.scheduler.set_hydration(true, 30);
    assert_eq!(h.timer.next_due(), Some(start + Duration::minutes(30)));

    h.clock.set(start + Duration::minutes(30));
    for token in h.timer.poll_due(h.clock.now()).unwrap() {
        let kind = ReminderKind::from_token(&token).unwrap();
        assert_eq!(h.scheduler.on_fire(kind), FireOutcome::Alerted);
    }
    assert_eq!(h.sink.on(AlertChannel::Hydration).len(), 1);
    assert_eq!(h.timer.next_due(), Some(start + Duration::minutes(60)));
    assert_eq!(
        h.settings.get_long(keys::WATER_LAST_FIRED_AT),
        Some(dates::to_millis(start + Duration::minutes(30)))
    );

    h.scheduler.set_hydration(false, 30);
    assert_eq!(h.timer.pending_count(), 0);
    assert_eq!(h.scheduler.on_fire(ReminderKind::Hydration), FireOutcome::Disabled);
    assert_eq!(h.sink.on(AlertChannel::Hydration).len(), 1);
}

#[test]
fn reminders_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let settings_path = dir.path().join("settings.json");
    let timers_path = dir.path().join("timers.json");
    let now = local_noon(day(2024, 6, 1));

    {
        let h = harness(
            JsonSettingsStore::open(&settings_path).unwrap(),
            DurableTimer::open(&timers_path).unwrap(),
            now,
        );
        h.scheduler.set_hydration(true, 45);
        h.scheduler.on_prediction_changed(day(2024, 6, 20));
    }

    // The timer table is lost, as after a reboot; only the settings survive.
    std::fs::remove_file(&timers_path).unwrap();
    let later = now + Duration::hours(3);
    let h = harness(
        JsonSettingsStore::open(&settings_path).unwrap(),
        DurableTimer::open(&timers_path).unwrap(),
        later,
    );
    h.scheduler.restore_on_boot();

    let cycle = h.timer.pending(ReminderKind::CycleOnset.token()).unwrap();
    assert_eq!(cycle.at, dates::local_day_start(day(2024, 6, 20)) - Duration::days(7));
    let hydration = h.timer.pending(ReminderKind::Hydration.token()).unwrap();
    assert_eq!(hydration.at, later + Duration::minutes(45));
}
