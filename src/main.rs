//! `cykel-reminderd`: replays persisted reminders after a restart and delivers them
//! when their durable timers come due.

use std::sync::Arc;
use std::thread;

use cykel_core::{
    AlertSink, BoundedWakeLock, Clock, Config, DurableTimer, EventStore, JsonSettingsStore,
    PlatformTimer, ReminderKind, ReminderScheduler, SystemClock, Tracker, TracingAlertSink, Vault,
    VaultEventStore,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .with_writer(std::io::stderr)
        .init();

    config.ensure_data_dir()?;
    info!(data_dir = %config.data_dir.display(), poll = ?config.poll_interval, "Starting reminder daemon");

    let settings = Arc::new(JsonSettingsStore::open(config.settings_path())?);
    let timer = Arc::new(DurableTimer::open(config.timers_path())?);
    let platform_timer: Arc<dyn PlatformTimer> = timer.clone();
    let sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    sink.ensure_channels();

    let scheduler = Arc::new(
        ReminderScheduler::new(
            settings,
            platform_timer,
            Arc::clone(&sink),
            Arc::clone(&clock),
        )
        .with_wake_lock(Arc::new(BoundedWakeLock::new())),
    );
    scheduler.restore_on_boot();

    // Keep the store alive for the daemon's lifetime so the tracker stays subscribed.
    let _tracker = open_tracker(&config, &scheduler, &sink, &clock);

    loop {
        thread::sleep(config.poll_interval);
        let due = match timer.poll_due(clock.now()) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to poll the timer table");
                continue;
            }
        };
        for token in due {
            match ReminderKind::from_token(&token) {
                Some(kind) => {
                    let outcome = scheduler.on_fire(kind);
                    debug!(%kind, ?outcome, "Timer dispatched");
                }
                None => warn!(token, "Unknown timer token"),
            }
        }
    }
}

/// Open the event store when a passphrase is provided and run one recompute so the
/// cycle reminder follows the latest logged data.
fn open_tracker(
    config: &Config,
    scheduler: &Arc<ReminderScheduler>,
    sink: &Arc<dyn AlertSink>,
    clock: &Arc<dyn Clock>,
) -> Option<Arc<Tracker>> {
    let passphrase = std::env::var("CYKEL_PASSPHRASE").ok()?;
    let vault = Vault::new(config.events_path());
    if !vault.exists() {
        info!(path = %vault.path().display(), "No event file yet, cycle prediction skipped");
        return None;
    }
    let store: Arc<dyn EventStore> = match VaultEventStore::open(vault, &passphrase) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to open the event store");
            return None;
        }
    };
    let tracker = Tracker::new(store, Arc::clone(scheduler), Arc::clone(sink), Arc::clone(clock));
    tracker.attach();
    let snapshot = tracker.recompute();
    info!(
        next_onset = ?snapshot.status.next_predicted_onset,
        average_cycle = snapshot.statistics.average_cycle_length,
        "Cycle prediction refreshed"
    );
    Some(tracker)
}
