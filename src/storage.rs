//! Event store: an ordered collection of dated cycle events.
//!
//! Reads come from an in-memory snapshot. Mutations are queued to a single worker
//! thread that applies them in order, re-seals the vault and then notifies
//! subscribers, so concurrent edits never race each other.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use chrono::NaiveDate;
use tracing::{debug, error, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::models::{AppData, CycleEvent, EventKind};
use crate::vault::{Vault, VaultError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("could not start store worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Which event kinds a mutation touched. An update that changes the kind
/// reports both the old and the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub kinds: Vec<EventKind>,
}

impl StoreChange {
    pub fn touches(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }
}

pub type Listener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

pub trait EventStore: Send + Sync {
    /// Queue an insert and return the id assigned to the event.
    fn insert(&self, event: CycleEvent) -> Uuid;
    fn update(&self, event: CycleEvent);
    fn delete(&self, id: Uuid);

    /// Newest first.
    fn query_all(&self) -> Vec<CycleEvent>;
    /// Events whose day falls in `start..=end`, newest first.
    fn query_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<CycleEvent>;
    /// Newest first.
    fn query_by_kind(&self, kind: EventKind) -> Vec<CycleEvent>;
    /// Events of any of `kinds`, newest first, all from one snapshot.
    fn query_by_kinds(&self, kinds: &[EventKind]) -> Vec<CycleEvent>;

    fn latest_of_kind(&self, kind: EventKind) -> Option<CycleEvent> {
        self.query_by_kind(kind).into_iter().next()
    }

    fn subscribe(&self, listener: Listener);

    /// Block until every mutation queued so far has been applied.
    fn flush(&self);
}

enum Command {
    Insert(CycleEvent),
    Update(CycleEvent),
    Delete(Uuid),
    Flush(Sender<()>),
}

enum Backing {
    Memory,
    Vault {
        vault: Vault,
        passphrase: Zeroizing<String>,
    },
}

struct Shared {
    events: RwLock<Vec<CycleEvent>>,
    listeners: Mutex<Vec<Listener>>,
    backing: Backing,
}

/// Event store persisted to a passphrase-sealed vault file.
pub struct VaultEventStore {
    shared: Arc<Shared>,
    commands: Mutex<Sender<Command>>,
}

impl VaultEventStore {
    /// Open the vault, creating an empty one if the file does not exist yet.
    pub fn open(vault: Vault, passphrase: &str) -> Result<Self, StorageError> {
        let data = if vault.exists() {
            let bytes = Zeroizing::new(vault.open(passphrase)?);
            serde_json::from_slice::<AppData>(&bytes)?
        } else {
            let data = AppData::default();
            vault.seal(passphrase, &serde_json::to_vec(&data)?)?;
            data
        };
        debug!(path = %vault.path().display(), events = data.events.len(), "Opened event vault");

        Self::spawn(
            data.events,
            Backing::Vault {
                vault,
                passphrase: Zeroizing::new(passphrase.to_owned()),
            },
        )
    }

    /// Store without persistence.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::spawn(Vec::new(), Backing::Memory)
    }

    fn spawn(events: Vec<CycleEvent>, backing: Backing) -> Result<Self, StorageError> {
        let shared = Arc::new(Shared {
            events: RwLock::new(events),
            listeners: Mutex::new(Vec::new()),
            backing,
        });
        let (tx, rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("cykel-event-store".into())
            .spawn(move || run_worker(worker_shared, rx))?;

        Ok(Self {
            shared,
            commands: Mutex::new(tx),
        })
    }

    /// Pretty JSON of every stored event, for user export.
    pub fn export_json(&self) -> Result<String, StorageError> {
        self.flush();
        let data = AppData {
            events: self.query_all(),
        };
        Ok(serde_json::to_string_pretty(&data)?)
    }

    fn send(&self, command: Command) {
        let sent = match self.commands.lock() {
            Ok(tx) => tx.send(command).is_ok(),
            Err(_) => false,
        };
        if !sent {
            error!("Event store worker is gone, mutation dropped");
        }
    }

    fn snapshot(&self, keep: impl Fn(&CycleEvent) -> bool) -> Vec<CycleEvent> {
        let mut out: Vec<CycleEvent> = match self.shared.events.read() {
            Ok(events) => events.iter().filter(|e| keep(*e)).cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().filter(|e| keep(*e)).cloned().collect(),
        };
        out.sort_by(|a, b| b.date.cmp(&a.date));
        out
    }
}

impl EventStore for VaultEventStore {
    fn insert(&self, mut event: CycleEvent) -> Uuid {
        if event.id.is_nil() {
            event.id = Uuid::new_v4();
        }
        let id = event.id;
        self.send(Command::Insert(event));
        id
    }

    fn update(&self, event: CycleEvent) {
        self.send(Command::Update(event));
    }

    fn delete(&self, id: Uuid) {
        self.send(Command::Delete(id));
    }

    fn query_all(&self) -> Vec<CycleEvent> {
        self.snapshot(|_| true)
    }

    fn query_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<CycleEvent> {
        self.snapshot(|e| e.day() >= start && e.day() <= end)
    }

    fn query_by_kind(&self, kind: EventKind) -> Vec<CycleEvent> {
        self.snapshot(|e| e.kind == kind)
    }

    fn query_by_kinds(&self, kinds: &[EventKind]) -> Vec<CycleEvent> {
        self.snapshot(|e| kinds.contains(&e.kind))
    }

    fn subscribe(&self, listener: Listener) {
        match self.shared.listeners.lock() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        self.send(Command::Flush(tx));
        // An error here means the worker exited, so nothing is pending either way.
        let _ = rx.recv();
    }
}

fn run_worker(shared: Arc<Shared>, commands: Receiver<Command>) {
    for command in commands {
        let change = match command {
            Command::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            other => apply(&shared, other),
        };
        let Some(change) = change else { continue };

        persist(&shared);

        let listeners: Vec<Listener> = match shared.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            listener(&change);
        }
    }
    debug!("Event store worker stopped");
}

fn apply(shared: &Shared, command: Command) -> Option<StoreChange> {
    let mut events = match shared.events.write() {
        Ok(events) => events,
        Err(poisoned) => poisoned.into_inner(),
    };
    match command {
        Command::Insert(event) => {
            let kinds = vec![event.kind];
            events.push(event);
            Some(StoreChange { kinds })
        }
        Command::Update(event) => {
            let Some(slot) = events.iter_mut().find(|e| e.id == event.id) else {
                warn!(id = %event.id, "Update for unknown event ignored");
                return None;
            };
            let mut kinds = vec![slot.kind];
            if event.kind != slot.kind {
                kinds.push(event.kind);
            }
            *slot = event;
            Some(StoreChange { kinds })
        }
        Command::Delete(id) => {
            let index = events.iter().position(|e| e.id == id)?;
            let removed = events.remove(index);
            Some(StoreChange {
                kinds: vec![removed.kind],
            })
        }
        Command::Flush(_) => None,
    }
}

fn persist(shared: &Shared) {
    let Backing::Vault { vault, passphrase } = &shared.backing else {
        return;
    };
    let data = AppData {
        events: match shared.events.read() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        },
    };
    let result = serde_json::to_vec(&data)
        .map_err(StorageError::from)
        .and_then(|json| {
            let json = Zeroizing::new(json);
            vault.seal(passphrase, &json).map_err(StorageError::from)
        });
    if let Err(e) = result {
        error!(path = %vault.path().display(), error = %e, "Failed to persist events");
    }
}
