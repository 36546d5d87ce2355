use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    End,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FlowIntensity {
    Light,
    #[default]
    Normal,
    Heavy,
}

/// Self-reported pain, 0 (none) to 3 (severe).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(try_from = "u8", into = "u8")]
pub struct PainLevel(u8);

impl PainLevel {
    pub const NONE: PainLevel = PainLevel(0);
    pub const SEVERE: PainLevel = PainLevel(3);

    /// Out-of-range input saturates at severe.
    pub fn new(level: u8) -> Self {
        Self(level.min(Self::SEVERE.0))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PainLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > Self::SEVERE.0 {
            return Err(format!("pain level {value} out of range 0-3"));
        }
        Ok(Self(value))
    }
}

impl From<PainLevel> for u8 {
    fn from(level: PainLevel) -> Self {
        level.0
    }
}

/// A single user-entered record. The store assigns `id` on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleEvent {
    pub id: Uuid,
    pub date: NaiveDateTime,
    pub kind: EventKind,
    /// Only meaningful for `EventKind::Start`.
    pub flow: FlowIntensity,
    pub pain: PainLevel,
    #[serde(default)]
    pub notes: String,
}

impl CycleEvent {
    pub fn new(date: NaiveDateTime, kind: EventKind) -> Self {
        Self {
            id: Uuid::nil(),
            date,
            kind,
            flow: FlowIntensity::default(),
            pain: PainLevel::NONE,
            notes: String::new(),
        }
    }

    pub fn with_flow(mut self, flow: FlowIntensity) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_pain(mut self, pain: PainLevel) -> Self {
        self.pain = pain;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Calendar day of the event, time-of-day discarded.
    pub fn day(&self) -> NaiveDate {
        self.date.date()
    }
}

/// A Start paired with its End, built transiently for averaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodInterval {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl PeriodInterval {
    /// Inclusive length in days; `None` while the end is unknown.
    pub fn length(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_days() + 1)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleStatistics {
    pub average_cycle_length: i64,
    pub average_period_length: i64,
    /// 0-100, higher is more regular.
    pub regularity: u8,
}

impl Default for CycleStatistics {
    fn default() -> Self {
        Self {
            average_cycle_length: crate::prediction::DEFAULT_CYCLE_LENGTH,
            average_period_length: crate::prediction::DEFAULT_PERIOD_LENGTH,
            regularity: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CurrentStatus {
    pub is_active: bool,
    /// 1-based while active, 0 otherwise.
    pub current_day: i64,
    pub last_start: Option<NaiveDate>,
    pub last_end: Option<NaiveDate>,
    pub next_predicted_onset: Option<NaiveDate>,
}

/// Everything the event vault holds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppData {
    pub events: Vec<CycleEvent>,
}
