//! Strong-alert sink: the boundary where a reminder becomes sound, vibration and a
//! visible notification. Rendering itself belongs to the host platform.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertChannel {
    CycleOnset,
    Hydration,
}

/// Long-short vibration pattern in milliseconds, shared by both channels.
pub const VIBRATION_PATTERN: [u64; 8] = [0, 1000, 500, 1000, 500, 1000, 500, 1000];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub vibration: &'static [u64],
}

impl AlertChannel {
    pub const ALL: [AlertChannel; 2] = [AlertChannel::CycleOnset, AlertChannel::Hydration];

    pub fn descriptor(self) -> ChannelDescriptor {
        match self {
            AlertChannel::CycleOnset => ChannelDescriptor {
                id: "period_reminder_channel",
                name: "Cycle reminders",
                description: "Upcoming cycle alerts with sound and vibration",
                vibration: &VIBRATION_PATTERN,
            },
            AlertChannel::Hydration => ChannelDescriptor {
                id: "water_reminder_channel",
                name: "Hydration reminders",
                description: "Recurring hydration alerts with sound and vibration",
                vibration: &VIBRATION_PATTERN,
            },
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().id)
    }
}

/// Must not block the caller.
pub trait AlertSink: Send + Sync {
    /// Create any channels the platform needs before the first alert. Idempotent.
    fn ensure_channels(&self);

    fn notify(&self, channel: AlertChannel, title: &str, body: &str);
}

/// Sink that renders alerts as log records, for headless hosts.
#[derive(Default)]
pub struct TracingAlertSink {
    prepared: Mutex<HashSet<AlertChannel>>,
}

impl TracingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_prepared(&self, channel: AlertChannel) -> bool {
        self.prepared
            .lock()
            .map(|set| set.contains(&channel))
            .unwrap_or(false)
    }
}

impl AlertSink for TracingAlertSink {
    fn ensure_channels(&self) {
        let mut prepared = self.prepared.lock().unwrap_or_else(|p| p.into_inner());
        for channel in AlertChannel::ALL {
            if prepared.insert(channel) {
                let descriptor = channel.descriptor();
                debug!(channel = descriptor.id, name = descriptor.name, "Prepared alert channel");
            }
        }
    }

    fn notify(&self, channel: AlertChannel, title: &str, body: &str) {
        if !self.is_prepared(channel) {
            self.ensure_channels();
        }
        info!(%channel, title, body, "Strong alert");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_prepares_channels_first() {
        let sink = TracingAlertSink::new();
        assert!(!sink.is_prepared(AlertChannel::Hydration));
        sink.notify(AlertChannel::Hydration, "title", "body");
        assert!(sink.is_prepared(AlertChannel::Hydration));
        assert!(sink.is_prepared(AlertChannel::CycleOnset));
    }

    #[test]
    fn channel_ids_are_distinct() {
        assert_ne!(
            AlertChannel::CycleOnset.descriptor().id,
            AlertChannel::Hydration.descriptor().id
        );
        assert_eq!(AlertChannel::Hydration.to_string(), "water_reminder_channel");
    }
}
