//! Bridge counters.
//!
//! Counters are plain atomics so a [`MetricsSnapshot`] can be taken from
//! any thread while the bridge keeps running.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters updated by the bridge.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    commands_issued: AtomicU64,
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,
    commands_dropped: AtomicU64,
    value_updates_delivered: AtomicU64,
    value_updates_dropped: AtomicU64,
    stale_events: AtomicU64,
    protocol_violations: AtomicU64,
    duplicate_attributes: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
}

/// Point-in-time copy of [`BridgeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Commands placed on a device queue.
    pub commands_issued: u64,
    /// Queued commands that completed successfully.
    pub commands_completed: u64,
    /// Queued commands that completed with an error.
    pub commands_failed: u64,
    /// Queued commands discarded by session teardown.
    pub commands_dropped: u64,
    /// Characteristic values routed to a channel.
    pub value_updates_delivered: u64,
    /// Characteristic values with no registered channel.
    pub value_updates_dropped: u64,
    /// Native events for links without a live session, including late events
    /// of a closed link.
    pub stale_events: u64,
    /// Completions that did not match the active command.
    pub protocol_violations: u64,
    /// Discovered attributes that shared a path with a sibling.
    pub duplicate_attributes: u64,
    /// Sessions created by `connect`.
    pub sessions_opened: u64,
    /// Sessions torn down.
    pub sessions_closed: u64,
}

impl BridgeMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn command_issued(&self) {
        self.commands_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn command_completed(&self, success: bool) {
        if success {
            self.commands_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn commands_dropped(&self, count: usize) {
        self.commands_dropped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn value_update(&self, delivered: bool) {
        if delivered {
            self.value_updates_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.value_updates_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn stale_event(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate_attribute(&self) {
        self.duplicate_attributes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_issued: self.commands_issued.load(Ordering::Relaxed),
            commands_completed: self.commands_completed.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            value_updates_delivered: self.value_updates_delivered.load(Ordering::Relaxed),
            value_updates_dropped: self.value_updates_dropped.load(Ordering::Relaxed),
            stale_events: self.stale_events.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            duplicate_attributes: self.duplicate_attributes.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.commands_issued,
            &self.commands_completed,
            &self.commands_failed,
            &self.commands_dropped,
            &self.value_updates_delivered,
            &self.value_updates_dropped,
            &self.stale_events,
            &self.protocol_violations,
            &self.duplicate_attributes,
            &self.sessions_opened,
            &self.sessions_closed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl MetricsSnapshot {
    /// Commands still waiting for a completion.
    pub fn commands_pending(&self) -> u64 {
        self.commands_issued.saturating_sub(
            self.commands_completed + self.commands_failed + self.commands_dropped,
        )
    }
}
