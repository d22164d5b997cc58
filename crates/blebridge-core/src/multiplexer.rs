//! Characteristic value callback table.
//!
//! The native stack reports explicit reads and notifications with the same
//! "value updated" event. Each characteristic therefore has at most one
//! registered channel plus a flag saying whether it is a one-shot read or a
//! notification subscription. Registering again overwrites the entry.

use std::collections::HashMap;

use blebridge_types::CallbackId;

use crate::native::AttributePath;

/// Channel registered for a characteristic's value updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackEntry {
    /// Destination channel.
    pub channel: CallbackId,
    /// `true` for notification subscriptions, `false` for one-shot reads.
    pub persistent: bool,
}

/// Where a value update should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Destination channel.
    pub channel: CallbackId,
    /// Whether more deliveries will follow on the channel.
    pub keep_alive: bool,
}

/// Per-device map from characteristic to callback entry.
#[derive(Debug, Default)]
pub struct CallbackTable {
    entries: HashMap<AttributePath, CallbackEntry>,
}

impl CallbackTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot read, replacing any previous entry.
    pub fn set_one_shot(&mut self, characteristic: AttributePath, channel: CallbackId) {
        self.entries.insert(
            characteristic,
            CallbackEntry {
                channel,
                persistent: false,
            },
        );
    }

    /// Register a notification subscription, replacing any previous entry.
    pub fn set_persistent(&mut self, characteristic: AttributePath, channel: CallbackId) {
        self.entries.insert(
            characteristic,
            CallbackEntry {
                channel,
                persistent: true,
            },
        );
    }

    /// Route a value update.
    ///
    /// One-shot entries are consumed. Returns `None` when nothing is
    /// registered for the characteristic.
    pub fn dispatch(&mut self, characteristic: &AttributePath) -> Option<Dispatch> {
        let entry = *self.entries.get(characteristic)?;
        if !entry.persistent {
            self.entries.remove(characteristic);
        }
        Some(Dispatch {
            channel: entry.channel,
            keep_alive: entry.persistent,
        })
    }

    /// Remove the entry for a characteristic.
    pub fn remove(&mut self, characteristic: &AttributePath) -> Option<CallbackEntry> {
        self.entries.remove(characteristic)
    }

    /// Entry for a characteristic.
    pub fn get(&self, characteristic: &AttributePath) -> Option<&CallbackEntry> {
        self.entries.get(characteristic)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
