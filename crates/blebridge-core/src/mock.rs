//! Test doubles for the native stack and the reply sink.
//!
//! [`MockStack`] records every [`CentralStack`] call and never emits events
//! on its own; tests feed completions to [`crate::Bridge::handle_event`]
//! explicitly, which makes ordering scenarios (late completions, mismatched
//! completions) easy to script. [`RecordingSink`] keeps every delivery.
//!
//! Both are cheap to clone and share their recordings between clones.
//!
//! # Example
//!
//! ```
//! use blebridge_core::mock::{MockStack, StackCall};
//! use blebridge_core::{CentralStack, Link, PeripheralId};
//!
//! let mut stack = MockStack::new().with_peripheral("AA:BB:CC:DD:EE:FF");
//! let peripheral = stack.retrieve_peripheral("AA:BB:CC:DD:EE:FF").unwrap();
//! let link = Link::new(peripheral, 1);
//! stack.read_rssi(&link);
//! assert_eq!(
//!     stack.calls(),
//!     vec![StackCall::ReadRssi(Link::new(PeripheralId::new("AA:BB:CC:DD:EE:FF"), 1))]
//! );
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use blebridge_types::CallbackId;

use crate::native::{
    CentralStack, Link, NativeCharacteristic, NativeDescriptor, NativeService, PeripheralId,
    WriteKind,
};
use crate::reply::{Delivery, Reply, ReplySink};

/// One recorded [`CentralStack`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    /// `start_scan`.
    StartScan {
        /// Duplicate reporting flag.
        allow_duplicates: bool,
    },
    /// `stop_scan`.
    StopScan,
    /// `connect`.
    Connect(Link),
    /// `cancel_connection`.
    CancelConnection(Link),
    /// `read_rssi`.
    ReadRssi(Link),
    /// `discover_services`.
    DiscoverServices(Link),
    /// `discover_characteristics`.
    DiscoverCharacteristics(Link, NativeService),
    /// `discover_descriptors`.
    DiscoverDescriptors(Link, NativeCharacteristic),
    /// `read_characteristic`.
    ReadCharacteristic(Link, NativeCharacteristic),
    /// `read_descriptor`.
    ReadDescriptor(Link, NativeDescriptor),
    /// `write_characteristic`.
    WriteCharacteristic {
        /// Target link.
        link: Link,
        /// Target characteristic.
        characteristic: NativeCharacteristic,
        /// Written bytes.
        value: Vec<u8>,
        /// Acknowledgment mode.
        kind: WriteKind,
    },
    /// `write_descriptor`.
    WriteDescriptor {
        /// Target link.
        link: Link,
        /// Target descriptor.
        descriptor: NativeDescriptor,
        /// Written bytes.
        value: Vec<u8>,
    },
    /// `set_notify`.
    SetNotify {
        /// Target link.
        link: Link,
        /// Target characteristic.
        characteristic: NativeCharacteristic,
        /// New notification state.
        enabled: bool,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Recording [`CentralStack`].
#[derive(Debug, Clone, Default)]
pub struct MockStack {
    peripherals: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<StackCall>>>,
}

impl MockStack {
    /// Create a stack that knows no peripherals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a locator resolvable by `retrieve_peripheral`.
    #[must_use]
    pub fn with_peripheral(self, locator: impl Into<String>) -> Self {
        self.add_peripheral(locator);
        self
    }

    /// Make a locator resolvable after construction.
    pub fn add_peripheral(&self, locator: impl Into<String>) {
        lock(&self.peripherals).insert(locator.into());
    }

    /// Every call recorded so far, oldest first.
    pub fn calls(&self) -> Vec<StackCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&StackCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    /// Most recent call.
    pub fn last_call(&self) -> Option<StackCall> {
        lock(&self.calls).last().cloned()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: StackCall) {
        lock(&self.calls).push(call);
    }
}

impl CentralStack for MockStack {
    fn start_scan(&mut self, allow_duplicates: bool) {
        self.record(StackCall::StartScan { allow_duplicates });
    }

    fn stop_scan(&mut self) {
        self.record(StackCall::StopScan);
    }

    fn retrieve_peripheral(&self, locator: &str) -> Option<PeripheralId> {
        lock(&self.peripherals)
            .contains(locator)
            .then(|| PeripheralId::new(locator))
    }

    fn connect(&mut self, link: &Link) {
        self.record(StackCall::Connect(link.clone()));
    }

    fn cancel_connection(&mut self, link: &Link) {
        self.record(StackCall::CancelConnection(link.clone()));
    }

    fn read_rssi(&mut self, link: &Link) {
        self.record(StackCall::ReadRssi(link.clone()));
    }

    fn discover_services(&mut self, link: &Link) {
        self.record(StackCall::DiscoverServices(link.clone()));
    }

    fn discover_characteristics(&mut self, link: &Link, service: &NativeService) {
        self.record(StackCall::DiscoverCharacteristics(
            link.clone(),
            service.clone(),
        ));
    }

    fn discover_descriptors(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
    ) {
        self.record(StackCall::DiscoverDescriptors(
            link.clone(),
            characteristic.clone(),
        ));
    }

    fn read_characteristic(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
    ) {
        self.record(StackCall::ReadCharacteristic(
            link.clone(),
            characteristic.clone(),
        ));
    }

    fn read_descriptor(&mut self, link: &Link, descriptor: &NativeDescriptor) {
        self.record(StackCall::ReadDescriptor(
            link.clone(),
            descriptor.clone(),
        ));
    }

    fn write_characteristic(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
        value: &[u8],
        kind: WriteKind,
    ) {
        self.record(StackCall::WriteCharacteristic {
            link: link.clone(),
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            kind,
        });
    }

    fn write_descriptor(
        &mut self,
        link: &Link,
        descriptor: &NativeDescriptor,
        value: &[u8],
    ) {
        self.record(StackCall::WriteDescriptor {
            link: link.clone(),
            descriptor: descriptor.clone(),
            value: value.to_vec(),
        });
    }

    fn set_notify(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
        enabled: bool,
    ) {
        self.record(StackCall::SetNotify {
            link: link.clone(),
            characteristic: characteristic.clone(),
            enabled,
        });
    }
}

/// [`ReplySink`] that keeps every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery so far, oldest first.
    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.deliveries).clone()
    }

    /// Deliveries made on one channel.
    pub fn deliveries_for(&self, channel: CallbackId) -> Vec<Delivery> {
        lock(&self.deliveries)
            .iter()
            .filter(|d| d.channel == channel)
            .cloned()
            .collect()
    }

    /// Replies made on one channel.
    pub fn replies_for(&self, channel: CallbackId) -> Vec<Reply> {
        self.deliveries_for(channel)
            .into_iter()
            .map(|d| d.reply)
            .collect()
    }

    /// Whether the last delivery on the channel was terminal.
    pub fn is_terminated(&self, channel: CallbackId) -> bool {
        self.deliveries_for(channel)
            .last()
            .is_some_and(|d| !d.keep_alive)
    }

    /// Code of the last error reply on the channel.
    pub fn error_code(&self, channel: CallbackId) -> Option<String> {
        self.replies_for(channel).into_iter().rev().find_map(|reply| match reply {
            Reply::Error(err) => Some(err.code),
            _ => None,
        })
    }

    /// Forget recorded deliveries.
    pub fn clear(&self) {
        lock(&self.deliveries).clear();
    }
}

impl ReplySink for RecordingSink {
    fn deliver(&self, delivery: Delivery) {
        lock(&self.deliveries).push(delivery);
    }
}
