//! Live state of one connected device.
//!
//! A [`DeviceSession`] exists from the moment `connect` allocates a device
//! handle until the link is torn down. It owns the device's object registry,
//! command queue and characteristic callback table, so dropping the session
//! invalidates every handle and pending request it held.
//!
//! The session's [`Link`] uses the device handle as its generation. Device
//! handles are never reused, so an event tagged with an older link can never
//! match a later session of the same peripheral.

use tracing::debug;

use blebridge_types::{CallbackId, ConnectionState, DeviceHandle, ObjectHandle};

use crate::error::{Error, Result};
use crate::multiplexer::CallbackTable;
use crate::native::{
    CentralStack, Link, NativeCharacteristic, NativeDescriptor, NativeService, PeripheralId,
    WriteKind,
};
use crate::queue::{Command, CommandQueue, Operation, OperationKind, Target};
use crate::registry::{GattObject, HandleRegistry};

/// State of one device between connect and teardown.
#[derive(Debug)]
pub struct DeviceSession {
    handle: DeviceHandle,
    link: Link,
    locator: String,
    connect_channel: CallbackId,
    state: ConnectionState,
    registry: HandleRegistry<GattObject>,
    queue: CommandQueue,
    callbacks: CallbackTable,
}

impl DeviceSession {
    /// Create a session in the [`ConnectionState::Connecting`] state.
    pub fn new(
        handle: DeviceHandle,
        peripheral: PeripheralId,
        locator: impl Into<String>,
        connect_channel: CallbackId,
    ) -> Self {
        Self {
            handle,
            link: Link::new(peripheral, handle.get()),
            locator: locator.into(),
            connect_channel,
            state: ConnectionState::Connecting,
            registry: HandleRegistry::new(),
            queue: CommandQueue::new(),
            callbacks: CallbackTable::new(),
        }
    }

    /// Device handle of this session.
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Native peripheral identity.
    pub fn peripheral(&self) -> &PeripheralId {
        &self.link.peripheral
    }

    /// Link this session owns. Events for any other link are stale.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Locator the session was opened with.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Channel that receives connection state events.
    pub fn connect_channel(&self) -> CallbackId {
        self.connect_channel
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Update the connection state.
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Registered GATT objects.
    pub fn registry(&self) -> &HandleRegistry<GattObject> {
        &self.registry
    }

    /// Pending commands.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Characteristic callback table.
    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    /// Mutable characteristic callback table.
    pub fn callbacks_mut(&mut self) -> &mut CallbackTable {
        &mut self.callbacks
    }

    /// Register a discovered object, reusing its handle if seen before.
    pub fn register(&mut self, object: GattObject) -> ObjectHandle {
        self.registry.register_gatt(object)
    }

    /// Resolve a service handle.
    pub fn resolve_service(&self, handle: ObjectHandle) -> Result<&NativeService> {
        match self.registry.resolve(handle)? {
            GattObject::Service(service) => Ok(service),
            _ => Err(Error::ObjectNotFound(handle)),
        }
    }

    /// Resolve a characteristic handle.
    pub fn resolve_characteristic(&self, handle: ObjectHandle) -> Result<&NativeCharacteristic> {
        match self.registry.resolve(handle)? {
            GattObject::Characteristic(characteristic) => Ok(characteristic),
            _ => Err(Error::ObjectNotFound(handle)),
        }
    }

    /// Resolve a descriptor handle.
    pub fn resolve_descriptor(&self, handle: ObjectHandle) -> Result<&NativeDescriptor> {
        match self.registry.resolve(handle)? {
            GattObject::Descriptor(descriptor) => Ok(descriptor),
            _ => Err(Error::ObjectNotFound(handle)),
        }
    }

    /// Queue a command, starting it at once if the queue was idle.
    ///
    /// Returns whether the command was started.
    pub fn enqueue<S: CentralStack>(&mut self, stack: &mut S, command: Command) -> bool {
        match self.queue.enqueue(command) {
            Some(active) => {
                start(stack, &self.link, active);
                true
            }
            None => {
                debug!(
                    "Device {} busy, {} commands queued",
                    self.handle,
                    self.queue.len()
                );
                false
            }
        }
    }

    /// Validate a completion against the active command.
    pub fn expect_completion(&self, target: Target, kind: OperationKind) -> Result<&Command> {
        self.queue.expect_completion(target, kind)
    }

    /// Drop the active command and start the next one.
    ///
    /// Returns whether another command was started.
    pub fn advance<S: CentralStack>(&mut self, stack: &mut S) -> bool {
        match self.queue.advance() {
            Some(next) => {
                start(stack, &self.link, next);
                true
            }
            None => false,
        }
    }

    /// Forget every handle, command and callback entry.
    ///
    /// Pending commands receive no reply. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.registry.clear();
        self.callbacks.clear();
        self.queue.clear()
    }
}

/// Issue the native call of a command that just became active.
fn start<S: CentralStack>(stack: &mut S, link: &Link, command: &Command) {
    debug!(
        "Starting {} on {} for {}",
        command.kind(),
        command.target(),
        link
    );
    match &command.operation {
        Operation::ReadRssi => stack.read_rssi(link),
        Operation::DiscoverServices => stack.discover_services(link),
        Operation::DiscoverCharacteristics(service) => {
            stack.discover_characteristics(link, service)
        }
        Operation::DiscoverDescriptors(characteristic) => {
            stack.discover_descriptors(link, characteristic)
        }
        Operation::ReadDescriptor(descriptor) => stack.read_descriptor(link, descriptor),
        Operation::WriteCharacteristic {
            characteristic,
            value,
        } => stack.write_characteristic(link, characteristic, value, WriteKind::WithResponse),
        Operation::WriteDescriptor { descriptor, value } => {
            stack.write_descriptor(link, descriptor, value)
        }
    }
}
