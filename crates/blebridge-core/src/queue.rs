//! Per-device serialized command queue.
//!
//! The native stack allows one outstanding discovery, read, write or RSSI
//! request per connection and reports completions without a correlation
//! token. Each device session therefore keeps a FIFO of [`Command`]s: only the
//! front command ("active") has its native call in flight, every completion is
//! checked against the active command's target and kind, and the next command
//! starts only after the active one is removed.
//!
//! The queue itself never calls into the stack. [`CommandQueue::enqueue`] and
//! [`CommandQueue::advance`] return the command that just became active, and
//! the owning session starts it (see [`crate::session::DeviceSession`]).

use std::collections::VecDeque;
use std::fmt;

use blebridge_types::CallbackId;

use crate::error::{Error, Result};
use crate::native::{AttributePath, NativeCharacteristic, NativeDescriptor, NativeService};

/// The deferred native call of a command, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read the link RSSI.
    ReadRssi,
    /// Discover the peripheral's services.
    DiscoverServices,
    /// Discover characteristics of a service.
    DiscoverCharacteristics(NativeService),
    /// Discover descriptors of a characteristic.
    DiscoverDescriptors(NativeCharacteristic),
    /// Read a descriptor value.
    ReadDescriptor(NativeDescriptor),
    /// Acknowledged characteristic write.
    WriteCharacteristic {
        /// Target characteristic.
        characteristic: NativeCharacteristic,
        /// Bytes to write.
        value: Vec<u8>,
    },
    /// Descriptor write.
    WriteDescriptor {
        /// Target descriptor.
        descriptor: NativeDescriptor,
        /// Bytes to write.
        value: Vec<u8>,
    },
}

impl Operation {
    /// Kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::ReadRssi => OperationKind::RssiRead,
            Self::DiscoverServices => OperationKind::ServiceDiscovery,
            Self::DiscoverCharacteristics(_) => OperationKind::CharacteristicDiscovery,
            Self::DiscoverDescriptors(_) => OperationKind::DescriptorDiscovery,
            Self::ReadDescriptor(_) => OperationKind::DescriptorRead,
            Self::WriteCharacteristic { .. } => OperationKind::CharacteristicWrite,
            Self::WriteDescriptor { .. } => OperationKind::DescriptorWrite,
        }
    }

    /// Native object the operation acts on.
    pub fn target(&self) -> Target {
        match self {
            Self::ReadRssi | Self::DiscoverServices => Target::Peripheral,
            Self::DiscoverCharacteristics(service) => Target::Attribute(service.path()),
            Self::DiscoverDescriptors(characteristic) => Target::Attribute(characteristic.path()),
            Self::ReadDescriptor(descriptor) => Target::Attribute(descriptor.path()),
            Self::WriteCharacteristic { characteristic, .. } => {
                Target::Attribute(characteristic.path())
            }
            Self::WriteDescriptor { descriptor, .. } => Target::Attribute(descriptor.path()),
        }
    }
}

/// Shape of a queued operation, matched against completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// RSSI read.
    RssiRead,
    /// Service discovery.
    ServiceDiscovery,
    /// Characteristic discovery.
    CharacteristicDiscovery,
    /// Descriptor discovery.
    DescriptorDiscovery,
    /// Descriptor read.
    DescriptorRead,
    /// Characteristic write with response.
    CharacteristicWrite,
    /// Descriptor write.
    DescriptorWrite,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RssiRead => "rssi",
            Self::ServiceDiscovery => "services",
            Self::CharacteristicDiscovery => "characteristics",
            Self::DescriptorDiscovery => "descriptors",
            Self::DescriptorRead => "readDescriptor",
            Self::CharacteristicWrite => "writeCharacteristic",
            Self::DescriptorWrite => "writeDescriptor",
        };
        f.write_str(name)
    }
}

/// Native object a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The peripheral itself.
    Peripheral,
    /// A service, characteristic or descriptor.
    Attribute(AttributePath),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peripheral => f.write_str("peripheral"),
            Self::Attribute(path) => write!(f, "{}", path),
        }
    }
}

/// A pending operation and the channel its result goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Callback channel of the originating call.
    pub channel: CallbackId,
    /// Deferred native call.
    pub operation: Operation,
}

impl Command {
    /// Create a command.
    pub fn new(channel: CallbackId, operation: Operation) -> Self {
        Self { channel, operation }
    }

    /// Kind of the deferred operation.
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Target of the deferred operation.
    pub fn target(&self) -> Target {
        self.operation.target()
    }
}

/// FIFO of commands for one device.
///
/// Invariant: only the front command has been started.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    ///
    /// Returns the command if it became active, in which case the caller
    /// must start it now.
    pub fn enqueue(&mut self, command: Command) -> Option<&Command> {
        let was_empty = self.commands.is_empty();
        self.commands.push_back(command);
        if was_empty { self.commands.front() } else { None }
    }

    /// The active command, if any.
    pub fn active(&self) -> Option<&Command> {
        self.commands.front()
    }

    /// Check that a completion for `target` of shape `kind` belongs to the
    /// active command.
    ///
    /// Fails with [`Error::ProtocolViolation`] when the queue is empty or the
    /// active command has a different target or kind.
    pub fn expect_completion(&self, target: Target, kind: OperationKind) -> Result<&Command> {
        let Some(active) = self.commands.front() else {
            return Err(Error::protocol_violation(format!(
                "{} completion for {} with no active command",
                kind, target
            )));
        };
        if active.kind() != kind || active.target() != target {
            return Err(Error::protocol_violation(format!(
                "{} completion for {} while {} on {} is active",
                kind,
                target,
                active.kind(),
                active.target()
            )));
        }
        Ok(active)
    }

    /// Remove the active command.
    ///
    /// Returns the next command if one became active, in which case the
    /// caller must start it now.
    pub fn advance(&mut self) -> Option<&Command> {
        self.commands.pop_front();
        self.commands.front()
    }

    /// Number of queued commands, including the active one.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop every command without replying.
    pub fn clear(&mut self) -> usize {
        let dropped = self.commands.len();
        self.commands.clear();
        dropped
    }
}
