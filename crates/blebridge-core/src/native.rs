//! Seam between the bridge core and the platform BLE stack.
//!
//! The native stack is modelled the way central-manager APIs expose it:
//! every request is a non-blocking call on [`CentralStack`] that returns
//! immediately, and its outcome arrives later as a [`NativeEvent`]. Native
//! completions carry only the originating object and an optional error, with
//! no correlation token, which is why the bridge serializes requests per
//! device (see [`crate::queue`]).
//!
//! [`crate::backend::BtleplugStack`] implements this trait on top of btleplug;
//! [`crate::mock::MockStack`] records calls for tests.

use std::fmt;

use uuid::Uuid;

use blebridge_types::{AdapterState, CharProperties};

use crate::advertisement::Advertisement;

/// Identity of a native peripheral.
///
/// This is the locator scripts receive in scan records and pass to `connect`
/// (the MAC address on Linux/Windows, the CoreBluetooth UUID on macOS).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One connection of a peripheral.
///
/// A peripheral can be closed and connected again while completions of the
/// earlier link are still in flight. Every initiator and every per-link
/// event carries the generation so those late events can be told apart
/// from the current link's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    /// Connected peripheral.
    pub peripheral: PeripheralId,
    /// Connection generation, unique for the lifetime of the bridge.
    pub generation: u64,
}

impl Link {
    /// Link of `peripheral` with the given generation.
    pub fn new(peripheral: PeripheralId, generation: u64) -> Self {
        Self {
            peripheral,
            generation,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.peripheral, self.generation)
    }
}

/// Location of a GATT attribute within one peripheral.
///
/// Completion events identify their target by path, so two attributes with
/// the same UUID under the same parent are indistinguishable to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributePath {
    /// Owning service.
    pub service: Uuid,
    /// Characteristic, for characteristic and descriptor paths.
    pub characteristic: Option<Uuid>,
    /// Descriptor, for descriptor paths.
    pub descriptor: Option<Uuid>,
}

impl AttributePath {
    /// Path of a service.
    pub const fn service(service: Uuid) -> Self {
        Self {
            service,
            characteristic: None,
            descriptor: None,
        }
    }

    /// Path of a characteristic.
    pub const fn characteristic(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic: Some(characteristic),
            descriptor: None,
        }
    }

    /// Path of a descriptor.
    pub const fn descriptor(service: Uuid, characteristic: Uuid, descriptor: Uuid) -> Self {
        Self {
            service,
            characteristic: Some(characteristic),
            descriptor: Some(descriptor),
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.service)?;
        if let Some(characteristic) = self.characteristic {
            write!(f, "/{}", characteristic)?;
        }
        if let Some(descriptor) = self.descriptor {
            write!(f, "/{}", descriptor)?;
        }
        Ok(())
    }
}

/// A discovered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether the service is primary.
    pub primary: bool,
}

impl NativeService {
    /// Attribute path of this service.
    pub fn path(&self) -> AttributePath {
        AttributePath::service(self.uuid)
    }
}

/// A discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCharacteristic {
    /// Owning service UUID.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Native capability flags.
    pub properties: CharProperties,
}

impl NativeCharacteristic {
    /// Attribute path of this characteristic.
    pub fn path(&self) -> AttributePath {
        AttributePath::characteristic(self.service, self.uuid)
    }
}

/// A discovered descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDescriptor {
    /// Owning service UUID.
    pub service: Uuid,
    /// Owning characteristic UUID.
    pub characteristic: Uuid,
    /// Descriptor UUID.
    pub uuid: Uuid,
}

impl NativeDescriptor {
    /// Attribute path of this descriptor.
    pub fn path(&self) -> AttributePath {
        AttributePath::descriptor(self.service, self.characteristic, self.uuid)
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// The peripheral acknowledges; the stack reports a completion.
    WithResponse,
    /// Fire and forget; the stack reports nothing.
    WithoutResponse,
}

/// Error reported by the native stack for one operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct NativeError {
    /// Human-readable description.
    pub message: String,
    /// Platform error code, when the stack provides one.
    pub code: Option<i64>,
}

impl NativeError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a platform error code.
    #[must_use]
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

impl From<btleplug::Error> for NativeError {
    fn from(err: btleplug::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Asynchronous completion or unsolicited event from the native stack.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum NativeEvent {
    /// The radio changed power state.
    AdapterStateChanged(AdapterState),
    /// A peripheral advertised while a scan was running.
    DeviceDiscovered(Advertisement),
    /// A connect request succeeded.
    Connected {
        /// Link the event belongs to.
        link: Link,
    },
    /// A connect request failed.
    ConnectFailed {
        /// Link the event belongs to.
        link: Link,
        /// Stack-provided reason.
        error: NativeError,
    },
    /// The link went down, whether requested or not.
    Disconnected {
        /// Link the event belongs to.
        link: Link,
        /// Reason, if the stack reported one.
        error: Option<NativeError>,
    },
    /// RSSI read finished.
    RssiRead {
        /// Link the event belongs to.
        link: Link,
        /// RSSI in dBm or the failure.
        result: Result<i16, NativeError>,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Link the event belongs to.
        link: Link,
        /// Discovered services or the failure.
        result: Result<Vec<NativeService>, NativeError>,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        /// Link the event belongs to.
        link: Link,
        /// Service that was explored.
        service: AttributePath,
        /// Discovered characteristics or the failure.
        result: Result<Vec<NativeCharacteristic>, NativeError>,
    },
    /// Descriptor discovery for one characteristic finished.
    DescriptorsDiscovered {
        /// Link the event belongs to.
        link: Link,
        /// Characteristic that was explored.
        characteristic: AttributePath,
        /// Discovered descriptors or the failure.
        result: Result<Vec<NativeDescriptor>, NativeError>,
    },
    /// A characteristic value arrived.
    ///
    /// Explicit reads and notifications share this event; nothing in it
    /// says which one caused it.
    CharacteristicValue {
        /// Link the event belongs to.
        link: Link,
        /// Characteristic whose value changed.
        characteristic: AttributePath,
        /// Value bytes or the failure.
        result: Result<Vec<u8>, NativeError>,
    },
    /// A descriptor read finished.
    DescriptorValue {
        /// Link the event belongs to.
        link: Link,
        /// Descriptor that was read.
        descriptor: AttributePath,
        /// Value bytes or the failure.
        result: Result<Vec<u8>, NativeError>,
    },
    /// An acknowledged characteristic write finished.
    CharacteristicWritten {
        /// Link the event belongs to.
        link: Link,
        /// Characteristic that was written.
        characteristic: AttributePath,
        /// Success or the failure.
        result: Result<(), NativeError>,
    },
    /// A descriptor write finished.
    DescriptorWritten {
        /// Link the event belongs to.
        link: Link,
        /// Descriptor that was written.
        descriptor: AttributePath,
        /// Success or the failure.
        result: Result<(), NativeError>,
    },
}

impl NativeEvent {
    /// Peripheral the event concerns, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::AdapterStateChanged(_) => None,
            Self::DeviceDiscovered(adv) => Some(&adv.peripheral),
            _ => self.link().map(|link| &link.peripheral),
        }
    }

    /// Link the event belongs to, for per-connection events.
    pub fn link(&self) -> Option<&Link> {
        match self {
            Self::AdapterStateChanged(_) | Self::DeviceDiscovered(_) => None,
            Self::Connected { link }
            | Self::ConnectFailed { link, .. }
            | Self::Disconnected { link, .. }
            | Self::RssiRead { link, .. }
            | Self::ServicesDiscovered { link, .. }
            | Self::CharacteristicsDiscovered { link, .. }
            | Self::DescriptorsDiscovered { link, .. }
            | Self::CharacteristicValue { link, .. }
            | Self::DescriptorValue { link, .. }
            | Self::CharacteristicWritten { link, .. }
            | Self::DescriptorWritten { link, .. } => Some(link),
        }
    }
}

/// Non-blocking access to the platform BLE central.
///
/// Implementations must return from every method without waiting for the
/// radio and report the outcome later as a [`NativeEvent`]. Writes made with
/// [`WriteKind::WithoutResponse`] produce no completion event.
pub trait CentralStack {
    /// Start scanning. `allow_duplicates` asks for repeated reports of the
    /// same peripheral.
    fn start_scan(&mut self, allow_duplicates: bool);

    /// Stop scanning.
    fn stop_scan(&mut self);

    /// Resolve a script-provided locator to a known peripheral.
    fn retrieve_peripheral(&self, locator: &str) -> Option<PeripheralId>;

    /// Open `link`. Completes with `Connected` or `ConnectFailed`.
    ///
    /// Every later event of this connection, including an unsolicited
    /// `Disconnected`, carries the same link.
    fn connect(&mut self, link: &Link);

    /// Close a link or abandon a pending connect.
    ///
    /// The `Disconnected` the close itself causes is not reported. Events of
    /// this link already in flight may still arrive; the bridge drops them.
    fn cancel_connection(&mut self, link: &Link);

    /// Completes with `RssiRead`.
    fn read_rssi(&mut self, link: &Link);

    /// Completes with `ServicesDiscovered`.
    fn discover_services(&mut self, link: &Link);

    /// Completes with `CharacteristicsDiscovered`.
    fn discover_characteristics(&mut self, link: &Link, service: &NativeService);

    /// Completes with `DescriptorsDiscovered`.
    fn discover_descriptors(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
    );

    /// Completes with `CharacteristicValue`.
    fn read_characteristic(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
    );

    /// Completes with `DescriptorValue`.
    fn read_descriptor(&mut self, link: &Link, descriptor: &NativeDescriptor);

    /// Completes with `CharacteristicWritten` for [`WriteKind::WithResponse`].
    fn write_characteristic(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
        value: &[u8],
        kind: WriteKind,
    );

    /// Completes with `DescriptorWritten`.
    fn write_descriptor(
        &mut self,
        link: &Link,
        descriptor: &NativeDescriptor,
        value: &[u8],
    );

    /// Enable or disable notifications. Values then arrive as
    /// `CharacteristicValue` events.
    fn set_notify(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
        enabled: bool,
    );
}
