//! Core types shared between the bridge and its script-facing callers.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value as seen by script callers.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

handle_type! {
    /// Identifies one connected device session.
    ///
    /// Allocated at connect time, increasing, never reused within a process.
    DeviceHandle
}

handle_type! {
    /// Identifies a discovered service, characteristic, or descriptor.
    ///
    /// Scoped to the owning device session; two devices may hand out the
    /// same numeric value.
    ObjectHandle
}

handle_type! {
    /// Identifies the callback channel results for one call are delivered to.
    CallbackId
}

/// Connection state reported on a connect channel.
///
/// Serialized as its integer value (`0`, `1`, `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "u8", try_from = "u8"))]
#[repr(u8)]
pub enum ConnectionState {
    /// Link is down.
    Disconnected = 0,
    /// Connect request issued, waiting for the stack.
    Connecting = 1,
    /// Link is up.
    Connected = 2,
}

impl From<ConnectionState> for u8 {
    fn from(state: ConnectionState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for ConnectionState {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disconnected),
            1 => Ok(Self::Connecting),
            2 => Ok(Self::Connected),
            other => Err(ParseError::InvalidValue(format!(
                "unknown connection state {other}"
            ))),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Whether a service is primary or secondary.
///
/// Serialized as its integer value (`0` primary, `1` secondary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "u8", try_from = "u8"))]
#[repr(u8)]
pub enum ServiceType {
    /// Primary service.
    Primary = 0,
    /// Secondary (included) service.
    Secondary = 1,
}

impl ServiceType {
    /// Map the native "is primary" flag.
    #[must_use]
    pub fn from_primary(primary: bool) -> Self {
        if primary { Self::Primary } else { Self::Secondary }
    }
}

impl From<ServiceType> for u8 {
    fn from(kind: ServiceType) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ServiceType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Primary),
            1 => Ok(Self::Secondary),
            other => Err(ParseError::InvalidValue(format!(
                "unknown service type {other}"
            ))),
        }
    }
}

/// Power state of the local Bluetooth radio.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new states
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum AdapterState {
    /// State not yet reported by the stack.
    #[default]
    Unknown,
    /// Radio is resetting; a new state follows.
    Resetting,
    /// The platform has no BLE central support.
    Unsupported,
    /// The application may not use Bluetooth.
    Unauthorized,
    /// Radio is off.
    PoweredOff,
    /// Radio is on and accepts scan and connect requests.
    PoweredOn,
}

impl AdapterState {
    /// Whether native scans may be started in this state.
    #[must_use]
    pub fn is_powered_on(self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        f.write_str(label)
    }
}

/// Native characteristic capability flags.
///
/// The low eight bits match the GATT characteristic properties octet; the
/// two encryption-required flags are platform extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CharProperties(u16);

impl CharProperties {
    /// Value may be broadcast in advertisements.
    pub const BROADCAST: Self = Self(0x0001);
    /// Value may be read.
    pub const READ: Self = Self(0x0002);
    /// Value may be written without a response.
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x0004);
    /// Value may be written with a response.
    pub const WRITE: Self = Self(0x0008);
    /// Value changes may be notified.
    pub const NOTIFY: Self = Self(0x0010);
    /// Value changes may be indicated.
    pub const INDICATE: Self = Self(0x0020);
    /// Value may be written with an authentication signature.
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x0040);
    /// Extended properties descriptor present.
    pub const EXTENDED_PROPERTIES: Self = Self(0x0080);
    /// Notifications require an encrypted link.
    pub const NOTIFY_ENCRYPTION_REQUIRED: Self = Self(0x0100);
    /// Indications require an encrypted link.
    pub const INDICATE_ENCRYPTION_REQUIRED: Self = Self(0x0200);

    const ALL: u16 = 0x03FF;

    /// No capabilities.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw bits, dropping unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u16) -> Self {
        Self(bits & Self::ALL)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether a write of either kind is allowed.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.intersects(Self(Self::WRITE.0 | Self::WRITE_WITHOUT_RESPONSE.0))
    }
}

impl BitOr for CharProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CharProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Portable permission bits (Android `BluetoothGattCharacteristic` values).
pub mod permission {
    /// Readable.
    pub const READ: u32 = 1;
    /// Readable over an encrypted link.
    pub const READ_ENCRYPTED: u32 = 2;
    /// Readable over an encrypted, MITM-protected link.
    pub const READ_ENCRYPTED_MITM: u32 = 4;
    /// Writable.
    pub const WRITE: u32 = 16;
    /// Writable over an encrypted link.
    pub const WRITE_ENCRYPTED: u32 = 32;
    /// Writable over an encrypted, MITM-protected link.
    pub const WRITE_ENCRYPTED_MITM: u32 = 64;
    /// Signed write.
    pub const WRITE_SIGNED: u32 = 128;
    /// Signed write over a MITM-protected link.
    pub const WRITE_SIGNED_MITM: u32 = 256;
}

/// Portable property bits (Android `BluetoothGattCharacteristic` values).
pub mod property {
    /// Broadcast.
    pub const BROADCAST: u32 = 1;
    /// Read.
    pub const READ: u32 = 2;
    /// Write without response.
    pub const WRITE_NO_RESPONSE: u32 = 4;
    /// Write with response.
    pub const WRITE: u32 = 8;
    /// Notify.
    pub const NOTIFY: u32 = 16;
    /// Indicate.
    pub const INDICATE: u32 = 32;
    /// Authenticated signed write.
    pub const SIGNED_WRITE: u32 = 64;
    /// Extended properties.
    pub const EXTENDED_PROPS: u32 = 128;
}

/// Portable write type bits (Android `BluetoothGattCharacteristic` values).
pub mod write_type {
    /// Write without response.
    pub const NO_RESPONSE: u32 = 1;
    /// Acknowledged write.
    pub const DEFAULT: u32 = 2;
    /// Signed write.
    pub const SIGNED: u32 = 4;
}

/// Permissions reported for every descriptor.
///
/// The native stack exposes no per-descriptor access flags.
pub const DESCRIPTOR_PERMISSIONS: u32 = permission::READ | permission::WRITE;

fn translate(native: CharProperties, table: &[(CharProperties, u32)]) -> u32 {
    table
        .iter()
        .filter(|(flag, _)| native.contains(*flag))
        .fold(0, |bits, (_, portable)| bits | portable)
}

/// Translate native capabilities into portable permission bits.
#[must_use]
pub fn permissions(native: CharProperties) -> u32 {
    translate(
        native,
        &[
            (CharProperties::READ, permission::READ),
            (CharProperties::WRITE, permission::WRITE),
            (CharProperties::WRITE_WITHOUT_RESPONSE, permission::WRITE),
            (CharProperties::AUTHENTICATED_SIGNED_WRITES, permission::WRITE_SIGNED),
        ],
    )
}

/// Translate native capabilities into portable property bits.
#[must_use]
pub fn properties(native: CharProperties) -> u32 {
    translate(
        native,
        &[
            (CharProperties::BROADCAST, property::BROADCAST),
            (CharProperties::READ, property::READ),
            (CharProperties::WRITE_WITHOUT_RESPONSE, property::WRITE_NO_RESPONSE),
            (CharProperties::WRITE, property::WRITE),
            (CharProperties::NOTIFY, property::NOTIFY),
            (CharProperties::INDICATE, property::INDICATE),
            (CharProperties::AUTHENTICATED_SIGNED_WRITES, property::SIGNED_WRITE),
            (CharProperties::EXTENDED_PROPERTIES, property::EXTENDED_PROPS),
            (CharProperties::NOTIFY_ENCRYPTION_REQUIRED, property::NOTIFY),
            (CharProperties::INDICATE_ENCRYPTION_REQUIRED, property::INDICATE),
        ],
    )
}

/// Translate native capabilities into portable write type bits.
#[must_use]
pub fn write_types(native: CharProperties) -> u32 {
    translate(
        native,
        &[
            (CharProperties::WRITE_WITHOUT_RESPONSE, write_type::NO_RESPONSE),
            (CharProperties::WRITE, write_type::DEFAULT),
            (CharProperties::AUTHENTICATED_SIGNED_WRITES, write_type::SIGNED),
        ],
    )
}

/// One discovery result on a scan channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ScanRecord {
    /// Locator to pass to `connect`.
    pub address: String,
    /// Signal strength in dBm (127 when the stack did not report one).
    pub rssi: i16,
    /// Advertised or cached local name.
    pub name: Option<String>,
    /// Raw advertisement AD structures.
    pub scan_record: Vec<u8>,
}

/// State event on a connect channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ConnectInfo {
    /// Session the event belongs to.
    pub device_handle: DeviceHandle,
    /// New connection state.
    pub state: ConnectionState,
}

/// A discovered service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceRecord {
    /// Handle for follow-up calls.
    pub handle: ObjectHandle,
    /// Service UUID.
    pub uuid: Uuid,
    /// Primary or secondary.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub service_type: ServiceType,
}

/// A discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CharacteristicRecord {
    /// Handle for follow-up calls.
    pub handle: ObjectHandle,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Portable permission bits, see [`permission`].
    pub permissions: u32,
    /// Portable property bits, see [`property`].
    pub properties: u32,
    /// Portable write type bits, see [`write_type`].
    pub write_type: u32,
}

impl CharacteristicRecord {
    /// Build a record, translating native capabilities into portable bits.
    #[must_use]
    pub fn new(handle: ObjectHandle, uuid: Uuid, native: CharProperties) -> Self {
        Self {
            handle,
            uuid,
            permissions: permissions(native),
            properties: properties(native),
            write_type: write_types(native),
        }
    }
}

/// A discovered descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DescriptorRecord {
    /// Handle for follow-up calls.
    pub handle: ObjectHandle,
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Portable permission bits.
    pub permissions: u32,
}

impl DescriptorRecord {
    /// Build a record with the fixed descriptor permissions.
    #[must_use]
    pub fn new(handle: ObjectHandle, uuid: Uuid) -> Self {
        Self {
            handle,
            uuid,
            permissions: DESCRIPTOR_PERMISSIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_bits_match_gatt_octet() {
        let all = CharProperties::from_bits_truncate(0x00FF);
        assert_eq!(properties(all), 0xFF);
    }

    #[test]
    fn test_encryption_required_folds_into_notify_and_indicate() {
        let native = CharProperties::NOTIFY_ENCRYPTION_REQUIRED
            | CharProperties::INDICATE_ENCRYPTION_REQUIRED;
        assert_eq!(properties(native), property::NOTIFY | property::INDICATE);
    }

    #[test]
    fn test_permissions_for_read_write() {
        let native = CharProperties::READ | CharProperties::WRITE;
        assert_eq!(permissions(native), permission::READ | permission::WRITE);

        let native = CharProperties::WRITE_WITHOUT_RESPONSE;
        assert_eq!(permissions(native), permission::WRITE);

        let native = CharProperties::AUTHENTICATED_SIGNED_WRITES;
        assert_eq!(permissions(native), permission::WRITE_SIGNED);

        assert_eq!(permissions(CharProperties::NOTIFY), 0);
    }

    #[test]
    fn test_write_types() {
        assert_eq!(write_types(CharProperties::READ), 0);
        assert_eq!(
            write_types(CharProperties::WRITE | CharProperties::WRITE_WITHOUT_RESPONSE),
            write_type::DEFAULT | write_type::NO_RESPONSE
        );
        assert_eq!(
            write_types(CharProperties::AUTHENTICATED_SIGNED_WRITES),
            write_type::SIGNED
        );
    }

    #[test]
    fn test_from_bits_truncate_drops_unknown() {
        assert_eq!(CharProperties::from_bits_truncate(0xFC00).bits(), 0);
        assert!(CharProperties::from_bits_truncate(0x0208).contains(CharProperties::WRITE));
    }

    #[test]
    fn test_is_writable() {
        assert!(CharProperties::WRITE.is_writable());
        assert!(CharProperties::WRITE_WITHOUT_RESPONSE.is_writable());
        assert!(!(CharProperties::READ | CharProperties::NOTIFY).is_writable());
    }

    #[test]
    fn test_connection_state_conversion() {
        assert_eq!(u8::from(ConnectionState::Connecting), 1);
        assert_eq!(ConnectionState::try_from(2).unwrap(), ConnectionState::Connected);
        assert!(ConnectionState::try_from(3).is_err());
    }

    #[test]
    fn test_adapter_state_powered_on() {
        assert!(AdapterState::PoweredOn.is_powered_on());
        assert!(!AdapterState::default().is_powered_on());
        assert!(!AdapterState::Resetting.is_powered_on());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_connect_info_serializes_as_integers() {
        let info = ConnectInfo {
            device_handle: DeviceHandle(4),
            state: ConnectionState::Connected,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json, serde_json::json!({ "deviceHandle": 4, "state": 2 }));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_records_use_script_field_names() {
        let uuid = crate::uuid::uuid_from_u16(0x180F);
        let service = ServiceRecord {
            handle: ObjectHandle(1),
            uuid,
            service_type: ServiceType::Secondary,
        };
        let json = serde_json::to_value(&service).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["uuid"], "0000180f-0000-1000-8000-00805f9b34fb");

        let ch = CharacteristicRecord::new(ObjectHandle(2), uuid, CharProperties::WRITE);
        let json = serde_json::to_value(&ch).unwrap();
        assert_eq!(json["writeType"], write_type::DEFAULT);
        assert_eq!(json["properties"], property::WRITE);

        let scan = ScanRecord {
            address: "AA:BB:CC:DD:EE:FF".into(),
            rssi: -60,
            name: None,
            scan_record: vec![2, 1, 6],
        };
        let json = serde_json::to_value(&scan).unwrap();
        assert_eq!(json["scanRecord"], serde_json::json!([2, 1, 6]));
        assert!(json["name"].is_null());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_connection_state_rejects_unknown_integer() {
        let result: Result<ConnectionState, _> = serde_json::from_str("7");
        assert!(result.is_err());
    }
}
