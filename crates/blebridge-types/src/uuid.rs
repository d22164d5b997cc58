//! Well-known Bluetooth UUIDs and 16-bit assigned number helpers.
//!
//! Assigned numbers live inside the Bluetooth Base UUID
//! (`0000xxxx-0000-1000-8000-00805f9b34fb`).

use uuid::{Uuid, uuid};

/// The Bluetooth Base UUID that all 16- and 32-bit assigned numbers expand into.
pub const BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

/// Client Characteristic Configuration descriptor (0x2902).
///
/// Platforms manage this descriptor themselves when notifications are toggled,
/// so writes to it are acknowledged without touching the radio.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid =
    uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Generic Attribute Profile (GATT) service.
pub const GATT_SERVICE: Uuid = uuid!("00001801-0000-1000-8000-00805f9b34fb");

const BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
///
/// ```
/// use blebridge_types::uuid::{uuid_from_u16, CLIENT_CHARACTERISTIC_CONFIGURATION};
///
/// assert_eq!(uuid_from_u16(0x2902), CLIENT_CHARACTERISTIC_CONFIGURATION);
/// ```
#[must_use]
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// Expand a 32-bit assigned number into a full 128-bit UUID.
#[must_use]
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Return the 16-bit assigned number if `uuid` is one, `None` otherwise.
#[must_use]
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & BASE_MASK != BASE_UUID.as_u128() {
        return None;
    }
    u16::try_from(value >> 96).ok()
}
