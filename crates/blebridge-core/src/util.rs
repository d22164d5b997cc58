//! Locator helpers for btleplug peripherals.

use btleplug::platform::PeripheralId as PlatformId;

/// Address reported by stacks that hide the real MAC (CoreBluetooth).
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a btleplug peripheral ID as a bare string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or D-Bus paths.
pub fn format_peripheral_id(id: &PlatformId) -> String {
    trim_debug_wrapper(&format!("{:?}", id)).to_string()
}

/// Create the locator a script uses to name a peripheral.
///
/// Uses the Bluetooth address, falling back to the platform ID where the
/// address is hidden.
pub fn create_identifier(address: &str, peripheral_id: &PlatformId) -> String {
    locator_from(address, || format_peripheral_id(peripheral_id))
}

fn locator_from(address: &str, fallback: impl FnOnce() -> String) -> String {
    if address == HIDDEN_ADDRESS {
        fallback()
    } else {
        address.to_string()
    }
}

fn trim_debug_wrapper(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}
