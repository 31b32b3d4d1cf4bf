//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used for Probe Plus relay communication.

use uuid::Uuid;

/// Probe Plus relay service UUID.
pub const PROBE_PLUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fff0_0000_1000_8000_00805f9b34fb);
/// Measurement notification characteristic UUID (Notify).
pub const PROBE_PLUS_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000_fff1_0000_1000_8000_00805f9b34fb);

/// Check if a service UUID is the Probe Plus relay service.
pub fn is_probe_plus_service(uuid: &Uuid) -> bool {
    *uuid == PROBE_PLUS_SERVICE_UUID
}
