use uuid::Uuid;

/**
 * How long (milliseconds) scanning may take before giving up on the peripheral.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How often (milliseconds) to query the adapters for newly discovered peripherals while scanning.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) each step from connecting up to subscribing may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) to check the connection status of a ready peripheral.
 */
pub const SUPERVISION_INTERVAL: u64 = 1000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) tearing down a link may take before the handle is dropped anyway.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * The Bluetooth base UUID, 16 and 32 bit assigned numbers are offsets into it.
 */
pub const BLUETOOTH_BASE_UUID: &str = "00000000-0000-1000-8000-00805f9b34fb";

pub fn make_bluetooth_base_uuid() -> Uuid {
    Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb)
}

/// Expands a 16 or 32 bit assigned number into a full 128 bit UUID.
pub fn make_short_uuid(short: u32) -> Uuid {
    Uuid::from_u128(make_bluetooth_base_uuid().as_u128() | ((short as u128) << 96))
}
