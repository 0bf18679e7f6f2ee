//! Characteristic UUIDs, the authentication salt, and the pure MAC/BT-address
//! derivations from a pump serial number (spec §6).

const PREFIX: &str = "669a0c20-0008-969e-e211-";

macro_rules! char_uuid {
    ($name:ident, $suffix:literal) => {
        pub fn $name() -> String {
            format!("{PREFIX}{}", $suffix)
        }
    };
}

char_uuid!(auth_password, "fcbeb2147bc5");
char_uuid!(master_version, "fcbeb0147bc5");
char_uuid!(system_date, "fcbedc3b7bc5");
char_uuid!(system_time, "fcbedd3b7bc5");
char_uuid!(bolus_start_stop, "fcbee18b7bc5");
char_uuid!(bolus_status, "fcbee28b7bc5");
char_uuid!(tbr_start_stop, "fcbee38b7bc5");
char_uuid!(system_status, "fcbee48b7bc5");
char_uuid!(bolus_notification, "fcbee58b7bc5");
char_uuid!(security_status, "fcbee08b7bc5");
char_uuid!(setting_id, "fcbeb3147bc5");
char_uuid!(setting_value, "fcbeb4147bc5");
char_uuid!(extended_read, "fcff000000ff");
char_uuid!(pump_key_read, "fcff0000000a");
char_uuid!(pump_key_write, "fcff0000000b");
char_uuid!(events_count, "fcbecb3b7bc5");
char_uuid!(events_index, "fcbecc3b7bc5");
char_uuid!(events_value, "fcbecd3b7bc5");
char_uuid!(alerts_count, "fcbec83b7bc5");
char_uuid!(alerts_index, "fcbec93b7bc5");
char_uuid!(alerts_value, "fcbeca3b7bc5");

// System-history UUIDs are not given in the source; §9 leaves them as an
// optional, opaque-entry stream. Kept on the same suffix family so a real
// implementation can drop in the confirmed values without touching callers.
char_uuid!(system_history_count, "fcbece3b7bc5");
char_uuid!(system_history_index, "fcbecf3b7bc5");
char_uuid!(system_history_value, "fcbed03b7bc5");

// Standard Bluetooth SIG device information characteristics (read plain).
pub const DEVICE_SERIAL: &str = "00002a25-0000-1000-8000-00805f9b34fb";
pub const DEVICE_FIRMWARE: &str = "00002a26-0000-1000-8000-00805f9b34fb";
pub const DEVICE_MANUFACTURER: &str = "00002a29-0000-1000-8000-00805f9b34fb";
pub const DEVICE_MODEL: &str = "00002a24-0000-1000-8000-00805f9b34fb";

pub const AUTH_SALT: [u8; 10] = [0x4F, 0xC2, 0x45, 0x4D, 0x9B, 0x81, 0x59, 0xA4, 0x93, 0xBB];

pub const DEVICE_NAME_PREFIX: &str = "YpsoPump_";

/// True for advertised names the pump transport should stop scanning on.
pub fn is_pump_device_name(name: &str) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX)
}

/// Decimal serial suffix of an advertised pump name, e.g. `YpsoPump_10175983`.
pub fn serial_from_device_name(name: &str) -> Option<u64> {
    name.strip_prefix(DEVICE_NAME_PREFIX)?.parse().ok()
}

/// `EC:2A:F0:XX:XX:XX` MAC string from a decimal pump serial (spec §6).
pub fn mac_from_serial(serial: u64) -> String {
    let n = if serial > 10_000_000 {
        serial - 10_000_000
    } else {
        serial
    };
    let hex6 = format!("{n:06X}");
    format!(
        "EC:2A:F0:{}:{}:{}",
        &hex6[0..2],
        &hex6[2..4],
        &hex6[4..6]
    )
}

/// The 6 raw bytes of [`mac_from_serial`], for use in authentication.
pub fn mac_bytes_from_serial(serial: u64) -> [u8; 6] {
    parse_mac(&mac_from_serial(serial)).expect("mac_from_serial always produces a valid MAC string")
}

/// Parses a colon-separated MAC string (as produced by [`mac_from_serial`])
/// back into its 6 raw bytes.
pub fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = mac.split(':');
    for slot in out.iter_mut() {
        *slot = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// BT address bytes used in the relay call (spec §6): `EC 2A F0` followed by
/// the three least-significant bytes of `serial mod 10_000_000`, taken from
/// its little-endian `u32` representation in index order `[2, 1, 0]`.
pub fn bt_address_bytes_from_serial(serial: u64) -> [u8; 6] {
    let n = (serial % 10_000_000) as u32;
    let le = n.to_le_bytes();
    [0xEC, 0x2A, 0xF0, le[2], le[1], le[0]]
}
