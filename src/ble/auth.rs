//! Plaintext BLE authentication (spec §4.6): an MD5 digest of the device MAC
//! plus a fixed salt, written to the auth-password characteristic before any
//! encrypted command.

use super::constants::AUTH_SALT;

/// `MD5(mac_bytes(6) ‖ AUTH_SALT)` — the 16-byte password written to the
/// auth-password characteristic with a default (response) write.
pub fn auth_password(mac_bytes: &[u8; 6]) -> [u8; 16] {
    let mut buf = Vec::with_capacity(6 + AUTH_SALT.len());
    buf.extend_from_slice(mac_bytes);
    buf.extend_from_slice(&AUTH_SALT);
    md5::compute(&buf).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::constants::mac_bytes_from_serial;

    #[test]
    fn auth_password_is_deterministic() {
        let mac = mac_bytes_from_serial(10_175_983);
        assert_eq!(auth_password(&mac), auth_password(&mac));
    }

    #[test]
    fn auth_password_differs_across_macs() {
        let a = auth_password(&mac_bytes_from_serial(10_175_983));
        let b = auth_password(&mac_bytes_from_serial(10_175_984));
        assert_ne!(a, b);
    }

    #[test]
    fn auth_fixture_matches_known_md5_of_mac_plus_salt() {
        // spec §8 scenario 6: MAC EC:2A:F0:02:AF:6F with the declared salt.
        let mac = [0xECu8, 0x2A, 0xF0, 0x02, 0xAF, 0x6F];
        let mut buf = mac.to_vec();
        buf.extend_from_slice(&AUTH_SALT);
        let expected = md5::compute(&buf).0;
        assert_eq!(auth_password(&mac), expected);
    }
}
