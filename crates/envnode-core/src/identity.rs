use core::fmt::{self, Write};

use heapless::String;

/// Length of the hex form of a 48-bit hardware id.
const ID_LEN: usize = 12;

/// Broker client ids: `device-` + id + `-` + up to 8 hex digits.
pub type ClientId = String<32>;

/// Stable per-device identifier derived from the eFuse MAC.
///
/// Used verbatim as the telemetry `deviceId` and as the stem of the broker
/// client id. It never changes within a boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String<ID_LEN>,
}

impl DeviceIdentity {
    /// Hex of the MAC in transmission order, `24:0a:c4:..` -> `240ac4..`.
    ///
    /// Firmware that printed the eFuse MAC as a little-endian 64-bit number
    /// produced the same digits with the byte order reversed. Devices moving
    /// over from it report under a new id.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut id = String::new();
        for byte in mac {
            // 12 hex digits always fit the buffer.
            let _ = write!(id, "{byte:02x}");
        }
        Self { id }
    }

    pub fn as_str(&self) -> &str {
        self.id.as_str()
    }

    /// Client id for a single broker session.
    ///
    /// The random suffix keeps a reconnect from colliding with a session the
    /// broker has not expired yet.
    pub fn client_id(&self, suffix: u32) -> ClientId {
        let mut client_id = ClientId::new();
        let _ = write!(client_id, "device-{}-{:x}", self.id, suffix);
        client_id
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x24, 0x0a, 0xc4, 0x1a, 0x2b, 0x3c];

    #[test]
    fn test_lowercase_hex() {
        let identity = DeviceIdentity::from_mac(MAC);

        assert_eq!(identity.as_str(), "240ac41a2b3c");
    }

    #[test]
    fn test_stable_within_boot() {
        let identity = DeviceIdentity::from_mac(MAC);
        let first = identity.as_str();

        for _ in 0..10 {
            assert_eq!(identity.as_str(), first);
            assert_eq!(identity.to_string(), first);
        }
    }

    #[test]
    fn test_client_id_keeps_identity_untouched() {
        let identity = DeviceIdentity::from_mac(MAC);

        assert_eq!(identity.client_id(0xdead_beef).as_str(), "device-240ac41a2b3c-deadbeef");
        assert_eq!(identity.client_id(7).as_str(), "device-240ac41a2b3c-7");
        assert_eq!(identity.as_str(), "240ac41a2b3c");
    }

    #[test]
    fn test_id_follows_mac_byte_order() {
        let identity = DeviceIdentity::from_mac(MAC);
        let efuse_word = u64::from_le_bytes([0x24, 0x0a, 0xc4, 0x1a, 0x2b, 0x3c, 0, 0]);
        let reversed = format!("{:012x}", efuse_word);

        assert_eq!(reversed, "3c2b1ac40a24");
        assert_ne!(identity.as_str(), reversed);
        assert!(identity.as_str().starts_with("240ac4"));
    }
}
