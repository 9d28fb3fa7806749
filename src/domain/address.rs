//! Bluetooth device address (6-byte MAC).

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 6-byte device address, compared byte-wise.
///
/// The canonical text form is lowercase colon-hex (`aa:bb:cc:dd:ee:ff`).
/// Parsing also accepts the bare 12-digit form (`aabbccddeeff`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address([u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAddressFormat(s.to_string());

        let parts: Vec<&str> = if s.len() == 17 && s.contains(':') {
            s.split(':').collect()
        } else if s.len() == 12 && !s.contains(':') && s.is_ascii() {
            (0..6).map(|i| &s[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(invalid());
        };

        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_and_bare_forms_parse_to_same_value() {
        let a: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let b: Address = "aabbccddeeff".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.bytes(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn display_is_lowercase_colon_hex() {
        let addr = Address::new([0x0A, 0xB1, 0x00, 0xFF, 0x10, 0x09]);
        assert_eq!(addr.to_string(), "0a:b1:00:ff:10:09");
    }

    #[test]
    fn uppercase_input_is_accepted() {
        let addr: Address = "AA:BB:CC:DD:EE:0F".parse().unwrap();
        assert_eq!(addr.to_string(), "aa:bb:cc:dd:ee:0f");
    }

    #[test]
    fn display_then_parse_is_identity() {
        for seed in [0u8, 1, 0x7f, 0x80, 0xfe, 0xff] {
            let addr = Address::new([seed, seed ^ 0x5a, 0, 0xff, seed.wrapping_add(3), 0x42]);
            let parsed: Address = addr.to_string().parse().unwrap();
            assert_eq!(parsed, addr);
        }
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let bad = [
            "",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aabbccddeef",
            "aabbccddeeff0",
            "aa-bb-cc-dd-ee-ff",
            "aa:bb:cc:dd:eeff:",
            "gg:bb:cc:dd:ee:ff",
            "aabbccddeegg",
            "a:bbb:cc:dd:ee:ff",
            "+a:bb:cc:dd:ee:ff",
        ];
        for input in bad {
            match input.parse::<Address>() {
                Err(Error::InvalidAddressFormat(s)) => assert_eq!(s, input),
                other => panic!("expected InvalidAddressFormat for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let addr: Address = "01:02:03:04:05:06".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
