//! Virtual address grammar for the overlay.
//!
//! Addresses mirror dotted IPv4 notation without being real network
//! addresses: a [`Subnet`] is the leading three octets, a [`ClientId`]
//! appends a fourth octet (the suffix), and an [`Alias`] appends a
//! colon-separated port to a client id:
//!
//! ```text
//! subnet := octet "." octet "." octet          e.g. 127.0.0
//! ip     := subnet "." suffix                  e.g. 127.0.0.4
//! alias  := ip ":" port                        e.g. 127.0.0.4:2
//! ```
//!
//! All three types serialize as their string form on the wire.

use crate::error::SignalError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Leading three octets shared by a group of clients; the scope within
/// which suffixes are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet([u8; 3]);

/// Identifier of a live client: subnet plus suffix octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId {
    subnet: Subnet,
    suffix: u8,
}

/// Named endpoint: a client id plus a non-negative port.
///
/// Bound aliases are client-chosen (BIND); connection aliases are
/// server-minted (CONNECT). The grammar does not distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias {
    ip: ClientId,
    port: u32,
}

impl Subnet {
    pub fn new(octets: [u8; 3]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 3] {
        self.0
    }
}

impl ClientId {
    pub fn new(subnet: Subnet, suffix: u8) -> Self {
        Self { subnet, suffix }
    }

    pub fn subnet(&self) -> Subnet {
        self.subnet
    }

    pub fn suffix(&self) -> u8 {
        self.suffix
    }
}

impl Alias {
    pub fn new(ip: ClientId, port: u32) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> ClientId {
        self.ip
    }

    pub fn port(&self) -> u32 {
        self.port
    }
}

/// Parse an unsigned decimal field, rejecting signs, blanks, and any
/// non-digit character (`u32::from_str` alone would accept a leading `+`).
fn parse_decimal<T: FromStr>(part: &str) -> Option<T> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl FromStr for Subnet {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SignalError::MalformedAddress(s.to_string());
        let mut parts = s.split('.');
        let mut octets = [0u8; 3];
        for octet in &mut octets {
            *octet = parts.next().and_then(parse_decimal).ok_or_else(malformed)?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self(octets))
    }
}

impl FromStr for ClientId {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SignalError::MalformedAddress(s.to_string());
        let (subnet, suffix) = s.rsplit_once('.').ok_or_else(malformed)?;
        Ok(Self {
            subnet: subnet.parse().map_err(|_| malformed())?,
            suffix: parse_decimal(suffix).ok_or_else(malformed)?,
        })
    }
}

impl FromStr for Alias {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SignalError::MalformedAddress(s.to_string());
        let (ip, port) = s.split_once(':').ok_or_else(malformed)?;
        Ok(Self {
            ip: ip.parse().map_err(|_| malformed())?,
            port: parse_decimal(port).ok_or_else(malformed)?,
        })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subnet, self.suffix)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Subnet);
string_serde!(ClientId);
string_serde!(Alias);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_roundtrip() {
        let subnet: Subnet = "127.0.0".parse().unwrap();
        assert_eq!(subnet.octets(), [127, 0, 0]);
        assert_eq!(subnet.to_string(), "127.0.0");
    }

    #[test]
    fn test_client_id_roundtrip() {
        let id: ClientId = "10.20.30.255".parse().unwrap();
        assert_eq!(id.subnet().octets(), [10, 20, 30]);
        assert_eq!(id.suffix(), 255);
        assert_eq!(id.to_string(), "10.20.30.255");
    }

    #[test]
    fn test_alias_roundtrip() {
        let alias: Alias = "127.0.0.4:12".parse().unwrap();
        assert_eq!(alias.ip().to_string(), "127.0.0.4");
        assert_eq!(alias.port(), 12);
        assert_eq!(alias.to_string(), "127.0.0.4:12");
    }

    #[test]
    fn test_rejects_malformed_subnets() {
        for bad in ["", "127.0", "127.0.0.1", "256.0.0", "-1.0.0", "a.b.c", "1..2"] {
            assert!(bad.parse::<Subnet>().is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for bad in ["", "127.0.0", "127.0.0.256", "127.0.0.x", "127.0.0.4:0"] {
            assert!(bad.parse::<ClientId>().is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_rejects_malformed_aliases() {
        for bad in ["", "127.0.0.4", "127.0.0.4:", "127.0.0.4:-1", "127.0.0.4:+2", "127.0.0:5"] {
            assert!(bad.parse::<Alias>().is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_serde_uses_string_form() {
        let alias: Alias = "127.0.0.4:2".parse().unwrap();
        let json = serde_json::to_string(&alias).unwrap();
        assert_eq!(json, "\"127.0.0.4:2\"");
        let back: Alias = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alias);
    }
}
