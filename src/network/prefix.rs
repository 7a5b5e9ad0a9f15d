//! Three-octet IPv4 range prefixes

use crate::error::ScanError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Number of host addresses in a range (last octet 1..=255).
pub const HOSTS_PER_RANGE: usize = 255;

/// A validated `a.b.c` prefix naming the addresses `a.b.c.1` through `a.b.c.255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangePrefix([u8; 3]);

impl RangePrefix {
    pub fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    pub fn octets(&self) -> [u8; 3] {
        self.0
    }

    /// Address for a host slot index (0..=254).
    ///
    /// Returns `None` when the index lies outside the range.
    pub fn host(&self, index: usize) -> Option<Ipv4Addr> {
        if index >= HOSTS_PER_RANGE {
            return None;
        }
        let [a, b, c] = self.0;
        Some(Ipv4Addr::new(a, b, c, (index + 1) as u8))
    }
}

impl FromStr for RangePrefix {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScanError::InvalidPrefix(s.to_string());

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }

        // Canonical decimal only: events carry the prefix back verbatim.
        let mut octets = [0u8; 3];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            if part.len() > 1 && part.starts_with('0') {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for RangePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.octets();
        write!(f, "{}.{}.{}", a, b, c)
    }
}

impl Serialize for RangePrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RangePrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
