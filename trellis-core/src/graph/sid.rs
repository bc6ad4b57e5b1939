//! Stable Identifiers
//!
//! A sid names a store across processes: a server serializes a scope keyed
//! by sid, the client forks its own graph with that snapshot, and the values
//! land on the same stores because both sides derived the same sids.
//!
//! Sids are either given explicitly or derived from the declaration site:
//! the domain path, the store name, and the ordinal of that name within the
//! path. Declaring the same stores in the same order yields the same sids on
//! every run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// FNV-1a offset basis for 64-bit.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a prime for 64-bit.
const FNV_PRIME: u64 = 0x00000100000001B3;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Stable cross-serialization identifier of a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(String);

impl Sid {
    /// Wrap an explicit identifier.
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    /// Derive an identifier from a declaration site.
    ///
    /// `path` is the `/`-joined domain path followed by the unit name;
    /// `ordinal` disambiguates repeated declarations of the same path.
    pub fn derive(prefix: &str, path: &str, ordinal: u32) -> Self {
        let mut hash = FNV_OFFSET;
        for &b in path.as_bytes() {
            hash = fnv1a_byte(hash, b);
        }
        hash = fnv1a_byte(hash, b'#');
        for &b in &ordinal.to_le_bytes() {
            hash = fnv1a_byte(hash, b);
        }
        // Fold to 32 bits to keep snapshots compact.
        let folded = (hash ^ (hash >> 32)) as u32;
        Self(format!("{prefix}{}", base36(folded)))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sid {
    fn from(sid: &str) -> Self {
        Self::new(sid)
    }
}

#[inline]
fn fnv1a_byte(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
}

fn base36(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(7);
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
