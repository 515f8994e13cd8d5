//! 32-byte double-SHA256 hashes.
//!
//! Hashes are stored in internal (wire) byte order. The human-readable form
//! used in logs, JSON and persisted maps is the byte-reversed hex string, the
//! same convention the chain uses for txids and block hashes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// A 32-byte hash in internal byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256([u8; 32]);

/// Transaction id.
pub type TxId = Hash256;

/// Hash of a masternode registration transaction.
pub type ProTxHash = Hash256;

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Bytes in display order (reversed).
    pub fn reversed_bytes(&self) -> [u8; 32] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// Hex of the internal byte order.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex of the reversed byte order (txid style).
    pub fn to_rev_hex(&self) -> String {
        hex::encode(self.reversed_bytes())
    }

    /// Parse a hex string given in internal byte order.
    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| TypesError::InvalidLength { expected: 32, got: v.len() })?;
        Ok(Self(arr))
    }

    /// Parse a txid-style (byte-reversed) hex string.
    pub fn from_rev_hex(s: &str) -> Result<Self, TypesError> {
        let mut h = Self::from_hex(s)?;
        h.0.reverse();
        Ok(h)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rev = self.reversed_bytes();
        write!(f, "Hash256({}..)", hex::encode(&rev[..4]))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rev_hex())
    }
}

impl FromStr for Hash256 {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_rev_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rev_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_rev_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let h = Hash256::new(bytes);
        let s = h.to_string();
        assert!(s.ends_with("ab"));
        assert!(s.starts_with("00"));
        assert_eq!(h.to_hex().len(), 64);
        assert!(h.to_hex().starts_with("ab"));
    }

    #[test]
    fn parse_reversed_roundtrip() {
        let s = "0000000000000000000000000000000000000000000000000000000000000a01";
        let h: Hash256 = s.parse().unwrap();
        assert_eq!(h.as_bytes()[0], 0x01);
        assert_eq!(h.as_bytes()[1], 0x0a);
        assert_eq!(h.to_string(), s);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(Hash256::from_hex("abcd").is_err());
        assert!(Hash256::from_rev_hex("zz").is_err());
    }

    #[test]
    fn serde_uses_display_form() {
        let h = Hash256::new([7u8; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
