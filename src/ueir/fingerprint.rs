//! Content addressing
//!
//! Fingerprints are SHA-256 digests of a canonical JSON rendering. Every map
//! that reaches the hasher is a `BTreeMap`/`BTreeSet`, so the rendering does
//! not depend on construction order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;

use crate::errors::{UeirError, UeirResult};

/// Fixed-width (256-bit) content hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

struct DigestWriter<'a>(&'a mut Sha256);

impl io::Write for DigestWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash the canonical JSON rendering of `value`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> UeirResult<Self> {
        let mut hasher = Sha256::new();
        serde_json::to_writer(DigestWriter(&mut hasher), value)
            .map_err(|e| UeirError::malformed(format!("cannot canonicalize for hashing: {}", e)))?;
        Ok(Self(hasher.finalize().into()))
    }

    /// Derive a new fingerprint covering `self` plus additional inputs.
    pub fn extend<T: Serialize + ?Sized>(&self, extra: &T) -> UeirResult<Self> {
        Self::of(&(self.to_hex(), extra))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> UeirResult<Self> {
        let bytes = hex::decode(s).map_err(|e| UeirError::Store(format!("invalid fingerprint '{}': {}", s, e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| UeirError::Store(format!("fingerprint '{}' is not 32 bytes", s)))?;
        Ok(Self(bytes))
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_fingerprint_is_order_independent_for_btree() {
        let mut a = BTreeMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = BTreeMap::new();
        b.insert("y", 2);
        b.insert("x", 1);
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn test_extend_changes_fingerprint() {
        let base = Fingerprint::of("graph").unwrap();
        let ext = base.extend(&["latency < 50"]).unwrap();
        assert_ne!(base, ext);
        assert_eq!(ext, base.extend(&["latency < 50"]).unwrap());
    }

    #[test]
    fn test_hex_round_trip_and_serde() {
        let fp = Fingerprint::of(&42u32).unwrap();
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);

        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(Fingerprint::from_hex("abcd").is_err());
    }
}
