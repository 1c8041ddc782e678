use std::fmt;
use std::io::{self, Read};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as Sha1Digest, Sha1};
use thiserror::Error;

/// Number of hex characters in a rendered digest.
pub const HEX_LEN: usize = 40;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid digest '{0}': expected 40 hex characters")]
pub struct DigestParseError(pub String);

/// A 20-byte SHA-1 identifying a blob by its contents.
///
/// Rendered everywhere (storage keys, JSON, URLs) as 40 lowercase hex
/// characters. SHA-1 is used for identity, not authentication.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 20]);

impl Digest {
    /// Compute the digest of an in-memory byte sequence.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Digest(hasher.finalize().into())
    }

    /// Compute the digest of a stream without buffering it whole.
    pub fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = Sha1::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Digest(hasher.finalize().into()))
    }

    /// Parse a 40-character hex string.
    pub fn parse(s: &str) -> Result<Self, DigestParseError> {
        if s.len() != HEX_LEN {
            return Err(DigestParseError(s.to_string()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(s, &mut out).map_err(|_| DigestParseError(s.to_string()))?;
        Ok(Digest(out))
    }

    /// Full lowercase hex form, used as the canonical identity.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First byte as a two-char hex string, used for the shard directory.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_known_vectors() {
        assert_eq!(
            Digest::compute(b"").to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            Digest::compute(b"abc").to_hex(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn from_reader_matches_compute() {
        let data = b"some longer content spanning the read loop".repeat(4096);
        let streamed = Digest::from_reader(&mut &data[..]).unwrap();
        assert_eq!(streamed, Digest::compute(&data));
    }

    #[test]
    fn parse_round_trip() {
        let d = Digest::compute(b"round trip");
        assert_eq!(Digest::parse(&d.to_hex()).unwrap(), d);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(Digest::parse("").is_err());
        assert!(Digest::parse("abcd").is_err());
        assert!(Digest::parse(&"g".repeat(40)).is_err());
        assert!(Digest::parse(&"a".repeat(41)).is_err());
    }

    #[test]
    fn shard_prefix_is_first_byte() {
        let d = Digest([0xAB; 20]);
        assert_eq!(d.shard_prefix(), "ab");
        assert_eq!(&d.to_hex()[..2], "ab");
    }

    #[test]
    fn serde_as_hex_string() {
        let d = Digest::compute(b"wire");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.to_hex()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn serde_rejects_invalid_hex() {
        let err = serde_json::from_str::<Digest>("\"nope\"");
        assert!(err.is_err());
    }
}
