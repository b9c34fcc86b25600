//! Info-hash parsing and magnet URI handling.
//!
//! Jobs are keyed by the 40-character lowercase hex SHA-1 of the torrent
//! metadata. Magnet URIs carry it in the `xt=urn:btih:` component as either
//! 40 hex characters or 32 RFC 4648 base32 characters; both are normalized
//! to lowercase hex here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::JobError;

/// 40-character lowercase hex identifier of a torrent's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InfoHash(String);

impl InfoHash {
    /// Parse a hash in either hex (40 chars) or base32 (32 chars) form.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InputInvalid`] when the value is neither.
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let trimmed = raw.trim();
        if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self(trimmed.to_ascii_lowercase()));
        }
        if trimmed.len() == 32 {
            if let Some(bytes) = decode_base32(trimmed) {
                return Ok(Self(hex::encode(bytes)));
            }
        }
        Err(JobError::InputInvalid(format!(
            "info hash must be 40 hex or 32 base32 characters, got {:?}",
            trimmed
        )))
    }

    /// Construct from raw SHA-1 digest bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(hex::encode(bytes))
    }

    /// The normalized lowercase hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InfoHash {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parsed view of a magnet URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magnet {
    /// Normalized info-hash from the `xt` component.
    pub info_hash: InfoHash,
    /// Display name from the `dn` component, percent-decoded.
    pub display_name: Option<String>,
}

impl Magnet {
    /// Parse a `magnet:?...` URI.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InputInvalid`] when the URI lacks a usable
    /// `urn:btih:` component.
    pub fn parse(uri: &str) -> Result<Self, JobError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| JobError::InputInvalid("not a magnet URI".to_string()))?;

        let mut info_hash = None;
        let mut display_name = None;

        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "xt" if info_hash.is_none() => {
                    let lowered = value.to_ascii_lowercase();
                    if let Some(hash) = lowered.strip_prefix("urn:btih:") {
                        // Re-slice the original value so base32 input keeps
                        // its case for decoding.
                        let raw = &value[value.len() - hash.len()..];
                        info_hash = Some(InfoHash::parse(raw)?);
                    }
                }
                "dn" if display_name.is_none() => {
                    display_name = Some(percent_decode(value));
                }
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| {
            JobError::InputInvalid("magnet URI has no urn:btih component".to_string())
        })?;

        Ok(Self {
            info_hash,
            display_name: display_name.filter(|name| !name.is_empty()),
        })
    }
}

/// Decode an RFC 4648 base32 string (no padding) into bytes.
///
/// Magnet hashes are exactly 32 characters, which decode to the 20-byte SHA-1
/// digest; other lengths are accepted as long as no partial byte remains.
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);

    for c in input.bytes() {
        let value = match c {
            b'A'..=b'Z' => u32::from(c - b'A'),
            b'a'..=b'z' => u32::from(c - b'a'),
            b'2'..=b'7' => u32::from(c - b'2') + 26,
            _ => return None,
        };
        acc = (acc << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }

    Some(out)
}

/// Decode percent-encoding (and `+` as space) in magnet display names.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hi = char::from(bytes[i + 1]).to_digit(16).unwrap_or(0) as u8;
                let lo = char::from(bytes[i + 2]).to_digit(16).unwrap_or(0) as u8;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

    #[test]
    fn hex_hash_is_normalized_to_lowercase() {
        let hash = InfoHash::parse(&HEX_HASH.to_ascii_uppercase()).expect("parse");
        assert_eq!(hash.as_str(), HEX_HASH);
    }

    #[test]
    fn base32_hash_decodes_to_hex() {
        // base32("base32 example!!....") spelled out by hand: instead use a
        // round-trip built from known bytes.
        let bytes: [u8; 20] = [
            0xc1, 0x2f, 0xe1, 0xc0, 0x6b, 0xba, 0x25, 0x4a, 0x9d, 0xc9, 0xf5, 0x19, 0xb3, 0x35,
            0xaa, 0x7c, 0x13, 0x67, 0xa8, 0x8a,
        ];
        let base32 = encode_base32(&bytes);
        assert_eq!(base32.len(), 32);
        let hash = InfoHash::parse(&base32).expect("parse base32");
        assert_eq!(hash.as_str(), HEX_HASH);
    }

    #[test]
    fn invalid_hashes_are_rejected() {
        assert!(InfoHash::parse("deadbeef").is_err());
        assert!(InfoHash::parse(&"g".repeat(40)).is_err());
        assert!(InfoHash::parse(&"1".repeat(32)).is_err());
    }

    #[test]
    fn magnet_with_hex_hash_and_name() {
        let uri = format!("magnet:?xt=urn:btih:{HEX_HASH}&dn=Some+Show.S01E01%5B1080p%5D&tr=udp%3A%2F%2Ftracker");
        let magnet = Magnet::parse(&uri).expect("parse magnet");
        assert_eq!(magnet.info_hash.as_str(), HEX_HASH);
        assert_eq!(magnet.display_name.as_deref(), Some("Some Show.S01E01[1080p]"));
    }

    #[test]
    fn magnet_without_btih_is_rejected() {
        let err = Magnet::parse("magnet:?dn=only-a-name").expect_err("must fail");
        assert!(matches!(err, JobError::InputInvalid(_)));
        assert!(Magnet::parse("https://example.com").is_err());
    }

    #[test]
    fn magnet_accepts_uppercase_urn_prefix() {
        let uri = format!("magnet:?xt=URN:BTIH:{}", HEX_HASH.to_ascii_uppercase());
        let magnet = Magnet::parse(&uri).expect("parse magnet");
        assert_eq!(magnet.info_hash.as_str(), HEX_HASH);
    }

    #[test]
    fn serde_round_trip_validates() {
        let hash = InfoHash::parse(HEX_HASH).expect("parse");
        let json = serde_json::to_string(&hash).expect("serialize");
        let back: InfoHash = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, hash);
        assert!(serde_json::from_str::<InfoHash>("\"nope\"").is_err());
    }

    fn encode_base32(bytes: &[u8]) -> String {
        const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
        let mut acc: u32 = 0;
        let mut bits = 0u32;
        let mut out = String::new();
        for &byte in bytes {
            acc = (acc << 8) | u32::from(byte);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(ALPHABET[(acc >> bits) as usize & 0x1f] as char);
            }
        }
        if bits > 0 {
            out.push(ALPHABET[(acc << (5 - bits)) as usize & 0x1f] as char);
        }
        out
    }
}
