//! share types and on-disk encoding
//!
//! a share is stored as the lowercase hex of its raw field-element bytes,
//! one file per node. the index is implied by which node holds the file.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{Error, Result};

/// a single share from the sharing scheme
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// share index (1-indexed, must be non-zero)
    pub index: u8,
    /// share data (same length as secret)
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl Share {
    pub fn new(index: u8, data: Vec<u8>) -> Self {
        Self { index, data }
    }

    /// encode share bytes as hex (16 bytes -> 32 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(&self.data)
    }

    /// decode share bytes for a known index; surrounding whitespace ignored
    pub fn from_hex(index: u8, s: &str) -> Result<Self> {
        let data = hex::decode(s.trim()).map_err(|_| Error::InvalidShareFormat)?;
        if data.is_empty() {
            return Err(Error::InvalidShareFormat);
        }
        Ok(Self { index, data })
    }
}

/// padding byte appended to short passphrases
pub const PAD_BYTE: u8 = b' ';

/// passphrase right-padded with spaces to a fixed width.
/// this is the value that gets shared, never the raw passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PaddedSecret {
    bytes: Vec<u8>,
}

impl PaddedSecret {
    /// pad `passphrase` to `width` bytes. longer input is rejected rather
    /// than truncated.
    pub fn new(passphrase: &[u8], width: usize) -> Result<Self> {
        if passphrase.len() > width {
            return Err(Error::InvalidSecretLength {
                len: passphrase.len(),
                max: width,
            });
        }
        let mut bytes = Vec::with_capacity(width);
        bytes.extend_from_slice(passphrase);
        bytes.resize(width, PAD_BYTE);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// strip trailing whitespace padding to recover the passphrase
    pub fn unpad(padded: &[u8]) -> Zeroizing<Vec<u8>> {
        let end = padded
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        Zeroizing::new(padded[..end].to_vec())
    }
}

impl std::fmt::Debug for PaddedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaddedSecret(<{} bytes>)", self.bytes.len())
    }
}

/// hex serialization helper for serde
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_hex_is_32_chars() {
        let share = Share::new(2, (0u8..16).collect());
        let hex = share.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(hex, "000102030405060708090a0b0c0d0e0f");

        let recovered = Share::from_hex(2, &format!("{}\n", hex)).unwrap();
        assert_eq!(share, recovered);
    }

    #[test]
    fn test_share_bad_hex() {
        assert!(matches!(Share::from_hex(1, "zz"), Err(Error::InvalidShareFormat)));
        assert!(matches!(Share::from_hex(1, ""), Err(Error::InvalidShareFormat)));
    }

    #[test]
    fn test_share_json_uses_hex() {
        let share = Share::new(1, vec![0xde, 0xad]);
        let json = serde_json::to_string(&share).unwrap();
        assert_eq!(json, r#"{"index":1,"data":"dead"}"#);
    }

    #[test]
    fn test_pad_and_unpad() {
        let padded = PaddedSecret::new(b"correct-horse", 16).unwrap();
        assert_eq!(padded.as_bytes(), b"correct-horse   ");
        assert_eq!(PaddedSecret::unpad(padded.as_bytes()).as_slice(), b"correct-horse");
    }

    #[test]
    fn test_pad_exact_width() {
        let padded = PaddedSecret::new(b"1234567890123456", 16).unwrap();
        assert_eq!(padded.as_bytes(), b"1234567890123456");
    }

    #[test]
    fn test_pad_too_long() {
        let err = PaddedSecret::new(&[b'a'; 17], 16).unwrap_err();
        assert!(matches!(err, Error::InvalidSecretLength { len: 17, max: 16 }));
    }

    #[test]
    fn test_unpad_keeps_leading_and_inner_space() {
        assert_eq!(PaddedSecret::unpad(b" a b  ").as_slice(), b" a b");
        assert!(PaddedSecret::unpad(b"    ").is_empty());
    }
}
