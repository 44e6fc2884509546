//! envelope encryption
//!
//! aes-256-gcm with a 16-byte nonce and detached 16-byte tag. the stored
//! byte layout is stable:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────┐
//! │ salt[16] │ nonce[16]│  tag[16] │ ciphertext[len(pt)]  │
//! └──────────┴──────────┴──────────┴──────────────────────┘
//! ```
//!
//! the salt is not secret, it lets decrypt re-derive the key from the
//! passphrase alone.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;

use crate::crypto::{derive_key, random_bytes, DerivedKey, SALT_LEN};
use crate::{Error, Result};

/// aes-256-gcm instantiated with a 128-bit nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

/// salt + nonce + tag
pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// parsed envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// serialize to the stored layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// parse the stored layout. rejects anything shorter than the header
    /// before touching any crypto.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MalformedEnvelope {
                len: bytes.len(),
                min: HEADER_LEN,
            });
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut tag = [0u8; TAG_LEN];
        salt.copy_from_slice(&bytes[..16]);
        nonce.copy_from_slice(&bytes[16..32]);
        tag.copy_from_slice(&bytes[32..48]);

        Ok(Self {
            salt,
            nonce,
            tag,
            ciphertext: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// seal plaintext under an already-derived key with a fresh nonce
    pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(key.key()));
        let nonce: [u8; NONCE_LEN] = random_bytes();

        let mut ciphertext = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut ciphertext)
            .map_err(|e| Error::EncryptionFailed(e.to_string()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);

        Ok(Self {
            salt: *key.salt(),
            nonce,
            tag: tag_bytes,
            ciphertext,
        })
    }

    /// verify and decrypt under an already-derived key
    pub fn open(&self, key: &DerivedKey) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(key.key()));

        let mut plaintext = self.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&self.nonce),
                b"",
                &mut plaintext,
                GenericArray::from_slice(&self.tag),
            )
            .map_err(|_| Error::TamperDetected)?;

        Ok(plaintext)
    }
}

/// encrypt a payload, returning `salt ‖ nonce ‖ tag ‖ ciphertext`
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    Ok(Envelope::seal(key, plaintext)?.to_bytes())
}

/// re-derive the key from the embedded salt and decrypt.
///
/// a wrong passphrase and a modified envelope both fail with
/// [`Error::TamperDetected`].
pub fn decrypt(passphrase: &[u8], envelope: &[u8]) -> Result<Vec<u8>> {
    let envelope = Envelope::from_bytes(envelope)?;
    let key = derive_key(passphrase, Some(envelope.salt));
    envelope.open(&key)
}
