//! key derivation and randomness for vaultzero
//!
//! - pbkdf2-hmac-sha256 for passphrase stretching
//! - thread-local csprng for salts and nonces

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// pbkdf2 iteration count
pub const KDF_ROUNDS: u32 = 100_000;

/// derived key length (aes-256)
pub const KEY_LEN: usize = 32;

/// salt length, fresh per encryption
pub const SALT_LEN: usize = 16;

/// symmetric key stretched from a passphrase, bound to the salt it came from.
/// wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LEN],
    salt: [u8; SALT_LEN],
}

impl DerivedKey {
    /// raw key bytes
    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// salt the key was derived with (stored in the envelope)
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"<redacted>")
            .field("salt", &hex::encode(self.salt))
            .finish()
    }
}

/// stretch a passphrase into a 32-byte key.
///
/// with `salt = None` a fresh random salt is generated. the same
/// (passphrase, salt) pair always yields the same key, which is what lets
/// decrypt re-derive it from the salt stored in the envelope.
pub fn derive_key(passphrase: &[u8], salt: Option<[u8; SALT_LEN]>) -> DerivedKey {
    let salt = salt.unwrap_or_else(random_bytes);
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase, &salt, KDF_ROUNDS, &mut key);
    DerivedKey { key, salt }
}

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
