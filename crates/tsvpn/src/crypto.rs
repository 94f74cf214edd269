//! Encryption of stored auth keys.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use fernet::Fernet;
use sha2::{Digest, Sha256};

use crate::error::VpnError;

/// Environment variable holding the passphrase stored keys are encrypted with.
pub const PASSPHRASE_ENV: &str = "TSVPN_KEY_PASSPHRASE";

const DEFAULT_PASSPHRASE: &str = "some-hardcoded-passphrase";

/// Fernet cipher keyed from `base64url(sha256(passphrase))`.
pub struct KeyCipher {
    fernet: Fernet,
}

impl KeyCipher {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, VpnError> {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = URL_SAFE.encode(digest);
        let fernet = Fernet::new(&key).ok_or_else(|| VpnError::Storage {
            message: "could not derive the key cipher".to_string(),
        })?;
        Ok(Self { fernet })
    }

    /// Uses `TSVPN_KEY_PASSPHRASE` when set, the built-in passphrase otherwise.
    pub fn from_env() -> Result<Self, VpnError> {
        match std::env::var(PASSPHRASE_ENV) {
            Ok(passphrase) if !passphrase.is_empty() => Self::from_passphrase(&passphrase),
            _ => Self::from_passphrase(DEFAULT_PASSPHRASE),
        }
    }

    pub fn encrypt(&self, plain: &str) -> String {
        self.fernet.encrypt(plain.as_bytes())
    }

    /// Decrypts a stored token. A token that does not decrypt (wrong
    /// passphrase, tampering, garbage) yields an empty key.
    pub fn decrypt(&self, token: &str) -> String {
        match self.fernet.decrypt(token.trim()) {
            Ok(bytes) => String::from_utf8(bytes).unwrap_or_default(),
            Err(_) => {
                log::warn!("Stored auth key could not be decrypted");
                String::new()
            }
        }
    }
}
