//! AES-256-GCM sealing of locally queued payloads
//!
//! Offline actions can carry user-written text (reviews), so their payloads
//! are encrypted at rest with a key bound to this machine via Argon2id +
//! machine fingerprint.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use rand::RngCore;
use otakudex_core::{Error, Result};

/// Encrypted payload with IV for decryption
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 12],
}

impl EncryptedPayload {
    /// Rebuild from stored columns, checking the IV length
    pub fn from_parts(ciphertext: Vec<u8>, iv: &[u8]) -> Result<Self> {
        let iv: [u8; 12] = iv
            .try_into()
            .map_err(|_| Error::EncryptionError(format!("Invalid IV length {}", iv.len())))?;
        Ok(Self { ciphertext, iv })
    }
}

/// Handles AES-256-GCM encryption/decryption of stored payloads
pub struct PayloadEncryptor {
    cipher: Aes256Gcm,
}

impl PayloadEncryptor {
    /// Create a new encryptor from a 32-byte key
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::EncryptionError(format!(
                "Key must be 32 bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::EncryptionError(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Create encryptor from a password (derives 32-byte key via Argon2id)
    pub fn from_password(password: &str) -> Result<Self> {
        let key = derive_key_from_password(password, b"otakudex-salt-v1")?;
        Self::new(&key)
    }

    /// Encrypt a payload with a fresh random IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let mut iv = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::EncryptionError(e.to_string()))?;

        Ok(EncryptedPayload { ciphertext, iv })
    }

    /// Decrypt a payload
    pub fn decrypt(&self, encrypted: &EncryptedPayload) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(&encrypted.iv);

        self.cipher
            .decrypt(nonce, encrypted.ciphertext.as_ref())
            .map_err(|e| Error::EncryptionError(e.to_string()))
    }

    /// Serialize a JSON value and encrypt it
    pub fn seal_json(&self, value: &serde_json::Value) -> Result<EncryptedPayload> {
        let bytes = serde_json::to_vec(value)?;
        self.encrypt(&bytes)
    }

    /// Decrypt and parse a JSON value
    pub fn open_json(&self, encrypted: &EncryptedPayload) -> Result<serde_json::Value> {
        let bytes = self.decrypt(encrypted)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ─── Machine-bound key derivation ────────────────────────────────────

/// Derive a 32-byte AES key from a password/passphrase using Argon2id
fn derive_key_from_password(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::EncryptionError(format!("Argon2 key derivation failed: {}", e)))?;
    Ok(key)
}

/// Get a machine-unique fingerprint string.
///
/// Only the OS machine id is used. Environment variables such as the host
/// name differ between a login shell and a service manager, and a changed
/// fingerprint would make every queued payload unreadable.
pub fn get_machine_fingerprint() -> String {
    let machine_id = machine_uid::get()
        .unwrap_or_else(|_| "fallback-no-machine-id".to_string());

    format!("otakudex-{}", machine_id)
}

/// Derive a 32-byte AES key bound to this machine.
///
/// Same key on every call on the same machine, different elsewhere, so a
/// copied database file does not expose queued reviews.
pub fn derive_machine_key() -> Result<[u8; 32]> {
    let fingerprint = get_machine_fingerprint();
    derive_key_from_password(&fingerprint, b"otakudex-v1-machine-salt")
}
