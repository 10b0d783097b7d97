//! Private key encryption at rest using AES-256-GCM with an Argon2id master key
//!
//! Unlike per-entry salting, the master key is derived deterministically from
//! the passphrase so every ciphertext in the store decrypts with the same key.
//! That makes the first stored ciphertext usable as a passphrase probe.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

/// Application salt for the deterministic passphrase -> key derivation
const KDF_SALT: &[u8] = b"opinion-bot.master-key.v1";

/// Passphrase used when the operator submits an empty one
pub const DEFAULT_PASSPHRASE: &str = "opinion-bot default passphrase";

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// Symmetric key derived once per passphrase and reused for every entry
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    /// Derive the master key from a passphrase. Empty input selects the
    /// built-in default passphrase.
    pub fn derive(passphrase: &str) -> Result<Self> {
        let passphrase = if passphrase.is_empty() {
            DEFAULT_PASSPHRASE
        } else {
            passphrase
        };

        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut key)
            .map_err(|e| anyhow!("Failed to derive master key: {}", e))?;

        Ok(Self { key })
    }

    /// Encrypt a private key into a compact base64 string: nonce || ciphertext
    pub fn encrypt(&self, private_key: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, private_key.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored ciphertext string. Fails on a wrong passphrase, which
    /// is how the store probes candidate keys.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let blob = BASE64
            .decode(encoded)
            .context("Invalid base64 in encrypted key")?;
        if blob.len() <= NONCE_LEN {
            return Err(anyhow!("Encrypted key too short"));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow!("Decryption failed - incorrect passphrase"))?;

        String::from_utf8(plaintext).context("Invalid UTF-8 in decrypted key")
    }
}
