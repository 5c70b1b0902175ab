//! Credential cipher: AES-256-GCM over connection strings, keyed by an
//! Argon2id derivation of the process master secret.
//!
//! Blob layout: `nonce (12) || tag (16) || ciphertext`.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

use crate::config::SecurityConfig;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Authentication failed: the blob was tampered with or truncated
    #[error("Credential integrity check failed")]
    Integrity,

    #[error("Malformed credential blob: {0}")]
    Malformed(String),

    #[error("Encryption failed")]
    Encrypt,
}

/// Argon2id cost parameters used to stretch the master secret
#[derive(Debug, Clone)]
pub struct KdfSettings {
    pub salt: String,
    pub memory_kib: u32,
    pub iterations: u32,
}

impl From<&SecurityConfig> for KdfSettings {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            salt: config.kdf_salt.clone(),
            memory_kib: config.kdf_memory_kib,
            iterations: config.kdf_iterations,
        }
    }
}

/// Symmetric authenticated encryption for tenant connection strings
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Derive the data key from the master secret. Slow by construction, call once at startup.
    pub fn from_master_secret(secret: &str, kdf: &KdfSettings) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::KeyDerivation("master secret is empty".to_string()));
        }

        let params = Params::new(kdf.memory_kib, kdf.iterations, 1, Some(KEY_LEN))
            .map_err(|e| CipherError::KeyDerivation(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(secret.as_bytes(), kdf.salt.as_bytes(), &mut key)
            .map_err(|e| CipherError::KeyDerivation(format!("argon2: {e}")))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        key.fill(0);

        Ok(Self { cipher })
    }

    /// Build the cipher from the security section of the app config
    pub fn from_config(config: &SecurityConfig) -> Result<Self, CipherError> {
        let secret = config
            .master_secret
            .as_deref()
            .ok_or_else(|| CipherError::KeyDerivation("TENANT_MASTER_SECRET is not set".to_string()))?;
        Self::from_master_secret(secret, &KdfSettings::from(config))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut payload = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, b"", &mut payload)
            .map_err(|_| CipherError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + payload.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(tag.as_slice());
        blob.extend_from_slice(&payload);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String, CipherError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Malformed(format!(
                "expected at least {} bytes, got {}",
                NONCE_LEN + TAG_LEN,
                blob.len()
            )));
        }

        let (nonce_bytes, rest) = blob.split_at(NONCE_LEN);
        let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let tag = Tag::from_slice(tag_bytes);

        let mut payload = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(nonce, b"", &mut payload, tag)
            .map_err(|_| CipherError::Integrity)?;

        String::from_utf8(payload).map_err(|_| CipherError::Malformed("plaintext is not UTF-8".to_string()))
    }
}
