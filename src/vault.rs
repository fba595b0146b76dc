//! Credential vault for connection passwords at rest.
//!
//! Passwords are sealed with AES-256-GCM under a key derived from the
//! configured secret with PBKDF2-HMAC-SHA256. The stored form is URL-safe
//! base64 of `nonce || ciphertext`, so it survives JSON and SQL text
//! columns unchanged.

use crate::config::VaultConfig;
use crate::constants::{VAULT_KEY_ITERATIONS, VAULT_KEY_SALT, VAULT_NONCE_LEN};
use crate::error::ServerError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;
use tracing::warn;

/// Encrypts and decrypts stored connection passwords.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build a vault from a secret string.
    pub fn from_secret(secret: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            secret.as_bytes(),
            VAULT_KEY_SALT,
            VAULT_KEY_ITERATIONS,
            &mut key,
        );
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Build a vault with a random key that only lives for this process.
    pub fn ephemeral() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::from_secret(&URL_SAFE.encode(secret))
    }

    /// Build a vault from configuration, falling back to an ephemeral key.
    pub fn from_config(config: &VaultConfig) -> Self {
        match config.encryption_key.as_deref() {
            Some(secret) => Self::from_secret(secret),
            None => {
                warn!(
                    "No encryption key configured (MCP_ENCRYPTION_KEY); using an ephemeral key. \
                     Stored passwords will not decrypt after a restart."
                );
                Self::ephemeral()
            }
        }
    }

    /// Encrypt a plaintext password.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ServerError> {
        if plaintext.is_empty() {
            return Err(ServerError::credential("Refusing to encrypt an empty password"));
        }

        let mut nonce_bytes = [0u8; VAULT_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ServerError::credential(format!("Encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(VAULT_NONCE_LEN + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);

        Ok(URL_SAFE.encode(combined))
    }

    /// Decrypt a value produced by [`CredentialVault::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, ServerError> {
        let combined = URL_SAFE
            .decode(ciphertext.trim())
            .map_err(|e| ServerError::credential(format!("Ciphertext is not valid base64: {}", e)))?;

        if combined.len() <= VAULT_NONCE_LEN {
            return Err(ServerError::credential("Ciphertext is too short"));
        }

        let (nonce_bytes, sealed) = combined.split_at(VAULT_NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| {
                ServerError::credential("Ciphertext failed authentication (wrong key or tampered)")
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| ServerError::credential("Decrypted password is not valid UTF-8"))
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}
