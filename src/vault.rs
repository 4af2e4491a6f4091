use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine, Engine};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("encryption key is missing or is not 64 hex characters")]
    NotConfigured,
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext is too short")]
    Truncated,
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("plaintext is not valid UTF-8")]
    Utf8,
}

/// Encrypts provider secrets at rest with AES-256-GCM.
///
/// Ciphertexts are `base64(nonce || ciphertext || tag)`, one fresh random nonce per call.
#[derive(Clone)]
pub struct Vault {
    cipher: Option<Aes256Gcm>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl Vault {
    /// Build a vault from a 64-hex-character key. A missing or malformed key yields an
    /// unconfigured vault rather than an error; check [`Vault::is_configured`].
    pub fn new(hex_key: Option<&str>) -> Self {
        let cipher = hex_key
            .map(str::trim)
            .filter(|k| k.len() == 64)
            .and_then(|k| hex::decode(k).ok())
            .and_then(|bytes| Aes256Gcm::new_from_slice(&bytes).ok());
        Self { cipher }
    }

    pub fn is_configured(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let cipher = self.cipher.as_ref().ok_or(VaultError::NotConfigured)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Authentication)?;
        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&sealed);
        Ok(engine::general_purpose::STANDARD.encode(blob))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let cipher = self.cipher.as_ref().ok_or(VaultError::NotConfigured)?;
        let blob = engine::general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| VaultError::Encoding)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Truncated);
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Utf8)
    }

    /// Decrypt, mapping every failure to `None`. Webhook handlers use this so that legacy
    /// plaintext or corrupted values read as "credentials unavailable".
    pub fn safe_decrypt(&self, ciphertext: &str) -> Option<String> {
        self.decrypt(ciphertext).ok()
    }
}

#[cfg(test)]
pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
