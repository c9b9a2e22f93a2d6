//! Credential-at-rest encryption.
//!
//! Key values are stored as `base64(nonce || ciphertext)` under AES-256-GCM.
//! The master key is a 64-character hex string (32 bytes) supplied at
//! startup.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must be a 64-character hex string (32 bytes)")]
    InvalidKey,
    #[error("ciphertext is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("ciphertext is too short")]
    Truncated,
    #[error("aes-gcm {0} failed")]
    Cipher(&'static str),
    #[error("decrypted value is not valid utf-8")]
    InvalidUtf8,
}

pub trait EncryptionService: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

pub struct AesGcmEncryption {
    cipher: Aes256Gcm,
}

impl AesGcmEncryption {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Build from the 64-character hex form the CLI accepts.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|_| CryptoError::InvalidKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::new(&key))
    }

    /// Fresh random master key, hex encoded.
    pub fn generate_key() -> String {
        use aes_gcm::aead::rand_core::RngCore;
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}

impl EncryptionService for AesGcmEncryption {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Cipher("encryption"))?;
        let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(packed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let packed = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|err| CryptoError::InvalidEncoding(err.to_string()))?;
        if packed.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, body) = packed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Cipher("decryption"))?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

/// Identity "encryption" for tests and throwaway setups.
pub struct PlainEncryption;

impl EncryptionService for PlainEncryption {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        Ok(ciphertext.to_string())
    }
}
