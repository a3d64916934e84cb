//! Confidentiality codec for values written to the blob store.
//!
//! ChaCha20-Poly1305 with a fresh random 96-bit nonce per value; the stored
//! form is `base64(nonce || ciphertext)`. The 256-bit key is generated once
//! from the OS CSPRNG and kept hex-encoded in the blob store under
//! [`KEY_STORE_KEY`].
//!
//! Persisted cache values are tagged so that encrypted and legacy plaintext
//! entries are distinguishable without trial decryption; see [`StoredValue`].

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use doc_harness_core::store::{BlobStore, StoreError};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::{info, warn};

/// Blob-store key holding the hex-encoded symmetric key.
pub const KEY_STORE_KEY: &str = "encryption_key";

/// Prefix marking an encrypted stored value.
pub const ENCRYPTED_TAG: &str = "enc:";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("malformed ciphertext: {0}")]
    Encoding(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A persisted cache value: either produced by this codec or left over from
/// a store written before encryption was introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// Base64 ciphertext, without the tag.
    Encrypted(String),
    /// Plaintext stored as-is.
    LegacyPlaintext(String),
}

impl StoredValue {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(ENCRYPTED_TAG) {
            Some(ciphertext) => StoredValue::Encrypted(ciphertext.to_string()),
            None => StoredValue::LegacyPlaintext(raw.to_string()),
        }
    }

    /// Serialized form written to the blob store.
    pub fn to_stored(&self) -> String {
        match self {
            StoredValue::Encrypted(ciphertext) => format!("{}{}", ENCRYPTED_TAG, ciphertext),
            StoredValue::LegacyPlaintext(text) => text.clone(),
        }
    }
}

/// Symmetric codec bound to one key.
#[derive(Clone)]
pub struct Codec {
    key: [u8; KEY_LEN],
    cipher: ChaCha20Poly1305,
}

impl Codec {
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        Self { key, cipher }
    }

    /// Codec with a fresh random key (not persisted).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::from_key(key)
    }

    pub fn from_hex(key_hex: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            CodecError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, b.len()))
        })?;
        Ok(Self::from_key(key))
    }

    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Loads the key from the store, generating and saving one on first use.
    ///
    /// A stored key that fails to parse is replaced; values encrypted under
    /// it will later load as legacy plaintext.
    pub async fn load_or_create(store: &dyn BlobStore) -> Result<Self, CodecError> {
        if let Some(stored) = store.get_item(KEY_STORE_KEY).await? {
            match Self::from_hex(&stored) {
                Ok(codec) => return Ok(codec),
                Err(e) => warn!("replacing unusable stored encryption key: {}", e),
            }
        }
        let codec = Self::generate();
        codec.save_key(store).await?;
        info!("generated new encryption key");
        Ok(codec)
    }

    /// Writes this codec's key to the store.
    pub async fn save_key(&self, store: &dyn BlobStore) -> Result<(), CodecError> {
        store.set_item(KEY_STORE_KEY, &self.key_hex()).await?;
        Ok(())
    }

    /// Encrypts `plaintext` to `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CodecError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CodecError> {
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CodecError::Encoding(e.to_string()))?;
        if decoded.len() <= NONCE_LEN {
            return Err(CodecError::Encoding("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = decoded.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|e| CodecError::Encoding(e.to_string()))
    }

    /// Encrypts and tags a value for storage.
    pub fn seal(&self, plaintext: &str) -> Result<StoredValue, CodecError> {
        self.encrypt(plaintext).map(StoredValue::Encrypted)
    }

    /// Recovers plaintext from a stored value.
    ///
    /// Undecryptable ciphertext is returned as-is (tag included), matching
    /// how legacy plaintext entries load.
    pub fn open(&self, raw: &str) -> String {
        match StoredValue::parse(raw) {
            StoredValue::Encrypted(ciphertext) => match self.decrypt(&ciphertext) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("stored value failed to decrypt, loading as legacy plaintext: {}", e);
                    raw.to_string()
                }
            },
            StoredValue::LegacyPlaintext(text) => text,
        }
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}
