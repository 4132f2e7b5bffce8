//! Remote-decrypt (envelope) key source.
//!
//! The signing key is stored sealed under a data key, and the data key is
//! stored wrapped by a key-management service. Resolution asks the service
//! to unwrap the data key, opens the sealed key file locally, and wipes the
//! data key.
//!
//! Sealed blob layout: `nonce (24 bytes) || XChaCha20-Poly1305 ciphertext`
//! of the [`KeyFile`] JSON.

// Allow deprecated from_slice until chacha20poly1305 upgrades to generic-array 1.x
#![allow(deprecated)]

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::file::KeyFile;
use crate::handle::KeyMaterial;
use crate::source::{KeySource, SourceKind};
use crate::types::KeyContext;

/// XChaCha20-Poly1305 nonce size (24 bytes)
const NONCE_SIZE: usize = 24;

/// Data key size (XChaCha20-Poly1305 key).
pub const DATA_KEY_SIZE: usize = 32;

/// Collaborator that unwraps a data key (a KMS `Decrypt` call).
#[async_trait]
pub trait KeyDecryptor: Send + Sync {
    /// Unwrap `wrapped_key` for `context`.
    ///
    /// # Errors
    ///
    /// Returns error if the service is unreachable or refuses the request.
    async fn decrypt_data_key(
        &self,
        wrapped_key: &[u8],
        context: &KeyContext,
    ) -> Result<Zeroizing<Vec<u8>>, KeyringError>;
}

/// Key source that opens a sealed key file with a remotely unwrapped data key.
pub struct EnvelopeKeySource<D> {
    decryptor: D,
    wrapped_data_key: Vec<u8>,
    sealed_key: Vec<u8>,
}

impl<D: KeyDecryptor> EnvelopeKeySource<D> {
    /// Create a source from the wrapped data key and the sealed key blob.
    pub fn new(decryptor: D, wrapped_data_key: Vec<u8>, sealed_key: Vec<u8>) -> Self {
        Self {
            decryptor,
            wrapped_data_key,
            sealed_key,
        }
    }
}

#[async_trait]
impl<D: KeyDecryptor> KeySource for EnvelopeKeySource<D> {
    fn kind(&self) -> SourceKind {
        SourceKind::RemoteDecrypt
    }

    async fn resolve_key(&self, context: &KeyContext) -> Result<KeyMaterial, KeyringError> {
        let data_key = self
            .decryptor
            .decrypt_data_key(&self.wrapped_data_key, context)
            .await?;

        let plaintext = open(&data_key, &self.sealed_key)?;
        drop(data_key);

        let key_file = KeyFile::from_json(&plaintext)?;
        let material = key_file.to_material()?;

        debug!(
            key_id = %context.key_id,
            fingerprint = %material.certificate().fingerprint,
            "EnvelopeKeySource: resolved key"
        );
        Ok(material)
    }
}

/// Seal a key file under `data_key`.
///
/// # Errors
///
/// Returns error if the data key has the wrong size or serialization fails.
pub fn seal_key_file(data_key: &[u8], key_file: &KeyFile) -> Result<Vec<u8>, KeyringError> {
    let plaintext = key_file.to_json()?;
    seal(data_key, &plaintext)
}

/// Encrypt `plaintext`, returning `nonce || ciphertext`.
///
/// # Errors
///
/// Returns error if the key has the wrong size.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeyringError> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| KeyringError::invalid_key(format!("seal failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a `nonce || ciphertext` blob.
///
/// # Errors
///
/// Returns error if the blob is truncated or fails authentication.
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
    if sealed.len() < NONCE_SIZE {
        return Err(KeyringError::DecryptionFailed {
            reason: format!("sealed blob too short ({} bytes)", sealed.len()),
        });
    }

    let cipher = cipher(key)?;
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
        warn!("Envelope: decryption failed (possible tampering): {}", e);
        KeyringError::DecryptionFailed {
            reason: "authentication failed".to_string(),
        }
    })?;
    Ok(Zeroizing::new(plaintext))
}

fn cipher(key: &[u8]) -> Result<XChaCha20Poly1305, KeyringError> {
    if key.len() != DATA_KEY_SIZE {
        return Err(KeyringError::invalid_key(format!(
            "data key must be {DATA_KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| KeyringError::invalid_key(format!("bad data key: {e}")))
}

/// Key decryptor holding a local key-encryption key.
///
/// Stands in for a KMS in tests and single-host deployments.
pub struct LocalKeyDecryptor {
    kek: Zeroizing<Vec<u8>>,
}

impl LocalKeyDecryptor {
    /// Create a decryptor from a 32-byte key-encryption key.
    ///
    /// # Errors
    ///
    /// Returns error if the key has the wrong size.
    pub fn new(kek: Zeroizing<Vec<u8>>) -> Result<Self, KeyringError> {
        if kek.len() != DATA_KEY_SIZE {
            return Err(KeyringError::invalid_key("key-encryption key must be 32 bytes"));
        }
        Ok(Self { kek })
    }

    /// Generate a fresh data key and return it with its wrapped form.
    ///
    /// # Errors
    ///
    /// Returns error if wrapping fails.
    pub fn generate_data_key(&self) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), KeyringError> {
        let mut data_key = Zeroizing::new(vec![0u8; DATA_KEY_SIZE]);
        OsRng.fill_bytes(data_key.as_mut_slice());
        let wrapped = seal(&self.kek, &data_key)?;
        Ok((data_key, wrapped))
    }
}

#[async_trait]
impl KeyDecryptor for LocalKeyDecryptor {
    async fn decrypt_data_key(
        &self,
        wrapped_key: &[u8],
        _context: &KeyContext,
    ) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
        open(&self.kek, wrapped_key)
    }
}
