// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Credential vault: AES-256-GCM encryption for IMAP passwords at rest.
//!
//! The wire format is `base64(nonce || ciphertext)` with a random 12-byte
//! nonce. The key is the process-wide `APP_KEY`, a base64-encoded 32-byte
//! secret. There is no key rotation; re-encrypting credentials under a new
//! key is an operator task.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("key must be a base64-encoded 32-byte secret")]
    KeyFormat,

    #[error("ciphertext too short to hold a nonce")]
    CiphertextTooShort,

    #[error("invalid base64 in stored credential: {0}")]
    Encoding(String),

    #[error("authentication failed: wrong key or corrupted ciphertext")]
    Auth,

    #[error("encryption failed")]
    Encrypt,

    #[error("decrypted credential is not valid UTF-8")]
    Utf8,
}

/// Symmetric cipher bound to the process key.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Builds a vault from a base64-encoded 32-byte key.
    pub fn new(key_b64: &str) -> Result<Self, VaultError> {
        let key = BASE64.decode(key_b64).map_err(|_| VaultError::KeyFormat)?;
        if key.len() != 32 {
            return Err(VaultError::KeyFormat);
        }

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::KeyFormat)?;
        Ok(Self { cipher })
    }

    /// Encrypts a plaintext credential into `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(blob))
    }

    /// Decrypts a credential previously produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encrypted: &str) -> Result<String, VaultError> {
        let blob = BASE64
            .decode(encrypted)
            .map_err(|e| VaultError::Encoding(e.to_string()))?;

        if blob.len() < NONCE_LEN {
            return Err(VaultError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Auth)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Utf8)
    }
}
