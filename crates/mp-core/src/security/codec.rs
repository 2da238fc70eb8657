//! Reversible encryption of session secrets and scheme-driven password hashing.
//!
//! # Session secrets
//!
//! After login the panel keeps the user's mailbox password in the server-side
//! session so it can be replayed to IMAP/Sieve later. The value is encrypted
//! with AES in ECB mode keyed by the `SECRET_KEY` setting and stored as base-64
//! text. Plaintexts are right-padded with spaces to the 16 byte block size and
//! the spaces are stripped again on decryption.
//!
//! This wire format is kept for compatibility with ciphertexts already sitting
//! in session stores. Its limits are known and accepted:
//!
//! - no IV: equal plaintext blocks give equal ciphertext blocks;
//! - no authentication: decrypting with the wrong key returns garbage rather
//!   than an error, and tampering goes unnoticed;
//! - trailing spaces of the original plaintext are lost.
//!
//! # Passwords
//!
//! Hashing and verification dispatch on the `PASSWORD_SCHEME` setting, which is
//! read on every call so an administrator can switch schemes without a restart.
//! Credentials hashed under a previous scheme stop verifying after a switch.

use std::fmt;
use std::sync::Arc;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use super::password::{PasswordError, PasswordScheme, StoredCredential};
use super::session::{SessionStore, SESSION_PASSWORD_KEY};
use crate::config::settings::{
    AdminSettings, ConfigError, ADMIN_APP, CORE_APP, PASSWORD_SCHEME, SECRET_KEY,
};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Byte used to pad plaintexts up to a block boundary.
const PAD_BYTE: u8 = b' ';

/// Key lengths accepted for `SECRET_KEY` (AES-128, AES-192, AES-256).
pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Decoding error: {0}")]
    Decoding(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Password error: {0}")]
    Password(#[from] PasswordError),
}

enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Invalid {
            name: SECRET_KEY.to_string(),
            reason: format!("key must be 16, 24 or 32 bytes, got {}", key.len()),
        };
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(|_| invalid()),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(|_| invalid()),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }

    /// Encrypt `buf` in place, block by block. `buf.len()` must be a multiple
    /// of [`BLOCK_SIZE`].
    fn encrypt(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            let block = Block::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.encrypt_block(block),
                Self::Aes192(c) => c.encrypt_block(block),
                Self::Aes256(c) => c.encrypt_block(block),
            }
        }
    }

    fn decrypt(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            let block = Block::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.decrypt_block(block),
                Self::Aes192(c) => c.decrypt_block(block),
                Self::Aes256(c) => c.decrypt_block(block),
            }
        }
    }
}

/// Encrypts session secrets and hashes passwords using administrative settings.
///
/// The codec holds no key material itself: `SECRET_KEY` and `PASSWORD_SCHEME`
/// are fetched from the injected [`AdminSettings`] on each call. It is cheap to
/// clone and safe to share between threads.
#[derive(Clone)]
pub struct CredentialCodec {
    settings: Arc<dyn AdminSettings>,
}

impl CredentialCodec {
    pub fn new(settings: Arc<dyn AdminSettings>) -> Self {
        Self { settings }
    }

    fn cipher(&self) -> Result<BlockCipher, CodecError> {
        let key = self.settings.require(SECRET_KEY, CORE_APP)?;
        Ok(BlockCipher::new(key.as_bytes())?)
    }

    /// Encrypt the textual form of `clear` into base-64 text.
    ///
    /// The output always decodes to a positive multiple of [`BLOCK_SIZE`]
    /// bytes; an empty plaintext becomes one block of padding.
    pub fn encrypt(&self, clear: impl fmt::Display) -> Result<String, CodecError> {
        let cipher = self.cipher()?;

        let mut buf = clear.to_string().into_bytes();
        let padded_len = (buf.len() / BLOCK_SIZE + usize::from(buf.len() % BLOCK_SIZE != 0))
            .max(1)
            * BLOCK_SIZE;
        buf.resize(padded_len, PAD_BYTE);

        cipher.encrypt(&mut buf);
        Ok(STANDARD.encode(buf))
    }

    /// Decrypt to raw bytes, padding included.
    pub fn decrypt_bytes(&self, ciphertext: &str) -> Result<Vec<u8>, CodecError> {
        let mut buf = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| CodecError::Decoding(format!("invalid base64: {}", e)))?;

        if buf.len() % BLOCK_SIZE != 0 {
            return Err(CodecError::Decoding(format!(
                "ciphertext length {} is not a multiple of {}",
                buf.len(),
                BLOCK_SIZE
            )));
        }

        self.cipher()?.decrypt(&mut buf);
        Ok(buf)
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt) and strip the
    /// trailing space padding.
    ///
    /// A wrong key is not detected: the result is garbage, converted lossily
    /// to text.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError> {
        let mut clear = self.decrypt_bytes(ciphertext)?;
        while clear.last() == Some(&PAD_BYTE) {
            clear.pop();
        }
        Ok(String::from_utf8_lossy(&clear).into_owned())
    }

    /// Decrypt the password stored in the user's session.
    pub fn get_session_secret<S>(&self, session: &S) -> Result<String, CodecError>
    where
        S: SessionStore + ?Sized,
    {
        let ciphertext = session
            .get_value(SESSION_PASSWORD_KEY)
            .ok_or_else(|| CodecError::NotFound(format!("session key '{}'", SESSION_PASSWORD_KEY)))?;
        self.decrypt(&ciphertext)
    }

    /// Encrypt `secret` and park it in the session, as done at login.
    pub fn store_session_secret<S>(&self, session: &mut S, secret: &str) -> Result<(), CodecError>
    where
        S: SessionStore + ?Sized,
    {
        let ciphertext = self.encrypt(secret)?;
        session.set_value(SESSION_PASSWORD_KEY, ciphertext);
        debug!("Stored encrypted secret in session");
        Ok(())
    }

    /// The password scheme currently configured.
    pub fn scheme(&self) -> Result<PasswordScheme, CodecError> {
        let value = self.settings.get_admin(PASSWORD_SCHEME, ADMIN_APP)?;
        let scheme = PasswordScheme::from_setting(value.as_deref());
        if let Some(raw) = value.as_deref() {
            if scheme == PasswordScheme::Plain && raw.parse::<PasswordScheme>().is_err() {
                warn!(value = raw, "Unknown password scheme, falling back to plain");
            }
        }
        Ok(scheme)
    }

    /// Check `password` against `stored` under the current scheme.
    pub fn verify_password(&self, password: &str, stored: &str) -> Result<bool, CodecError> {
        let scheme = self.scheme()?;
        let matched = scheme.verify(password, stored);
        debug!(scheme = %scheme, matched, "Verified password");
        Ok(matched)
    }

    /// Hash `password` under the current scheme.
    pub fn hash_password(
        &self,
        password: &str,
        as_hex: bool,
    ) -> Result<StoredCredential, CodecError> {
        let scheme = self.scheme()?;
        if scheme == PasswordScheme::Plain {
            warn!("Storing password without hashing (plain scheme)");
        }
        Ok(scheme.hash(password, as_hex)?)
    }
}

impl fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCodec").finish_non_exhaustive()
    }
}

/// Generate a random printable `SECRET_KEY` of `length` bytes.
///
/// The charset avoids spaces, `#` and `=` so the key survives a round trip
/// through the settings file.
pub fn generate_secret_key(length: usize) -> Result<String, ConfigError> {
    if !VALID_KEY_LENGTHS.contains(&length) {
        return Err(ConfigError::Invalid {
            name: SECRET_KEY.to_string(),
            reason: format!("key must be 16, 24 or 32 bytes, got {}", length),
        });
    }

    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@$%^&*()-_+";
    let mut rng = rand::thread_rng();
    Ok((0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect())
}
