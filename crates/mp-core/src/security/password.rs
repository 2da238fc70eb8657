//! Password hashing schemes selectable through the `PASSWORD_SCHEME` setting.

use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use rand::seq::SliceRandom;
use sha_crypt::{sha512_check, sha512_simple, Sha512Params};
use thiserror::Error;

/// Characters a traditional crypt salt is drawn from.
const SALT_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Dovecot scheme prefix for SHA-512 crypt hashes.
const SHA512_CRYPT_PREFIX: &str = "{SHA512-CRYPT}";

const SHA512_ROUNDS: usize = 5000;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Hashing failed: {0}")]
    HashFailed(String),
    #[error("Unknown password scheme: {0}")]
    UnknownScheme(String),
}

/// How passwords are turned into stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordScheme {
    /// Traditional DES crypt(3) with a two character salt.
    Crypt,
    /// Unsalted MD5, stored as 32 lowercase hex characters.
    Md5,
    /// SHA-512 crypt with the `{SHA512-CRYPT}` prefix understood by Dovecot.
    Sha512Crypt,
    /// No hashing at all: the stored credential is the password.
    #[default]
    Plain,
}

impl PasswordScheme {
    pub const ALL: [PasswordScheme; 4] = [Self::Crypt, Self::Md5, Self::Sha512Crypt, Self::Plain];

    /// Resolve the configured setting value. Unset and unrecognised values
    /// both select [`PasswordScheme::Plain`].
    pub fn from_setting(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(PasswordScheme::Plain)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Crypt => "crypt",
            Self::Md5 => "md5",
            Self::Sha512Crypt => "sha512crypt",
            Self::Plain => "plain",
        }
    }

    /// Produce a storable credential for `password`.
    ///
    /// `as_hex` only matters for [`PasswordScheme::Md5`]: when false the raw
    /// 16 byte digest is returned instead of its hex form.
    pub fn hash(&self, password: &str, as_hex: bool) -> Result<StoredCredential, PasswordError> {
        match self {
            Self::Crypt => {
                let salt = generate_salt();
                pwhash::unix_crypt::hash_with(&salt, password)
                    .map(StoredCredential::Encoded)
                    .map_err(|e| PasswordError::HashFailed(format!("crypt: {}", e)))
            }
            Self::Md5 => {
                let digest = Md5::digest(password.as_bytes());
                Ok(if as_hex {
                    StoredCredential::Encoded(hex::encode(digest))
                } else {
                    StoredCredential::Digest(digest.to_vec())
                })
            }
            Self::Sha512Crypt => {
                let params = Sha512Params::new(SHA512_ROUNDS)
                    .map_err(|e| PasswordError::HashFailed(format!("Invalid params: {:?}", e)))?;
                let hash = sha512_simple(password, &params)
                    .map_err(|e| PasswordError::HashFailed(format!("{:?}", e)))?;
                Ok(StoredCredential::Encoded(format!("{}{}", SHA512_CRYPT_PREFIX, hash)))
            }
            Self::Plain => Ok(StoredCredential::Encoded(password.to_string())),
        }
    }

    /// Check `password` against a credential produced by this scheme.
    ///
    /// A malformed `stored` value is a mismatch, not an error.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match self {
            // crypt(3) semantics: the salt (or full setting) is taken from the
            // stored hash, so `$1$`/`$6$` style entries verify as well.
            Self::Crypt => pwhash::unix::verify(password, stored),
            Self::Md5 => hex::encode(Md5::digest(password.as_bytes())) == stored,
            Self::Sha512Crypt => {
                let hash = stored.strip_prefix(SHA512_CRYPT_PREFIX).unwrap_or(stored);
                sha512_check(password, hash).is_ok()
            }
            Self::Plain => password == stored,
        }
    }
}

impl fmt::Display for PasswordScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PasswordScheme {
    type Err = PasswordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crypt" => Ok(Self::Crypt),
            "md5" => Ok(Self::Md5),
            "sha512crypt" | "sha512-crypt" => Ok(Self::Sha512Crypt),
            "plain" | "none" | "" => Ok(Self::Plain),
            _ => Err(PasswordError::UnknownScheme(s.to_string())),
        }
    }
}

/// Output of [`PasswordScheme::hash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCredential {
    /// Printable form, ready to be stored in a text column.
    Encoded(String),
    /// Raw digest bytes (md5 with `as_hex = false`).
    Digest(Vec<u8>),
}

impl StoredCredential {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Encoded(s) => Some(s.as_str()),
            Self::Digest(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Encoded(s) => s.as_bytes(),
            Self::Digest(d) => d.as_slice(),
        }
    }
}

/// Two distinct salt characters, drawn from a CSPRNG.
fn generate_salt() -> String {
    let mut rng = rand::thread_rng();
    SALT_CHARSET
        .choose_multiple(&mut rng, 2)
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypt_hash_and_verify() {
        let stored = PasswordScheme::Crypt.hash("s3cret!", true).unwrap();
        let stored = stored.as_str().unwrap();
        assert_eq!(stored.len(), 13);
        assert!(PasswordScheme::Crypt.verify("s3cret!", stored));
        assert!(!PasswordScheme::Crypt.verify("s3cret?", stored));
    }

    #[test]
    fn test_crypt_matches_system_crypt() {
        // crypt("secret", "ab") as produced by glibc
        assert!(PasswordScheme::Crypt.verify("secret", "abNANd1rDfiNc"));
        assert!(!PasswordScheme::Crypt.verify("Secret", "abNANd1rDfiNc"));
    }

    #[test]
    fn test_crypt_salt_is_fresh() {
        let salts: std::collections::HashSet<String> = (0..20)
            .map(|_| {
                let stored = PasswordScheme::Crypt.hash("password", true).unwrap();
                stored.as_str().unwrap()[..2].to_string()
            })
            .collect();
        assert!(salts.len() > 1);
    }

    #[test]
    fn test_salt_shape() {
        for _ in 0..50 {
            let salt = generate_salt();
            let bytes = salt.as_bytes();
            assert_eq!(bytes.len(), 2);
            assert_ne!(bytes[0], bytes[1]);
            assert!(bytes.iter().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_crypt_rejects_malformed_stored_value() {
        assert!(!PasswordScheme::Crypt.verify("secret", ""));
        assert!(!PasswordScheme::Crypt.verify("secret", "not-a-hash"));
    }

    #[test]
    fn test_md5_known_digest() {
        let stored = PasswordScheme::Md5.hash("abc", true).unwrap();
        assert_eq!(stored.as_str(), Some("900150983cd24fb0d6963f7d28e17f72"));
        assert!(PasswordScheme::Md5.verify("abc", "900150983cd24fb0d6963f7d28e17f72"));
        assert!(!PasswordScheme::Md5.verify("abd", "900150983cd24fb0d6963f7d28e17f72"));
    }

    #[test]
    fn test_md5_raw_digest() {
        let stored = PasswordScheme::Md5.hash("abc", false).unwrap();
        assert_eq!(stored.as_str(), None);
        assert_eq!(hex::encode(stored.as_bytes()), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_sha512_crypt() {
        let stored = PasswordScheme::Sha512Crypt.hash("TestPassword123!", true).unwrap();
        let stored = stored.as_str().unwrap();
        assert!(stored.starts_with("{SHA512-CRYPT}$6$"));
        assert!(PasswordScheme::Sha512Crypt.verify("TestPassword123!", stored));
        assert!(!PasswordScheme::Sha512Crypt.verify("wrong", stored));
        // Bare hashes without the Dovecot prefix are accepted too.
        let bare = stored.strip_prefix("{SHA512-CRYPT}").unwrap();
        assert!(PasswordScheme::Sha512Crypt.verify("TestPassword123!", bare));
    }

    #[test]
    fn test_plain_passthrough() {
        let stored = PasswordScheme::Plain.hash("hunter2", true).unwrap();
        assert_eq!(stored.as_str(), Some("hunter2"));
        assert!(PasswordScheme::Plain.verify("hunter2", "hunter2"));
        assert!(!PasswordScheme::Plain.verify("hunter3", "hunter2"));
    }

    #[test]
    fn test_from_setting() {
        assert_eq!(PasswordScheme::from_setting(Some("crypt")), PasswordScheme::Crypt);
        assert_eq!(PasswordScheme::from_setting(Some("MD5")), PasswordScheme::Md5);
        assert_eq!(PasswordScheme::from_setting(Some("none")), PasswordScheme::Plain);
        assert_eq!(PasswordScheme::from_setting(Some("bcrypt")), PasswordScheme::Plain);
        assert_eq!(PasswordScheme::from_setting(None), PasswordScheme::Plain);
    }

    #[test]
    fn test_parse_unknown_scheme() {
        assert!(matches!(
            "bcrypt".parse::<PasswordScheme>(),
            Err(PasswordError::UnknownScheme(_))
        ));
        for scheme in PasswordScheme::ALL {
            assert_eq!(scheme.name().parse::<PasswordScheme>().unwrap(), scheme);
        }
    }
}
