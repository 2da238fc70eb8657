use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Subcommand;
use mp_core::config::settings::{ADMIN_APP, CORE_APP, PASSWORD_SCHEME, SECRET_KEY};
use mp_core::security::codec::generate_secret_key;
use mp_core::{AdminSettings, CredentialCodec, FileSettings, PasswordScheme, StoredCredential};
use tracing::{info, warn};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt a value the way session secrets are stored
    Encrypt { text: String },
    /// Decrypt a stored session secret
    Decrypt { ciphertext: String },
    /// Hash a password under the configured scheme
    Hash {
        password: String,
        /// Print the raw md5 digest (base-64) instead of its hex form
        #[arg(long)]
        raw: bool,
    },
    /// Check a password against a stored credential; exits 1 on mismatch
    Verify { password: String, stored: String },
    /// Generate a new SECRET_KEY
    Keygen {
        /// Key length in bytes: 16, 24 or 32
        #[arg(short, long, default_value_t = 32)]
        length: usize,
        /// Store the key in the settings file instead of printing it
        #[arg(long)]
        write: bool,
    },
    /// Show the password scheme, or set it when NAME is given
    Scheme { name: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Mismatch,
}

pub fn run(config: &Path, command: Command, out: &mut impl Write) -> Result<Outcome> {
    let settings = Arc::new(FileSettings::new(config));
    let codec = CredentialCodec::new(settings.clone());

    match command {
        Command::Encrypt { text } => {
            let ciphertext = codec.encrypt(&text).context("Failed to encrypt value")?;
            writeln!(out, "{}", ciphertext)?;
        }
        Command::Decrypt { ciphertext } => {
            let clear = codec.decrypt(&ciphertext).context("Failed to decrypt value")?;
            writeln!(out, "{}", clear)?;
        }
        Command::Hash { password, raw } => {
            match codec
                .hash_password(&password, !raw)
                .context("Failed to hash password")?
            {
                StoredCredential::Encoded(s) => writeln!(out, "{}", s)?,
                StoredCredential::Digest(d) => writeln!(out, "{}", STANDARD.encode(d))?,
            }
        }
        Command::Verify { password, stored } => {
            let matched = codec
                .verify_password(&password, &stored)
                .context("Failed to verify password")?;
            writeln!(out, "{}", if matched { "match" } else { "mismatch" })?;
            if !matched {
                return Ok(Outcome::Mismatch);
            }
        }
        Command::Keygen { length, write } => {
            let key = generate_secret_key(length).context("Cannot generate secret key")?;
            if write {
                // A missing file just means first-time setup.
                if let Ok(Some(_)) = settings.get_admin(SECRET_KEY, CORE_APP) {
                    warn!("Replacing SECRET_KEY: existing session secrets become unreadable");
                }
                settings
                    .set(CORE_APP, SECRET_KEY, &key)
                    .with_context(|| format!("Failed to write {}", config.display()))?;
                info!(path = %config.display(), length, "Stored new secret key");
                writeln!(out, "{} written to {}", SECRET_KEY, config.display())?;
            } else {
                writeln!(out, "{}", key)?;
            }
        }
        Command::Scheme { name: None } => {
            let scheme = codec.scheme().context("Failed to read password scheme")?;
            writeln!(out, "{}", scheme)?;
        }
        Command::Scheme { name: Some(name) } => {
            let scheme: PasswordScheme = name.parse()?;
            settings
                .set(ADMIN_APP, PASSWORD_SCHEME, scheme.name())
                .with_context(|| format!("Failed to write {}", config.display()))?;
            writeln!(out, "{}", scheme)?;
        }
    }

    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn run_ok(config: &Path, command: Command) -> (Outcome, String) {
        let mut out = Vec::new();
        let outcome = run(config, command, &mut out).unwrap();
        (outcome, String::from_utf8(out).unwrap().trim_end().to_string())
    }

    fn setup(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.conf");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let (_dir, path) = setup("[core]\nSECRET_KEY = 0123456789abcdef\n");
        let (_, ciphertext) = run_ok(&path, Command::Encrypt { text: "hello".into() });
        assert_eq!(ciphertext.len(), 24);
        let (_, clear) = run_ok(&path, Command::Decrypt { ciphertext });
        assert_eq!(clear, "hello");
    }

    #[test]
    fn test_hash_and_verify_md5() {
        let (_dir, path) = setup("[admin]\nPASSWORD_SCHEME = md5\n");
        let (_, hash) = run_ok(&path, Command::Hash { password: "abc".into(), raw: false });
        assert_eq!(hash, "900150983cd24fb0d6963f7d28e17f72");

        let (_, raw) = run_ok(&path, Command::Hash { password: "abc".into(), raw: true });
        assert_eq!(raw, "kAFQmDzST7DWlj99KOF/cg==");

        let (outcome, text) = run_ok(
            &path,
            Command::Verify { password: "abc".into(), stored: hash.clone() },
        );
        assert_eq!((outcome, text.as_str()), (Outcome::Success, "match"));

        let (outcome, text) = run_ok(
            &path,
            Command::Verify { password: "abd".into(), stored: hash },
        );
        assert_eq!((outcome, text.as_str()), (Outcome::Mismatch, "mismatch"));
    }

    #[test]
    fn test_keygen_write_then_encrypt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.conf");

        let (_, msg) = run_ok(&path, Command::Keygen { length: 24, write: true });
        assert!(msg.starts_with("SECRET_KEY written to"));

        let settings = FileSettings::new(&path);
        assert_eq!(settings.require(SECRET_KEY, CORE_APP).unwrap().len(), 24);

        let (_, ciphertext) = run_ok(&path, Command::Encrypt { text: "x".into() });
        let (_, clear) = run_ok(&path, Command::Decrypt { ciphertext });
        assert_eq!(clear, "x");
    }

    #[test]
    fn test_keygen_rejects_bad_length() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let result = run(
            &dir.path().join("settings.conf"),
            Command::Keygen { length: 10, write: false },
            &mut out,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_scheme_show_and_set() {
        let (_dir, path) = setup("# panel settings\n[core]\nSECRET_KEY = 0123456789abcdef\n");
        assert_eq!(run_ok(&path, Command::Scheme { name: None }).1, "plain");

        assert_eq!(
            run_ok(&path, Command::Scheme { name: Some("CRYPT".into()) }).1,
            "crypt"
        );
        assert_eq!(run_ok(&path, Command::Scheme { name: None }).1, "crypt");
        assert!(fs::read_to_string(&path).unwrap().starts_with("# panel settings\n"));
    }

    #[test]
    fn test_scheme_set_unknown() {
        let (_dir, path) = setup("");
        let mut out = Vec::new();
        let result = run(&path, Command::Scheme { name: Some("rot13".into()) }, &mut out);
        assert!(result.is_err());
    }
}
