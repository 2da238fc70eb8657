use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use mp_core::config::settings::{ADMIN_APP, CORE_APP, PASSWORD_SCHEME, SECRET_KEY};
use mp_core::security::codec::generate_secret_key;
use mp_core::{CodecError, ConfigError, CredentialCodec, FileSettings, PasswordScheme};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn file_codec() -> (CredentialCodec, Arc<FileSettings>, TempDir) {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(FileSettings::new(dir.path().join("settings.conf")));
    settings
        .set(CORE_APP, SECRET_KEY, &generate_secret_key(32).unwrap())
        .unwrap();
    (CredentialCodec::new(settings.clone()), settings, dir)
}

#[test]
fn login_then_replay_password_from_json_session() {
    let (codec, _settings, _dir) = file_codec();

    let mut session: Map<String, Value> = Map::new();
    session.insert("lang".to_string(), json!("fr"));
    codec.store_session_secret(&mut session, "mailbox secret").unwrap();

    // The session only ever carries the ciphertext.
    let stored = session["password"].as_str().unwrap().to_string();
    assert!(!stored.contains("mailbox"));

    assert_eq!(codec.get_session_secret(&session).unwrap(), "mailbox secret");
}

#[test]
fn missing_session_password_is_not_found() {
    let (codec, _settings, _dir) = file_codec();
    let session: HashMap<String, String> = HashMap::new();
    assert!(matches!(
        codec.get_session_secret(&session),
        Err(CodecError::NotFound(_))
    ));
}

#[test]
fn rotating_the_secret_key_invalidates_sessions() {
    let (codec, settings, _dir) = file_codec();
    let mut session: HashMap<String, String> = HashMap::new();
    codec.store_session_secret(&mut session, "before-rotation").unwrap();

    settings
        .set(CORE_APP, SECRET_KEY, &generate_secret_key(16).unwrap())
        .unwrap();

    let replayed = codec.get_session_secret(&session).unwrap();
    assert_ne!(replayed, "before-rotation");
}

#[test]
fn scheme_edits_in_the_file_are_picked_up() {
    let (codec, settings, _dir) = file_codec();
    assert_eq!(codec.scheme().unwrap(), PasswordScheme::Plain);

    // Edit the file behind the provider's back, as an administrator would.
    let path = settings.path().to_path_buf();
    let content = fs::read_to_string(&path).unwrap();
    fs::write(&path, format!("{}\n[admin]\n{} = sha512crypt\n", content, PASSWORD_SCHEME)).unwrap();

    assert_eq!(codec.scheme().unwrap(), PasswordScheme::Sha512Crypt);
    let stored = codec.hash_password("correct horse", true).unwrap();
    let stored = stored.as_str().unwrap();
    assert!(stored.starts_with("{SHA512-CRYPT}$6$"));
    assert!(codec.verify_password("correct horse", stored).unwrap());

    settings.set(ADMIN_APP, PASSWORD_SCHEME, "md5").unwrap();
    assert!(!codec.verify_password("correct horse", stored).unwrap());
}

#[test]
fn missing_settings_file_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let codec = CredentialCodec::new(Arc::new(FileSettings::new(dir.path().join("nope.conf"))));
    assert!(matches!(
        codec.encrypt("x"),
        Err(CodecError::Configuration(ConfigError::NotFound(_)))
    ));
    assert!(matches!(
        codec.verify_password("x", "x"),
        Err(CodecError::Configuration(ConfigError::NotFound(_)))
    ));
}
