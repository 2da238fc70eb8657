//! Credential handling for the mail administration panel.
//!
//! - [`security::codec`]: session secret encryption and password hashing
//! - [`config::settings`]: administrative settings providers
//! - [`security::session`]: the session storage seen by the codec

pub mod config;
pub mod fs;
pub mod security;

pub use config::settings::{AdminSettings, ConfigError, FileSettings, MemorySettings};
pub use security::codec::{CodecError, CredentialCodec};
pub use security::password::{PasswordScheme, StoredCredential};
pub use security::session::SessionStore;
