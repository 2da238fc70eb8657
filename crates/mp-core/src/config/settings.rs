//! Administrative settings providers.
//!
//! The panel keeps its administrator-controlled parameters (secret key,
//! password scheme, ...) grouped by application. Consumers receive an
//! [`AdminSettings`] handle instead of reading global state, and look values up
//! on every call so that a change made by an administrator is picked up without
//! a restart.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info};

use super::parser::{self, SettingsFile};
use crate::fs::atomic;

/// Application holding the panel-wide secret key.
pub const CORE_APP: &str = "core";
/// Application holding the password policy.
pub const ADMIN_APP: &str = "admin";

/// Symmetric key used to protect session secrets.
pub const SECRET_KEY: &str = "SECRET_KEY";
/// Name of the password hashing scheme.
pub const PASSWORD_SCHEME: &str = "PASSWORD_SCHEME";

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/mailpanel/settings.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    NotFound(String),
    #[error("Setting {app}.{name} is not defined")]
    Missing { app: String, name: String },
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Write error: {0}")]
    Write(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Read access to administrative parameters.
pub trait AdminSettings: Send + Sync {
    /// Look up `name` in the parameters of `app`. `Ok(None)` when unset.
    fn get_admin(&self, name: &str, app: &str) -> Result<Option<String>, ConfigError>;

    /// Like [`get_admin`](Self::get_admin) but an unset value is an error.
    fn require(&self, name: &str, app: &str) -> Result<String, ConfigError> {
        self.get_admin(name, app)?.ok_or_else(|| ConfigError::Missing {
            app: app.to_string(),
            name: name.to_string(),
        })
    }
}

/// In-process settings, mutable at runtime.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<BTreeMap<(String, String), String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`, handy when wiring tests.
    pub fn with(self, app: &str, name: &str, value: impl Into<String>) -> Self {
        self.set(app, name, value);
        self
    }

    pub fn set(&self, app: &str, name: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((app.to_string(), name.to_string()), value.into());
    }

    pub fn unset(&self, app: &str, name: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(app.to_string(), name.to_string()));
    }
}

impl AdminSettings for MemorySettings {
    fn get_admin(&self, name: &str, app: &str) -> Result<Option<String>, ConfigError> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&(app.to_string(), name.to_string())).cloned())
    }
}

/// Identity of the file contents a cache entry was built from.
///
/// Atomic replacement (as done by [`FileSettings::set`] and most editors)
/// always changes `inode`. An in-place rewrite that keeps the size within one
/// mtime tick of the filesystem is not detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    inode: u64,
    modified: SystemTime,
    len: u64,
}

#[derive(Debug)]
struct Cached {
    stamp: FileStamp,
    settings: SettingsFile,
}

/// Settings backed by an INI-style file:
///
/// ```text
/// [core]
/// SECRET_KEY = 0123456789abcdef
///
/// [admin]
/// PASSWORD_SCHEME = crypt
/// ```
///
/// The parsed file is cached and reloaded whenever its modification time or
/// size changes, or the file is replaced, so edits made by another process are
/// seen on the next lookup.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    cache: RwLock<Option<Cached>>,
    /// Serializes read-modify-write cycles of `set` and `unset`.
    write_lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `name = value` under `[app]`, creating the file if needed.
    ///
    /// The file is rewritten atomically with mode 0600 since it holds the
    /// secret key. Comments and layout of the existing file are kept.
    pub fn set(&self, app: &str, name: &str, value: &str) -> Result<(), ConfigError> {
        if value.contains(['\n', '\r']) || value.trim() != value {
            return Err(ConfigError::Invalid {
                name: name.to_string(),
                reason: "value must be a single line without surrounding whitespace".to_string(),
            });
        }

        self.update(|settings| settings.set(app, name, value))?;
        info!(path = %self.path.display(), app, name, "Updated setting");
        Ok(())
    }

    /// Remove `name` from `[app]`. Removing an absent setting is a no-op.
    pub fn unset(&self, app: &str, name: &str) -> Result<(), ConfigError> {
        self.update(|settings| settings.remove(app, name))?;
        info!(path = %self.path.display(), app, name, "Removed setting");
        Ok(())
    }

    /// Read, edit and atomically rewrite the file under `write_lock`, so
    /// concurrent edits of different keys do not overwrite each other.
    fn update(&self, edit: impl FnOnce(&mut SettingsFile)) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut settings = match fs::read_to_string(&self.path) {
            Ok(content) => parser::parse_settings(&content).map_err(ConfigError::Parse)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => SettingsFile::default(),
            Err(e) => return Err(e.into()),
        };
        edit(&mut settings);

        atomic::atomic_write_secret(&self.path, &settings.serialize())
            .map_err(|e| ConfigError::Write(e.to_string()))?;

        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn stamp(&self) -> Result<FileStamp, ConfigError> {
        let meta = fs::metadata(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(self.path.display().to_string()),
            _ => ConfigError::Io(e),
        })?;
        Ok(FileStamp {
            inode: meta.ino(),
            modified: meta.modified()?,
            len: meta.len(),
        })
    }

    /// Run `f` against the current file contents, reloading if stale.
    fn with_settings<R>(&self, f: impl FnOnce(&SettingsFile) -> R) -> Result<R, ConfigError> {
        let stamp = self.stamp()?;

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.as_ref().filter(|c| c.stamp == stamp) {
                return Ok(f(&cached.settings));
            }
        }

        let content = fs::read_to_string(&self.path)?;
        let settings = parser::parse_settings(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), "Loaded settings file");

        let result = f(&settings);
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Cached { stamp, settings });
        Ok(result)
    }
}

impl AdminSettings for FileSettings {
    fn get_admin(&self, name: &str, app: &str) -> Result<Option<String>, ConfigError> {
        self.with_settings(|settings| settings.get(app, name).map(str::to_string))
    }
}
