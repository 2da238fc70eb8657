//! Minimal view of a web session, as needed to park encrypted secrets in it.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Session key under which the user's encrypted mailbox password is kept.
pub const SESSION_PASSWORD_KEY: &str = "password";

/// Mapping-like session storage.
pub trait SessionStore {
    /// Text value stored under `key`, if any.
    fn get_value(&self, key: &str) -> Option<String>;

    fn set_value(&mut self, key: &str, value: String);
}

impl SessionStore for HashMap<String, String> {
    fn get_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }

    fn set_value(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

/// JSON session payloads. Non-string values are not readable as secrets.
impl SessionStore for Map<String, Value> {
    fn get_value(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn set_value(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), Value::String(value));
    }
}
