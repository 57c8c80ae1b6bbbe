use crate::error::Result;
use crate::message::WsMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque credential map supplied by the caller
///
/// The core never reads individual fields; it only checks that the fields
/// an adapter declares as required are present, and merges rotated tokens
/// returned by a successful authentication.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(HashMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First required field that is absent or empty
    pub fn missing(&self, required: &[&str]) -> Option<String> {
        required
            .iter()
            .find(|key| self.get(key).map_or(true, str::is_empty))
            .map(|key| key.to_string())
    }

    /// Merge rotated tokens into the map
    pub fn merge(&mut self, tokens: HashMap<String, String>) {
        self.0.extend(tokens);
    }

    /// Load credential fields from environment variables
    ///
    /// Reads a `.env` file first if one exists. Each pair is
    /// `(credential field, environment variable)`; unset variables are skipped.
    pub fn from_env(fields: &[(&str, &str)]) -> Self {
        dotenv::dotenv().ok();

        let mut credentials = Self::new();
        for (field, var) in fields {
            if let Ok(value) = std::env::var(var) {
                credentials.insert(*field, value);
            }
        }
        credentials
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_struct("Credentials").field("fields", &keys).finish()
    }
}

/// Expiry reported by a successful authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthExpiry {
    /// Token does not expire
    Never,
    /// Absolute expiry
    At(DateTime<Utc>),
    /// Relative expiry in seconds, converted with `now + expires_in`
    In(i64),
}

impl AuthExpiry {
    /// Resolve to an absolute timestamp
    pub fn resolve(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            AuthExpiry::Never => None,
            AuthExpiry::At(at) => Some(at),
            AuthExpiry::In(secs) => Some(now + chrono::Duration::seconds(secs)),
        }
    }
}

/// Adapter classification of an inbound frame during authentication
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResponse {
    Success {
        expiry: AuthExpiry,
        /// Rotated tokens to merge into the credentials
        tokens: HashMap<String, String>,
    },
    Failure {
        reason: String,
    },
    /// Not an auth response; leave auth state untouched
    Unrelated,
}

/// Authentication behaviour supplied by an adapter
pub trait AuthHandler: Send + Sync + 'static {
    /// Credential fields that must be present before authenticating
    fn required_credentials(&self) -> &[&'static str] {
        &[]
    }

    /// Build the auth frame to send after (re)connecting
    ///
    /// Called only when the credentials contain every required field.
    fn generate_auth_payload(&self, credentials: &Credentials) -> Result<WsMessage>;

    /// Classify an inbound frame as success, failure, or unrelated traffic
    fn classify_auth_response(&self, frame: &WsMessage) -> AuthResponse;
}
