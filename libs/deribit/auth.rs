//! Deribit `public/auth` payloads
//!
//! Two grant types are supported: `client_credentials` sends the secret
//! itself, `client_signature` sends an HMAC-SHA256 over
//! `timestamp\nnonce\ndata` so the secret never leaves the process.

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;
use wsflow::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Credential field names understood by the adapter
pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_SECRET: &str = "client_secret";
pub const ACCESS_TOKEN: &str = "access_token";
pub const REFRESH_TOKEN: &str = "refresh_token";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid HMAC key: {0}")]
    InvalidKey(String),

    #[error("Missing credential field: {0}")]
    MissingField(&'static str),
}

/// How the adapter proves its identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    #[default]
    ClientCredentials,
    ClientSignature,
}

/// Hex HMAC-SHA256 of `timestamp\nnonce\ndata`
pub fn sign(secret: &str, timestamp: i64, nonce: &str, data: &str) -> Result<String, SignatureError> {
    let message = format!("{}\n{}\n{}", timestamp, nonce, data);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(message.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Random nonce for `client_signature`
pub fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// `params` object of a `public/auth` request
pub fn auth_params(grant_type: GrantType, credentials: &Credentials) -> Result<Value, SignatureError> {
    let client_id = credentials
        .get(CLIENT_ID)
        .ok_or(SignatureError::MissingField(CLIENT_ID))?;
    let client_secret = credentials
        .get(CLIENT_SECRET)
        .ok_or(SignatureError::MissingField(CLIENT_SECRET))?;

    match grant_type {
        GrantType::ClientCredentials => Ok(json!({
            "grant_type": "client_credentials",
            "client_id": client_id,
            "client_secret": client_secret,
        })),
        GrantType::ClientSignature => {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let nonce = nonce();
            let signature = sign(client_secret, timestamp, &nonce, "")?;
            Ok(json!({
                "grant_type": "client_signature",
                "client_id": client_id,
                "timestamp": timestamp,
                "nonce": nonce,
                "data": "",
                "signature": signature,
            }))
        }
    }
}
