//! Authentication state machine
//!
//! ```text
//! Unauthenticated ──generate_auth_data──→ Authenticating ──success──→ Authenticated
//!                                               │                          │
//!                                               └──failure──→ Failed       └─ expiry near → reauth
//! ```
//!
//! Auth state never survives a disconnect; the orchestrator calls
//! [`AuthState::reset`] before reconnecting.

use crate::auth::{AuthHandler, AuthResponse, Credentials};
use crate::error::{Result, WsError};
use crate::message::WsMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStatus::Unauthenticated => "unauthenticated",
            AuthStatus::Authenticating => "authenticating",
            AuthStatus::Authenticated => "authenticated",
            AuthStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What an inbound frame did to the auth state
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated {
        expires_at: Option<DateTime<Utc>>,
        /// Rotated tokens for the caller to merge into its credentials
        tokens: HashMap<String, String>,
    },
    Failed(String),
    Unrelated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub status: AuthStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds before expiry at which reauthentication is due
    pub refresh_threshold: i64,
    /// Seconds the current token was issued for
    pub lifetime_s: Option<i64>,
    pub last_error: Option<String>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(60)
    }
}

impl AuthState {
    pub fn new(refresh_threshold: i64) -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            expires_at: None,
            refresh_threshold,
            lifetime_s: None,
            last_error: None,
        }
    }

    /// Build the auth frame and move to authenticating
    ///
    /// # Errors
    /// `MissingCredentials` when there are no credentials or a required
    /// field is absent; the state is left untouched in that case.
    pub fn generate_auth_data<H>(&mut self, handler: &H, credentials: Option<&Credentials>) -> Result<WsMessage>
    where
        H: AuthHandler + ?Sized,
    {
        let credentials = match credentials {
            Some(credentials) if !credentials.is_empty() => credentials,
            _ => return Err(WsError::MissingCredentials("no credentials supplied".to_string())),
        };

        if let Some(field) = credentials.missing(handler.required_credentials()) {
            return Err(WsError::MissingCredentials(field));
        }

        let payload = handler.generate_auth_payload(credentials)?;
        self.status = AuthStatus::Authenticating;
        self.last_error = None;
        Ok(payload)
    }

    pub fn handle_auth_response<H>(&mut self, handler: &H, frame: &WsMessage) -> AuthOutcome
    where
        H: AuthHandler + ?Sized,
    {
        self.handle_auth_response_at(handler, frame, Utc::now())
    }

    pub fn handle_auth_response_at<H>(&mut self, handler: &H, frame: &WsMessage, now: DateTime<Utc>) -> AuthOutcome
    where
        H: AuthHandler + ?Sized,
    {
        match handler.classify_auth_response(frame) {
            AuthResponse::Unrelated => AuthOutcome::Unrelated,
            AuthResponse::Failure { reason } => self.fail(reason),
            AuthResponse::Success { expiry, tokens } => {
                let expires_at = expiry.resolve(now);
                if matches!(expires_at, Some(at) if at <= now) {
                    return self.fail("token_already_expired".to_string());
                }

                debug!(expires_at = ?expires_at, "Authenticated");
                self.status = AuthStatus::Authenticated;
                self.expires_at = expires_at;
                self.lifetime_s = expires_at.map(|at| (at - now).num_seconds());
                self.last_error = None;
                AuthOutcome::Authenticated { expires_at, tokens }
            }
        }
    }

    /// Record a failure that did not come from a server response
    pub fn fail(&mut self, reason: String) -> AuthOutcome {
        self.status = AuthStatus::Failed;
        self.last_error = Some(reason.clone());
        AuthOutcome::Failed(reason)
    }

    pub fn needs_reauthentication(&self) -> bool {
        self.needs_reauthentication_at(Utc::now())
    }

    /// True when failed, or when the expiry falls within the refresh threshold
    ///
    /// Never-authenticated states and non-expiring tokens do not need it.
    pub fn needs_reauthentication_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AuthStatus::Failed => true,
            AuthStatus::Authenticated => match self.expires_at {
                Some(expires_at) => {
                    expires_at < now + chrono::Duration::seconds(self.effective_threshold())
                }
                None => false,
            },
            AuthStatus::Unauthenticated | AuthStatus::Authenticating => false,
        }
    }

    /// The refresh threshold, capped at half the token's lifetime
    ///
    /// A token shorter-lived than the threshold would otherwise be due for
    /// renewal the moment it arrives.
    pub fn effective_threshold(&self) -> i64 {
        match self.lifetime_s {
            Some(lifetime) => self.refresh_threshold.min(lifetime / 2),
            None => self.refresh_threshold,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    /// Forget everything except the threshold
    pub fn reset(&mut self) {
        *self = Self::new(self.refresh_threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthExpiry;

    struct TokenAuth;

    impl AuthHandler for TokenAuth {
        fn required_credentials(&self) -> &[&'static str] {
            &["api_key"]
        }

        fn generate_auth_payload(&self, credentials: &Credentials) -> Result<WsMessage> {
            Ok(WsMessage::Text(format!("auth:{}", credentials.get("api_key").unwrap_or_default())))
        }

        fn classify_auth_response(&self, frame: &WsMessage) -> AuthResponse {
            match frame.as_text() {
                Some("ok") => AuthResponse::Success {
                    expiry: AuthExpiry::In(900),
                    tokens: HashMap::from([("access_token".to_string(), "t1".to_string())]),
                },
                Some("ok-forever") => AuthResponse::Success {
                    expiry: AuthExpiry::Never,
                    tokens: HashMap::new(),
                },
                Some("ok-stale") => AuthResponse::Success {
                    expiry: AuthExpiry::In(-5),
                    tokens: HashMap::new(),
                },
                Some("denied") => AuthResponse::Failure {
                    reason: "invalid_credentials".to_string(),
                },
                _ => AuthResponse::Unrelated,
            }
        }
    }

    struct ShortAuth;

    impl AuthHandler for ShortAuth {
        fn required_credentials(&self) -> &[&'static str] {
            &[]
        }

        fn generate_auth_payload(&self, _credentials: &Credentials) -> Result<WsMessage> {
            Ok(WsMessage::Text("auth".to_string()))
        }

        fn classify_auth_response(&self, _frame: &WsMessage) -> AuthResponse {
            AuthResponse::Success {
                expiry: AuthExpiry::In(30),
                tokens: HashMap::new(),
            }
        }
    }

    #[test]
    fn test_missing_credentials_do_not_mutate_state() {
        let mut state = AuthState::default();

        let err = state.generate_auth_data(&TokenAuth, None).unwrap_err();
        assert!(matches!(err, WsError::MissingCredentials(_)));

        let partial = Credentials::new().with("other", "x");
        let err = state.generate_auth_data(&TokenAuth, Some(&partial)).unwrap_err();
        assert_eq!(err, WsError::MissingCredentials("api_key".to_string()));
        assert_eq!(state, AuthState::default());
    }

    #[test]
    fn test_generate_moves_to_authenticating() {
        let mut state = AuthState::default();
        let creds = Credentials::new().with("api_key", "k");
        let payload = state.generate_auth_data(&TokenAuth, Some(&creds)).unwrap();
        assert_eq!(payload, WsMessage::Text("auth:k".to_string()));
        assert_eq!(state.status, AuthStatus::Authenticating);
    }

    #[test]
    fn test_success_sets_relative_expiry_and_returns_tokens() {
        let mut state = AuthState::default();
        let now = Utc::now();
        let outcome = state.handle_auth_response_at(&TokenAuth, &WsMessage::Text("ok".into()), now);

        assert_eq!(state.status, AuthStatus::Authenticated);
        assert_eq!(state.expires_at, Some(now + chrono::Duration::seconds(900)));
        match outcome {
            AuthOutcome::Authenticated { tokens, .. } => {
                assert_eq!(tokens.get("access_token").map(String::as_str), Some("t1"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_failure_and_unrelated() {
        let mut state = AuthState::default();
        assert_eq!(
            state.handle_auth_response(&TokenAuth, &WsMessage::Text("tick".into())),
            AuthOutcome::Unrelated
        );
        assert_eq!(state.status, AuthStatus::Unauthenticated);

        state.handle_auth_response(&TokenAuth, &WsMessage::Text("denied".into()));
        assert_eq!(state.status, AuthStatus::Failed);
        assert_eq!(state.last_error.as_deref(), Some("invalid_credentials"));
        assert!(state.needs_reauthentication());
    }

    #[test]
    fn test_already_expired_token_is_a_failure() {
        let mut state = AuthState::default();
        let outcome = state.handle_auth_response(&TokenAuth, &WsMessage::Text("ok-stale".into()));
        assert!(matches!(outcome, AuthOutcome::Failed(_)));
        assert_eq!(state.status, AuthStatus::Failed);
    }

    #[test]
    fn test_reauth_threshold() {
        let now = Utc::now();
        let mut state = AuthState::new(60);
        assert!(!state.needs_reauthentication_at(now));

        state.status = AuthStatus::Authenticated;
        state.expires_at = Some(now + chrono::Duration::seconds(30));
        assert!(state.needs_reauthentication_at(now));

        state.expires_at = Some(now + chrono::Duration::seconds(120));
        assert!(!state.needs_reauthentication_at(now));

        state.expires_at = None;
        assert!(!state.needs_reauthentication_at(now));
    }

    #[test]
    fn test_short_lived_token_is_not_renewed_on_arrival() {
        let now = Utc::now();
        let mut state = AuthState::new(60);
        let outcome = state.handle_auth_response_at(&ShortAuth, &WsMessage::Text("ok".into()), now);
        assert!(matches!(outcome, AuthOutcome::Authenticated { .. }));
        assert_eq!(state.lifetime_s, Some(30));
        assert_eq!(state.effective_threshold(), 15);

        assert!(!state.needs_reauthentication_at(now));
        assert!(!state.needs_reauthentication_at(now + chrono::Duration::seconds(14)));
        assert!(state.needs_reauthentication_at(now + chrono::Duration::seconds(16)));

        // Long-lived tokens keep the configured threshold
        state.handle_auth_response_at(&TokenAuth, &WsMessage::Text("ok".into()), now);
        assert_eq!(state.effective_threshold(), 60);

        state.reset();
        assert_eq!(state.lifetime_s, None);
    }

    #[test]
    fn test_non_expiring_token_never_needs_reauth() {
        let mut state = AuthState::default();
        state.handle_auth_response(&TokenAuth, &WsMessage::Text("ok-forever".into()));
        assert!(state.is_authenticated());
        assert!(!state.needs_reauthentication());

        state.reset();
        assert_eq!(state.status, AuthStatus::Unauthenticated);
        assert_eq!(state.refresh_threshold, 60);
    }
}
