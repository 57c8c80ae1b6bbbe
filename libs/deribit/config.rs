//! Deribit connection settings
//!
//! Credentials come from the environment (`.env` supported); everything
//! else from `ConnectionOptions`, so the rate limits below are only
//! defaults.

use crate::adapter::DeribitAdapter;
use crate::auth::{GrantType, CLIENT_ID, CLIENT_SECRET};
use crate::protocol::{MATCHING_ENGINE, NON_MATCHING};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::info;
use wsflow::{ConnectionOptions, Credentials, RateLimitConfig};

#[derive(Debug, Clone)]
pub struct DeribitConfig {
    pub client_id: String,
    pub client_secret: String,
    pub testnet: bool,
    pub grant_type: GrantType,
}

impl DeribitConfig {
    /// Load from `DERIBIT_CLIENT_ID`, `DERIBIT_CLIENT_SECRET`,
    /// `DERIBIT_TESTNET` (default true) and `DERIBIT_GRANT_TYPE`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let client_id = std::env::var("DERIBIT_CLIENT_ID").context("DERIBIT_CLIENT_ID not set")?;
        let client_secret =
            std::env::var("DERIBIT_CLIENT_SECRET").context("DERIBIT_CLIENT_SECRET not set")?;
        let testnet = std::env::var("DERIBIT_TESTNET")
            .map(|value| parse_flag(&value))
            .unwrap_or(true);
        let grant_type = match std::env::var("DERIBIT_GRANT_TYPE").ok().as_deref() {
            None | Some("client_credentials") => GrantType::ClientCredentials,
            Some("client_signature") => GrantType::ClientSignature,
            Some(other) => anyhow::bail!("unknown DERIBIT_GRANT_TYPE '{}'", other),
        };

        Ok(Self {
            client_id,
            client_secret,
            testnet,
            grant_type,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new()
            .with(CLIENT_ID, self.client_id.clone())
            .with(CLIENT_SECRET, self.client_secret.clone())
    }

    pub fn adapter(&self) -> DeribitAdapter {
        DeribitAdapter::new(self.testnet, self.grant_type)
    }

    /// Options with the credentials and Deribit's default rate limits
    pub fn options(&self) -> ConnectionOptions {
        info!(
            testnet = self.testnet,
            grant_type = ?self.grant_type,
            "Deribit connection configured"
        );
        default_options().with_credentials(self.credentials())
    }
}

/// Credit-based limits: 20 non-matching requests per second with a burst
/// of 100; order placement costs five credits
pub fn default_options() -> ConnectionOptions {
    ConnectionOptions {
        heartbeat_interval_ms: Some(30_000),
        rate_limit: RateLimitConfig {
            capacity: 100,
            refill_rate: 20,
            refill_interval_ms: 1000,
            queue_limit: 200,
            cost_map: HashMap::from([(NON_MATCHING.to_string(), 1), (MATCHING_ENGINE.to_string(), 5)]),
            priority_queue: true,
        },
        ..ConnectionOptions::default()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = default_options();
        assert!(options.validate().is_ok());
        assert_eq!(options.rate_limit.cost_map[MATCHING_ENGINE], 5);
        assert!(options.rate_limit.priority_queue);
    }

    #[test]
    fn test_options_carry_credentials() {
        let config = DeribitConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            testnet: true,
            grant_type: GrantType::ClientSignature,
        };
        let credentials = config.options().credentials.unwrap();
        assert_eq!(credentials.get(CLIENT_ID), Some("id"));
        assert_eq!(credentials.get(CLIENT_SECRET), Some("secret"));
        assert_eq!(config.adapter().host(), "test.deribit.com");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("YES"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
