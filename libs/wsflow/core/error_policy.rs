//! Error classification and reconnection decisions
//!
//! Every decision starts from the adapter's [`ErrorHandler::classify`].
//! `Unknown` is treated exactly like `Transient` so unrecognised errors fail
//! open toward retrying. Auth and other critical errors never reconnect.

use crate::config::ConnectionOptions;
use crate::error::{ErrorCategory, WsError};
use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::reconnect::{ExponentialBackoff, NeverReconnect, ReconnectionStrategy};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::warn;

/// Outcome of [`ErrorPolicy::handle_error`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Drop the offending message and carry on
    Continue,
    Retry(Duration),
    Stop(String),
}

/// Outcome of [`ErrorPolicy::should_reconnect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    Reconnect { delay: Duration },
    Abandon { reason: String },
}

impl ReconnectDecision {
    pub fn is_reconnect(&self) -> bool {
        matches!(self, ReconnectDecision::Reconnect { .. })
    }
}

/// Error policy for one connection
pub struct ErrorPolicy {
    strategy: Box<dyn ReconnectionStrategy>,
}

impl ErrorPolicy {
    pub fn new(strategy: Box<dyn ReconnectionStrategy>) -> Self {
        Self { strategy }
    }

    /// Exponential backoff with jitter, or no reconnects when disabled
    pub fn from_options(options: &ConnectionOptions) -> Self {
        if !options.reconnect {
            return Self::new(Box::new(NeverReconnect));
        }

        let strategy = ExponentialBackoff::new(
            Duration::from_millis(options.base_backoff_ms),
            Duration::from_millis(options.max_backoff_ms),
            Some(options.max_reconnect_attempts),
        )
        .with_jitter(options.jitter);
        Self::new(Box::new(strategy))
    }

    pub fn classify<H>(&self, handler: &H, error: &WsError, context: &ErrorContext) -> ErrorCategory
    where
        H: ErrorHandler + ?Sized,
    {
        handler.classify(error, context)
    }

    /// Log and decide what to do about an error
    ///
    /// `context.attempt` is the current reconnect attempt counter.
    pub fn handle_error<H>(&self, handler: &H, error: &WsError, context: &ErrorContext) -> ErrorDecision
    where
        H: ErrorHandler + ?Sized,
    {
        log_contained(handler, error, context);

        match self.classify(handler, error, context) {
            ErrorCategory::Critical => ErrorDecision::Stop(error.to_string()),
            ErrorCategory::Normal => ErrorDecision::Continue,
            ErrorCategory::Transient | ErrorCategory::Unknown => match self.strategy.next_delay(context.attempt) {
                Some(delay) => ErrorDecision::Retry(delay),
                None => ErrorDecision::Stop(format!(
                    "reconnect attempts exhausted after {}: {}",
                    context.attempt, error
                )),
            },
        }
    }

    /// Gate consulted after every disconnect, clean remote closes included
    pub fn should_reconnect<H>(&self, handler: &H, error: &WsError, context: &ErrorContext) -> ReconnectDecision
    where
        H: ErrorHandler + ?Sized,
    {
        log_contained(handler, error, context);

        if error.is_auth() || self.classify(handler, error, context) == ErrorCategory::Critical {
            return ReconnectDecision::Abandon {
                reason: error.to_string(),
            };
        }

        if !self.strategy.should_reconnect(context.attempt) {
            return ReconnectDecision::Abandon {
                reason: WsError::ReconnectionFailed {
                    attempts: context.attempt,
                    reason: error.to_string(),
                }
                .to_string(),
            };
        }

        match self.strategy.next_delay(context.attempt) {
            Some(delay) => ReconnectDecision::Reconnect { delay },
            None => ReconnectDecision::Abandon {
                reason: error.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorPolicy").finish_non_exhaustive()
    }
}

/// Run the adapter logger; a panic inside it must not change the decision
fn log_contained<H>(handler: &H, error: &WsError, context: &ErrorContext)
where
    H: ErrorHandler + ?Sized,
{
    if catch_unwind(AssertUnwindSafe(|| handler.log_error(error, context))).is_err() {
        warn!(phase = %context.phase, "Adapter error logger panicked: {}", error);
    }
}
