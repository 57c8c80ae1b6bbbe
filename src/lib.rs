//! wsflow suite
//!
//! Re-exports the workspace libraries and carries the pieces every binary
//! needs: tracing setup and config file resolution.
//!
//! ```rust,ignore
//! use wsflow_suite::{cli, logging, wsflow::ConnectionOptions};
//!
//! logging::init_tracing();
//! let options = ConnectionOptions::load(cli::config_path())?;
//! ```

pub use deribit;
pub use wsflow;

pub mod logging {
    //! Logging initialization

    use tracing_subscriber::EnvFilter;

    /// Default filter when `RUST_LOG` is unset
    pub const DEFAULT_FILTER: &str = "info";

    /// Initialize tracing with standard configuration
    ///
    /// Honours `RUST_LOG`; safe to call more than once.
    pub fn init_tracing() {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .try_init();
    }
}

pub mod cli {
    //! Config file resolution for binaries

    use std::path::PathBuf;

    pub const CONFIG_PATH_VAR: &str = "WSFLOW_CONFIG_PATH";
    pub const DEFAULT_CONFIG_PATH: &str = "config/wsflow.yaml";

    /// Path from `WSFLOW_CONFIG_PATH`, or the default
    pub fn config_path() -> PathBuf {
        resolve_config_path(std::env::var(CONFIG_PATH_VAR).ok())
    }

    /// Empty overrides fall back to the default
    pub fn resolve_config_path(override_path: Option<String>) -> PathBuf {
        override_path
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
            .into()
    }

    /// Command line arguments without the program name
    pub fn parse_args() -> Vec<String> {
        std::env::args().skip(1).collect()
    }
}
