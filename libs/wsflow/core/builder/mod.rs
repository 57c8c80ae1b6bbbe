pub mod states;

use crate::adapter::Adapter;
use crate::auth::Credentials;
use crate::client::{Connection, Shared};
use crate::config::ConnectionOptions;
use crate::error::Result;
use crate::error_policy::ErrorPolicy;
use crate::orchestrator::Orchestrator;
use crate::reconnect::ReconnectionStrategy;
use crate::registry::ConnectionRegistry;
use crate::transport::Transport;
use crate::tungstenite::TungsteniteTransport;
use states::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Type-state builder for [`Connection`]
///
/// The adapter is required; everything else has a default: options from
/// `ConnectionOptions::default()`, the tungstenite transport, exponential
/// backoff derived from the options, and no registry.
pub struct ConnectionBuilder<S: AdapterState> {
    _state: TypeState<S>,
    adapter: S::Adapter,
    name: Option<String>,
    options: ConnectionOptions,
    transport: Option<Arc<dyn Transport>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    registry: Option<ConnectionRegistry>,
}

impl ConnectionBuilder<NoAdapter> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            adapter: (),
            name: None,
            options: ConnectionOptions::default(),
            transport: None,
            reconnect_strategy: None,
            registry: None,
        }
    }

    /// Set the platform adapter
    pub fn adapter<A: Adapter>(self, adapter: A) -> ConnectionBuilder<HasAdapter<A>> {
        ConnectionBuilder {
            _state: TypeState::new(),
            adapter,
            name: self.name,
            options: self.options,
            transport: self.transport,
            reconnect_strategy: self.reconnect_strategy,
            registry: self.registry,
        }
    }
}

impl Default for ConnectionBuilder<NoAdapter> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AdapterState> ConnectionBuilder<S> {
    /// Name used in logs and as the registry key
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.options.credentials = Some(credentials);
        self
    }

    /// Replace the socket layer, e.g. with an in-memory transport in tests
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Override the backoff derived from the options
    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Register the connection; it is deregistered when its task exits
    pub fn registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl<A: Adapter> ConnectionBuilder<HasAdapter<A>> {
    /// Spawn the connection task without connecting
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<Connection> {
        self.options.validate()?;

        let name = self
            .name
            .unwrap_or_else(|| format!("connection-{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed)));
        let name: Arc<str> = Arc::from(name);

        let adapter = Arc::new(self.adapter);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TungsteniteTransport::new()));
        let policy = match self.reconnect_strategy {
            Some(strategy) => ErrorPolicy::new(strategy),
            None => ErrorPolicy::from_options(&self.options),
        };

        let shared = Arc::new(Shared::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let connection = Connection::new(Arc::clone(&name), command_tx, Arc::clone(&shared), event_rx);

        let registration = match &self.registry {
            Some(registry) => Some(registry.register(&name, connection.clone())?),
            None => None,
        };

        let orchestrator = Orchestrator::new(
            Arc::clone(&name),
            adapter,
            transport,
            self.options,
            policy,
            shared,
            event_tx,
            command_rx,
        )
        .with_registration(registration);

        info!(connection = %name, "Spawning connection task");
        connection.attach_task(tokio::spawn(orchestrator.run()));
        Ok(connection)
    }

    /// Spawn the connection task and wait until it is ready
    pub async fn connect(self) -> Result<Connection> {
        let connection = self.spawn()?;
        connection.connect().await?;
        Ok(connection)
    }
}

impl Connection {
    /// Start building a connection
    pub fn builder() -> ConnectionBuilder<NoAdapter> {
        ConnectionBuilder::new()
    }
}
