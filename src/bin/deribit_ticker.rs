//! Stream Deribit tickers until Ctrl+C
//!
//! Usage: `deribit_ticker [INSTRUMENT...]` (default BTC-PERPETUAL)
//!
//! Connection options come from `WSFLOW_CONFIG_PATH` when the file exists.
//! With `DERIBIT_CLIENT_ID` / `DERIBIT_CLIENT_SECRET` set the connection
//! authenticates; otherwise only public channels work.

use anyhow::Result;
use deribit::{DeribitAdapter, DeribitConfig};
use serde_json::json;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use wsflow::{ClientEvent, Connection, ConnectionOptions};
use wsflow_suite::{cli, logging};

fn load_options() -> Result<ConnectionOptions> {
    let path = cli::config_path();
    if path.exists() {
        Ok(ConnectionOptions::load(&path)?)
    } else {
        warn!("{} not found, using Deribit defaults", path.display());
        Ok(deribit::default_options())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    let mut instruments = cli::parse_args();
    if instruments.is_empty() {
        instruments.push("BTC-PERPETUAL".to_string());
    }

    let options = load_options()?;
    let (adapter, options) = match DeribitConfig::from_env() {
        Ok(config) => (config.adapter(), options.with_credentials(config.credentials())),
        Err(e) => {
            info!("Running unauthenticated: {}", e);
            (DeribitAdapter::testnet(), options)
        }
    };

    let connection = Connection::builder()
        .name("deribit-ticker")
        .adapter(adapter)
        .options(options)
        .connect()
        .await?;

    for instrument in &instruments {
        let channel = format!("ticker.{}.100ms", instrument);
        let id = connection.subscribe(channel.clone(), json!({})).await?;
        info!("Subscribed to {} as {}", channel, id);
    }

    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = poll.tick() => {
                while let Some(event) = connection.try_recv_event() {
                    match event {
                        ClientEvent::Message(frame) => {
                            if let Some(data) = frame.json().and_then(|v| v["params"]["data"].as_object().cloned()) {
                                info!(
                                    instrument = ?data.get("instrument_name"),
                                    mark = ?data.get("mark_price"),
                                    "ticker"
                                );
                            }
                        }
                        ClientEvent::Stopped(reason) => {
                            error!("Connection stopped: {}", reason);
                            return Ok(());
                        }
                        other => info!("{:?}", other),
                    }
                }
            }
        }
    }

    let status = connection.status();
    info!(
        sent = status.messages_sent,
        received = status.messages_received,
        reconnects = status.reconnect_count,
        "Closing connection"
    );
    connection.close().await?;
    Ok(())
}
