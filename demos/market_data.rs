//! Streams quotes for one contract from the market data socket.
//!
//! Credentials are read from the environment:
//! `TRADOVATE_NAME`, `TRADOVATE_PASSWORD`, `TRADOVATE_APP_ID`, `TRADOVATE_CID` and
//! `TRADOVATE_SEC`. The symbol defaults to `ESZ6`.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example market_data --features tracing -- ESZ6
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tradovate_client_sdk::auth::{Credentials, TokenManager};
use tradovate_client_sdk::error::Error;
use tradovate_client_sdk::rest::Client;
use tradovate_client_sdk::ws::types::Request;
use tradovate_client_sdk::ws::{Config, Connection, EventHandler, Message};
use tradovate_client_sdk::{DEMO_REST_ENDPOINT, MARKET_DATA_WS_ENDPOINT};

struct Quotes;

impl EventHandler for Quotes {
    fn on_market_data_event(&self, msg: Message) {
        info!(stream = "md", payload = %msg.payload());
    }

    fn on_chart_event(&self, msg: Message) {
        info!(stream = "chart", payload = %msg.payload());
    }

    fn on_error(&self, error: &Error) {
        error!(%error, "market data connection failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let symbol = env::args().nth(1).unwrap_or_else(|| "ESZ6".to_owned());
    let credentials = Credentials::builder()
        .name(env::var("TRADOVATE_NAME")?)
        .password(env::var("TRADOVATE_PASSWORD")?)
        .app_id(env::var("TRADOVATE_APP_ID")?)
        .app_version("1.0")
        .cid(env::var("TRADOVATE_CID")?)
        .sec(env::var("TRADOVATE_SEC")?)
        .build();

    let tokens = TokenManager::builder()
        .source(Client::new(DEMO_REST_ENDPOINT)?)
        .credentials(credentials)
        .build();

    let connection = Connection::connect(
        MARKET_DATA_WS_ENDPOINT,
        Config::builder().market_data(true).build(),
        Arc::new(tokens),
        Arc::new(Quotes),
    )
    .await?;
    info!(state = ?connection.state(), "connected");

    let subscribe = Request::new("md/subscribequote").json(&json!({ "symbol": symbol }))?;
    match connection.send(subscribe).await {
        Ok(reply) => info!(%symbol, reply = %reply.payload(), "subscribed"),
        Err(e) => warn!(%symbol, error = %e, "subscription failed"),
    }

    if timeout(Duration::from_secs(30), connection.closed())
        .await
        .is_err()
    {
        let unsubscribe =
            Request::new("md/unsubscribequote").json(&json!({ "symbol": symbol }))?;
        if let Err(e) = connection.send(unsubscribe).await {
            warn!(%symbol, error = %e, "unsubscribe failed");
        }
        connection.close().await;
    }

    info!(reason = ?connection.close_reason(), "done");

    Ok(())
}
