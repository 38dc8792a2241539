//! Socket client.
//!
//! # Architecture
//!
//! - [`frame`]: decodes the one-byte-prefixed frames read off the socket
//! - [`fanout`]: correlates replies with the requests waiting on them
//! - [`Connection`]: authorizes the session, runs the read loop, answers heartbeats and
//!   dispatches push events to an [`EventHandler`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tradovate_client_sdk::auth::{Credentials, TokenManager};
//! use tradovate_client_sdk::rest::Client;
//! use tradovate_client_sdk::ws::{Config, Connection, EventHandler, Message, types::Request};
//!
//! struct Printer;
//!
//! impl EventHandler for Printer {
//!     fn on_market_data_event(&self, msg: Message) {
//!         println!("{}", msg.payload());
//!     }
//! }
//!
//! # async fn example(credentials: Credentials) -> tradovate_client_sdk::Result<()> {
//! let tokens = TokenManager::builder()
//!     .source(Client::demo())
//!     .credentials(credentials)
//!     .build();
//!
//! let connection = Connection::connect(
//!     tradovate_client_sdk::MARKET_DATA_WS_ENDPOINT,
//!     Config::default(),
//!     Arc::new(tokens),
//!     Arc::new(Printer),
//! )
//! .await?;
//!
//! connection
//!     .send(Request::new("md/subscribequote").json(&serde_json::json!({ "symbol": "ESZ6" }))?)
//!     .await?;
//! connection.closed().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod traits;
pub mod types;

pub use config::Config;
pub use connection::{Connection, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use frame::{EventKind, Frame, Message, parse};
pub use traits::*;
