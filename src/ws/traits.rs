//! Callbacks supplied by the embedding application.

use crate::error::Error;
use crate::ws::frame::Message;

/// Receives server-pushed events and connection errors.
///
/// Every push event is handed to its callback exactly once, on its own task, so a slow handler
/// never stalls the read loop or other handlers. Invocations may therefore overlap and complete
/// out of order. All methods default to doing nothing.
///
/// # Example
///
/// ```
/// use tradovate_client_sdk::error::Error;
/// use tradovate_client_sdk::ws::{EventHandler, Message};
///
/// struct Orders;
///
/// impl EventHandler for Orders {
///     fn on_entity_event(&self, msg: Message) {
///         if let Ok(event) = msg.entity_event() {
///             println!("{} {}", event.event_type, event.entity_type);
///         }
///     }
///
///     fn on_error(&self, error: &Error) {
///         eprintln!("connection failed: {error}");
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync + 'static {
    /// A `props` event: an entity was created, updated or deleted.
    fn on_entity_event(&self, _msg: Message) {}

    /// A `chart` event.
    fn on_chart_event(&self, _msg: Message) {}

    /// An `md` event: quotes, DOMs or histograms.
    fn on_market_data_event(&self, _msg: Message) {}

    /// A `clock` event, only emitted by market replay sessions.
    fn on_clock_event(&self, _msg: Message) {}

    /// Called once with the error that tore the connection down, and for failures that do not
    /// belong to any single request.
    fn on_error(&self, _error: &Error) {}
}

/// Handler that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}
