#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;

use super::config::{Config, RetryConfig};
use super::error::WsError;
use super::fanout::{Delivery, Fanout};
use super::frame::{EventKind, Frame, HEARTBEAT_REPLY, Message, parse};
use super::traits::EventHandler;
use super::types::Request;
use super::types::request::AUTHORIZE;
use crate::auth::{Token, TokenManager, TokenSource};
use crate::error::{Error, Kind};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<WsStream, WsMessage>;
type Source = SplitStream<WsStream>;

/// Close code sent when the heartbeat could not be answered.
const PING_TIMEOUT_CLOSE_CODE: u16 = 3008;
/// Close frame reasons are limited to 123 bytes on the wire.
const MAX_CLOSE_REASON: usize = 123;

/// Connection lifecycle, observable through [`Connection::state_receiver`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing and waiting for the server's opening frame
    Connecting,
    /// The opening frame arrived; authorizing
    Open,
    /// Authorized and serving requests
    Running {
        /// When authorization was sent
        since: Instant,
    },
    /// Tearing down
    Closing,
    /// Torn down; every request fails with a closed-connection error
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// One authorized socket session multiplexing concurrent requests.
///
/// A single background task reads frames: replies are routed to their callers by correlation
/// id, heartbeats are answered, and push events are dispatched to the [`EventHandler`] on
/// independent tasks. Any protocol or decode error is fatal: the connection is closed, every
/// outstanding request fails, and the handler's [`EventHandler::on_error`] is told once.
///
/// Handles are cheap to clone. Dropping the last handle closes the connection.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use serde::Deserialize;
/// use tradovate_client_sdk::auth::{Credentials, TokenManager};
/// use tradovate_client_sdk::rest::Client;
/// use tradovate_client_sdk::ws::{Config, Connection, NoopHandler, types::Request};
///
/// #[derive(Deserialize)]
/// struct Contract {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example(credentials: Credentials) -> tradovate_client_sdk::Result<()> {
/// let tokens = TokenManager::builder()
///     .source(Client::demo())
///     .credentials(credentials)
///     .build();
///
/// let connection = Connection::connect(
///     tradovate_client_sdk::DEMO_WS_ENDPOINT,
///     Config::default(),
///     Arc::new(tokens),
///     Arc::new(NoopHandler),
/// )
/// .await?;
///
/// let contract: Contract = connection
///     .request(Request::new("contract/find").query(&[("name", "CLZ6")])?)
///     .await?;
/// println!("{} {}", contract.id, contract.name);
/// # Ok(())
/// # }
/// ```
pub struct Connection<S: TokenSource> {
    inner: Arc<Inner<S>>,
    guard: Arc<DropGuard>,
}

impl<S: TokenSource> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<S: TokenSource> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("pending", &self.inner.fanout.len())
            .finish_non_exhaustive()
    }
}

struct Inner<S: TokenSource> {
    endpoint: String,
    config: Config,
    tokens: Arc<TokenManager<S>>,
    handler: Arc<dyn EventHandler>,
    fanout: Fanout,
    sink: Mutex<Sink>,
    /// Cancelled exactly once, when the connection starts tearing down
    shutdown: CancellationToken,
    /// Set by whoever tears the connection down first
    close_reason: OnceLock<String>,
    state_tx: watch::Sender<ConnectionState>,
    tasks: TaskTracker,
}

impl<S: TokenSource> Connection<S> {
    /// Dials `endpoint`, waits for the opening frame, then authorizes with a token from
    /// `tokens`.
    ///
    /// Returns once the `authorize` request is written; its reply is checked in the
    /// background and a rejection closes the connection and is reported to
    /// [`EventHandler::on_error`].
    ///
    /// # Errors
    ///
    /// - [`Kind::WebSocket`] if the dial fails or the first frame is not an open frame
    /// - [`Kind::Timeout`] if no frame arrives within the handshake timeout
    /// - [`Kind::Auth`] if no token could be obtained
    pub async fn connect(
        endpoint: &str,
        config: Config,
        tokens: Arc<TokenManager<S>>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint, "connecting");

        let (stream, _) = timeout(config.handshake_timeout, connect_async(endpoint))
            .await
            .map_err(|_elapsed| WsError::Timeout)??;
        let (sink, mut source) = stream.split();

        let first = timeout(config.handshake_timeout, next_frame(&mut source))
            .await
            .map_err(|_elapsed| WsError::Timeout)??;
        if !matches!(first, Frame::Open) {
            return Err(WsError::ProtocolViolation(format!(
                "expected an open frame, received {first:?}"
            ))
            .into());
        }
        state_tx.send_replace(ConnectionState::Open);

        let token = token_with_retry(&tokens, &config.handshake_retry).await?;

        let inner = Arc::new(Inner::new(endpoint, config, tokens, handler, sink, state_tx));
        // Armed before the read loop starts, so dropping this future tears it down
        let guard = Arc::new(inner.shutdown.clone().drop_guard());

        inner.tasks.spawn(read_loop(Arc::clone(&inner), source));

        if let Err(e) = inner.authorize(&token).await {
            inner
                .close_with(CloseCode::Error, "authorization failed".to_owned())
                .await;
            return Err(e);
        }

        inner.state_tx.send_if_modified(|state| {
            let open = matches!(state, ConnectionState::Open);
            if open {
                *state = ConnectionState::Running {
                    since: Instant::now(),
                };
            }
            open
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint, "connection authorized");

        Ok(Self { inner, guard })
    }

    /// Sends `request` and waits for its reply, bounded by the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`Kind::Status`] with an [`crate::error::SocketStatus`] when the reply's status is
    ///   outside `200..400`
    /// - [`Kind::Timeout`] when no reply arrives in time
    /// - [`Kind::WebSocket`] when the connection is or becomes closed
    pub async fn send(&self, request: Request) -> Result<Message> {
        self.send_with_timeout(request, self.inner.config.request_timeout)
            .await
    }

    /// Like [`Connection::send`], with a per-request timeout.
    pub async fn send_with_timeout(&self, request: Request, timeout: Duration) -> Result<Message> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(inner.closed_error().into());
        }

        let pending = inner.fanout.register_with_timeout(timeout);
        let id = pending.id();

        if let Err(e) = inner.write(request.encode(id)).await {
            inner.fanout.cancel(id);
            return Err(e.into());
        }

        match pending.wait(&inner.shutdown).await {
            Delivery::Delivered(msg) if msg.is_success() => Ok(msg),
            Delivery::Delivered(msg) => Err(Error::socket_status(
                msg.status,
                request.path().to_owned(),
                msg.error_text(),
            )),
            Delivery::TimedOut => {
                inner.fanout.cancel(id);

                #[cfg(feature = "tracing")]
                tracing::debug!(id, path = request.path(), "request timed out");

                Err(WsError::Timeout.into())
            }
            Delivery::ConnectionLost => Err(inner.closed_error().into()),
        }
    }

    /// Sends `request` and decodes the reply payload into `T`.
    pub async fn request<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        self.send(request).await?.decode()
    }

    /// Closes the connection with a normal closure. Outstanding requests fail with a
    /// closed-connection error. Closing an already closed connection does nothing.
    pub async fn close(&self) {
        self.inner
            .close_with(CloseCode::Normal, "closed by client".to_owned())
            .await;
    }

    /// Resolves once the connection is torn down, for whatever reason, and every background
    /// task it spawned has finished.
    ///
    /// Awaiting this from inside an [`EventHandler`] callback never resolves.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
        self.inner.tasks.wait().await;
    }

    /// Why the connection was torn down, once it has been.
    #[must_use]
    pub fn close_reason(&self) -> Option<&str> {
        self.inner.close_reason.get().map(String::as_str)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The token manager this connection authorizes with.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenManager<S>> {
        &self.inner.tokens
    }
}

impl<S: TokenSource> Inner<S> {
    fn new(
        endpoint: &str,
        config: Config,
        tokens: Arc<TokenManager<S>>,
        handler: Arc<dyn EventHandler>,
        sink: Sink,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            fanout: Fanout::new(config.request_timeout),
            config,
            tokens,
            handler,
            sink: Mutex::new(sink),
            shutdown: CancellationToken::new(),
            close_reason: OnceLock::new(),
            state_tx,
            tasks: TaskTracker::new(),
        }
    }

    async fn write(&self, payload: String) -> std::result::Result<(), WsError> {
        #[cfg(feature = "tracing")]
        tracing::trace!(bytes = payload.len(), "writing frame");

        self.sink
            .lock()
            .await
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(WsError::Connection)
    }

    /// Writes `authorize` without waiting for the reply; a background task watches for it.
    async fn authorize(self: &Arc<Self>, token: &Token) -> Result<()> {
        let bearer = match &token.md_access_token {
            Some(md) if self.config.market_data => md,
            _ => &token.access_token,
        };
        let pending = self.fanout.register();
        let request = Request::new(AUTHORIZE).raw_body(bearer.as_str());

        self.write(request.encode(pending.id())).await?;

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            match pending.wait(&inner.shutdown).await {
                Delivery::Delivered(msg) if msg.is_success() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("authorization accepted");
                }
                Delivery::Delivered(msg) => {
                    inner
                        .fail(Error::auth_rejected(format!(
                            "authorization rejected with status {}: {}",
                            msg.status,
                            msg.error_text()
                        )))
                        .await;
                }
                Delivery::TimedOut => {
                    // Reported; the connection stays up
                    let error = Error::auth_rejected(format!(
                        "no reply to authorization within {:?}",
                        inner.config.request_timeout
                    ));

                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %error, "authorization unconfirmed");

                    inner.handler.on_error(&error);
                }
                Delivery::ConnectionLost => {}
            }
        });

        Ok(())
    }

    async fn reauthorize(self: Arc<Self>) {
        #[cfg(feature = "tracing")]
        tracing::debug!("open frame received mid-session, authorizing again");

        let result = match self.tokens.token().await {
            Ok(token) => self.authorize(&token).await,
            Err(e) => Err(auth_error(e)),
        };

        if let Err(e) = result {
            self.fail(e).await;
        }
    }

    async fn heartbeat(self: Arc<Self>) {
        let attempts = self.config.ping_attempts();
        let result =
            ping_with_retries(attempts, || self.write(HEARTBEAT_REPLY.to_owned())).await;

        // Writes fail on teardown too; only a live connection is failed here
        if let Err(e) = result
            && !self.shutdown.is_cancelled()
        {
            self.fail(e.into()).await;
        }
    }

    /// Handles one decoded frame. An error is fatal to the connection.
    fn on_frame(self: &Arc<Self>, frame: Frame) -> std::result::Result<(), WsError> {
        match frame {
            Frame::Open => {
                self.tasks.spawn(Arc::clone(self).reauthorize());
            }
            Frame::Heartbeat => {
                self.tasks.spawn(Arc::clone(self).heartbeat());
            }
            Frame::Close => return Err(WsError::closed("peer closed")),
            Frame::Data(messages) => {
                for msg in messages {
                    self.on_message(msg)?;
                }
            }
        }

        Ok(())
    }

    fn on_message(&self, msg: Message) -> std::result::Result<(), WsError> {
        let dispatch: fn(&dyn EventHandler, Message) = match msg.event {
            EventKind::Unsolicited => {
                self.fanout.publish(msg);
                return Ok(());
            }
            EventKind::Shutdown => {
                let reason = msg.shutdown_notice().map_or_else(
                    |_e| "shutdown received".to_owned(),
                    |notice| notice.to_string(),
                );
                return Err(WsError::closed(reason));
            }
            EventKind::Props => |h, m| h.on_entity_event(m),
            EventKind::Chart => |h, m| h.on_chart_event(m),
            EventKind::MarketData => |h, m| h.on_market_data_event(m),
            EventKind::Clock => |h, m| h.on_clock_event(m),
        };

        let handler = Arc::clone(&self.handler);
        self.tasks.spawn(async move { dispatch(handler.as_ref(), msg) });

        Ok(())
    }

    /// Tears the connection down because of `error`, reporting it unless already closed.
    async fn fail(&self, error: Error) {
        let (code, reason) = close_frame(&error);

        if self.close_with(code, reason).await {
            #[cfg(feature = "tracing")]
            tracing::error!(endpoint = %self.endpoint, error = %error, "connection failed");

            self.handler.on_error(&error);
        }
    }

    /// First caller wins and returns `true`; later calls are no-ops.
    async fn close_with(&self, code: CloseCode, mut reason: String) -> bool {
        if self.close_reason.set(reason.clone()).is_err() {
            return false;
        }

        self.state_tx.send_replace(ConnectionState::Closing);
        self.shutdown.cancel();
        self.fanout.drain();

        if reason.len() > MAX_CLOSE_REASON {
            let cut = (0..=MAX_CLOSE_REASON)
                .rev()
                .find(|&i| reason.is_char_boundary(i))
                .unwrap_or(0);
            reason.truncate(cut);
        }

        let mut sink = self.sink.lock().await;
        // The peer may be gone already
        _ = sink
            .send(WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
        _ = sink.close().await;
        drop(sink);

        self.tasks.close();
        self.state_tx.send_replace(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "connection closed");

        true
    }

    fn closed_error(&self) -> WsError {
        WsError::closed(
            self.close_reason
                .get()
                .map_or("connection closed", String::as_str),
        )
    }
}

/// The close code and reason sent to the peer when `error` tears the connection down.
fn close_frame(error: &Error) -> (CloseCode, String) {
    match error.downcast_ref::<WsError>() {
        Some(WsError::PingExhausted { .. }) => {
            (CloseCode::from(PING_TIMEOUT_CLOSE_CODE), error.to_string())
        }
        Some(WsError::ConnectionClosed { reason }) => (CloseCode::Normal, reason.clone()),
        _ => (CloseCode::Error, error.to_string()),
    }
}

async fn read_loop<S: TokenSource>(inner: Arc<Inner<S>>, mut source: Source) {
    loop {
        let next = tokio::select! {
            biased;

            () = inner.shutdown.cancelled() => break,
            next = next_frame(&mut source) => next,
        };

        if let Err(e) = next.and_then(|frame| inner.on_frame(frame)) {
            inner.fail(e.into()).await;
            break;
        }
    }

    // Reached directly when the last handle is dropped
    inner
        .close_with(CloseCode::Normal, "client dropped".to_owned())
        .await;
}

/// Reads until the next text or binary message and decodes it.
async fn next_frame(source: &mut Source) -> std::result::Result<Frame, WsError> {
    loop {
        return match source.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(frame = %text.as_str(), "received frame");

                parse(text.as_bytes())
            }
            Some(Ok(WsMessage::Binary(bytes))) => parse(&bytes),
            Some(Ok(WsMessage::Close(_))) => Err(WsError::closed("peer closed")),
            // Transport-level ping and pong are answered by tungstenite
            Some(Ok(_)) => continue,
            Some(Err(e)) => Err(WsError::Connection(e)),
            None => Err(WsError::closed("stream ended")),
        };
    }
}

/// Attempts `write` up to `attempts` times, stopping at the first success.
async fn ping_with_retries<F, Fut>(attempts: u8, mut write: F) -> std::result::Result<(), WsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), WsError>>,
{
    for attempt in 1..=attempts {
        match write().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempt, attempts, error = %e, "heartbeat reply failed");
                #[cfg(not(feature = "tracing"))]
                let _ = (&e, attempt);
            }
        }
    }

    Err(WsError::PingExhausted { attempts })
}

/// Fetches a token, retrying transient failures with backoff. Rejections are not retried.
async fn token_with_retry<S: TokenSource>(
    tokens: &TokenManager<S>,
    retry: &RetryConfig,
) -> Result<Arc<Token>> {
    let mut backoff: ExponentialBackoff = retry.clone().into();
    let mut attempt = 1_u32;

    loop {
        let e = match tokens.token().await {
            Ok(token) => return Ok(token),
            Err(e) => e,
        };

        if e.kind() == Kind::Auth || attempt >= retry.max_attempts {
            return Err(auth_error(e));
        }

        let Some(delay) = backoff.next_backoff() else {
            return Err(auth_error(e));
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(attempt, error = %e, ?delay, "token fetch failed, retrying");

        attempt += 1;
        sleep(delay).await;
    }
}

fn auth_error(e: Error) -> Error {
    if e.kind() == Kind::Auth { e } else { Error::auth(e) }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use futures::{SinkExt as _, StreamExt as _};
    use tokio::net::TcpListener;

    use super::*;
    use crate::auth::Credentials;

    #[tokio::test]
    async fn ping_exhausts_after_configured_attempts() {
        let calls = AtomicUsize::new(0);

        let result = ping_with_retries(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WsError::closed("broken pipe")) }
        })
        .await;

        assert!(matches!(result, Err(WsError::PingExhausted { attempts: 5 })));
        assert_eq!(calls.load(Ordering::SeqCst), 5, "one write per attempt");
    }

    #[tokio::test]
    async fn ping_succeeds_on_last_attempt() {
        let calls = AtomicUsize::new(0);

        let result = ping_with_retries(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 4 {
                    Err(WsError::closed("broken pipe"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok(), "fifth attempt succeeds");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn ping_stops_at_first_success() {
        let calls = AtomicUsize::new(0);

        ping_with_retries(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct ErrorLog(parking_lot::Mutex<Vec<String>>);

    impl EventHandler for ErrorLog {
        fn on_error(&self, error: &Error) {
            self.0.lock().push(format!("{:?}|{error}", error.kind()));
        }
    }

    /// An `Inner` over a loopback socket, plus the server end so it stays open.
    async fn loopback(
        handler: Arc<ErrorLog>,
    ) -> (
        Arc<Inner<FlakySource>>,
        Source,
        WebSocketStream<TcpStream>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });

        let (client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let server = server.await.unwrap();
        let (sink, source) = client.split();
        let (state_tx, _) = watch::channel(ConnectionState::Running {
            since: Instant::now(),
        });

        let inner = Inner::new(
            "ws://loopback",
            Config::default(),
            Arc::new(tokens(0, false)),
            handler,
            sink,
            state_tx,
        );

        (Arc::new(inner), source, server)
    }

    #[tokio::test]
    async fn heartbeat_exhaustion_fails_connection_once() {
        let log = Arc::new(ErrorLog::default());
        let (inner, _source, _server) = loopback(Arc::clone(&log)).await;
        let pending = inner.fanout.register();

        // Every later write fails while the connection itself is still live
        inner.sink.lock().await.close().await.unwrap();

        Arc::clone(&inner).heartbeat().await;
        Arc::clone(&inner).heartbeat().await;

        assert_eq!(
            *log.0.lock(),
            vec!["Timeout|Timeout: failed to ping after 5 attempts".to_owned()]
        );
        assert_eq!(
            inner.close_reason.get().map(String::as_str),
            Some("Timeout: failed to ping after 5 attempts")
        );
        assert_eq!(*inner.state_tx.borrow(), ConnectionState::Closed);

        assert!(matches!(
            pending.wait(&inner.shutdown).await,
            Delivery::ConnectionLost
        ));
        assert!(inner.fanout.is_empty());
        assert!(matches!(
            inner.closed_error(),
            WsError::ConnectionClosed { reason } if reason.contains("failed to ping")
        ));
    }

    #[tokio::test]
    async fn heartbeat_after_close_reports_nothing() {
        let log = Arc::new(ErrorLog::default());
        let (inner, _source, _server) = loopback(Arc::clone(&log)).await;

        assert!(
            inner
                .close_with(CloseCode::Normal, "closed by client".to_owned())
                .await
        );
        Arc::clone(&inner).heartbeat().await;

        assert!(log.0.lock().is_empty(), "got {:?}", log.0.lock());
        assert_eq!(
            inner.close_reason.get().map(String::as_str),
            Some("closed by client")
        );
    }

    #[test]
    fn close_frame_follows_error() {
        let (code, reason) = close_frame(&WsError::PingExhausted { attempts: 5 }.into());
        assert_eq!(u16::from(code), 3008);
        assert_eq!(reason, "Timeout: failed to ping after 5 attempts");

        let (code, reason) = close_frame(&WsError::closed("peer closed").into());
        assert_eq!(code, CloseCode::Normal);
        assert_eq!(reason, "peer closed");

        let (code, _) = close_frame(&WsError::EmptyFrame.into());
        assert_eq!(code, CloseCode::Error);
    }

    struct FlakySource {
        failures: usize,
        calls: AtomicUsize,
        rejected: bool,
    }

    #[async_trait]
    impl TokenSource for FlakySource {
        async fn fetch_token(&self, _credentials: &Credentials) -> Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rejected {
                return Err(Error::auth_rejected("Incorrect username or password"));
            }
            if n < self.failures {
                return Err(Error::validation("upstream unavailable"));
            }
            Ok(Token::new("fresh", Utc::now() + TimeDelta::hours(2)))
        }

        async fn renew_token(&self, _current: &Token) -> Result<Token> {
            unreachable!("no token is ever stale here")
        }
    }

    fn tokens(failures: usize, rejected: bool) -> TokenManager<FlakySource> {
        TokenManager::builder()
            .source(FlakySource {
                failures,
                calls: AtomicUsize::new(0),
                rejected,
            })
            .credentials(
                Credentials::builder()
                    .name("trader")
                    .password("pw")
                    .app_id("app")
                    .app_version("1.0")
                    .cid("1")
                    .sec("secret")
                    .build(),
            )
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn transient_token_failures_are_retried() {
        let tokens = tokens(2, false);

        let token = token_with_retry(&tokens, &RetryConfig::default())
            .await
            .unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(tokens.source().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let tokens = tokens(10, false);

        let err = token_with_retry(&tokens, &RetryConfig::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Kind::Auth);
        assert_eq!(tokens.source().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_are_not_retried() {
        let tokens = tokens(0, true);

        let err = token_with_retry(&tokens, &RetryConfig::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Kind::Auth);
        assert_eq!(tokens.source().calls.load(Ordering::SeqCst), 1);
    }
}
