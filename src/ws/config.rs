#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PING_RETRIES: u8 = 5;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_millis(250);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for socket connection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// How long a request waits for its reply before failing with a timeout
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,
    /// How many writes are attempted when answering a heartbeat before the connection is
    /// considered dead. Values below one are treated as one.
    #[builder(default = DEFAULT_PING_RETRIES)]
    pub ping_retries: u8,
    /// Maximum time to wait for the server's opening frame after dialing
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT)]
    pub handshake_timeout: Duration,
    /// Retry policy for fetching the access token during the opening handshake
    #[builder(default)]
    pub handshake_retry: RetryConfig,
    /// Authorize with the token's market data token, when the server issued one. Set this for
    /// the market data endpoint.
    #[builder(default)]
    pub market_data: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    pub(crate) fn ping_attempts(&self) -> u8 {
        self.ping_retries.max(1)
    }
}

/// Bounded exponential backoff applied to the handshake token fetch.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration after the first failure
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            ..Self::default()
        }
    }
}

impl From<RetryConfig> for ExponentialBackoff {
    fn from(config: RetryConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
