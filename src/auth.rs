//! Credentials and access-token lifecycle.
//!
//! A [`TokenManager`] owns the current [`Token`] and decides, on every call to
//! [`TokenManager::token`], whether it can be handed out as-is, must be renewed, or must be
//! replaced by a full credential exchange through a [`TokenSource`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::{Builder, bon};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
/// UUID type used for device identifiers.
pub use uuid::Uuid;

use crate::Result;

/// Tokens this close to expiry are never handed out, even when no refresh window is configured.
const EXPIRY_MARGIN: Duration = Duration::from_millis(20);
const DEFAULT_FORCE_REFRESH_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Login credentials exchanged for an access token.
#[non_exhaustive]
#[derive(Clone, Debug, Builder, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
    #[builder(into)]
    pub app_id: String,
    #[builder(into)]
    pub app_version: String,
    #[builder(into)]
    pub cid: String,
    #[builder(default = Uuid::new_v4())]
    pub device_id: Uuid,
    #[builder(into)]
    #[serde(serialize_with = "expose")]
    pub sec: SecretString,
}

fn expose<S: Serializer>(
    secret: &SecretString,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// A bearer token and its expiry. Tokens live for roughly 90 minutes.
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub access_token: String,
    /// Separate token for the market data socket, when the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md_access_token: Option<String>,
    pub expiration_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub has_live: bool,
}

impl Token {
    #[must_use]
    pub fn new<S: Into<String>>(access_token: S, expiration_time: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            md_access_token: None,
            expiration_time,
            password_expiration_time: None,
            user_status: None,
            user_id: None,
            name: None,
            has_live: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiration_time
    }

    /// Whether the token expires before `window` has elapsed from now.
    #[must_use]
    pub fn expires_within(&self, window: Duration) -> bool {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_add_signed(window)
            .is_none_or(|deadline| deadline >= self.expiration_time)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field(
                "md_access_token",
                &self.md_access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiration_time", &self.expiration_time)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The credential exchange behind a [`TokenManager`].
///
/// [`crate::rest::Client`] implements this against the REST API; tests substitute their own.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Exchanges credentials for a brand new token.
    async fn fetch_token(&self, credentials: &Credentials) -> Result<Token>;

    /// Extends the lifetime of a token that has not expired yet.
    async fn renew_token(&self, current: &Token) -> Result<Token>;
}

/// Hands out a valid access token, renewing or re-fetching it as it ages.
///
/// Reads are lock-free with respect to other readers. At most one caller performs a renewal or
/// fetch at a time; callers queued behind it observe its result instead of issuing their own.
pub struct TokenManager<S> {
    source: S,
    credentials: Credentials,
    force_refresh_window: Duration,
    token: RwLock<Option<Arc<Token>>>,
    refresh: tokio::sync::Mutex<()>,
}

#[bon]
impl<S: TokenSource> TokenManager<S> {
    /// Creates a manager. Passing `token` seeds a persisted token and skips the first exchange.
    #[builder]
    pub fn new(
        source: S,
        credentials: Credentials,
        #[builder(default = DEFAULT_FORCE_REFRESH_WINDOW)] force_refresh_window: Duration,
        token: Option<Token>,
    ) -> Self {
        Self {
            source,
            credentials,
            force_refresh_window,
            token: RwLock::new(token.map(Arc::new)),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns a token that is good for at least the force-refresh window.
    ///
    /// 1. No token, or one about to expire: perform a full credential exchange.
    /// 2. A token expiring within the force-refresh window: renew it.
    /// 3. Otherwise: return the current token without any network call.
    ///
    /// Errors from the [`TokenSource`] are returned unchanged and leave the stored token as is.
    pub async fn token(&self) -> Result<Arc<Token>> {
        if let Some(token) = self.usable() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        // A caller ahead of us may have refreshed already
        if let Some(token) = self.usable() {
            return Ok(token);
        }

        let next = match self.current() {
            Some(current) if !current.expires_within(EXPIRY_MARGIN) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(expires = %current.expiration_time, "renewing access token");

                self.source.renew_token(&current).await?
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::debug!("fetching new access token");

                self.source.fetch_token(&self.credentials).await?
            }
        };

        let next = Arc::new(next);
        *self.token.write() = Some(Arc::clone(&next));
        Ok(next)
    }

    /// Replaces the stored token, e.g. with one persisted from an earlier session.
    pub fn set_token(&self, token: Token) {
        *self.token.write() = Some(Arc::new(token));
    }

    /// The stored token, whatever its age.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Token>> {
        self.token.read().clone()
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    fn usable(&self) -> Option<Arc<Token>> {
        let window = self.force_refresh_window.max(EXPIRY_MARGIN);
        self.token
            .read()
            .as_ref()
            .filter(|token| !token.expires_within(window))
            .cloned()
    }
}

impl<S> fmt::Debug for TokenManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.credentials)
            .field("force_refresh_window", &self.force_refresh_window)
            .field("token", &*self.token.read())
            .finish_non_exhaustive()
    }
}
