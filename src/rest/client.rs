//! HTTP client for the authentication endpoints.
//!
//! # Example
//!
//! ```no_run
//! use tradovate_client_sdk::auth::{Credentials, TokenManager};
//! use tradovate_client_sdk::rest::Client;
//!
//! # async fn example() -> tradovate_client_sdk::Result<()> {
//! let credentials = Credentials::builder()
//!     .name("trader")
//!     .password("hunter2")
//!     .app_id("sample")
//!     .app_version("1.0")
//!     .cid("8")
//!     .sec("f03741b6-f634-48d6-9308-c8fb871150c2")
//!     .build();
//!
//! let tokens = TokenManager::builder()
//!     .source(Client::demo())
//!     .credentials(credentials)
//!     .build();
//!
//! let token = tokens.token().await?;
//! println!("token valid until {}", token.expiration_time);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
use serde_json::Value;
use url::Url;

use crate::auth::{Credentials, Token, TokenSource};
use crate::error::{Error, Kind};
use crate::serde_helpers::deserialize_with_warnings;
use crate::{DEMO_REST_ENDPOINT, LIVE_REST_ENDPOINT, Result};

const ACCESS_TOKEN_PATH: &str = "auth/accessTokenRequest";
const RENEW_TOKEN_PATH: &str = "auth/renewAccessToken";

/// Token responses report rejected credentials with a `200` status and an `errorText` field.
fn into_token(response: Value) -> Result<Token> {
    let rejection = response
        .get("errorText")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty());

    if let Some(reason) = rejection {
        #[cfg(feature = "tracing")]
        tracing::warn!(reason = %reason, "credential exchange rejected");

        return Err(Error::auth_rejected(reason));
    }

    deserialize_with_warnings(response)
}

/// HTTP client for the Tradovate REST authentication endpoints.
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Client {
    /// Creates a client against a custom base URL, e.g. `https://demo.tradovateapi.com/v1`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(host: &str) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("tradovate_client_sdk"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        // Relative joins drop the last segment unless the base ends in a slash
        let mut host = Url::parse(host)?;
        if !host.path().ends_with('/') {
            host.set_path(&format!("{}/", host.path()));
        }

        Ok(Self { host, client })
    }

    /// Client for the live trading environment.
    #[must_use]
    pub fn live() -> Self {
        Client::new(LIVE_REST_ENDPOINT).expect("Client with live endpoint should succeed")
    }

    /// Client for the simulated (demo) environment.
    #[must_use]
    pub fn demo() -> Self {
        Client::new(DEMO_REST_ENDPOINT).expect("Client with demo endpoint should succeed")
    }

    /// Returns the base URL of the API.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Exchanges credentials for a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Kind::Auth`] when the server answers with an `errorText`, and
    /// [`crate::error::Kind::Status`] for non-2xx responses.
    pub async fn access_token(&self, credentials: &Credentials) -> Result<Token> {
        let request = self
            .client
            .request(Method::POST, self.host.join(ACCESS_TOKEN_PATH)?)
            .json(credentials)
            .build()?;

        into_token(crate::request(&self.client, request, None).await?)
    }

    /// Renews a token that has not expired yet.
    ///
    /// # Errors
    ///
    /// See [`Client::access_token`].
    pub async fn renew_access_token(&self, current: &Token) -> Result<Token> {
        let mut headers = self.bearer(current)?;
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let request = self
            .client
            .request(Method::GET, self.host.join(RENEW_TOKEN_PATH)?)
            .build()?;

        into_token(crate::request(&self.client, request, Some(headers)).await?)
    }

    fn bearer(&self, token: &Token) -> Result<HeaderMap> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.access_token))
            .map_err(|e| Error::with_source(Kind::Validation, e))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

#[async_trait]
impl TokenSource for Client {
    async fn fetch_token(&self, credentials: &Credentials) -> Result<Token> {
        #[cfg(feature = "tracing")]
        tracing::debug!(name = %credentials.name, host = %self.host, "requesting access token");

        self.access_token(credentials).await
    }

    async fn renew_token(&self, current: &Token) -> Result<Token> {
        self.renew_access_token(current).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_gets_trailing_slash() {
        let client = Client::new("https://demo.tradovateapi.com/v1").unwrap();
        assert_eq!(
            client.host().join(ACCESS_TOKEN_PATH).unwrap().as_str(),
            "https://demo.tradovateapi.com/v1/auth/accessTokenRequest"
        );

        let client = Client::new("https://demo.tradovateapi.com/v1/").unwrap();
        assert_eq!(client.host().path(), "/v1/");
    }

    #[test]
    fn rejected_response_becomes_auth_error() {
        let response = serde_json::json!({ "errorText": "Incorrect username or password" });

        let err = into_token(response).unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Auth);
        assert!(err.to_string().contains("Incorrect username or password"));
    }

    #[test]
    fn empty_error_text_is_ignored() {
        let response = serde_json::json!({
            "errorText": "",
            "accessToken": "abc",
            "expirationTime": "2026-10-18T15:40:30.056Z"
        });

        assert_eq!(into_token(response).unwrap().access_token, "abc");
    }
}
