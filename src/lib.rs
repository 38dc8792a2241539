#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod error;
pub mod rest;
pub(crate) mod serde_helpers;
pub mod ws;

use reqwest::header::HeaderMap;
use reqwest::{Request, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Socket endpoint for live trading
pub const LIVE_WS_ENDPOINT: &str = "wss://live.tradovateapi.com/v1/websocket";

/// Socket endpoint for the simulated (demo) environment
pub const DEMO_WS_ENDPOINT: &str = "wss://demo.tradovateapi.com/v1/websocket";

/// Socket endpoint for market data: quotes, DOMs, histograms and charts
pub const MARKET_DATA_WS_ENDPOINT: &str = "wss://md.tradovateapi.com/v1/websocket";

/// Socket endpoint for market replay sessions, which additionally emit clock events
pub const REPLAY_WS_ENDPOINT: &str = "wss://replay.tradovateapi.com/v1/websocket";

/// REST base URL for live trading
pub const LIVE_REST_ENDPOINT: &str = "https://live.tradovateapi.com/v1";

/// REST base URL for the simulated (demo) environment
pub const DEMO_REST_ENDPOINT: &str = "https://demo.tradovateapi.com/v1";

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request, headers),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    mut request: Request,
    headers: Option<HeaderMap>,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    if let Some(h) = headers {
        request.headers_mut().extend(h);
    }

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    let json_value = response.json::<serde_json::Value>().await?;
    if json_value.is_null() {
        #[cfg(feature = "tracing")]
        tracing::warn!(method = %method, path = %path, "API resource not found");

        return Err(Error::status(
            StatusCode::NOT_FOUND,
            method,
            path,
            "Unable to find requested resource",
        ));
    }

    serde_helpers::deserialize_with_warnings(json_value)
}
