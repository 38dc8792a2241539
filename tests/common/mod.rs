#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tradovate_client_sdk::Result;
use tradovate_client_sdk::auth::{Credentials, Token, TokenManager, TokenSource, Uuid};

pub const NAME: &str = "trader";
pub const PASSWORD: &str = "hunter2";
pub const APP_ID: &str = "sample";
pub const APP_VERSION: &str = "1.0";
pub const CID: &str = "8";
pub const SEC: &str = "f03741b6-f634-48d6-9308-c8fb871150c2";
pub const DEVICE_ID: Uuid = Uuid::nil();

pub const ACCESS_TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.access";

#[must_use]
pub fn credentials() -> Credentials {
    Credentials::builder()
        .name(NAME)
        .password(PASSWORD)
        .app_id(APP_ID)
        .app_version(APP_VERSION)
        .cid(CID)
        .device_id(DEVICE_ID)
        .sec(SEC)
        .build()
}

/// Hands out the same long-lived token on every fetch.
#[derive(Debug, Default)]
pub struct StaticSource {
    pub fetches: AtomicUsize,
}

#[async_trait]
impl TokenSource for StaticSource {
    async fn fetch_token(&self, _credentials: &Credentials) -> Result<Token> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Token::new(ACCESS_TOKEN, Utc::now() + TimeDelta::hours(2)))
    }

    async fn renew_token(&self, current: &Token) -> Result<Token> {
        Ok(Token::new(
            current.access_token.clone(),
            Utc::now() + TimeDelta::hours(2),
        ))
    }
}

#[must_use]
pub fn token_manager() -> TokenManager<StaticSource> {
    TokenManager::builder()
        .source(StaticSource::default())
        .credentials(credentials())
        .build()
}
