//! REST credential exchange.
//!
//! Only the two authentication endpoints are covered: exchanging [`Credentials`] for a
//! [`Token`] and renewing a token before it expires. [`Client`] implements
//! [`TokenSource`], so it plugs straight into a [`TokenManager`].
//!
//! [`Credentials`]: crate::auth::Credentials
//! [`Token`]: crate::auth::Token
//! [`TokenSource`]: crate::auth::TokenSource
//! [`TokenManager`]: crate::auth::TokenManager

pub mod client;

pub use client::Client;
