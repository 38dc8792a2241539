use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// HTTP method type, re-exported for use with error inspection.
pub use reqwest::Method;
/// HTTP status code type, re-exported for use with error inspection.
pub use reqwest::StatusCode;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to a non-successful HTTP call or socket reply
    Status,
    /// Error related to invalid state within tradovate-client-sdk
    Validation,
    /// Internal error from dependencies
    Internal,
    /// Error related to the socket transport: protocol violations, decode failures and
    /// closed connections
    WebSocket,
    /// Error related to obtaining, renewing or presenting an access token
    Auth,
    /// A request deadline elapsed or the heartbeat could not be answered
    Timeout,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn status<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }

    pub fn socket_status<S: Into<String>>(status: i64, path: String, message: S) -> Self {
        SocketStatus {
            status,
            path,
            message: message.into(),
        }
        .into()
    }

    /// Wraps any token-related failure so it surfaces as [`Kind::Auth`], keeping the original
    /// error reachable through [`StdError::source`].
    #[must_use]
    pub fn auth(source: Error) -> Self {
        Auth {
            reason: source.to_string(),
            source: Some(source),
        }
        .into()
    }

    pub fn auth_rejected<S: Into<String>>(reason: S) -> Self {
        Auth {
            reason: reason.into(),
            source: None,
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.message
        )
    }
}

impl StdError for Status {}

/// A reply read off the socket whose status code is outside the success range.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketStatus {
    /// The `s` field of the reply
    pub status: i64,
    /// The request path the reply belongs to
    pub path: String,
    /// The reply payload, unquoted when it was a JSON string
    pub message: String,
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making socket request to {} with {}",
            self.status, self.path, self.message
        )
    }
}

impl StdError for SocketStatus {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Auth {
    pub reason: String,
    source: Option<Error>,
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication failed: {}", self.reason)
    }
}

impl StdError for Auth {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_html_form::ser::Error> for Error {
    fn from(e: serde_html_form::ser::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

impl From<SocketStatus> for Error {
    fn from(err: SocketStatus) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

impl From<Auth> for Error {
    fn from(err: Auth) -> Self {
        Error::with_source(Kind::Auth, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_status_display_should_succeed() {
        let status = SocketStatus {
            status: 404,
            path: "order/item".to_owned(),
            message: "Not found".to_owned(),
        };

        assert_eq!(
            status.to_string(),
            "error(404) making socket request to order/item with Not found"
        );
    }

    #[test]
    fn socket_status_into_error_should_succeed() {
        let error = Error::socket_status(500, "account/list".to_owned(), "boom");

        assert_eq!(error.kind(), Kind::Status);
        let inner = error.downcast_ref::<SocketStatus>().unwrap();
        assert_eq!(inner.status, 500);
        assert_eq!(inner.message, "boom");
    }

    #[test]
    fn auth_keeps_original_error_as_source() {
        let original = Error::validation("no credentials");
        let error = Error::auth(original);

        assert_eq!(error.kind(), Kind::Auth);
        let auth = error.downcast_ref::<Auth>().unwrap();
        assert!(auth.reason.contains("no credentials"));
        assert!(StdError::source(auth).is_some());
    }
}
