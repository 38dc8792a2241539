use serde::Serialize;

use crate::Result;
use crate::ws::frame::encode_request;

/// Path used to present the access token once the socket is open.
pub(crate) const AUTHORIZE: &str = "authorize";

/// An outbound socket request: an endpoint path, URL-encoded query parameters and an
/// optional JSON body.
///
/// # Example
///
/// ```
/// use tradovate_client_sdk::ws::types::Request;
/// use serde_json::json;
///
/// # fn example() -> tradovate_client_sdk::Result<()> {
/// let find = Request::new("contract/find").query(&[("name", "ESZ6")])?;
/// let place = Request::new("order/placeorder").json(&json!({ "orderQty": 1 }))?;
/// # Ok(())
/// # }
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    path: String,
    query: String,
    body: Option<String>,
}

impl Request {
    #[must_use]
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the query parameters, serialized as `application/x-www-form-urlencoded`.
    pub fn query<Q: Serialize + ?Sized>(mut self, params: &Q) -> Result<Self> {
        self.query = serde_html_form::to_string(params)?;
        Ok(self)
    }

    /// Sets the JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    /// Sets a body that is sent verbatim.
    #[must_use]
    pub fn raw_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn encode(&self, id: u64) -> String {
        encode_request(&self.path, id, &self.query, self.body.as_deref())
    }
}
