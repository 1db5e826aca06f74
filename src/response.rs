//! Responses that are assembled while a request is handled and written out once.

use http::header::{HeaderName, CONTENT_TYPE, SET_COOKIE, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Response, StatusCode};

/// A response under construction.
///
/// Handlers, the web session and the authenticator each contribute status, headers or body,
/// and the embedding server turns the final value into a real response with
/// [`PendingResponse::into_http`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl PendingResponse {
    /// An empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// An empty `200 OK`.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// The status that will be sent.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Replace the status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// The headers collected so far.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body collected so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The `WWW-Authenticate` header value, if one was set.
    pub fn www_authenticate(&self) -> Option<&str> {
        self.headers
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
    }

    /// All `Set-Cookie` header values, in insertion order.
    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    /// Set a header, replacing earlier values of the same name.
    /// Values that are not valid header text are dropped with a warning.
    pub fn insert_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => log::warn!("dropping invalid {name} header value"),
        }
    }

    /// Add a header without replacing earlier values of the same name.
    pub fn append_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.append(name, value);
            }
            Err(_) => log::warn!("dropping invalid {name} header value"),
        }
    }

    /// Replace the body with `text` as `text/plain`.
    pub fn set_text_body(&mut self, text: &str) {
        self.insert_header(CONTENT_TYPE, "text/plain; charset=UTF-8");
        self.body = text.as_bytes().to_vec();
    }

    /// Replace the body with raw bytes of the given content type.
    pub fn set_body(&mut self, content_type: &str, body: Vec<u8>) {
        self.insert_header(CONTENT_TYPE, content_type);
        self.body = body;
    }

    /// Flush into an [`http::Response`].
    pub fn into_http(self) -> Response<Vec<u8>> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl Default for PendingResponse {
    fn default() -> Self {
        Self::ok()
    }
}
