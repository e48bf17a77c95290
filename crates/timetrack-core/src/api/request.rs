use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use super::RequestError;

/// One outbound call: a path relative to the API base URL plus options.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    path: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// A GET request for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path).method(Method::POST)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(path).method(Method::PUT)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(path).method(Method::DELETE)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from strings, rejecting names or values HTTP cannot carry
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, RequestError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RequestError::InvalidRequest(format!("bad header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| RequestError::InvalidRequest(format!("bad value for header {}", name)))?;
        Ok(self.header(name, value))
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, RequestError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| RequestError::InvalidRequest(format!("body is not serializable: {}", e)))?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(bytes);
        Ok(self)
    }

    /// Raw payload; callers set their own content type
    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(bytes.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method_ref(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Copy of this descriptor carrying `authorization` in place of any
    /// caller-supplied Authorization header.
    pub(crate) fn with_authorization(&self, authorization: &str) -> Result<Self, RequestError> {
        let mut value = HeaderValue::from_str(authorization)
            .map_err(|_| RequestError::InvalidRequest("token is not a valid header value".into()))?;
        value.set_sensitive(true);
        let mut copy = self.clone();
        copy.headers.insert(header::AUTHORIZATION, value);
        Ok(copy)
    }
}
