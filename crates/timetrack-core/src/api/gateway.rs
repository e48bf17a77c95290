//! The shared call path for authenticated requests.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use super::{RequestDescriptor, RequestError};
use crate::auth::SessionStore;

/// Sends requests on behalf of the current session.
/// Clone is cheap - clones share the session store.
#[derive(Clone)]
pub struct Gateway {
    store: SessionStore,
}

impl Gateway {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Send a request, refreshing the token and retrying once on 401.
    ///
    /// A 204 or an empty body yields an empty object. A failed refresh logs
    /// the session out and yields `RequestError::SessionExpired`.
    pub async fn send(&self, descriptor: &RequestDescriptor) -> Result<Value, RequestError> {
        // Resolved before any credential is attached
        let url = self.store.endpoint(descriptor.path()).map_err(|e| {
            warn!(path = descriptor.path(), error = %e, "Rejected request path");
            RequestError::InvalidRequest(format!("bad path {}: {}", descriptor.path(), e))
        })?;

        let presented = if self.store.is_authenticated() {
            self.store.token()
        } else {
            None
        };

        let first = match presented {
            Some(ref token) => descriptor.with_authorization(&bearer(token))?,
            None => descriptor.clone(),
        };

        let response = self.execute(&url, &first).await?;

        match presented {
            Some(ref stale) if response.status() == StatusCode::UNAUTHORIZED => {
                debug!(path = descriptor.path(), "Unauthorized, refreshing token");
                self.retry_after_refresh(&url, descriptor, stale).await
            }
            _ => read_response(response).await,
        }
    }

    /// Send a request and deserialize its result
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T, RequestError> {
        let value = self.send(descriptor).await?;
        T::deserialize(&value)
            .map_err(|_| RequestError::invalid_response(StatusCode::OK, &value.to_string()))
    }

    /// Second and last attempt. Its outcome is returned as-is, even another 401.
    async fn retry_after_refresh(
        &self,
        url: &Url,
        descriptor: &RequestDescriptor,
        stale: &str,
    ) -> Result<Value, RequestError> {
        let token = match self.store.refresh_from(stale).await {
            Ok(token) => token,
            Err(e) => {
                warn!(path = descriptor.path(), error = %e, "Session expired");
                self.store.expire();
                return Err(RequestError::SessionExpired);
            }
        };

        let retry = descriptor.with_authorization(&bearer(&token))?;
        let response = self.execute(url, &retry).await?;
        read_response(response).await
    }

    async fn execute(
        &self,
        url: &Url,
        descriptor: &RequestDescriptor,
    ) -> Result<Response, RequestError> {
        let mut request = self
            .store
            .client()
            .request(descriptor.method_ref().clone(), url.clone())
            .headers(descriptor.headers().clone());
        if let Some(body) = descriptor.payload() {
            request = request.body(body.to_vec());
        }

        debug!(method = %descriptor.method_ref(), path = descriptor.path(), "Sending request");
        request.send().await.map_err(|e| {
            warn!(path = descriptor.path(), error = %e, "Network error");
            RequestError::Network(e)
        })
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn read_response(response: Response) -> Result<Value, RequestError> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(empty_result());
    }
    let text = response.text().await?;
    normalize(status, &text)
}

/// Turn a status and raw body into the call's result
pub(crate) fn normalize(status: StatusCode, text: &str) -> Result<Value, RequestError> {
    if status == StatusCode::NO_CONTENT || text.is_empty() {
        return Ok(empty_result());
    }

    let body: Value = serde_json::from_str(text).map_err(|_| {
        warn!(status = %status, "Response body is not JSON");
        RequestError::invalid_response(status, text)
    })?;

    if !status.is_success() {
        return Err(RequestError::from_status(status, body));
    }
    Ok(body)
}

fn empty_result() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorKind;
    use crate::utils::format::MAX_BODY_SNIPPET_LENGTH;
    use serde_json::json;

    #[test]
    fn test_no_content_is_empty_success() {
        assert_eq!(normalize(StatusCode::NO_CONTENT, "garbage{").unwrap(), json!({}));
        assert_eq!(normalize(StatusCode::OK, "").unwrap(), json!({}));
    }

    #[test]
    fn test_whitespace_body_is_invalid_response() {
        let err = normalize(StatusCode::OK, "  \n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }

    #[test]
    fn test_success_body() {
        assert_eq!(normalize(StatusCode::OK, r#"{"id":1}"#).unwrap(), json!({ "id": 1 }));
        assert_eq!(normalize(StatusCode::CREATED, "[1,2]").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_truncated_json_is_invalid_response() {
        let err = normalize(StatusCode::OK, r#"{"id":1,"name":"Rev"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }

    #[test]
    fn test_invalid_response_snippet_is_bounded() {
        let raw = format!("<html>{}</html>", "x".repeat(5000));
        match normalize(StatusCode::OK, &raw).unwrap_err() {
            RequestError::InvalidResponse { snippet, .. } => {
                assert!(snippet.len() < MAX_BODY_SNIPPET_LENGTH + 64);
                assert!(snippet.starts_with("<html>"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_status_with_json_body() {
        match normalize(StatusCode::BAD_REQUEST, r#"{"error":"Invalid code"}"#).unwrap_err() {
            RequestError::Api { status, message, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Invalid code");
                assert_eq!(body, json!({ "error": "Invalid code" }));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = normalize(StatusCode::FORBIDDEN, r#"{"message":"not yours"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }
}
