use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::utils::truncate_body;

/// Where a presentation layer sends the user after `SessionExpired`
pub const SESSION_EXPIRED_LOCATION: &str = "/login?expired=true";

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Invalid response from server (status {status}): {snippet}")]
    InvalidResponse { status: StatusCode, snippet: String },

    #[error("Access denied: {message}")]
    AccessDenied { message: String, body: Value },

    #[error("API error (status {status}): {message}")]
    Api {
        status: StatusCode,
        message: String,
        body: Value,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Tag for matching on the failure category without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    SessionExpired,
    InvalidResponse,
    AccessDenied,
    Api,
    InvalidRequest,
}

impl RequestError {
    /// Build the error for a parsed body on a non-2xx status
    pub fn from_status(status: StatusCode, body: Value) -> Self {
        let message = message_from_body(&body);
        match status.as_u16() {
            403 => RequestError::AccessDenied { message, body },
            _ => RequestError::Api {
                status,
                message,
                body,
            },
        }
    }

    pub(crate) fn invalid_response(status: StatusCode, raw: &str) -> Self {
        RequestError::InvalidResponse {
            status,
            snippet: truncate_body(raw),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Network(_) => ErrorKind::Network,
            RequestError::SessionExpired => ErrorKind::SessionExpired,
            RequestError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            RequestError::AccessDenied { .. } => ErrorKind::AccessDenied,
            RequestError::Api { .. } => ErrorKind::Api,
            RequestError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.kind() == ErrorKind::SessionExpired
    }

    /// Re-authentication location when the session expired
    pub fn login_location(&self) -> Option<&'static str> {
        self.is_session_expired().then_some(SESSION_EXPIRED_LOCATION)
    }
}

/// Human-readable message of an error body: its `error` or `message` field,
/// the string itself, or the compact JSON.
pub fn message_from_body(body: &Value) -> String {
    if let Some(fields) = body.as_object() {
        for key in ["error", "message"] {
            if let Some(message) = fields.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    match body {
        Value::String(s) => truncate_body(s),
        other => truncate_body(&other.to_string()),
    }
}

/// Message of a raw error body, which may be JSON or plain text
pub fn message_from_text(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(body) => Some(message_from_body(&body)),
        Err(_) => Some(truncate_body(text)),
    }
}
