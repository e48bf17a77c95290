//! Bearer token payload decoding.
//!
//! Tokens are three dot-separated segments. Only the middle segment is read
//! here; signatures are verified by the server, never by the client.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims carried by the token payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiry instant, seconds since the Unix epoch
    pub exp: Option<i64>,
    /// Subject (the account email)
    pub sub: Option<String>,
    pub id: Option<i64>,
    pub role: Option<String>,
    pub pseudo: Option<String>,
    pub iat: Option<i64>,
}

/// Decode the payload segment of a token without verifying its signature.
/// Returns `None` when the token is not three segments or the payload is not
/// base64url-encoded JSON.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    // Some issuers keep the '=' padding; the URL-safe engine rejects it
    let payload = parts[1].trim_end_matches('=');
    let bytes = match URL_SAFE_NO_PAD.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Token payload is not valid base64url");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "Token payload is not valid JSON");
            None
        }
    }
}

/// Check whether a token is expired at the given instant.
///
/// Undecodable tokens count as expired. A payload that decodes but carries
/// no `exp` claim never expires.
pub fn is_expired_at(token: &str, now_secs: i64) -> bool {
    match decode_claims(token) {
        Some(claims) => match claims.exp {
            Some(exp) => exp < now_secs,
            None => false,
        },
        None => true,
    }
}

/// Check whether a token is expired now
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) fn make_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
