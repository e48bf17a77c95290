//! Access checks before entering a protected part of the application.
//!
//! The check resolves any token refresh it triggers before deciding, so a
//! caller never acts on a redirect while a refresh is still in flight.

use tracing::{debug, warn};
use url::form_urlencoded;

use crate::auth::SessionStore;

/// Location of the login view
pub const LOGIN_PATH: &str = "/login";

/// Location shown when the user lacks the required role
pub const ACCESS_DENIED_PATH: &str = "/access-denied";

/// What a target requires of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Role(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    /// Authenticate first, then return to `redirect`
    Login { redirect: String, expired: bool },
    AccessDenied,
}

impl GuardDecision {
    /// Where a presentation layer should navigate, if anywhere
    pub fn location(&self) -> Option<String> {
        match self {
            GuardDecision::Proceed => None,
            GuardDecision::AccessDenied => Some(ACCESS_DENIED_PATH.to_string()),
            GuardDecision::Login { redirect, expired } => {
                let mut query = form_urlencoded::Serializer::new(String::new());
                query.append_pair("redirect", redirect);
                if *expired {
                    query.append_pair("expired", "true");
                }
                Some(format!("{}?{}", LOGIN_PATH, query.finish()))
            }
        }
    }
}

/// Decide whether the current session may enter `target`.
pub async fn check(store: &SessionStore, target: &str, access: &Access) -> GuardDecision {
    if *access == Access::Public {
        return GuardDecision::Proceed;
    }

    if !store.is_authenticated() {
        debug!(target = target, "Not authenticated");
        return GuardDecision::Login {
            redirect: target.to_string(),
            expired: false,
        };
    }

    if store.is_expired() {
        debug!(target = target, "Token expired, refreshing");
        if let Err(e) = store.refresh().await {
            warn!(target = target, error = %e, "Refresh failed");
            store.expire();
            return GuardDecision::Login {
                redirect: target.to_string(),
                expired: true,
            };
        }
    }

    if let Access::Role(required) = access {
        if store.role().as_deref() != Some(required.as_str()) {
            return GuardDecision::AccessDenied;
        }
    }

    GuardDecision::Proceed
}
