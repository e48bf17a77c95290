use thiserror::Error;

/// Failures of the session store's own calls (login, register, refresh).
/// These never go through the gateway's unauthorized-retry logic.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The server refused the request; carries its message or a generic one
    #[error("{0}")]
    Rejected(String),

    #[error("no token to refresh")]
    NoToken,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A request path that cannot be resolved against the API base URL
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error(transparent)]
    Parse(#[from] url::ParseError),

    /// Absolute or scheme-relative paths pointing at another host
    #[error("{0} is outside the API origin")]
    ForeignOrigin(String),
}
