//! Authenticated REST API access.
//!
//! Every data call goes through the `Gateway`, which attaches the session's
//! bearer token, refreshes it once on an unauthorized reply, and normalizes
//! response bodies into JSON values or typed `RequestError`s.

pub mod error;
pub mod gateway;
pub mod request;

pub use error::{ErrorKind, RequestError, SESSION_EXPIRED_LOCATION};
pub use gateway::Gateway;
pub use request::RequestDescriptor;
pub use reqwest::Method;
