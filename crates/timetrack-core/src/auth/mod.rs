//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: login, registration, refresh and logout against the API
//! - `SessionPersistence`: the durable snapshot restored at startup
//! - `token`: payload decoding and expiry checks for bearer tokens

pub mod error;
pub mod persist;
pub mod session;
pub mod token;

pub use error::{AuthError, EndpointError};
pub use persist::{FileStore, KeyValueStore, KeyringStore, MemoryStore, SessionPersistence, Snapshot};
pub use session::{LoginRequest, RegisterRequest, Session, SessionEvent, SessionStore, User};
pub use token::TokenClaims;
