//! Client library for the timetrack REST API.
//!
//! The `SessionStore` owns the logged-in identity and bearer token, and the
//! `Gateway` is the single path every authenticated call takes:
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use timetrack_core::{Gateway, LoginRequest, RequestDescriptor, SessionPersistence, SessionStore};
//!
//! let store = SessionStore::new("http://localhost:8080", SessionPersistence::in_memory())?;
//! store
//!     .login(&LoginRequest { email: "ada@example.com".into(), password: "secret".into() })
//!     .await?;
//!
//! let gateway = Gateway::new(store.clone());
//! let tasks = gateway.send(&RequestDescriptor::get("/api/tasks")).await?;
//! println!("{}", tasks);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod utils;

pub use api::{ErrorKind, Gateway, RequestDescriptor, RequestError};
pub use auth::{
    AuthError, LoginRequest, RegisterRequest, Session, SessionEvent, SessionPersistence,
    SessionStore, User,
};
pub use config::Config;
pub use guard::{Access, GuardDecision};
