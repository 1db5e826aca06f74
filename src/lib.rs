//! Authenticated sessions and git smart-HTTP gating for a code-review web front end.
//!
//! For every request this crate decides who the caller is, either from the `GerritAccount`
//! session cookie or from the credentials of a git or REST API client, and keeps the server-side
//! session records consistent between a bounded in-memory cache and a persistent store.
//! Git smart-HTTP requests are then authorized per project before they are handed to a git
//! backend.
//!
//! # Sessions
//!
//! A [`SessionStore`] caches [`SessionRecord`]s in front of a [`SessionPersistence`] backend.
//! The cookie of a session is sent again with a new `Max-Age` once its refresh point has passed;
//! the key itself and the session's XSRF token never change.
//! [`WebSession`] wraps the store for the duration of one request.
//!
//! # Authentication
//!
//! One [`auth::Authenticator`] is selected from the [`config::AuthConfig`] at startup:
//! HTTP Basic, HTTP Digest, OAuth tokens or container-asserted identities.
//! A successful authentication binds the account to the request only, with the synthetic
//! session key `id:<account>`, and allows the git and REST API access paths.
//!
//! # Security
//!
//! Session keys carry 20 bytes from the operating system's random source and are hashed with
//! [blake3](https://docs.rs/blake3) before they reach the persistent store, so a leaked store does
//! not leak usable cookies. Digest nonces are HMAC-signed and verified without any I/O.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use session_gateway::config::SessionConfig;
//! use session_gateway::{AccountId, MemoryStore, SessionStore};
//!
//! # fn main() -> session_gateway::Result { async_std::task::block_on(async {
//! let store = SessionStore::new(MemoryStore::new(), &SessionConfig::default());
//! let now = chrono::Utc::now();
//!
//! // Sign in; the key goes into the `GerritAccount` cookie.
//! let (key, record) = store.create(AccountId::new(1000), true, None, now).await?;
//! assert_eq!(store.cookie_age(&record), 12 * 60 * 60);
//!
//! // Later requests find the session by its key.
//! let found = store.lookup(&key, now).await?.unwrap();
//! assert_eq!(found.account_id, AccountId::new(1000));
//! assert_eq!(found.xsrf_token, record.xsrf_token);
//!
//! store.destroy(&key).await?;
//! assert!(store.lookup(&key, now).await?.is_none());
//! # Ok(()) }) }
//! ```

#![forbid(unsafe_code)]
#![deny(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications
)]

pub use error::Error;
/// A [`Result`](std::result::Result) with this crate's [`Error`] and a default return type of ()
pub type Result<T = ()> = std::result::Result<T, Error>;

pub mod account;
pub mod advertised;
pub mod auth;
pub mod config;
pub mod cookie_codec;
mod error;
pub mod gateway;
pub mod janitor;
mod memory_store;
mod response;
mod session;
pub mod session_store;
pub mod token_signer;
pub mod user;
pub mod web_session;

pub use memory_store::{MemoryStore, Operation};
pub use response::PendingResponse;
pub use session::{AccountId, SessionId, SessionIdType, SessionKey, SessionRecord};
pub use session_store::{SessionPersistence, SessionStore};
pub use web_session::{CookieSettings, WebSession};
