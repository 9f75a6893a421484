//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: Token lifecycle with expiry timer and profile validation
//! - `authorize`: Consent page URL and redirect fragment parsing
//! - `SessionStore`: Durable key-value storage (file, OS keyring, memory)
//!
//! Tokens come from redirect-based authorization and are dropped one minute
//! before the server stops accepting them.

pub mod authorize;
pub mod error;
pub mod manager;
pub mod session;
pub mod store;

pub use authorize::{authorization_url, fragment_of, parse_redirect_fragment, TokenGrant, SCOPES};
pub use error::AuthError;
pub use manager::{Navigator, ProfileFetcher, SessionManager};
pub use session::{
    SessionData, SessionSnapshot, SessionState, EXPIRY_MARGIN_SECS, MAX_TOKEN_LIFETIME_SECS,
};
pub use store::{FileStore, KeyringStore, MemoryStore, SessionStore};
