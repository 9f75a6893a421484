//! Core library for waveline.
//!
//! Owns the session lifecycle against the streaming service (redirect-based
//! authorization, token expiry, profile validation, durable storage) and the
//! typed Web API client the front ends render from.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, Navigator, SessionManager, SessionSnapshot, SessionState};
pub use config::Config;
