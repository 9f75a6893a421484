//! REST API client module for the streaming service's Web API.
//!
//! This module provides the `ApiClient` for fetching the user's profile,
//! catalog, library and playback data, and for sending player commands.
//!
//! Requests carry the bearer token obtained through redirect-based
//! authorization; see the `auth` module.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
