//! Utility functions for string formatting.

pub mod format;

pub use format::{format_duration_ms, format_timestamp, truncate_string};
