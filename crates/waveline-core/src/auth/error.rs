use thiserror::Error;

/// Failures surfaced by the session manager to its caller.
///
/// Everything else (network, storage, expired tokens) is handled inside the
/// manager and never reaches the view layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No client ID configured - set WAVELINE_CLIENT_ID or add client_id to the config file")]
    MissingClientId,

    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("Access token must not be empty")]
    EmptyToken,

    #[error("Token lifetime must be a positive number of seconds, at most one year")]
    InvalidExpiry,
}
