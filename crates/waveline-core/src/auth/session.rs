use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserProfile;

/// Seconds before the server-side expiry at which a freshly ingested token
/// is dropped, so the player never sends a credential about to be rejected.
pub const EXPIRY_MARGIN_SECS: u64 = 60;

/// Longest token lifetime accepted from the authorization server (one
/// year). Issued tokens live an hour; anything far beyond that is a
/// malformed grant and would not fit a timer deadline.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

/// Lifecycle states of the session. A redirect to the consent page is not
/// tracked: it leaves the application entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Restoring,
    Unauthenticated,
    Authenticated,
}

/// The live credential: token, absolute expiry, and last fetched profile.
/// `token` and `expires_at` only ever exist together.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Option<UserProfile>,
}

impl SessionData {
    /// A session for a token that was just issued with the given lifetime.
    pub fn issued_now(token: String, expires_in_secs: u64) -> Self {
        let lifetime_ms = i64::try_from(expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(Duration::milliseconds(lifetime_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            token,
            expires_at,
            user: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Remaining lifetime as a timer delay; zero once expired, and never
    /// more than `MAX_TOKEN_LIFETIME_SECS`.
    pub fn remaining(&self) -> StdDuration {
        self.time_until_expiry()
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            .min(StdDuration::from_secs(MAX_TOKEN_LIFETIME_SECS))
    }
}

/// Delay before logging out a token issued with `expires_in_secs` of
/// lifetime. Tokens with a minute or less left are dropped immediately.
pub fn logout_delay(expires_in_secs: u64) -> StdDuration {
    StdDuration::from_secs(expires_in_secs.saturating_sub(EXPIRY_MARGIN_SECS))
}

/// Read-only view of the session handed to the view layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub is_authenticated: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Option<UserProfile>,
}

impl SessionSnapshot {
    pub fn restoring() -> Self {
        Self {
            state: SessionState::Restoring,
            is_authenticated: false,
            expires_at: None,
            user: None,
        }
    }

    pub fn from_parts(state: SessionState, data: Option<&SessionData>) -> Self {
        Self {
            state,
            is_authenticated: state == SessionState::Authenticated
                && data.map(|d| !d.is_expired()).unwrap_or(false),
            expires_at: data.map(|d| d.expires_at),
            user: data.and_then(|d| d.user.clone()),
        }
    }
}
