//! Redirect-based (implicit grant) authorization.
//!
//! `authorization_url` builds the consent page URL the browser is sent to;
//! `parse_redirect_fragment` reads the token the authorization server hands
//! back in the fragment of the redirect target.

use tracing::debug;

use super::AuthError;

/// Authorization endpoint of the streaming service's account server
pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";

/// Every permission the player asks for. The consent dialog lists these.
pub const SCOPES: [&str; 14] = [
    "user-read-private",
    "user-read-email",
    "user-modify-playback-state",
    "user-read-playback-state",
    "user-read-currently-playing",
    "user-read-recently-played",
    "user-top-read",
    "user-library-read",
    "user-library-modify",
    "playlist-read-private",
    "playlist-read-collaborative",
    "playlist-modify-public",
    "playlist-modify-private",
    "streaming",
];

/// A token delivered by the authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
}

/// Strip trailing slashes so the URI matches what was registered with the
/// service, and reject anything that is not an http(s) URL.
pub fn normalize_redirect_uri(uri: &str) -> Result<String, AuthError> {
    let trimmed = uri.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidRedirectUri(uri.to_string()));
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.ends_with(':') {
        return Err(AuthError::InvalidRedirectUri(uri.to_string()));
    }
    Ok(normalized.to_string())
}

/// Build the consent page URL. The dialog is always shown so the user can
/// switch accounts.
pub fn authorization_url(client_id: &str, redirect_uri: &str) -> Result<String, AuthError> {
    let client_id = client_id.trim();
    if client_id.is_empty() {
        return Err(AuthError::MissingClientId);
    }
    let redirect_uri = normalize_redirect_uri(redirect_uri)?;
    let scope = SCOPES.join(" ");

    Ok(format!(
        "{}?client_id={}&redirect_uri={}&scope={}&response_type=token&show_dialog=true",
        AUTHORIZE_URL,
        urlencoding::encode(client_id),
        urlencoding::encode(&redirect_uri),
        urlencoding::encode(&scope),
    ))
}

/// Return the part after `#` when given a whole URL, or the input unchanged
/// when it is already a bare fragment.
pub fn fragment_of(input: &str) -> &str {
    match input.split_once('#') {
        Some((_, fragment)) => fragment,
        None => input,
    }
}

/// Extract `access_token` and `expires_in` from a redirect fragment.
///
/// Returns `None` for fragments without a usable token; most navigations
/// carry no fragment at all, so this is not an error.
pub fn parse_redirect_fragment(fragment: &str) -> Option<TokenGrant> {
    let fragment = fragment.trim().trim_start_matches('#');
    if fragment.is_empty() {
        return None;
    }

    let mut access_token = None;
    let mut expires_in = None;

    for pair in fragment.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Ok(value) = urlencoding::decode(value) else {
            debug!(key = key, "Ignoring undecodable fragment value");
            continue;
        };
        match key {
            "access_token" => access_token = Some(value.into_owned()),
            "expires_in" => expires_in = value.trim().parse::<u64>().ok(),
            _ => {}
        }
    }

    match (access_token, expires_in) {
        (Some(access_token), Some(expires_in)) if !access_token.is_empty() && expires_in > 0 => {
            Some(TokenGrant {
                access_token,
                expires_in,
            })
        }
        _ => None,
    }
}
