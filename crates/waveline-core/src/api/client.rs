//! API client for communicating with the streaming service's Web API.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests for the profile, catalog, library and player endpoints.

use std::future::Future;
use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::auth::ProfileFetcher;
use crate::models::{
    Artist, Category, Paging, PlaybackState, PlaylistItem, Playlist, RecentlyPlayed, SavedAlbum,
    SavedTrack, SearchKind, SearchResults, SimplifiedAlbum, SimplifiedPlaylist, Track,
    UserProfile,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL for Web API endpoints
const API_BASE_URL: &str = "https://api.spotify.com/v1";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Page size for list endpoints. The API caps most of them at 50.
const PAGE_LIMIT: u32 = 20;

/// Market used for artist top tracks when the caller has no preference.
pub const DEFAULT_MARKET: &str = "US";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct FeaturedPlaylistsResponse {
    #[serde(default)]
    playlists: Paging<Option<SimplifiedPlaylist>>,
}

#[derive(Debug, Deserialize)]
struct NewReleasesResponse {
    #[serde(default)]
    albums: Paging<SimplifiedAlbum>,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    #[serde(default)]
    categories: Paging<Category>,
}

#[derive(Debug, Deserialize)]
struct TopTracksResponse {
    #[serde(default)]
    tracks: Vec<Track>,
}

#[derive(Debug, Deserialize)]
struct RelatedArtistsResponse {
    #[serde(default)]
    artists: Vec<Artist>,
}

/// API client for the Web API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            token: None,
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    /// A client must be rebuilt this way whenever the session token changes.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            token: Some(token),
        }
    }

    /// The bearer token requests are sent with. Failures are reported back
    /// to the session together with it.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ApiError::Unauthorized)?;
        let url = format!("{}{}", API_BASE_URL, path);
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json"))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    fn parse_json<T: DeserializeOwned>(text: &str, path: &str) -> ApiResult<T> {
        serde_json::from_str(text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e))
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = self.request(Method::GET, path)?.send().await?;
        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        debug!(path = path, bytes = text.len(), "GET response received");
        Self::parse_json(&text, path)
    }

    /// GET an endpoint that answers 204 No Content when there is nothing to report.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> ApiResult<Option<T>> {
        let response = self.request(Method::GET, path)?.send().await?;
        let response = Self::check_response(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Self::parse_json(&text, path).map(Some)
    }

    /// Send a player command; these answer with an empty body.
    async fn send_command(&self, method: Method, path: &str) -> ApiResult<()> {
        let response = self
            .request(method, path)?
            .header(header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        Self::check_response(response).await?;
        debug!(path = path, "Player command accepted");
        Ok(())
    }

    // ===== Profile =====

    /// Fetch the signed-in user's profile
    pub async fn current_user(&self) -> ApiResult<UserProfile> {
        self.get("/me").await
    }

    // ===== Home / Browse =====

    pub async fn featured_playlists(&self) -> ApiResult<Vec<SimplifiedPlaylist>> {
        let path = format!("/browse/featured-playlists?limit={}", PAGE_LIMIT);
        let response: FeaturedPlaylistsResponse = self.get(&path).await?;
        Ok(response.playlists.items.into_iter().flatten().collect())
    }

    pub async fn new_releases(&self) -> ApiResult<Vec<SimplifiedAlbum>> {
        let path = format!("/browse/new-releases?limit={}", PAGE_LIMIT);
        let response: NewReleasesResponse = self.get(&path).await?;
        Ok(response.albums.items)
    }

    pub async fn categories(&self) -> ApiResult<Vec<Category>> {
        let path = format!("/browse/categories?limit={}", PAGE_LIMIT);
        let response: CategoriesResponse = self.get(&path).await?;
        Ok(response.categories.items)
    }

    pub async fn recently_played(&self) -> ApiResult<RecentlyPlayed> {
        let path = format!("/me/player/recently-played?limit={}", PAGE_LIMIT);
        self.get(&path).await
    }

    // ===== Search =====

    pub async fn search(&self, query: &str, kinds: &[SearchKind]) -> ApiResult<SearchResults> {
        self.get(&search_path(query, kinds, PAGE_LIMIT)).await
    }

    // ===== Library =====

    pub async fn user_playlists(&self) -> ApiResult<Paging<SimplifiedPlaylist>> {
        self.get(&format!("/me/playlists?limit={}", PAGE_LIMIT)).await
    }

    pub async fn saved_tracks(&self) -> ApiResult<Paging<SavedTrack>> {
        self.get(&format!("/me/tracks?limit={}", PAGE_LIMIT)).await
    }

    pub async fn saved_albums(&self) -> ApiResult<Paging<SavedAlbum>> {
        self.get(&format!("/me/albums?limit={}", PAGE_LIMIT)).await
    }

    // ===== Playlist page =====

    pub async fn playlist(&self, playlist_id: &str) -> ApiResult<Playlist> {
        self.get(&format!("/playlists/{}", urlencoding::encode(playlist_id)))
            .await
    }

    pub async fn playlist_items(&self, playlist_id: &str) -> ApiResult<Paging<PlaylistItem>> {
        let path = format!(
            "/playlists/{}/tracks?limit={}",
            urlencoding::encode(playlist_id),
            PAGE_LIMIT
        );
        self.get(&path).await
    }

    // ===== Artist page =====

    pub async fn artist(&self, artist_id: &str) -> ApiResult<Artist> {
        self.get(&format!("/artists/{}", urlencoding::encode(artist_id)))
            .await
    }

    pub async fn artist_top_tracks(&self, artist_id: &str, market: &str) -> ApiResult<Vec<Track>> {
        let path = format!(
            "/artists/{}/top-tracks?market={}",
            urlencoding::encode(artist_id),
            urlencoding::encode(market)
        );
        let response: TopTracksResponse = self.get(&path).await?;
        Ok(response.tracks)
    }

    pub async fn artist_albums(&self, artist_id: &str) -> ApiResult<Paging<SimplifiedAlbum>> {
        let path = format!(
            "/artists/{}/albums?limit={}",
            urlencoding::encode(artist_id),
            PAGE_LIMIT
        );
        self.get(&path).await
    }

    pub async fn related_artists(&self, artist_id: &str) -> ApiResult<Vec<Artist>> {
        let path = format!(
            "/artists/{}/related-artists",
            urlencoding::encode(artist_id)
        );
        let response: RelatedArtistsResponse = self.get(&path).await?;
        Ok(response.artists)
    }

    // ===== Player =====

    /// Current playback, or `None` when nothing is playing on any device.
    pub async fn playback_state(&self) -> ApiResult<Option<PlaybackState>> {
        self.get_optional("/me/player").await
    }

    pub async fn pause(&self) -> ApiResult<()> {
        self.send_command(Method::PUT, "/me/player/pause").await
    }

    pub async fn resume(&self) -> ApiResult<()> {
        self.send_command(Method::PUT, "/me/player/play").await
    }

    pub async fn skip_next(&self) -> ApiResult<()> {
        self.send_command(Method::POST, "/me/player/next").await
    }

    pub async fn skip_previous(&self) -> ApiResult<()> {
        self.send_command(Method::POST, "/me/player/previous").await
    }

    pub async fn set_volume(&self, percent: u8) -> ApiResult<()> {
        self.send_command(Method::PUT, &volume_path(percent)).await
    }
}

impl ProfileFetcher for ApiClient {
    fn fetch_profile(&self, token: &str) -> impl Future<Output = ApiResult<UserProfile>> + Send {
        let client = self.with_token(token.to_string());
        async move { client.current_user().await }
    }
}

fn search_path(query: &str, kinds: &[SearchKind], limit: u32) -> String {
    let kinds = if kinds.is_empty() { &SearchKind::ALL[..] } else { kinds };
    let types = kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "/search?q={}&type={}&limit={}",
        urlencoding::encode(query.trim()),
        urlencoding::encode(&types),
        limit
    )
}

fn volume_path(percent: u8) -> String {
    format!("/me/player/volume?volume_percent={}", percent.min(100))
}
