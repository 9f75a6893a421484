//! Catalog records: artists, albums, tracks, playlists and browse categories.

use serde::{Deserialize, Serialize};

use super::user::{best_image_url, Image};
use crate::utils::format_duration_ms;

/// Envelope the Web API wraps around every list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    pub next: Option<String>,
}

impl<T> Default for Paging<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            limit: 0,
            offset: 0,
            next: None,
        }
    }
}

impl<T> Paging<T> {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplifiedArtist {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followers {
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub popularity: Option<u32>,
    pub followers: Option<Followers>,
}

impl Artist {
    pub fn image_url(&self) -> Option<&str> {
        best_image_url(&self.images)
    }

    pub fn follower_count(&self) -> u64 {
        self.followers.as_ref().map(|f| f.total).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplifiedAlbum {
    pub id: String,
    pub name: String,
    pub album_type: Option<String>,
    pub release_date: Option<String>,
    pub total_tracks: Option<u32>,
    #[serde(default)]
    pub artists: Vec<SimplifiedArtist>,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl SimplifiedAlbum {
    pub fn artist_names(&self) -> String {
        join_artist_names(&self.artists)
    }

    pub fn image_url(&self) -> Option<&str> {
        best_image_url(&self.images)
    }

    /// Release year, which the API reports with day, month or year precision.
    pub fn release_year(&self) -> Option<&str> {
        self.release_date.as_deref().and_then(|d| d.get(..4))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Local files have no id.
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SimplifiedArtist>,
    pub album: Option<SimplifiedAlbum>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
    pub uri: Option<String>,
}

impl Track {
    pub fn artist_names(&self) -> String {
        join_artist_names(&self.artists)
    }

    pub fn duration_display(&self) -> String {
        format_duration_ms(self.duration_ms)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.album.as_ref().and_then(|a| a.image_url())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistOwner {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistTracksRef {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplifiedPlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<PlaylistOwner>,
    #[serde(default)]
    pub images: Option<Vec<Image>>,
    pub tracks: Option<PlaylistTracksRef>,
}

impl SimplifiedPlaylist {
    pub fn image_url(&self) -> Option<&str> {
        self.images.as_deref().and_then(best_image_url)
    }

    pub fn track_count(&self) -> u32 {
        self.tracks.as_ref().map(|t| t.total).unwrap_or(0)
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .map(|o| o.display_name.as_deref().unwrap_or(&o.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<PlaylistOwner>,
    #[serde(default)]
    pub images: Option<Vec<Image>>,
    pub followers: Option<Followers>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub collaborative: bool,
}

impl Playlist {
    pub fn image_url(&self) -> Option<&str> {
        self.images.as_deref().and_then(best_image_url)
    }
}

/// An entry in a playlist. `track` is null for tracks that were removed
/// from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub added_at: Option<String>,
    pub track: Option<Track>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedTrack {
    pub added_at: Option<String>,
    pub track: Track,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAlbum {
    pub added_at: Option<String>,
    pub album: SimplifiedAlbum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icons: Vec<Image>,
}

/// Item types accepted by the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Track,
    Artist,
    Album,
    Playlist,
}

impl SearchKind {
    pub const ALL: [SearchKind; 4] = [
        SearchKind::Track,
        SearchKind::Artist,
        SearchKind::Album,
        SearchKind::Playlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Track => "track",
            SearchKind::Artist => "artist",
            SearchKind::Album => "album",
            SearchKind::Playlist => "playlist",
        }
    }
}

/// Search response. Each section is present only if its kind was requested;
/// playlist results may contain nulls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub tracks: Option<Paging<Track>>,
    pub artists: Option<Paging<Artist>>,
    pub albums: Option<Paging<SimplifiedAlbum>>,
    pub playlists: Option<Paging<Option<SimplifiedPlaylist>>>,
}

impl SearchResults {
    pub fn tracks(&self) -> &[Track] {
        self.tracks.as_ref().map(|p| p.items.as_slice()).unwrap_or(&[])
    }

    pub fn artists(&self) -> &[Artist] {
        self.artists.as_ref().map(|p| p.items.as_slice()).unwrap_or(&[])
    }

    pub fn albums(&self) -> &[SimplifiedAlbum] {
        self.albums.as_ref().map(|p| p.items.as_slice()).unwrap_or(&[])
    }

    pub fn playlists(&self) -> impl Iterator<Item = &SimplifiedPlaylist> {
        self.playlists
            .iter()
            .flat_map(|p| p.items.iter())
            .flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks().is_empty()
            && self.artists().is_empty()
            && self.albums().is_empty()
            && self.playlists().next().is_none()
    }
}

fn join_artist_names(artists: &[SimplifiedArtist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
