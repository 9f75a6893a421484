//! Data models for streaming-service entities.
//!
//! This module contains the records returned by the Web API:
//!
//! - `UserProfile`, `Image`: The signed-in account
//! - Catalog types: `Artist`, `SimplifiedAlbum`, `Track`, `Playlist`, etc.
//! - `Paging<T>`: The envelope every list endpoint wraps its items in
//! - Player types: `PlaybackState`, `Device`, `PlayHistory`
//!
//! Fields the API documents as nullable are `Option`s, and arrays the API
//! may omit default to empty.

pub mod catalog;
pub mod player;
pub mod user;

pub use catalog::{
    Artist, Category, Paging, Playlist, PlaylistItem, PlaylistOwner, SavedAlbum,
    SavedTrack, SearchKind, SearchResults, SimplifiedAlbum, SimplifiedArtist, SimplifiedPlaylist,
    Track,
};
pub use player::{Device, PlayHistory, PlaybackState, RecentlyPlayed};
pub use user::{Image, UserProfile};
