//! Plain-text rendering of session and catalog data.

use chrono::Utc;
use waveline_core::models::{
    Artist, Category, Paging, PlaybackState, Playlist, PlaylistItem, RecentlyPlayed, SavedAlbum,
    SavedTrack, SearchResults, SimplifiedAlbum, SimplifiedPlaylist, Track, UserProfile,
};
use waveline_core::utils::{format_duration_ms, format_timestamp, truncate_string};
use waveline_core::{SessionSnapshot, SessionState};

/// Widest a title column gets before it is truncated
const TITLE_WIDTH: usize = 40;

pub fn session_status(snapshot: &SessionSnapshot) -> String {
    match snapshot.state {
        SessionState::Authenticated if snapshot.is_authenticated => {
            let who = snapshot
                .user
                .as_ref()
                .map(|u| u.display_label().to_string())
                .unwrap_or_else(|| "unknown user".to_string());
            let minutes = snapshot
                .expires_at
                .map(|at| (at - Utc::now()).num_minutes().max(0))
                .unwrap_or(0);
            format!("Logged in as {} (token expires in {} min)", who, minutes)
        }
        SessionState::Restoring => "Restoring session...".to_string(),
        _ => "Not logged in. Run `waveline login` to connect your account.".to_string(),
    }
}

pub fn profile(user: &UserProfile) -> String {
    let mut lines = vec![user.display_label().to_string()];
    lines.push(format!("  id:      {}", user.id));
    if let Some(ref email) = user.email {
        lines.push(format!("  email:   {}", email));
    }
    if let Some(ref country) = user.country {
        lines.push(format!("  country: {}", country));
    }
    lines.push(format!(
        "  plan:    {}",
        if user.is_premium() { "Premium" } else { "Free" }
    ));
    if let Some(url) = user.avatar_url() {
        lines.push(format!("  avatar:  {}", url));
    }
    lines.join("\n")
}

pub fn track_line(track: &Track) -> String {
    format!(
        "{:<width$}  {:<30}  {:>7}",
        truncate_string(&track.name, TITLE_WIDTH),
        truncate_string(&track.artist_names(), 30),
        track.duration_display(),
        width = TITLE_WIDTH
    )
}

fn album_line(album: &SimplifiedAlbum) -> String {
    format!(
        "{:<width$}  {:<30}  {}",
        truncate_string(&album.name, TITLE_WIDTH),
        truncate_string(&album.artist_names(), 30),
        album.release_year().unwrap_or(""),
        width = TITLE_WIDTH
    )
}

fn playlist_line(playlist: &SimplifiedPlaylist) -> String {
    let owner = playlist
        .owner_name()
        .map(|o| format!("by {}", o))
        .unwrap_or_default();
    format!(
        "{:<width$}  {:>4} tracks  {}  [{}]",
        truncate_string(&playlist.name, TITLE_WIDTH),
        playlist.track_count(),
        owner,
        playlist.id,
        width = TITLE_WIDTH
    )
}

fn artist_line(artist: &Artist) -> String {
    format!(
        "{:<width$}  {} followers  [{}]",
        truncate_string(&artist.name, TITLE_WIDTH),
        artist.follower_count(),
        artist.id,
        width = TITLE_WIDTH
    )
}

fn section<T>(out: &mut Vec<String>, title: &str, items: &[T], line: impl Fn(&T) -> String) {
    if items.is_empty() {
        return;
    }
    out.push(format!("== {} ==", title));
    out.extend(items.iter().map(line));
    out.push(String::new());
}

pub fn home(
    featured: &[SimplifiedPlaylist],
    releases: &[SimplifiedAlbum],
    categories: &[Category],
    recent: &RecentlyPlayed,
) -> String {
    let mut out = Vec::new();
    let recent_tracks: Vec<_> = recent.items.iter().collect();
    section(&mut out, "Recently played", &recent_tracks, |h| {
        format!("{}  {}", track_line(&h.track), format_timestamp(&h.played_at))
    });
    section(&mut out, "Featured playlists", featured, playlist_line);
    section(&mut out, "New releases", releases, album_line);
    let names: Vec<_> = categories.iter().map(|c| c.name.clone()).collect();
    if !names.is_empty() {
        out.push("== Browse ==".to_string());
        out.push(names.join(" · "));
    }
    finish(out, "Nothing to show yet.")
}

pub fn search(results: &SearchResults) -> String {
    let mut out = Vec::new();
    section(&mut out, "Tracks", results.tracks(), track_line);
    section(&mut out, "Artists", results.artists(), artist_line);
    section(&mut out, "Albums", results.albums(), album_line);
    let playlists: Vec<_> = results.playlists().collect();
    section(&mut out, "Playlists", &playlists, |p| playlist_line(p));
    finish(out, "No results.")
}

pub fn library(
    playlists: &Paging<SimplifiedPlaylist>,
    tracks: &Paging<SavedTrack>,
    albums: &Paging<SavedAlbum>,
) -> String {
    let mut out = Vec::new();
    section(&mut out, &format!("Playlists ({})", playlists.total), &playlists.items, playlist_line);
    section(&mut out, &format!("Liked songs ({})", tracks.total), &tracks.items, |s| {
        track_line(&s.track)
    });
    section(&mut out, &format!("Albums ({})", albums.total), &albums.items, |s| {
        album_line(&s.album)
    });
    finish(out, "Your library is empty.")
}

pub fn playlist(playlist: &Playlist, items: &Paging<PlaylistItem>) -> String {
    let mut out = vec![playlist.name.clone()];
    if let Some(desc) = playlist.description.as_deref().filter(|d| !d.is_empty()) {
        out.push(desc.to_string());
    }
    out.push(String::new());
    for (i, item) in items.items.iter().enumerate() {
        match item.track {
            Some(ref track) => out.push(format!("{:>3}. {}", i + 1, track_line(track))),
            None => out.push(format!("{:>3}. (unavailable)", i + 1)),
        }
    }
    if items.has_more() {
        out.push(format!("... {} tracks total", items.total));
    }
    out.join("\n")
}

pub fn artist(
    artist: &Artist,
    top_tracks: &[Track],
    albums: &Paging<SimplifiedAlbum>,
    related: &[Artist],
) -> String {
    let mut out = vec![artist.name.clone()];
    if !artist.genres.is_empty() {
        out.push(artist.genres.join(", "));
    }
    out.push(format!("{} followers", artist.follower_count()));
    out.push(String::new());
    section(&mut out, "Popular", top_tracks, track_line);
    section(&mut out, "Discography", &albums.items, album_line);
    section(&mut out, "Fans also like", related, artist_line);
    out.join("\n").trim_end().to_string()
}

pub fn now_playing(state: Option<&PlaybackState>) -> String {
    let Some(state) = state else {
        return "Nothing is playing.".to_string();
    };
    let Some(ref track) = state.item else {
        return "Playing something we cannot display.".to_string();
    };
    let progress = format_duration_ms(state.progress_ms.unwrap_or(0));
    let marker = if state.is_playing { "▶" } else { "⏸" };
    let mut line = format!(
        "{} {} - {}  {} / {}",
        marker,
        track.name,
        track.artist_names(),
        progress,
        track.duration_display()
    );
    if let Some(ref device) = state.device {
        line.push_str(&format!("  on {}", device.name));
        if let Some(volume) = device.volume_percent {
            line.push_str(&format!(" ({}%)", volume));
        }
    }
    line
}

fn finish(out: Vec<String>, empty: &str) -> String {
    if out.is_empty() {
        empty.to_string()
    } else {
        out.join("\n").trim_end().to_string()
    }
}
