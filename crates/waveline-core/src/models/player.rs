//! Playback state and listening history.

use serde::{Deserialize, Serialize};

use super::catalog::Track;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    pub volume_percent: Option<u8>,
}

/// Response of `GET /me/player`. `item` is null for ads and podcasts we do
/// not model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub device: Option<Device>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub shuffle_state: bool,
    pub repeat_state: Option<String>,
    pub progress_ms: Option<u64>,
    pub item: Option<Track>,
}

impl PlaybackState {
    pub fn volume_percent(&self) -> Option<u8> {
        self.device.as_ref().and_then(|d| d.volume_percent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayHistory {
    pub track: Track,
    pub played_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentlyPlayed {
    #[serde(default)]
    pub items: Vec<PlayHistory>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playback_state() {
        let json = r#"{
            "device": {"id": "abc", "name": "Kitchen", "type": "Speaker", "is_active": true, "volume_percent": 40},
            "is_playing": true,
            "repeat_state": "off",
            "progress_ms": 1000,
            "item": {"id": "t1", "name": "Song", "duration_ms": 61000, "artists": []}
        }"#;
        let state: PlaybackState = serde_json::from_str(json).expect("Failed to parse playback state");
        assert!(state.is_playing);
        assert_eq!(state.volume_percent(), Some(40));
        assert_eq!(state.item.map(|t| t.duration_display()), Some("1:01".to_string()));
    }
}
