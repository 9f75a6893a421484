use serde::{Deserialize, Serialize};

/// Cover art or avatar. The API returns these largest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Pick the first image, which is the largest one the API offers.
pub fn best_image_url(images: &[Image]) -> Option<&str> {
    images.first().map(|i| i.url.as_str())
}

/// The signed-in user, as returned by `GET /me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub product: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl UserProfile {
    /// Display name, falling back to the account id when the user never set one.
    pub fn display_label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn avatar_url(&self) -> Option<&str> {
        best_image_url(&self.images)
    }

    pub fn is_premium(&self) -> bool {
        self.product.as_deref() == Some("premium")
    }
}
