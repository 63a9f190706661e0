use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category identifier from the exchange code table.
pub type CategoryId = u32;

/// One cached ad unit instance.
///
/// Created when a refill response is parsed, decremented on every successful
/// selection, and dropped once its impression budget reaches zero or it
/// expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creative {
    /// Click-through landing page. Opaque; not validated here.
    pub landing_page: String,
    /// Creative asset URL. Opaque; not validated here.
    pub image_url: String,
    /// Absolute time after which the creative must not be served.
    pub expires_at: DateTime<Utc>,
    /// Shared impression budget remaining for this creative.
    pub impressions_remaining: u32,
}

/// A creative selected for delivery, denormalized with the category and size
/// it was served from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdUnit {
    pub landing_page: String,
    pub image_url: String,
    pub expires_at: DateTime<Utc>,
    pub impressions_remaining: u32,
    pub category: CategoryId,
    pub category_name: String,
    pub size: String,
}

impl AdUnit {
    pub fn from_creative(
        creative: Creative,
        category: CategoryId,
        category_name: &str,
        size: &str,
    ) -> Self {
        Self {
            landing_page: creative.landing_page,
            image_url: creative.image_url,
            expires_at: creative.expires_at,
            impressions_remaining: creative.impressions_remaining,
            category,
            category_name: category_name.to_string(),
            size: size.to_string(),
        }
    }
}

/// Build the `"{width}x{height}"` pool key used throughout the engine.
pub fn size_key(width: u32, height: u32) -> String {
    format!("{width}x{height}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_key_format() {
        assert_eq!(size_key(300, 250), "300x250");
        assert_eq!(size_key(728, 90), "728x90");
    }

    #[test]
    fn test_ad_unit_denormalizes_category_and_size() {
        let creative = Creative {
            landing_page: "https://example.com/lp".to_string(),
            image_url: "https://example.com/ad.png".to_string(),
            expires_at: Utc::now(),
            impressions_remaining: 3,
        };
        let unit = AdUnit::from_creative(creative, 2, "Automotive", "300x250");
        assert_eq!(unit.category, 2);
        assert_eq!(unit.category_name, "Automotive");
        assert_eq!(unit.size, "300x250");
        assert_eq!(unit.impressions_remaining, 3);
    }
}
