//! OIP wire model for the upstream ad exchange.
//!
//! A refill request carries one tile array per size needing creatives; the
//! array length is the requested quantity. Response tile arrays are
//! positionally aligned with the request's size order.

use pantry_core::types::CategoryId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct OipRequest {
    pub elements: RequestElements,
    pub cat: HashMap<String, String>,
    pub lir: LirFlags,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestElements {
    pub content_types: Vec<String>,
    pub tiles: Vec<Vec<TileSlot>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TileSlot {
    pub tsize: String,
}

/// Lookup-information-release flags: only intent signals are shared upstream.
#[derive(Debug, Clone, Serialize)]
pub struct LirFlags {
    pub ip: u8,
    pub intent: u8,
    pub loc: u8,
    pub uid: u8,
}

impl Default for LirFlags {
    fn default() -> Self {
        Self {
            ip: 0,
            intent: 1,
            loc: 0,
            uid: 0,
        }
    }
}

impl OipRequest {
    pub fn new(category: CategoryId, content_types: &[String]) -> Self {
        let mut cat = HashMap::new();
        cat.insert(category.to_string(), String::new());
        Self {
            elements: RequestElements {
                content_types: content_types.to_vec(),
                tiles: Vec::new(),
            },
            cat,
            lir: LirFlags::default(),
        }
    }

    /// Append one tile array for `size` with `quantity` slots.
    pub fn push_size(&mut self, size: &str, quantity: u32) {
        let slots = (0..quantity)
            .map(|_| TileSlot {
                tsize: size.to_string(),
            })
            .collect();
        self.elements.tiles.push(slots);
    }

    pub fn size_count(&self) -> usize {
        self.elements.tiles.len()
    }
}

// Response structs are deliberately loose: the exchange omits fields freely
// and unusable entries are filtered out downstream.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OipResponse {
    #[serde(default)]
    pub elements: ResponseElements,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseElements {
    #[serde(default)]
    pub tiles: Vec<Vec<RawAd>>,
    #[serde(default)]
    pub fcap: Vec<FrequencyCap>,
}

/// One raw ad entry. Entries without a usable `url` are discarded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAd {
    #[serde(default)]
    pub url: Option<String>,
    /// Landing page.
    #[serde(default)]
    pub lp: Option<String>,
}

/// Frequency-cap descriptor attached to a response batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrequencyCap {
    #[serde(default)]
    pub intent_type: Option<String>,
    /// Free-text intent vocabulary for the served categories.
    #[serde(default)]
    pub intent_data: Option<String>,
    /// Cache window, e.g. `"5 days"` or `"1 hour"`.
    #[serde(default)]
    pub time_frame: Option<String>,
    /// Impression budget per creative; numeric or string form.
    #[serde(default)]
    pub impression_limit: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape_matches_exchange_protocol() {
        let mut request = OipRequest::new(2, &["image/png".to_string()]);
        request.push_size("300x250", 3);
        request.push_size("728x90", 2);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["cat"]["2"], "");
        assert_eq!(json["lir"]["intent"], 1);
        assert_eq!(json["lir"]["ip"], 0);
        assert_eq!(json["elements"]["tiles"][0].as_array().unwrap().len(), 3);
        assert_eq!(json["elements"]["tiles"][1].as_array().unwrap().len(), 2);
        assert_eq!(json["elements"]["tiles"][0][0]["tsize"], "300x250");
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let response: OipResponse = serde_json::from_str("{}").unwrap();
        assert!(response.elements.tiles.is_empty());
        assert!(response.elements.fcap.is_empty());

        let response: OipResponse = serde_json::from_str(
            r#"{"elements": {"tiles": [[{"url": "http://cdn/a.png"}, {}]],
                "fcap": [{"time_frame": "5 days", "impression_limit": "3"}]}}"#,
        )
        .unwrap();
        assert_eq!(response.elements.tiles[0].len(), 2);
        assert!(response.elements.tiles[0][1].url.is_none());
        assert_eq!(
            response.elements.fcap[0].time_frame.as_deref(),
            Some("5 days")
        );
    }
}
