use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_FILTER_NAME;

/// Opaque user identifier. String-keyed in the snapshot file.
pub type OwnerId = u64;

// ---------------------------------------------------------------------------
// FilterSpec — one user-defined monitoring rule
// ---------------------------------------------------------------------------

/// The persisted part of a filter. Price bounds are inclusive on both ends;
/// an inverted range (`min > max`) is accepted and simply matches nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub url: String,
    #[serde(rename = "min")]
    pub min_price: f64,
    #[serde(rename = "max")]
    pub max_price: f64,
    #[serde(default = "default_filter_name")]
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    /// Notification channel this filter was created with. Not persisted:
    /// restored filters fall back to the first configured channel.
    #[serde(skip)]
    pub channel: Option<String>,
}

fn default_filter_name() -> String {
    DEFAULT_FILTER_NAME.to_string()
}

// ---------------------------------------------------------------------------
// Offer — one scraped listing (ephemeral, never persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    /// 1-based position within the current page snapshot.
    pub position: usize,
    pub price: f64,
    pub wear: WearCondition,
    /// Only populated when the image is served from the trusted CDN host.
    pub image_url: Option<String>,
    pub stickers: Vec<String>,
}

/// Weak fingerprint used to recognize an already-notified offer across poll
/// cycles. The page exposes no stable item id, so position + price is the
/// best available heuristic: a sold item replaced by a different one at the
/// same position and price will be missed. Kept behind this function so a
/// stronger key can replace it without touching the loop logic.
pub fn offer_fingerprint(offer: &Offer) -> String {
    format!("{}-{}", offer.position, offer.price)
}

// ---------------------------------------------------------------------------
// Wear condition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WearCondition {
    FactoryNew,
    MinimalWear,
    FieldTested,
    WellWorn,
    BattleScarred,
    Unknown,
}

impl WearCondition {
    /// Map a single CSS class from the listing markup. Classes carry the
    /// wear as a substring, e.g. `exterior-factory-new`.
    pub fn from_css_class(class: &str) -> Self {
        if class.contains("factory-new") {
            WearCondition::FactoryNew
        } else if class.contains("minimal-wear") {
            WearCondition::MinimalWear
        } else if class.contains("field-tested") {
            WearCondition::FieldTested
        } else if class.contains("well-worn") {
            WearCondition::WellWorn
        } else if class.contains("battle-scarred") {
            WearCondition::BattleScarred
        } else {
            WearCondition::Unknown
        }
    }

    /// First recognized wear among an element's classes, else Unknown.
    pub fn from_css_classes<'a>(classes: impl Iterator<Item = &'a str>) -> Self {
        classes
            .map(Self::from_css_class)
            .find(|w| *w != WearCondition::Unknown)
            .unwrap_or(WearCondition::Unknown)
    }
}

impl std::fmt::Display for WearCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WearCondition::FactoryNew => "Factory New",
            WearCondition::MinimalWear => "Minimal Wear",
            WearCondition::FieldTested => "Field Tested",
            WearCondition::WellWorn => "Well Worn",
            WearCondition::BattleScarred => "Battle Scarred",
            WearCondition::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Notification — sent over the mpsc queue from watchers to the dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Notification {
    /// Target channel name; None means "whatever the dispatcher falls back to".
    pub channel: Option<String>,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub stickers: Vec<String>,
}
