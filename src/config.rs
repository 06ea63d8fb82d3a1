use crate::error::{AppError, Result};

/// Sent on every listing-page fetch. SkinBaron serves the plain listing
/// markup to anything that looks like a browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

/// Per-request timeout for listing fetches and webhook posts (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Uniform random sleep between successful poll cycles (seconds).
pub const POLL_INTERVAL_MIN_SECS: f64 = 3.0;
pub const POLL_INTERVAL_MAX_SECS: f64 = 5.0;

/// How often a paused watcher re-checks its pause flag (seconds).
pub const PAUSE_CHECK_SECS: u64 = 5;

/// Sleep after a failed poll cycle before retrying (seconds).
pub const ERROR_BACKOFF_SECS: u64 = 10;

/// Consecutive failed cycles before a filter deactivates itself.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Offer images are attached to notifications only when served from here.
pub const TRUSTED_IMAGE_HOST: &str = "cdn.skinbaron.de";

/// Display name assigned when a filter is created without one.
pub const DEFAULT_FILTER_NAME: &str = "unnamed";

/// Capacity of the notification queue between watchers and the dispatcher.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 1024;

/// One deliverable notification target: a name users can bind filters to,
/// and the webhook URL behind it.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    /// Path of the filter snapshot file (FILTERS_PATH).
    pub filters_path: String,
    /// Notification channels (CHANNELS, comma-separated `name=webhook_url`).
    /// Order matters: the first entry is the fallback target for filters
    /// with no channel of their own.
    pub channels: Vec<ChannelInfo>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            filters_path: std::env::var("FILTERS_PATH")
                .unwrap_or_else(|_| "filters.json".to_string()),
            channels: parse_channels(&std::env::var("CHANNELS").unwrap_or_default()),
        })
    }
}

/// Parse the CHANNELS env value. Malformed pairs are dropped so one typo
/// doesn't take the whole channel list down with it.
pub fn parse_channels(raw: &str) -> Vec<ChannelInfo> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, url) = pair.trim().split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() {
                return None;
            }
            Some(ChannelInfo { name: name.to_string(), url: url.to_string() })
        })
        .collect()
}
