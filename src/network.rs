//! Network URL constants and WebSocket endpoint derivation.

use crate::error::SdkError;

/// Production base URL for the CLOB WebSocket channels.
pub const CLOB_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com";

/// Production URL for the real-time data feed.
pub const FEED_WS_URL: &str = "wss://ws-live-data.polymarket.com";

/// Derives the market endpoint, user endpoint, and base URL from a raw URL.
///
/// Accepts a base URL or either full endpoint and fills in the rest by suffix
/// surgery. An empty input resolves to the production base. Trailing slashes
/// are trimmed.
pub fn normalize_ws_urls(raw: &str) -> (String, String, String) {
    let raw = raw.trim();
    let raw = if raw.is_empty() { CLOB_WS_URL } else { raw };
    let trimmed = raw.trim_end_matches('/');

    if let Some(base) = trimmed.strip_suffix("/ws/market") {
        (
            trimmed.to_string(),
            format!("{base}/ws/user"),
            base.to_string(),
        )
    } else if let Some(base) = trimmed.strip_suffix("/ws/user") {
        (
            format!("{base}/ws/market"),
            trimmed.to_string(),
            base.to_string(),
        )
    } else {
        (
            format!("{trimmed}/ws/market"),
            format!("{trimmed}/ws/user"),
            trimmed.to_string(),
        )
    }
}

/// Validates a data-feed URL: `ws://` or `wss://` scheme with a non-empty host.
pub fn validate_feed_url(raw: &str) -> Result<(), SdkError> {
    let rest = raw
        .strip_prefix("wss://")
        .or_else(|| raw.strip_prefix("ws://"))
        .ok_or_else(|| SdkError::validation("feed URL must use ws:// or wss://"))?;
    let host = rest.split('/').next().unwrap_or("");
    if host.is_empty() {
        return Err(SdkError::validation("feed URL host is required"));
    }
    Ok(())
}
