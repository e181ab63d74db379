//! Real-time data feed configuration.

use std::time::Duration;

/// Reconnect and keepalive behavior for the data-feed connection.
///
/// Unlike the trading channels, `reconnect_max == 0` means **unlimited**
/// attempts here; the two engines' cap semantics are part of their wire
/// contracts and are deliberately not unified.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub reconnect_max: u32,
    pub ping_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay: Duration::from_secs(2),
            reconnect_max: 5,
            ping_interval: Duration::from_secs(5),
        }
    }
}

impl FeedConfig {
    /// Reads the `RTDS_WS_*` environment snapshot once.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(raw) = env_str("RTDS_WS_RECONNECT") {
            cfg.reconnect = raw != "0" && !raw.eq_ignore_ascii_case("false");
        }
        if let Some(ms) = env_ms("RTDS_WS_RECONNECT_DELAY_MS") {
            cfg.reconnect_delay = ms;
        }
        if let Some(raw) = env_str("RTDS_WS_RECONNECT_MAX") {
            if let Ok(max) = raw.parse::<i64>() {
                // Negative values fall back to the default cap; zero is kept
                // and means unlimited.
                cfg.reconnect_max = if max < 0 { 5 } else { max as u32 };
            }
        }
        if let Some(ms) = env_ms("RTDS_WS_PING_INTERVAL_MS") {
            cfg.ping_interval = ms;
        }
        cfg.normalize()
    }

    pub fn normalize(mut self) -> Self {
        if self.reconnect_delay.is_zero() {
            self.reconnect_delay = Duration::from_secs(2);
        }
        if self.ping_interval.is_zero() {
            self.ping_interval = Duration::from_secs(5);
        }
        self
    }

    /// Whether another reconnect attempt is allowed after `attempts`
    /// consecutive failures.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        if !self.reconnect {
            return false;
        }
        if self.reconnect_max == 0 {
            return true;
        }
        attempts < self.reconnect_max
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_ms(name: &str) -> Option<Duration> {
    env_str(name)?
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
