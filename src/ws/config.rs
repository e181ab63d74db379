//! Trading-channel WebSocket configuration.

use std::time::Duration;

/// Runtime behavior of the trading WebSocket client.
///
/// `reconnect_max` semantics: negative values normalize to 5, zero gives up
/// without retrying, positive values cap the attempts.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub debug: bool,
    pub disable_ping: bool,
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_multiplier: f64,
    pub reconnect_max: i32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            debug: false,
            disable_ping: false,
            reconnect: true,
            reconnect_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_multiplier: 2.0,
            reconnect_max: 5,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl WsConfig {
    /// Reads the `CLOB_WS_*` environment snapshot once; the client depends
    /// only on the resulting value afterwards.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(raw) = env_str("CLOB_WS_RECONNECT") {
            cfg.reconnect = raw != "0" && !raw.eq_ignore_ascii_case("false");
        }
        if let Some(ms) = env_ms("CLOB_WS_RECONNECT_DELAY_MS") {
            cfg.reconnect_delay = ms;
        }
        if let Some(ms) = env_ms("CLOB_WS_RECONNECT_MAX_DELAY_MS") {
            cfg.reconnect_max_delay = ms;
        }
        if let Some(raw) = env_str("CLOB_WS_RECONNECT_BACKOFF_MULTIPLIER") {
            if let Ok(mult) = raw.parse::<f64>() {
                if mult > 0.0 {
                    cfg.reconnect_multiplier = mult;
                }
            }
        }
        if let Some(raw) = env_str("CLOB_WS_RECONNECT_MAX") {
            if let Ok(max) = raw.parse::<i32>() {
                cfg.reconnect_max = max;
            }
        }
        if let Some(ms) = env_ms("CLOB_WS_HEARTBEAT_INTERVAL_MS") {
            cfg.heartbeat_interval = ms;
        }
        if let Some(ms) = env_ms("CLOB_WS_HEARTBEAT_TIMEOUT_MS") {
            cfg.heartbeat_timeout = ms;
        } else {
            cfg.heartbeat_timeout = cfg.heartbeat_interval * 3;
        }
        cfg.debug = std::env::var("CLOB_WS_DEBUG").map_or(false, |v| !v.is_empty());
        cfg.disable_ping = std::env::var("CLOB_WS_DISABLE_PING").map_or(false, |v| !v.is_empty());

        cfg.normalize()
    }

    /// Clamps zero/negative durations back to defaults and applies the
    /// `reconnect_max` normalization.
    pub fn normalize(mut self) -> Self {
        if self.reconnect_delay.is_zero() {
            self.reconnect_delay = Duration::from_secs(2);
        }
        if self.reconnect_max_delay.is_zero() {
            self.reconnect_max_delay = Duration::from_secs(30);
        }
        if self.reconnect_multiplier <= 0.0 {
            self.reconnect_multiplier = 2.0;
        }
        if self.reconnect_max < 0 {
            self.reconnect_max = 5;
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = Duration::from_secs(10);
        }
        if self.heartbeat_timeout.is_zero() {
            self.heartbeat_timeout = self.heartbeat_interval * 3;
        }
        if self.read_timeout.is_zero() {
            self.read_timeout = Duration::from_secs(60);
        }
        self
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
