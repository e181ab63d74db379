//! Per-channel connection session: socket halves, serialization locks, and
//! the cancellation scope for the connection's tasks.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::WsError;
use crate::shared::now_millis;
use crate::ws::events::Channel;

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub(crate) type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("polymarket-sdk-rs/", env!("CARGO_PKG_VERSION"));

/// Dials the endpoint, returning split socket halves.
pub(crate) async fn dial(url: &str) -> Result<(WsSink, WsSource), WsError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| WsError::InvalidUrl(e.to_string()))?;
    request.headers_mut().insert(
        "User-Agent",
        USER_AGENT
            .parse()
            .map_err(|_| WsError::ConnectionFailed("invalid user agent".to_string()))?,
    );
    let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| WsError::Timeout)?
        .map_err(WsError::from)?;
    Ok(stream.split())
}

/// One channel's connection state.
///
/// The write half lives under an async mutex that doubles as the connection
/// guard; the init mutex serializes `ensure`/reconnect; the cancellation
/// token is replaced fresh on every connection attempt and is the sole
/// shutdown signal for that connection's read and ping tasks.
pub(crate) struct ChannelSession {
    pub channel: Channel,
    pub url: String,
    sink: Mutex<Option<WsSink>>,
    pub init_mu: Mutex<()>,
    cancel: StdMutex<Option<CancellationToken>>,
    last_pong_ms: AtomicI64,
}

impl ChannelSession {
    pub fn new(channel: Channel, url: String) -> Self {
        Self {
            channel,
            url,
            sink: Mutex::new(None),
            init_mu: Mutex::new(()),
            cancel: StdMutex::new(None),
            last_pong_ms: AtomicI64::new(0),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    pub async fn install(&self, sink: WsSink) {
        *self.sink.lock().await = Some(sink);
    }

    pub async fn write_json<T: serde::Serialize>(&self, frame: &T) -> Result<(), WsError> {
        let text = serde_json::to_string(frame)?;
        self.write_text(text).await
    }

    pub async fn write_text(&self, text: String) -> Result<(), WsError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(WsError::NotConnected)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    /// Swaps the connection out before closing it, so a concurrent reconnect
    /// that already installed a fresh socket is never the one closed here.
    pub async fn close_conn(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.close().await;
        }
    }

    /// Cancels the previous connection's tasks, if any.
    pub fn cancel_tasks(&self) {
        if let Some(token) = self.cancel.lock().expect("cancel lock poisoned").take() {
            token.cancel();
        }
    }

    /// Installs and returns a fresh cancellation scope for the next
    /// connection's tasks.
    pub fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = Some(token.clone());
        token
    }

    pub fn mark_frame_received(&self) {
        self.last_pong_ms.store(now_millis(), Ordering::Release);
    }

    /// Milliseconds since the last received frame; `None` before the first.
    pub fn millis_since_last_frame(&self) -> Option<i64> {
        let last = self.last_pong_ms.load(Ordering::Acquire);
        if last == 0 {
            return None;
        }
        Some(now_millis().saturating_sub(last))
    }
}
