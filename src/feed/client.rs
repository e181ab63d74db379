//! Real-time data feed client.
//!
//! A single WebSocket connection shared by every subscriber. A background
//! run task owns the connect/read/backoff cycle and replays held
//! subscriptions after each reconnect; a ping task keeps the connection
//! alive; subscriptions are reference-counted by `topic|type` so the wire
//! sees one SUBSCRIBE per key and one UNSUBSCRIBE when the last subscriber
//! leaves.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::auth::ApiCreds;
use crate::error::{SdkError, WsError};
use crate::feed::config::FeedConfig;
use crate::feed::entry::{map_stream, FeedEntry, MessageFilter};
use crate::feed::types::{
    parse_messages, BaseEvent, ChainlinkPriceEvent, ClobAuth, CommentEvent, CommentFilter,
    CryptoPriceEvent, FeedAction, FeedMessage, FeedRequest, FeedSubscription, Filters,
    OrdersMatchedEvent, Topic,
};
use crate::network::{validate_feed_url, FEED_WS_URL};
use crate::shared::now_millis;
use crate::stream::{CleanupFuture, EventStream, ERR_BUFFER, STREAM_BUFFER};
use crate::ws::events::ConnectionState;
use crate::ws::session::{dial, WsSource};

/// Connection-state notification for the feed connection.
#[derive(Debug, Clone)]
pub struct FeedStateEvent {
    pub state: ConnectionState,
    pub recorded_at_ms: i64,
}

struct StateEntry {
    id: String,
    tx: mpsc::Sender<FeedStateEvent>,
    closed: AtomicBool,
}

impl StateEntry {
    fn try_send(&self, event: FeedStateEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.try_send(event);
    }
}

#[derive(Default)]
struct FeedSubIndex {
    refs: HashMap<String, u32>,
    details: HashMap<String, FeedSubscription>,
    subs: HashMap<String, Arc<FeedEntry>>,
    by_key: HashMap<String, HashSet<String>>,
    next_id: u64,
}

struct FeedInner {
    url: String,
    config: FeedConfig,
    sink: Mutex<Option<crate::ws::session::WsSink>>,
    closing: AtomicBool,
    connected: AtomicBool,
    ready_tx: watch::Sender<bool>,
    done: CancellationToken,
    subs: Mutex<FeedSubIndex>,
    state_subs: StdMutex<HashMap<String, Arc<StateEntry>>>,
    next_state_id: AtomicU64,
    auth: StdRwLock<Option<ApiCreds>>,
}

/// Client for the real-time data feed.
pub struct FeedClient {
    inner: Arc<FeedInner>,
}

impl FeedClient {
    /// Spawns the connection and keepalive tasks; must be called within a
    /// Tokio runtime. An empty URL selects the production endpoint.
    /// Configuration comes from the `RTDS_WS_*` environment snapshot.
    pub fn connect(url: &str) -> Result<Self, SdkError> {
        Self::connect_with_config(url, FeedConfig::from_env())
    }

    /// Connects with explicit configuration.
    pub fn connect_with_config(url: &str, config: FeedConfig) -> Result<Self, SdkError> {
        let url = if url.trim().is_empty() {
            FEED_WS_URL
        } else {
            url.trim()
        };
        validate_feed_url(url)?;
        let config = config.normalize();

        let (ready_tx, _) = watch::channel(false);
        let inner = Arc::new(FeedInner {
            url: url.to_string(),
            config,
            sink: Mutex::new(None),
            closing: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            ready_tx,
            done: CancellationToken::new(),
            subs: Mutex::new(FeedSubIndex::default()),
            state_subs: StdMutex::new(HashMap::new()),
            next_state_id: AtomicU64::new(0),
            auth: StdRwLock::new(None),
        });

        let runner = Arc::clone(&inner);
        tokio::spawn(async move { runner.run().await });
        let pinger = Arc::clone(&inner);
        tokio::spawn(async move { pinger.ping_loop().await });

        Ok(Self { inner })
    }

    /// Installs credentials attached to credential-scoped subscriptions
    /// (comments).
    pub fn authenticate(&self, creds: ApiCreds) {
        *self.inner.auth.write().expect("auth lock poisoned") = Some(creds);
    }

    pub fn deauthenticate(&self) {
        *self.inner.auth.write().expect("auth lock poisoned") = None;
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.inner.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Subscribes to connection-state transitions; the stream immediately
    /// receives a snapshot of the current state.
    pub fn connection_state_stream(&self) -> EventStream<FeedStateEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (_err_tx, err_rx) = mpsc::channel(ERR_BUFFER);
        let id = (self.inner.next_state_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let entry = Arc::new(StateEntry {
            id: id.clone(),
            tx,
            closed: AtomicBool::new(false),
        });
        self.inner
            .lock_state_subs()
            .insert(id.clone(), Arc::clone(&entry));

        entry.try_send(FeedStateEvent {
            state: self.connection_state(),
            recorded_at_ms: now_millis(),
        });

        let inner = Arc::clone(&self.inner);
        EventStream::new(rx, err_rx, move || {
            if !entry.closed.swap(true, Ordering::AcqRel) {
                inner.lock_state_subs().remove(&entry.id);
            }
            None
        })
    }

    /// Number of live raw subscriptions (all typed streams count once each).
    pub async fn subscription_count(&self) -> usize {
        self.inner.subs.lock().await.subs.len()
    }

    // ─── Typed streams ───────────────────────────────────────────────────

    /// Spot price updates, optionally narrowed to the given symbols.
    pub async fn subscribe_crypto_prices(
        &self,
        symbols: Vec<String>,
    ) -> Result<EventStream<CryptoPriceEvent>, SdkError> {
        let mut sub = FeedSubscription::new(Topic::CryptoPrices.as_str(), "update");
        if !symbols.is_empty() {
            sub.filters = Some(Filters::Symbols(symbols.clone()));
        }
        let raw = FeedInner::subscribe_raw(&self.inner, sub.clone(), None).await?;
        let symbol_set = lowercase_set(&symbols);
        Ok(map_stream(raw, sub.topic, sub.msg_type, move |msg| {
            let mut event: CryptoPriceEvent = serde_json::from_value(msg.payload).ok()?;
            if !symbol_set.is_empty() && !symbol_set.contains(&event.symbol.to_lowercase()) {
                return None;
            }
            event.base = BaseEvent {
                topic: Topic::CryptoPrices.as_str().to_string(),
                message_type: msg.msg_type,
                message_timestamp: msg.timestamp,
            };
            Some(event)
        }))
    }

    /// Oracle price updates; a single feed is narrowed server-side via a
    /// JSON-string filter map.
    pub async fn subscribe_chainlink_prices(
        &self,
        feeds: Vec<String>,
    ) -> Result<EventStream<ChainlinkPriceEvent>, SdkError> {
        let mut sub = FeedSubscription::new(Topic::ChainlinkPrices.as_str(), "*");
        if feeds.len() == 1 {
            let filter_map = json!({ "symbol": feeds[0] });
            sub.filters = Some(Filters::Raw(filter_map.to_string()));
        }
        let raw = FeedInner::subscribe_raw(&self.inner, sub.clone(), None).await?;
        let feed_set = lowercase_set(&feeds);
        Ok(map_stream(raw, sub.topic, sub.msg_type, move |msg| {
            let mut event: ChainlinkPriceEvent = serde_json::from_value(msg.payload).ok()?;
            if !feed_set.is_empty() && !feed_set.contains(&event.symbol.to_lowercase()) {
                return None;
            }
            event.base = BaseEvent {
                topic: Topic::ChainlinkPrices.as_str().to_string(),
                message_type: msg.msg_type,
                message_timestamp: msg.timestamp,
            };
            Some(event)
        }))
    }

    /// Comment and reaction activity. Explicit credentials in the filter
    /// take precedence over the client's stored ones.
    pub async fn subscribe_comments(
        &self,
        filter: Option<CommentFilter>,
    ) -> Result<EventStream<CommentEvent>, SdkError> {
        let mut sub = FeedSubscription::new(Topic::Comments.as_str(), "*");
        if let Some(filter) = &filter {
            if let Some(comment_type) = filter.comment_type {
                sub.msg_type = comment_type.as_str().to_string();
            }
            if let Some(creds) = &filter.auth {
                sub.clob_auth = Some(ClobAuth::from_creds(creds));
            }
            sub.filters = filter.filters.clone();
        }
        if sub.clob_auth.is_none() {
            let stored = self.inner.auth.read().expect("auth lock poisoned").clone();
            if let Some(creds) = stored {
                sub.clob_auth = Some(ClobAuth::from_creds(&creds));
            }
        }
        let raw = FeedInner::subscribe_raw(&self.inner, sub.clone(), None).await?;
        Ok(map_stream(raw, sub.topic, sub.msg_type, move |msg| {
            let mut event: CommentEvent = serde_json::from_value(msg.payload).ok()?;
            event.base = BaseEvent {
                topic: Topic::Comments.as_str().to_string(),
                message_type: msg.msg_type,
                message_timestamp: msg.timestamp,
            };
            Some(event)
        }))
    }

    /// Matched-orders activity firehose.
    pub async fn subscribe_orders_matched(
        &self,
    ) -> Result<EventStream<OrdersMatchedEvent>, SdkError> {
        let sub = FeedSubscription::new(Topic::Activity.as_str(), "orders_matched");
        let raw = FeedInner::subscribe_raw(&self.inner, sub.clone(), None).await?;
        Ok(map_stream(raw, sub.topic, sub.msg_type, move |msg| {
            let mut event: OrdersMatchedEvent = serde_json::from_value(msg.payload).ok()?;
            event.base = BaseEvent {
                topic: Topic::Activity.as_str().to_string(),
                message_type: msg.msg_type,
                message_timestamp: msg.timestamp,
            };
            Some(event)
        }))
    }

    /// Raw subscription to any topic/type pair.
    pub async fn subscribe_raw(
        &self,
        sub: FeedSubscription,
    ) -> Result<EventStream<FeedMessage>, SdkError> {
        FeedInner::subscribe_raw(&self.inner, sub, None).await
    }

    // ─── Topic-level unsubscribes ────────────────────────────────────────

    pub async fn unsubscribe_crypto_prices(&self) -> Result<(), SdkError> {
        self.inner
            .unsubscribe_topic(Topic::CryptoPrices.as_str(), "update")
            .await
    }

    pub async fn unsubscribe_chainlink_prices(&self) -> Result<(), SdkError> {
        self.inner
            .unsubscribe_topic(Topic::ChainlinkPrices.as_str(), "*")
            .await
    }

    pub async fn unsubscribe_comments(
        &self,
        comment_type: Option<crate::feed::types::CommentType>,
    ) -> Result<(), SdkError> {
        let msg_type = comment_type.map_or("*", |t| t.as_str());
        self.inner
            .unsubscribe_topic(Topic::Comments.as_str(), msg_type)
            .await
    }

    pub async fn unsubscribe_orders_matched(&self) -> Result<(), SdkError> {
        self.inner
            .unsubscribe_topic(Topic::Activity.as_str(), "orders_matched")
            .await
    }

    pub async fn unsubscribe_raw(&self, sub: &FeedSubscription) -> Result<(), SdkError> {
        self.inner
            .unsubscribe_topic(&sub.topic, &sub.msg_type)
            .await
    }

    /// Closes the client: all subscriber queues close exactly once and the
    /// background tasks stop. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.set_state(ConnectionState::Disconnected);
        inner.close_conn().await;
        inner.close_all_subscriptions().await;
        inner.close_state_subscriptions();
        inner.done.cancel();
    }
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn subscription_key(topic: &str, msg_type: &str) -> String {
    format!("{topic}|{msg_type}")
}

impl FeedInner {
    fn lock_state_subs(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Arc<StateEntry>>> {
        self.state_subs.lock().expect("state subs lock poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        self.connected
            .store(state == ConnectionState::Connected, Ordering::Release);
        let event = FeedStateEvent {
            state,
            recorded_at_ms: now_millis(),
        };
        let subs: Vec<_> = self.lock_state_subs().values().cloned().collect();
        for sub in subs {
            sub.try_send(event.clone());
        }
    }

    async fn connect_once(&self) -> Result<WsSource, WsError> {
        self.close_conn().await;
        match dial(&self.url).await {
            Ok((sink, source)) => {
                *self.sink.lock().await = Some(sink);
                self.set_state(ConnectionState::Connected);
                self.ready_tx.send_replace(true);
                Ok(source)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Connection supervisor: dial, replay subscriptions, read until error,
    /// back off, repeat while the config allows another attempt.
    async fn run(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            if self.closing.load(Ordering::Acquire) {
                return;
            }
            match self.connect_once().await {
                Err(e) => {
                    warn!(error = %e, "feed connect failed");
                    if !self.config.allows_attempt(attempts) {
                        self.done.cancel();
                        return;
                    }
                    attempts += 1;
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
                Ok(source) => {
                    attempts = 0;
                    self.resubscribe_all().await;
                    let err = self.read_loop(source).await;
                    if self.closing.load(Ordering::Acquire) {
                        return;
                    }
                    debug!(error = %err, "feed read loop ended");
                    if !self.config.allows_attempt(attempts) {
                        self.done.cancel();
                        return;
                    }
                    attempts += 1;
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    async fn read_loop(&self, mut source: WsSource) -> WsError {
        loop {
            let frame = tokio::select! {
                _ = self.done.cancelled() => return WsError::Closed,
                frame = source.next() => frame,
            };
            let message = match frame {
                None => {
                    self.set_state(ConnectionState::Disconnected);
                    return WsError::Read("stream ended".to_string());
                }
                Some(Err(e)) => {
                    self.set_state(ConnectionState::Disconnected);
                    let err = WsError::from(e);
                    error!(error = %err, "feed read error");
                    return err;
                }
                Some(Ok(message)) => message,
            };
            let Message::Text(text) = message else {
                continue;
            };
            if text == "PONG" {
                continue;
            }
            let messages = match parse_messages(&text) {
                Ok(messages) => messages,
                Err(_) => continue,
            };
            for msg in messages {
                self.dispatch(msg).await;
            }
        }
    }

    async fn dispatch(&self, msg: FeedMessage) {
        let subs: Vec<_> = {
            let idx = self.subs.lock().await;
            idx.subs.values().cloned().collect()
        };
        for sub in subs {
            if sub.matches(&msg) {
                sub.try_send(msg.clone());
            }
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.done.cancelled() => return,
                _ = ticker.tick() => {
                    let mut guard = self.sink.lock().await;
                    let Some(sink) = guard.as_mut() else { continue };
                    use futures_util::SinkExt;
                    if let Err(e) = sink.send(Message::Text("PING".to_string().into())).await {
                        drop(guard);
                        debug!(error = %e, "feed ping failed");
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
            }
        }
    }

    async fn close_conn(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            use futures_util::SinkExt;
            let _ = sink.close().await;
        }
    }

    async fn write_json<T: serde::Serialize>(&self, frame: &T) -> Result<(), WsError> {
        let text = serde_json::to_string(frame)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(WsError::NotConnected)?;
        use futures_util::SinkExt;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    async fn send_subscriptions(
        &self,
        action: FeedAction,
        subscriptions: Vec<FeedSubscription>,
    ) -> Result<(), WsError> {
        if subscriptions.is_empty() {
            return Ok(());
        }
        self.write_json(&FeedRequest {
            action,
            subscriptions,
        })
        .await
    }

    async fn resubscribe_all(&self) {
        let subscriptions: Vec<_> = {
            let idx = self.subs.lock().await;
            idx.details.values().cloned().collect()
        };
        if subscriptions.is_empty() {
            return;
        }
        if let Err(e) = self
            .send_subscriptions(FeedAction::Subscribe, subscriptions)
            .await
        {
            error!(error = %e, "feed resubscribe failed");
        }
    }

    async fn subscribe_raw(
        this: &Arc<Self>,
        sub: FeedSubscription,
        filter: Option<MessageFilter>,
    ) -> Result<EventStream<FeedMessage>, SdkError> {
        if sub.topic.trim().is_empty() || sub.msg_type.trim().is_empty() {
            return Err(SdkError::validation("subscription topic and type required"));
        }

        // The first subscribe must not race the initial connect.
        let mut ready = this.ready_tx.subscribe();
        tokio::select! {
            result = ready.wait_for(|ready| *ready) => {
                if result.is_err() {
                    return Err(SdkError::Ws(WsError::Closed));
                }
            }
            _ = this.done.cancelled() => return Err(SdkError::Ws(WsError::Closed)),
        }

        let key = subscription_key(&sub.topic, &sub.msg_type);

        let mut idx = this.subs.lock().await;
        if idx.refs.get(&key).copied().unwrap_or(0) == 0 {
            this.send_subscriptions(FeedAction::Subscribe, vec![sub.clone()])
                .await?;
        }
        *idx.refs.entry(key.clone()).or_insert(0) += 1;
        idx.details.insert(key.clone(), sub.clone());

        idx.next_id += 1;
        let id = format!("{}#{}", key, idx.next_id);
        let (entry, rx, err_rx) = FeedEntry::new(
            id.clone(),
            key.clone(),
            sub.topic.clone(),
            sub.msg_type.clone(),
            filter,
        );
        idx.subs.insert(id.clone(), Arc::clone(&entry));
        idx.by_key.entry(key).or_default().insert(id.clone());
        drop(idx);

        let inner = Arc::clone(this);
        Ok(EventStream::new(rx, err_rx, move || {
            let cleanup: CleanupFuture = Box::pin(async move {
                if let Err(e) = inner.unsubscribe_by_id(&id).await {
                    debug!(error = %e, "feed unsubscribe failed");
                }
            });
            Some(cleanup)
        }))
    }

    async fn unsubscribe_by_id(&self, id: &str) -> Result<(), SdkError> {
        let mut idx = self.subs.lock().await;
        let Some(entry) = idx.subs.remove(id) else {
            return Ok(());
        };
        if let Some(ids) = idx.by_key.get_mut(&entry.key) {
            ids.remove(id);
            if ids.is_empty() {
                idx.by_key.remove(&entry.key);
            }
        }

        let count = idx.refs.get(&entry.key).copied().unwrap_or(0);
        let mut result = Ok(());
        if count <= 1 {
            idx.refs.remove(&entry.key);
            idx.details.remove(&entry.key);
            let sub = FeedSubscription::new(entry.topic.clone(), entry.msg_type.clone());
            result = self
                .send_subscriptions(FeedAction::Unsubscribe, vec![sub])
                .await
                .map_err(SdkError::from);
        } else {
            idx.refs.insert(entry.key.clone(), count - 1);
        }
        drop(idx);

        entry.close();
        result
    }

    async fn unsubscribe_topic(&self, topic: &str, msg_type: &str) -> Result<(), SdkError> {
        let key = subscription_key(topic, msg_type);
        let id = {
            let idx = self.subs.lock().await;
            idx.by_key
                .get(&key)
                .and_then(|ids| ids.iter().next().cloned())
        };
        match id {
            Some(id) => self.unsubscribe_by_id(&id).await,
            None => Ok(()),
        }
    }

    async fn close_all_subscriptions(&self) {
        let entries: Vec<_> = {
            let mut idx = self.subs.lock().await;
            let entries = idx.subs.drain().map(|(_, entry)| entry).collect();
            idx.by_key.clear();
            idx.refs.clear();
            idx.details.clear();
            entries
        };
        for entry in entries {
            entry.close();
        }
    }

    fn close_state_subscriptions(&self) {
        let mut subs = self.lock_state_subs();
        for entry in subs.values() {
            entry.closed.store(true, Ordering::Release);
        }
        subs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_key_format() {
        assert_eq!(subscription_key("crypto_prices", "update"), "crypto_prices|update");
    }

    #[test]
    fn test_lowercase_set_trims_and_drops_blanks() {
        let set = lowercase_set(&["BTC".to_string(), "  ".to_string(), "Eth ".to_string()]);
        assert!(set.contains("btc"));
        assert!(set.contains("eth"));
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(FeedClient::connect("https://not-a-ws-url").is_err());
    }
}
