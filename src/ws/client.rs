//! Trading-channel streaming engine.
//!
//! One engine multiplexes two WebSocket connections (market and user) among
//! many logical subscribers: reference-counted membership decides when wire
//! frames are actually sent, subscribers get bounded typed streams, and each
//! connection runs read/ping tasks bound to a cancellation scope that is
//! replaced on every reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::auth::ApiCreds;
use crate::error::{SdkError, WsError};
use crate::network::normalize_ws_urls;
use crate::shared::now_millis;
use crate::stream::{CleanupFuture, EventStream};
use crate::ws::config::WsConfig;
use crate::ws::entry::SubscriptionEntry;
use crate::ws::events::{
    BestBidAskEvent, Channel, ConnectionState, ConnectionStateEvent, EventType,
    LastTradePriceEvent, MarketResolvedEvent, MidpointEvent, NewMarketEvent, OrderEvent,
    OrderbookEvent, PriceChangeEvent, TickSizeChangeEvent, TradeEvent,
};
use crate::ws::membership::RefCounts;
use crate::ws::messages::{AuthPayload, Operation, WireSubscription};
use crate::ws::session::{dial, ChannelSession, WsSource};

pub(crate) type EntryMap<E> = HashMap<String, Arc<SubscriptionEntry<E>>>;

/// Engine-level subscription request; the channel is inferred from the id
/// lists when unset.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub channel: Option<Channel>,
    pub operation: Option<Operation>,
    pub asset_ids: Vec<String>,
    pub markets: Vec<String>,
    pub auth: Option<ApiCreds>,
    pub custom_features: bool,
}

impl SubscribeRequest {
    pub fn market(asset_ids: Vec<String>) -> Self {
        Self {
            channel: Some(Channel::Market),
            asset_ids,
            ..Default::default()
        }
    }

    pub fn user(markets: Vec<String>) -> Self {
        Self {
            channel: Some(Channel::User),
            markets,
            ..Default::default()
        }
    }
}

/// Per-event-type subscriber indexes plus the membership refs they share a
/// lock with. Held only for insert/delete/snapshot, never across a send.
#[derive(Default)]
pub(crate) struct SubIndex {
    pub market_refs: RefCounts,
    pub user_refs: RefCounts,
    pub custom_features: bool,
    pub last_auth: Option<AuthPayload>,
    pub orderbook: EntryMap<OrderbookEvent>,
    pub price: EntryMap<PriceChangeEvent>,
    pub midpoint: EntryMap<MidpointEvent>,
    pub last_trade: EntryMap<LastTradePriceEvent>,
    pub tick_size: EntryMap<TickSizeChangeEvent>,
    pub best_bid_ask: EntryMap<BestBidAskEvent>,
    pub new_market: EntryMap<NewMarketEvent>,
    pub market_resolved: EntryMap<MarketResolvedEvent>,
    pub trade: EntryMap<TradeEvent>,
    pub order: EntryMap<OrderEvent>,
}

struct StateTable {
    market: ConnectionState,
    user: ConnectionState,
    subs: EntryMap<ConnectionStateEvent>,
}

pub(crate) struct Inner {
    pub(crate) config: WsConfig,
    base_url: String,
    market: ChannelSession,
    user: ChannelSession,
    creds: StdRwLock<Option<ApiCreds>>,
    pub(crate) closing: AtomicBool,
    next_sub_id: AtomicU64,
    pub(crate) subs: StdMutex<SubIndex>,
    state: StdMutex<StateTable>,
}

/// The trading-channel WebSocket client.
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    /// Connects to the market channel eagerly, deriving both endpoints from
    /// the given URL (base, or either full endpoint). Configuration comes
    /// from the `CLOB_WS_*` environment snapshot.
    pub async fn connect(url: &str) -> Result<Self, SdkError> {
        Self::connect_with_config(url, WsConfig::from_env()).await
    }

    /// Connects with explicit configuration.
    pub async fn connect_with_config(url: &str, config: WsConfig) -> Result<Self, SdkError> {
        let client = Self::detached(url, config);
        Inner::ensure_conn(&client.inner, Channel::Market).await?;
        Ok(client)
    }

    /// Builds a client without dialing; connections are established lazily
    /// by the first subscribe.
    pub fn detached(url: &str, config: WsConfig) -> Self {
        let (market_url, user_url, base_url) = normalize_ws_urls(url);
        let config = config.normalize();
        Self {
            inner: Arc::new(Inner {
                config,
                base_url,
                market: ChannelSession::new(Channel::Market, market_url),
                user: ChannelSession::new(Channel::User, user_url),
                creds: StdRwLock::new(None),
                closing: AtomicBool::new(false),
                next_sub_id: AtomicU64::new(0),
                subs: StdMutex::new(SubIndex::default()),
                state: StdMutex::new(StateTable {
                    market: ConnectionState::Disconnected,
                    user: ConnectionState::Disconnected,
                    subs: EntryMap::default(),
                }),
            }),
        }
    }

    /// Installs API credentials for user-channel subscriptions.
    pub fn authenticate(&self, creds: ApiCreds) {
        *self.inner.creds.write().expect("creds lock poisoned") = Some(creds);
        self.inner.lock_subs().last_auth = None;
    }

    /// Clears the credentials and drops the user connection. `last_auth`
    /// survives so reconnects of still-active user subscriptions can replay
    /// their subscribe frame.
    pub async fn deauthenticate(&self) {
        *self.inner.creds.write().expect("creds lock poisoned") = None;
        self.inner.user.cancel_tasks();
        self.inner.user.close_conn().await;
        self.inner
            .set_conn_state(Channel::User, ConnectionState::Disconnected, 0);
    }

    /// A detached copy sharing configuration and credentials but no mutable
    /// state with this client. The copy does not dial until used.
    pub fn clone_detached(&self) -> WsClient {
        let clone = WsClient::detached(&self.inner.base_url, self.inner.config.clone());
        *clone.inner.creds.write().expect("creds lock poisoned") = self
            .inner
            .creds
            .read()
            .expect("creds lock poisoned")
            .clone();
        clone.inner.lock_subs().last_auth = self.inner.lock_subs().last_auth.clone();
        clone
    }

    /// A new authenticated view; the original client is never mutated.
    pub fn with_auth(&self, creds: ApiCreds) -> WsClient {
        let clone = self.clone_detached();
        clone.authenticate(creds);
        clone
    }

    pub fn connection_state(&self, channel: Channel) -> ConnectionState {
        let state = self.inner.lock_state();
        match channel {
            Channel::Market => state.market,
            Channel::User => state.user,
        }
    }

    /// Subscribes to connection-state transitions. The stream immediately
    /// receives one snapshot event per channel.
    pub fn connection_state_stream(&self) -> EventStream<ConnectionStateEvent> {
        let inner = Arc::clone(&self.inner);
        let id = inner.next_sub_id();
        let (entry, rx, err_rx) = SubscriptionEntry::new(
            id,
            Channel::Market,
            EventType::ConnectionState,
            &[],
            &[],
        );

        let (market, user) = {
            let mut state = inner.lock_state();
            state.subs.insert(entry.id.clone(), Arc::clone(&entry));
            (state.market, state.user)
        };

        entry.try_send(ConnectionStateEvent {
            channel: Channel::Market,
            state: market,
            attempt: 0,
            recorded_at_ms: now_millis(),
        });
        entry.try_send(ConnectionStateEvent {
            channel: Channel::User,
            state: user,
            attempt: 0,
            recorded_at_ms: now_millis(),
        });

        let closer_inner = Arc::clone(&inner);
        let closer_entry = Arc::clone(&entry);
        EventStream::new(rx, err_rx, move || {
            if closer_entry.close() {
                closer_inner.lock_state().subs.remove(&closer_entry.id);
            }
            None
        })
    }

    // ─── Market-channel streams ──────────────────────────────────────────

    pub async fn subscribe_orderbook(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<OrderbookEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::Orderbook, false, |s| {
            &mut s.orderbook
        })
        .await
    }

    pub async fn subscribe_prices(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<PriceChangeEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::PriceChange, false, |s| {
            &mut s.price
        })
        .await
    }

    pub async fn subscribe_midpoints(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<MidpointEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::Midpoint, false, |s| {
            &mut s.midpoint
        })
        .await
    }

    pub async fn subscribe_last_trade_prices(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<LastTradePriceEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::LastTradePrice, false, |s| {
            &mut s.last_trade
        })
        .await
    }

    pub async fn subscribe_tick_size_changes(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<TickSizeChangeEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::TickSizeChange, false, |s| {
            &mut s.tick_size
        })
        .await
    }

    pub async fn subscribe_best_bid_ask(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<BestBidAskEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::BestBidAsk, true, |s| {
            &mut s.best_bid_ask
        })
        .await
    }

    pub async fn subscribe_new_markets(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<NewMarketEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::NewMarket, true, |s| {
            &mut s.new_market
        })
        .await
    }

    pub async fn subscribe_market_resolutions(
        &self,
        asset_ids: Vec<String>,
    ) -> Result<EventStream<MarketResolvedEvent>, SdkError> {
        Inner::subscribe_market_stream(&self.inner, asset_ids, EventType::MarketResolved, true, |s| {
            &mut s.market_resolved
        })
        .await
    }

    // ─── User-channel streams ────────────────────────────────────────────

    pub async fn subscribe_user_orders(
        &self,
        markets: Vec<String>,
    ) -> Result<EventStream<OrderEvent>, SdkError> {
        Inner::subscribe_user_stream(&self.inner, markets, EventType::UserOrder, |s| &mut s.order)
            .await
    }

    pub async fn subscribe_user_trades(
        &self,
        markets: Vec<String>,
    ) -> Result<EventStream<TradeEvent>, SdkError> {
        Inner::subscribe_user_stream(&self.inner, markets, EventType::UserTrade, |s| &mut s.trade)
            .await
    }

    // ─── Engine-level subscription management ────────────────────────────

    /// Applies a raw subscription request (no subscriber stream involved).
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<(), SdkError> {
        Inner::apply_subscription(&self.inner, request, Operation::Subscribe).await
    }

    pub async fn unsubscribe(&self, mut request: SubscribeRequest) -> Result<(), SdkError> {
        request.operation = Some(Operation::Unsubscribe);
        Inner::apply_subscription(&self.inner, request, Operation::Unsubscribe).await
    }

    pub async fn unsubscribe_market_assets(&self, asset_ids: Vec<String>) -> Result<(), SdkError> {
        if asset_ids.is_empty() {
            return Err(SdkError::validation("asset ids required"));
        }
        self.unsubscribe(SubscribeRequest::market(asset_ids)).await
    }

    pub async fn unsubscribe_user_markets(&self, markets: Vec<String>) -> Result<(), SdkError> {
        if markets.is_empty() {
            return Err(SdkError::validation("markets required"));
        }
        self.unsubscribe(SubscribeRequest::user(markets)).await
    }

    /// Closes the engine: best-effort wire unsubscribes, connection close,
    /// task cancellation, and every subscriber queue closed exactly once.
    /// Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.cleanup_subscriptions().await;
        inner.market.cancel_tasks();
        inner.market.close_conn().await;
        inner.user.cancel_tasks();
        inner.user.close_conn().await;
        inner.set_conn_state(Channel::Market, ConnectionState::Disconnected, 0);
        inner.set_conn_state(Channel::User, ConnectionState::Disconnected, 0);
        inner.close_all_streams();
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

impl Inner {
    pub(crate) fn lock_subs(&self) -> std::sync::MutexGuard<'_, SubIndex> {
        self.subs.lock().expect("subscription index lock poisoned")
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StateTable> {
        self.state.lock().expect("state lock poisoned")
    }

    pub(crate) fn session(&self, channel: Channel) -> &ChannelSession {
        match channel {
            Channel::Market => &self.market,
            Channel::User => &self.user,
        }
    }

    fn next_sub_id(&self) -> String {
        (self.next_sub_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    pub(crate) fn set_conn_state(&self, channel: Channel, state: ConnectionState, attempt: u32) {
        let event = ConnectionStateEvent {
            channel,
            state,
            attempt,
            recorded_at_ms: now_millis(),
        };
        let subs: Vec<_> = {
            let mut table = self.lock_state();
            match channel {
                Channel::Market => table.market = state,
                Channel::User => table.user = state,
            }
            table.subs.values().cloned().collect()
        };
        for sub in subs {
            sub.try_send(event.clone());
        }
    }

    /// Serialized per channel on the init mutex; a concurrent `ensure` or
    /// reconnect short-circuits once the connection exists.
    pub(crate) async fn ensure_conn(this: &Arc<Self>, channel: Channel) -> Result<(), WsError> {
        if this.closing.load(Ordering::Acquire) {
            return Err(WsError::Closed);
        }
        let session = this.session(channel);
        let _guard = session.init_mu.lock().await;
        if session.is_connected().await {
            return Ok(());
        }
        this.set_conn_state(channel, ConnectionState::Connecting, 0);
        session.cancel_tasks();
        let token = session.fresh_token();
        match dial(&session.url).await {
            Ok((sink, source)) => {
                session.install(sink).await;
                this.set_conn_state(channel, ConnectionState::Connected, 0);
                session.mark_frame_received();
                Inner::spawn_connection_tasks(this, channel, source, token);
                Ok(())
            }
            Err(e) => {
                this.set_conn_state(channel, ConnectionState::Disconnected, 0);
                Err(e)
            }
        }
    }

    fn spawn_connection_tasks(
        this: &Arc<Self>,
        channel: Channel,
        source: WsSource,
        token: CancellationToken,
    ) {
        let reader = Arc::clone(this);
        let read_token = token.clone();
        tokio::spawn(async move { reader.read_loop(channel, source, read_token).await });
        if !this.config.disable_ping {
            let pinger = Arc::clone(this);
            tokio::spawn(async move { pinger.ping_loop(channel, token).await });
        }
    }

    /// Reads frames until cancellation or a read error. Every frame refreshes
    /// the heartbeat clock; a literal `PONG` is consumed silently; read
    /// errors trigger the reconnect loop unless the engine is closing, and a
    /// successful reconnect spawns a fresh read task before this one exits.
    async fn read_loop(
        self: Arc<Self>,
        channel: Channel,
        mut source: WsSource,
        token: CancellationToken,
    ) {
        use futures_util::StreamExt;

        let read_timeout = self.config.read_timeout;
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => return,
                frame = tokio::time::timeout(read_timeout, source.next()) => frame,
            };

            let message = match frame {
                Err(_) => Err(WsError::Read("read deadline exceeded".to_string())),
                Ok(None) => Err(WsError::Read("stream ended".to_string())),
                Ok(Some(Err(e))) => Err(WsError::from(e)),
                Ok(Some(Ok(message))) => Ok(message),
            };

            match message {
                Ok(message) => {
                    self.session(channel).mark_frame_received();
                    match message {
                        Message::Text(text) => {
                            if text == "PONG" {
                                debug!(channel = %channel, "received PONG");
                                continue;
                            }
                            if self.config.debug {
                                debug!(channel = %channel, raw = %text, "inbound frame");
                            }
                            self.process_raw(&text);
                        }
                        // tungstenite answers pings on flush; close frames
                        // surface as a terminated stream on the next read.
                        _ => {}
                    }
                }
                Err(e) => {
                    if self.closing.load(Ordering::Acquire) {
                        return;
                    }
                    if self.config.reconnect {
                        debug!(channel = %channel, error = %e, "read error, reconnecting");
                        if Inner::reconnect(&self, channel).await.is_ok() {
                            return;
                        }
                    }
                    error!(channel = %channel, error = %e, "read error");
                    self.set_conn_state(channel, ConnectionState::Disconnected, 0);
                    return;
                }
            }
        }
    }

    /// Sends a literal `PING` every heartbeat interval. When the timeout has
    /// elapsed without any inbound frame, the connection is closed so the
    /// read loop observes the error path and reconnects.
    async fn ping_loop(self: Arc<Self>, channel: Channel, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let timeout = self.config.heartbeat_timeout;
                    let session = self.session(channel);
                    if let Some(elapsed) = session.millis_since_last_frame() {
                        if elapsed > timeout.as_millis() as i64 {
                            warn!(
                                channel = %channel,
                                elapsed_ms = elapsed,
                                "heartbeat timeout, dropping connection"
                            );
                            session.close_conn().await;
                            return;
                        }
                    }
                    if session.write_text("PING".to_string()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Bounded exponential-backoff reconnect. Each attempt runs the full
    /// cancel/close/fresh-token/dial/spawn cycle under the init mutex, and a
    /// successful attempt replays the membership subscribe frame before the
    /// mutex is released, so no caller frame can slip in ahead of it.
    pub(crate) async fn reconnect(this: &Arc<Self>, channel: Channel) -> Result<(), WsError> {
        let cfg = &this.config;
        let mut delay = cfg.reconnect_delay;
        let mut attempt: i32 = 0;
        let mut last_err = WsError::ConnectionFailed("reconnect never attempted".to_string());

        while attempt < cfg.reconnect_max {
            if this.closing.load(Ordering::Acquire) {
                return Err(last_err);
            }
            if cfg.debug {
                debug!(channel = %channel, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "reconnect attempt");
            }
            this.set_conn_state(channel, ConnectionState::Reconnecting, (attempt + 1) as u32);
            tokio::time::sleep(delay).await;

            let session = this.session(channel);
            let guard = session.init_mu.lock().await;
            session.cancel_tasks();
            session.close_conn().await;
            let token = session.fresh_token();

            match dial(&session.url).await {
                Ok((sink, source)) => {
                    session.install(sink).await;
                    this.set_conn_state(channel, ConnectionState::Connected, 0);
                    session.mark_frame_received();
                    Inner::spawn_connection_tasks(this, channel, source, token);
                    this.resubscribe(channel).await;
                    drop(guard);
                    debug!(channel = %channel, "reconnect success");
                    return Ok(());
                }
                Err(e) => {
                    drop(guard);
                    debug!(channel = %channel, error = %e, "reconnect failed");
                    last_err = e;
                    delay = delay.mul_f64(cfg.reconnect_multiplier).min(cfg.reconnect_max_delay);
                    if delay.is_zero() {
                        delay = cfg.reconnect_delay;
                    }
                    attempt += 1;
                }
            }
        }
        this.set_conn_state(channel, ConnectionState::Disconnected, 0);
        Err(last_err)
    }

    /// Replays one subscribe frame carrying every id the membership still
    /// holds for the channel.
    async fn resubscribe(&self, channel: Channel) {
        let (assets, markets, custom, auth) = {
            let subs = self.lock_subs();
            (
                subs.market_refs.snapshot(),
                subs.user_refs.snapshot(),
                subs.custom_features,
                subs.last_auth.clone(),
            )
        };
        match channel {
            Channel::Market => {
                if assets.is_empty() {
                    return;
                }
                let frame = WireSubscription::market_subscribe(assets, custom);
                if let Err(e) = self.market.write_json(&frame).await {
                    warn!(error = %e, "market resubscribe failed");
                }
            }
            Channel::User => {
                let Some(auth) = auth else { return };
                if markets.is_empty() {
                    return;
                }
                let frame = WireSubscription::user_subscribe(markets, auth);
                if let Err(e) = self.user.write_json(&frame).await {
                    warn!(error = %e, "user resubscribe failed");
                }
            }
        }
    }

    fn resolve_auth(&self, explicit: Option<AuthPayload>) -> Option<AuthPayload> {
        explicit
            .or_else(|| {
                self.creds
                    .read()
                    .expect("creds lock poisoned")
                    .as_ref()
                    .and_then(AuthPayload::from_creds)
            })
            .or_else(|| self.lock_subs().last_auth.clone())
    }

    pub(crate) async fn subscribe_market_stream<E: Send + 'static>(
        this: &Arc<Self>,
        asset_ids: Vec<String>,
        event_type: EventType,
        custom: bool,
        map_of: fn(&mut SubIndex) -> &mut EntryMap<E>,
    ) -> Result<EventStream<E>, SdkError> {
        if asset_ids.is_empty() {
            return Err(SdkError::validation("asset ids required"));
        }

        let delta = {
            let mut subs = this.lock_subs();
            if custom {
                subs.custom_features = true;
            }
            subs.market_refs.add(&asset_ids)
        };
        Inner::ensure_conn(this, Channel::Market).await?;
        if !delta.is_empty() {
            let frame = WireSubscription::market_subscribe(delta, custom);
            this.market.write_json(&frame).await?;
        }

        let id = this.next_sub_id();
        let (entry, rx, err_rx) =
            SubscriptionEntry::new(id, Channel::Market, event_type, &asset_ids, &[]);
        map_of(&mut this.lock_subs()).insert(entry.id.clone(), Arc::clone(&entry));

        let inner = Arc::clone(this);
        Ok(EventStream::new(rx, err_rx, move || {
            if !entry.close() {
                return None;
            }
            let delta = {
                let mut subs = inner.lock_subs();
                map_of(&mut subs).remove(&entry.id);
                subs.market_refs.remove(&asset_ids)
            };
            if delta.is_empty() {
                return None;
            }
            let cleanup: CleanupFuture = Box::pin(async move {
                if inner.market.is_connected().await {
                    let frame = WireSubscription::market_unsubscribe(delta);
                    let _ = inner.market.write_json(&frame).await;
                }
            });
            Some(cleanup)
        }))
    }

    pub(crate) async fn subscribe_user_stream<E: Send + 'static>(
        this: &Arc<Self>,
        markets: Vec<String>,
        event_type: EventType,
        map_of: fn(&mut SubIndex) -> &mut EntryMap<E>,
    ) -> Result<EventStream<E>, SdkError> {
        if markets.is_empty() {
            return Err(SdkError::validation("markets required"));
        }
        let auth = this
            .resolve_auth(None)
            .ok_or_else(|| SdkError::validation("user subscription requires API key credentials"))?;

        let delta = {
            let mut subs = this.lock_subs();
            subs.last_auth = Some(auth.clone());
            subs.user_refs.add(&markets)
        };
        Inner::ensure_conn(this, Channel::User).await?;
        if !delta.is_empty() {
            let frame = WireSubscription::user_subscribe(delta, auth);
            this.user.write_json(&frame).await?;
        }

        let id = this.next_sub_id();
        let (entry, rx, err_rx) =
            SubscriptionEntry::new(id, Channel::User, event_type, &[], &markets);
        map_of(&mut this.lock_subs()).insert(entry.id.clone(), Arc::clone(&entry));

        let inner = Arc::clone(this);
        Ok(EventStream::new(rx, err_rx, move || {
            if !entry.close() {
                return None;
            }
            let (delta, auth) = {
                let mut subs = inner.lock_subs();
                map_of(&mut subs).remove(&entry.id);
                (subs.user_refs.remove(&markets), subs.last_auth.clone())
            };
            if delta.is_empty() {
                return None;
            }
            let auth = auth.or_else(|| inner.resolve_auth(None))?;
            let cleanup: CleanupFuture = Box::pin(async move {
                if inner.user.is_connected().await {
                    let frame = WireSubscription::user_unsubscribe(delta, auth);
                    let _ = inner.user.write_json(&frame).await;
                }
            });
            Some(cleanup)
        }))
    }

    async fn apply_subscription(
        this: &Arc<Self>,
        mut request: SubscribeRequest,
        default_op: Operation,
    ) -> Result<(), SdkError> {
        if request.channel.is_none() {
            request.channel = if !request.asset_ids.is_empty() {
                Some(Channel::Market)
            } else if !request.markets.is_empty() {
                Some(Channel::User)
            } else {
                return Err(SdkError::validation("subscription channel is required"));
            };
        }
        let channel = request.channel.expect("channel inferred above");
        match channel {
            Channel::Market if request.asset_ids.is_empty() => {
                return Err(SdkError::validation("asset ids required"));
            }
            Channel::User if request.markets.is_empty() => {
                return Err(SdkError::validation("markets required"));
            }
            _ => {}
        }
        let operation = request.operation.unwrap_or(default_op);

        match channel {
            Channel::Market => {
                let custom = request.custom_features;
                match operation {
                    Operation::Subscribe => {
                        let delta = {
                            let mut subs = this.lock_subs();
                            if custom {
                                subs.custom_features = true;
                            }
                            subs.market_refs.add(&request.asset_ids)
                        };
                        Inner::ensure_conn(this, Channel::Market).await?;
                        if delta.is_empty() {
                            return Ok(());
                        }
                        let frame = WireSubscription::market_subscribe(delta, custom);
                        Ok(this.market.write_json(&frame).await?)
                    }
                    Operation::Unsubscribe => {
                        let delta = this.lock_subs().market_refs.remove(&request.asset_ids);
                        if delta.is_empty() {
                            return Ok(());
                        }
                        Inner::ensure_conn(this, Channel::Market).await?;
                        let frame = WireSubscription::market_unsubscribe(delta);
                        Ok(this.market.write_json(&frame).await?)
                    }
                }
            }
            Channel::User => {
                let explicit = request.auth.as_ref().and_then(AuthPayload::from_creds);
                let auth = this.resolve_auth(explicit).ok_or_else(|| {
                    SdkError::validation("user subscription requires API key credentials")
                })?;
                match operation {
                    Operation::Subscribe => {
                        let delta = {
                            let mut subs = this.lock_subs();
                            subs.last_auth = Some(auth.clone());
                            subs.user_refs.add(&request.markets)
                        };
                        Inner::ensure_conn(this, Channel::User).await?;
                        if delta.is_empty() {
                            return Ok(());
                        }
                        let frame = WireSubscription::user_subscribe(delta, auth);
                        Ok(this.user.write_json(&frame).await?)
                    }
                    Operation::Unsubscribe => {
                        let delta = this.lock_subs().user_refs.remove(&request.markets);
                        if delta.is_empty() {
                            return Ok(());
                        }
                        Inner::ensure_conn(this, Channel::User).await?;
                        let frame = WireSubscription::user_unsubscribe(delta, auth);
                        Ok(this.user.write_json(&frame).await?)
                    }
                }
            }
        }
    }

    /// Best-effort wire unsubscribes for everything still held, sent during
    /// engine close. Write failures are expected here and swallowed.
    async fn cleanup_subscriptions(&self) {
        let (assets, markets, _, auth) = {
            let subs = self.lock_subs();
            (
                subs.market_refs.snapshot(),
                subs.user_refs.snapshot(),
                subs.custom_features,
                subs.last_auth.clone(),
            )
        };
        if !assets.is_empty() && self.market.is_connected().await {
            let frame = WireSubscription::market_unsubscribe(assets);
            let _ = self.market.write_json(&frame).await;
        }
        if !markets.is_empty() && self.user.is_connected().await {
            let auth = auth.or_else(|| self.resolve_auth(None));
            if let Some(auth) = auth {
                let frame = WireSubscription::user_unsubscribe(markets, auth);
                let _ = self.user.write_json(&frame).await;
            }
        }
    }

    /// Closes every subscriber queue exactly once.
    fn close_all_streams(&self) {
        fn close_map<E>(map: &mut EntryMap<E>) {
            for entry in map.values() {
                entry.close();
            }
            map.clear();
        }

        {
            let mut subs = self.lock_subs();
            close_map(&mut subs.orderbook);
            close_map(&mut subs.price);
            close_map(&mut subs.midpoint);
            close_map(&mut subs.last_trade);
            close_map(&mut subs.tick_size);
            close_map(&mut subs.best_bid_ask);
            close_map(&mut subs.new_market);
            close_map(&mut subs.market_resolved);
            close_map(&mut subs.trade);
            close_map(&mut subs.order);
        }
        close_map(&mut self.lock_state().subs);
    }
}
