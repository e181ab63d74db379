//! Inbound frame decoding and fan-out to matching subscribers.

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::ws::client::{EntryMap, Inner};
use crate::ws::entry::SubscriptionEntry;
use crate::ws::events::{
    BestBidAskEvent, LastTradePriceEvent, MarketResolvedEvent, MidpointEvent, NewMarketEvent,
    OrderEvent, OrderbookEvent, OrderbookLevel, PriceEvent, TickSizeChangeEvent, TradeEvent,
};

/// Book frame as served: some feeds use `buys`/`sells` for `bids`/`asks`.
#[derive(Debug, Default, Deserialize)]
struct BookWire {
    #[serde(default)]
    asset_id: String,
    #[serde(default)]
    market: String,
    #[serde(default)]
    bids: Vec<OrderbookLevel>,
    #[serde(default)]
    asks: Vec<OrderbookLevel>,
    #[serde(default)]
    buys: Vec<OrderbookLevel>,
    #[serde(default)]
    sells: Vec<OrderbookLevel>,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    timestamp: String,
}

/// Market lifecycle frames spell the asset list `assets_ids` (with an
/// `asset_ids` variant in the wild).
#[derive(Debug, Default, Deserialize)]
struct MarketLifecycleWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    market: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    assets_ids: Vec<String>,
    #[serde(default)]
    asset_ids: Vec<String>,
    #[serde(default)]
    outcomes: Vec<String>,
    #[serde(default)]
    winning_asset_id: String,
    #[serde(default)]
    winning_outcome: String,
    #[serde(default)]
    event_message: Option<Value>,
    #[serde(default)]
    timestamp: String,
}

impl MarketLifecycleWire {
    fn take_asset_ids(&mut self) -> Vec<String> {
        if self.assets_ids.is_empty() {
            std::mem::take(&mut self.asset_ids)
        } else {
            std::mem::take(&mut self.assets_ids)
        }
    }
}

fn snapshot<E>(map: &EntryMap<E>) -> Vec<Arc<SubscriptionEntry<E>>> {
    map.values().cloned().collect()
}

fn decode<T: serde::de::DeserializeOwned>(raw: Value) -> Option<T> {
    match serde_json::from_value(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "failed to decode event payload");
            None
        }
    }
}

impl Inner {
    /// Parses a raw text frame: one JSON object or an array of objects.
    pub(crate) fn process_raw(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to parse inbound frame");
                return;
            }
        };
        match value {
            Value::Array(items) => {
                for item in items {
                    if item.is_object() {
                        self.process_event(item);
                    }
                }
            }
            item @ Value::Object(_) => self.process_event(item),
            _ => {}
        }
    }

    /// Routes one event object by its discriminant (`event_type`, falling
    /// back to `type`). Unknown discriminants are ignored.
    pub(crate) fn process_event(&self, raw: Value) {
        let discriminant = raw
            .get("event_type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| raw.get("type").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        match discriminant.as_str() {
            "book" | "orderbook" => self.handle_book(raw),
            "price" | "price_change" => {
                if let Some(event) = decode::<PriceEvent>(raw) {
                    self.dispatch_price(event);
                }
            }
            "midpoint" => {
                if let Some(event) = decode::<MidpointEvent>(raw) {
                    self.dispatch_midpoint(event);
                }
            }
            "last_trade_price" => {
                if let Some(event) = decode::<LastTradePriceEvent>(raw) {
                    self.dispatch_last_trade(event);
                }
            }
            "tick_size_change" => {
                if let Some(event) = decode::<TickSizeChangeEvent>(raw) {
                    self.dispatch_tick_size(event);
                }
            }
            "best_bid_ask" => {
                if let Some(event) = decode::<BestBidAskEvent>(raw) {
                    self.dispatch_best_bid_ask(event);
                }
            }
            "new_market" => {
                if let Some(mut wire) = decode::<MarketLifecycleWire>(raw) {
                    let asset_ids = wire.take_asset_ids();
                    self.dispatch_new_market(NewMarketEvent {
                        id: wire.id,
                        question: wire.question,
                        market: wire.market,
                        slug: wire.slug,
                        description: wire.description,
                        asset_ids,
                        outcomes: wire.outcomes,
                        event_message: wire.event_message,
                        timestamp: wire.timestamp,
                    });
                }
            }
            "market_resolved" => {
                if let Some(mut wire) = decode::<MarketLifecycleWire>(raw) {
                    let asset_ids = wire.take_asset_ids();
                    self.dispatch_market_resolved(MarketResolvedEvent {
                        id: wire.id,
                        question: wire.question,
                        market: wire.market,
                        slug: wire.slug,
                        description: wire.description,
                        asset_ids,
                        outcomes: wire.outcomes,
                        winning_asset_id: wire.winning_asset_id,
                        winning_outcome: wire.winning_outcome,
                        event_message: wire.event_message,
                        timestamp: wire.timestamp,
                    });
                }
            }
            "trade" => {
                if let Some(event) = decode::<TradeEvent>(raw) {
                    self.dispatch_trade(event);
                }
            }
            "order" => {
                if let Some(event) = decode::<OrderEvent>(raw) {
                    self.dispatch_order(event);
                }
            }
            _ => {}
        }
    }

    /// Decodes a book frame (accepting `buys`/`sells` aliases) and, when
    /// both sides are present, synthesizes a midpoint event dispatched after
    /// the book event.
    fn handle_book(&self, raw: Value) {
        let Some(wire) = decode::<BookWire>(raw) else {
            return;
        };
        let mut event = OrderbookEvent {
            asset_id: wire.asset_id,
            market: wire.market,
            bids: wire.bids,
            asks: wire.asks,
            hash: wire.hash,
            timestamp: wire.timestamp,
        };
        if event.bids.is_empty() && !wire.buys.is_empty() {
            event.bids = wire.buys;
        }
        if event.asks.is_empty() && !wire.sells.is_empty() {
            event.asks = wire.sells;
        }

        let midpoint = synthesize_midpoint(&event);
        self.dispatch_orderbook(event);
        if let Some(midpoint) = midpoint {
            self.dispatch_midpoint(midpoint);
        }
    }

    fn dispatch_orderbook(&self, event: OrderbookEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().orderbook);
        for sub in subs {
            if sub.matches_asset(&event.asset_id) {
                sub.try_send(event.clone());
            }
        }
    }

    /// Each inner price change is dispatched as its own event.
    fn dispatch_price(&self, event: PriceEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().price);
        for sub in subs {
            for change in &event.price_changes {
                if sub.matches_asset(&change.asset_id) {
                    sub.try_send(change.clone());
                }
            }
        }
    }

    fn dispatch_midpoint(&self, event: MidpointEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().midpoint);
        for sub in subs {
            if sub.matches_asset(&event.asset_id) {
                sub.try_send(event.clone());
            }
        }
    }

    fn dispatch_last_trade(&self, event: LastTradePriceEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().last_trade);
        for sub in subs {
            if sub.matches_asset(&event.asset_id) {
                sub.try_send(event.clone());
            }
        }
    }

    fn dispatch_tick_size(&self, event: TickSizeChangeEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().tick_size);
        for sub in subs {
            if sub.matches_asset(&event.asset_id) {
                sub.try_send(event.clone());
            }
        }
    }

    fn dispatch_best_bid_ask(&self, event: BestBidAskEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().best_bid_ask);
        for sub in subs {
            if sub.matches_asset(&event.asset_id) {
                sub.try_send(event.clone());
            }
        }
    }

    fn dispatch_new_market(&self, event: NewMarketEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().new_market);
        for sub in subs {
            if sub.matches_any_asset(&event.asset_ids) {
                sub.try_send(event.clone());
            }
        }
    }

    fn dispatch_market_resolved(&self, event: MarketResolvedEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().market_resolved);
        for sub in subs {
            if sub.matches_any_asset(&event.asset_ids) {
                sub.try_send(event.clone());
            }
        }
    }

    /// Trades additionally filter by market; an event without a market
    /// reaches every subscriber.
    fn dispatch_trade(&self, event: TradeEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().trade);
        for sub in subs {
            if !event.market.is_empty() && !sub.matches_market(&event.market) {
                continue;
            }
            sub.try_send(event.clone());
        }
    }

    /// Order events have no per-subscriber filter.
    fn dispatch_order(&self, event: OrderEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let subs = snapshot(&self.lock_subs().order);
        for sub in subs {
            sub.try_send(event.clone());
        }
    }
}

fn synthesize_midpoint(event: &OrderbookEvent) -> Option<MidpointEvent> {
    let best_bid = event.bids.first()?;
    let best_ask = event.asks.first()?;
    let bid = Decimal::from_str(&best_bid.price).ok()?;
    let ask = Decimal::from_str(&best_ask.price).ok()?;
    let mid = (bid + ask) / Decimal::from(2);
    Some(MidpointEvent {
        asset_id: event.asset_id.clone(),
        midpoint: mid.normalize().to_string(),
        timestamp: event.timestamp.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::client::WsClient;
    use crate::ws::config::WsConfig;
    use crate::ws::events::{Channel, EventType};
    use serde_json::json;

    fn client() -> WsClient {
        WsClient::detached("wss://example.com", WsConfig::default())
    }

    fn register<E: Send + 'static>(
        client: &WsClient,
        event_type: EventType,
        assets: &[&str],
        markets: &[&str],
        map_of: fn(&mut crate::ws::client::SubIndex) -> &mut EntryMap<E>,
    ) -> (
        tokio::sync::mpsc::Receiver<E>,
        tokio::sync::mpsc::Receiver<crate::error::WsError>,
    ) {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);

        let assets: Vec<String> = assets.iter().map(|s| s.to_string()).collect();
        let markets: Vec<String> = markets.iter().map(|s| s.to_string()).collect();
        let (entry, rx, err_rx) = SubscriptionEntry::new(
            format!("test-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            Channel::Market,
            event_type,
            &assets,
            &markets,
        );
        map_of(&mut client.inner().lock_subs()).insert(entry.id.clone(), entry);
        (rx, err_rx)
    }

    #[tokio::test]
    async fn test_book_event_reaches_matching_subscriber() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::Orderbook, &["a1"], &[], |s| {
            &mut s.orderbook
        });
        let (mut other_rx, _) = register(&client, EventType::Orderbook, &["zz"], &[], |s| {
            &mut s.orderbook
        });

        client.inner().process_event(json!({
            "event_type": "book",
            "asset_id": "a1",
            "bids": [{"price": "0.5", "size": "100"}],
            "asks": [{"price": "0.6", "size": "50"}]
        }));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.asset_id, "a1");
        assert_eq!(event.bids[0].price, "0.5");
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_buys_sells_aliases() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::Orderbook, &[], &[], |s| &mut s.orderbook);

        client.inner().process_event(json!({
            "type": "book",
            "asset_id": "a1",
            "buys": [{"price": "0.4", "size": "10"}],
            "sells": [{"price": "0.7", "size": "20"}]
        }));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.bids[0].price, "0.4");
        assert_eq!(event.asks[0].price, "0.7");
    }

    #[tokio::test]
    async fn test_midpoint_synthesized_from_book() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::Midpoint, &["a1"], &[], |s| {
            &mut s.midpoint
        });

        client.inner().process_event(json!({
            "event_type": "book",
            "asset_id": "a1",
            "bids": [{"price": "0.5", "size": "100"}],
            "asks": [{"price": "0.6", "size": "50"}]
        }));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.midpoint, "0.55");
    }

    #[tokio::test]
    async fn test_no_midpoint_for_one_sided_book() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::Midpoint, &[], &[], |s| &mut s.midpoint);

        client.inner().process_event(json!({
            "event_type": "book",
            "asset_id": "a1",
            "bids": [{"price": "0.5", "size": "100"}],
            "asks": []
        }));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_price_changes_demultiplexed() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::PriceChange, &["a2"], &[], |s| {
            &mut s.price
        });

        client.inner().process_event(json!({
            "event_type": "price_change",
            "market": "0xmkt",
            "price_changes": [
                {"asset_id": "a1", "price": "0.50", "size": "1"},
                {"asset_id": "a2", "price": "0.51", "size": "2"},
                {"asset_id": "a2", "price": "0.52", "size": "3"}
            ]
        }));

        assert_eq!(rx.try_recv().unwrap().price, "0.51");
        assert_eq!(rx.try_recv().unwrap().price, "0.52");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_events_match_any_asset_and_alias() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::NewMarket, &["a2"], &[], |s| {
            &mut s.new_market
        });

        // `assets_ids` spelling
        client.inner().process_event(json!({
            "event_type": "new_market",
            "id": "m1",
            "assets_ids": ["a1", "a2"]
        }));
        assert_eq!(rx.try_recv().unwrap().id, "m1");

        // `asset_ids` spelling
        client.inner().process_event(json!({
            "event_type": "new_market",
            "id": "m2",
            "asset_ids": ["a2"]
        }));
        assert_eq!(rx.try_recv().unwrap().id, "m2");

        // no overlap
        client.inner().process_event(json!({
            "event_type": "new_market",
            "id": "m3",
            "assets_ids": ["zz"]
        }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trade_filters_by_market() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::UserTrade, &[], &["m1"], |s| &mut s.trade);

        client.inner().process_event(json!({
            "event_type": "trade",
            "id": "t1",
            "market": "m1"
        }));
        client.inner().process_event(json!({
            "event_type": "trade",
            "id": "t2",
            "market": "m2"
        }));
        // Market-less trades reach everyone.
        client.inner().process_event(json!({
            "event_type": "trade",
            "id": "t3"
        }));

        assert_eq!(rx.try_recv().unwrap().id, "t1");
        assert_eq!(rx.try_recv().unwrap().id, "t3");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_array_frames_and_unknown_discriminants() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::Midpoint, &[], &[], |s| &mut s.midpoint);

        client.inner().process_raw(
            r#"[
                {"event_type": "midpoint", "asset_id": "a1", "midpoint": "0.42"},
                {"event_type": "martian_weather", "asset_id": "a1"},
                {"event_type": "midpoint", "asset_id": "a1", "midpoint": "0.43"}
            ]"#,
        );

        assert_eq!(rx.try_recv().unwrap().midpoint, "0.42");
        assert_eq!(rx.try_recv().unwrap().midpoint, "0.43");
        assert!(rx.try_recv().is_err());

        // Garbage frames are ignored without panicking.
        client.inner().process_raw("not json");
        client.inner().process_raw("42");
    }

    #[tokio::test]
    async fn test_legacy_type_discriminant() {
        let client = client();
        let (mut rx, _) = register(&client, EventType::LastTradePrice, &[], &[], |s| {
            &mut s.last_trade
        });

        client.inner().process_event(json!({
            "type": "last_trade_price",
            "asset_id": "a1",
            "price": "0.61"
        }));
        assert_eq!(rx.try_recv().unwrap().price, "0.61");
    }
}
