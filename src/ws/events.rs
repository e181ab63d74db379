//! Trading-channel enumerations and inbound event types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical trading channel. Market is public; User is credential-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Market,
    User,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Market => "market",
            Channel::User => "user",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of event kinds the dispatcher produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Orderbook,
    PriceChange,
    Midpoint,
    LastTradePrice,
    TickSizeChange,
    BestBidAsk,
    NewMarket,
    MarketResolved,
    UserOrder,
    UserTrade,
    ConnectionState,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Orderbook => "book",
            EventType::PriceChange => "price_change",
            EventType::Midpoint => "midpoint",
            EventType::LastTradePrice => "last_trade_price",
            EventType::TickSizeChange => "tick_size_change",
            EventType::BestBidAsk => "best_bid_ask",
            EventType::NewMarket => "new_market",
            EventType::MarketResolved => "market_resolved",
            EventType::UserOrder => "order",
            EventType::UserTrade => "trade",
            EventType::ConnectionState => "connection_state",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Emitted to connection-state subscribers on every transition, plus a
/// snapshot on subscribe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStateEvent {
    pub channel: Channel,
    pub state: ConnectionState,
    /// Reconnect attempt number, zero outside the reconnect loop.
    pub attempt: u32,
    pub recorded_at_ms: i64,
}

/// One aggregated book level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
}

/// Full book snapshot or update for one asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderbookEvent {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub bids: Vec<OrderbookLevel>,
    #[serde(default)]
    pub asks: Vec<OrderbookLevel>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub timestamp: String,
}

/// A single price-level change; the wire batches these per market.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_ask: String,
    #[serde(default)]
    pub hash: String,
}

/// Wire container for a batch of price changes on one market.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceEvent {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub price_changes: Vec<PriceChangeEvent>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MidpointEvent {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub midpoint: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastTradePriceEvent {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickSizeChangeEvent {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub old_tick_size: String,
    #[serde(default)]
    pub new_tick_size: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BestBidAskEvent {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_ask: String,
    #[serde(default)]
    pub spread: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMarketEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub event_message: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketResolvedEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub winning_asset_id: String,
    #[serde(default)]
    pub winning_outcome: String,
    #[serde(default)]
    pub event_message: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: String,
}

/// User-channel fill notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub taker_order_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub timestamp: String,
}

/// User-channel order lifecycle notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub original_size: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serialization() {
        assert_eq!(serde_json::to_string(&Channel::Market).unwrap(), "\"market\"");
        assert_eq!(serde_json::to_string(&Channel::User).unwrap(), "\"user\"");
    }

    #[test]
    fn test_price_event_parses_batch() {
        let json = r#"{
            "market": "0xmkt",
            "price_changes": [
                {"asset_id": "a1", "price": "0.51", "size": "10", "side": "BUY"},
                {"asset_id": "a2", "price": "0.49", "size": "5", "side": "SELL"}
            ]
        }"#;
        let event: PriceEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.price_changes.len(), 2);
        assert_eq!(event.price_changes[0].asset_id, "a1");
        assert_eq!(event.price_changes[1].price, "0.49");
    }

    #[test]
    fn test_partial_order_event_parses() {
        let event: OrderEvent = serde_json::from_str(r#"{"id": "o1"}"#).unwrap();
        assert_eq!(event.id, "o1");
        assert!(event.market.is_empty());
    }
}
