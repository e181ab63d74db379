//! Trading-channel streaming engine.
//!
//! One [`WsClient`] multiplexes the market and user WebSocket channels among
//! many subscribers: membership is reference-counted so the wire sees one
//! subscribe/unsubscribe per id, inbound frames fan out to typed bounded
//! streams, and each channel runs heartbeats plus a bounded
//! exponential-backoff reconnect loop that replays the membership on a new
//! connection.

pub mod config;
pub mod events;
pub mod messages;

mod client;
mod dispatch;
mod entry;
mod membership;
pub(crate) mod session;

pub use client::{SubscribeRequest, WsClient};
pub use config::WsConfig;
pub use events::{
    BestBidAskEvent, Channel, ConnectionState, ConnectionStateEvent, EventType,
    LastTradePriceEvent, MarketResolvedEvent, MidpointEvent, NewMarketEvent, OrderEvent,
    OrderbookEvent, OrderbookLevel, PriceChangeEvent, PriceEvent, TickSizeChangeEvent, TradeEvent,
};
pub use messages::{AuthPayload, Operation, WireSubscription};
