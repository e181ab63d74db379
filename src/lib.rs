//! # Polymarket SDK core
//!
//! Rust client core for the Polymarket CLOB exchange: the two real-time
//! streaming engines and the signable-order builder.
//!
//! ## Architecture
//!
//! 1. **Shared** — decimal scaling, time helpers
//! 2. **Auth** — credentials, the out-of-crate [`auth::Signer`] seam,
//!    counterfactual wallet derivation
//! 3. **CLOB** — [`clob::OrderBuilder`], book analysis, cursor pagination
//! 4. **Trading WS** — [`ws::WsClient`], multiplexing the market and user
//!    channels among typed, lag-aware subscriber streams with
//!    reference-counted membership and reconnect-with-resubscribe
//! 5. **Data feed** — [`feed::FeedClient`], topic-keyed subscriptions over
//!    one shared connection
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use polymarket_sdk::prelude::*;
//!
//! let client = WsClient::connect("").await?; // production endpoints
//! let mut books = client.subscribe_orderbook(vec![token_id.clone()]).await?;
//! while let Some(book) = books.recv().await {
//!     println!("{} bids={} asks={}", book.asset_id, book.bids.len(), book.asks.len());
//! }
//! ```

// ── Layer 1: Shared ──────────────────────────────────────────────────────────

/// Decimal scaling and time helpers.
pub mod shared;

/// Unified SDK error types.
pub mod error;

/// Network URL constants and endpoint derivation.
pub mod network;

// ── Layer 2: Auth ────────────────────────────────────────────────────────────

/// Credentials, the signer seam, and wallet derivation.
pub mod auth;

// ── Layer 3: CLOB ────────────────────────────────────────────────────────────

/// Order construction, book analysis, and pagination.
pub mod clob;

// ── Layer 4/5: Streaming ─────────────────────────────────────────────────────

/// Subscriber stream handles shared by both engines.
mod stream;

/// Trading-channel streaming engine.
pub mod ws;

/// Real-time data feed engine.
pub mod feed;

pub use stream::EventStream;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    pub use crate::auth::{ApiCreds, Address, SignatureType, Signer};
    pub use crate::clob::{
        slippage_guard_price, top_of_book, BookSummary, MarketDataTransport, Order, OrderBook,
        OrderBuilder, OrderType, PriceLevel, Side, SignableOrder,
    };
    pub use crate::error::{SdkError, WsError};
    pub use crate::feed::{
        ChainlinkPriceEvent, CommentEvent, CommentFilter, CryptoPriceEvent, FeedClient,
        FeedConfig, FeedMessage, FeedSubscription, Filters, OrdersMatchedEvent, Topic,
    };
    pub use crate::network::{CLOB_WS_URL, FEED_WS_URL};
    pub use crate::stream::EventStream;
    pub use crate::ws::{
        BestBidAskEvent, Channel, ConnectionState, ConnectionStateEvent, LastTradePriceEvent,
        MarketResolvedEvent, MidpointEvent, NewMarketEvent, OrderEvent, OrderbookEvent,
        PriceChangeEvent, SubscribeRequest, TickSizeChangeEvent, TradeEvent, WsClient, WsConfig,
    };
}
