//! Real-time data feed streaming engine.
//!
//! A single shared connection with topic-keyed, reference-counted
//! subscriptions, typed mapped streams, a literal-`PING` keepalive, and a
//! fixed-delay reconnect supervisor (a zero attempt cap means unlimited
//! retries here).

pub mod config;
pub mod types;

mod client;
mod entry;

pub use client::{FeedClient, FeedStateEvent};
pub use config::FeedConfig;
pub use types::{
    BaseEvent, ChainlinkPriceEvent, ClobAuth, CommentEvent, CommentFilter, CommentType,
    CryptoPriceEvent, FeedAction, FeedMessage, FeedRequest, FeedSubscription, Filters,
    OrdersMatchedEvent, Topic,
};
