//! Data-feed wire types and typed event payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::ApiCreds;

/// Server-side topic namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CryptoPrices,
    ChainlinkPrices,
    Comments,
    Activity,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::CryptoPrices => "crypto_prices",
            Topic::ChainlinkPrices => "chainlink_prices",
            Topic::Comments => "comments",
            Topic::Activity => "activity",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound feed message; the payload stays raw JSON until a typed
/// stream maps it.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedMessage {
    #[serde(default)]
    pub topic: String,
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Credentials as carried in a feed subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClobAuth {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ClobAuth {
    pub fn from_creds(creds: &ApiCreds) -> Self {
        Self {
            key: creds.api_key.clone(),
            secret: creds.secret.clone(),
            passphrase: creds.passphrase.clone(),
        }
    }
}

/// Topic filters: either a symbol list, or a server-defined map encoded as a
/// JSON string, at the caller's option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filters {
    Symbols(Vec<String>),
    Raw(String),
}

/// One subscription as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub topic: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub clob_auth: Option<ClobAuth>,
}

impl FeedSubscription {
    pub fn new(topic: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            msg_type: msg_type.into(),
            filters: None,
            clob_auth: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedAction {
    Subscribe,
    Unsubscribe,
}

/// The outbound frame bundling one or more subscription changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRequest {
    pub action: FeedAction,
    pub subscriptions: Vec<FeedSubscription>,
}

/// Envelope metadata stamped onto every typed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseEvent {
    pub topic: String,
    pub message_type: String,
    pub message_timestamp: i64,
}

/// Spot price update from the crypto-prices topic.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoPriceEvent {
    #[serde(skip)]
    pub base: BaseEvent,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub timestamp: i64,
}

/// Oracle round update from the chainlink-prices topic.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainlinkPriceEvent {
    #[serde(skip)]
    pub base: BaseEvent,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Comment or reaction activity.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentEvent {
    #[serde(skip)]
    pub base: BaseEvent,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub parent_entity_type: String,
    #[serde(default)]
    pub parent_entity_id: String,
    #[serde(default)]
    pub user_address: String,
    #[serde(default)]
    pub created_at: String,
}

/// Matched-orders activity event.
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersMatchedEvent {
    #[serde(skip)]
    pub base: BaseEvent,
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
    pub timestamp: i64,
}

/// Comment subscription kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentType {
    CommentCreated,
    CommentRemoved,
    ReactionCreated,
    ReactionRemoved,
}

impl CommentType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentType::CommentCreated => "comment_created",
            CommentType::CommentRemoved => "comment_removed",
            CommentType::ReactionCreated => "reaction_created",
            CommentType::ReactionRemoved => "reaction_removed",
        }
    }
}

/// Optional narrowing for comment subscriptions.
#[derive(Debug, Clone, Default)]
pub struct CommentFilter {
    pub comment_type: Option<CommentType>,
    pub auth: Option<ApiCreds>,
    pub filters: Option<Filters>,
}

/// Parses a raw frame into one or more feed messages; a frame may be one
/// object or an array of objects.
pub(crate) fn parse_messages(raw: &str) -> Result<Vec<FeedMessage>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<FeedMessage>>(trimmed)
    } else {
        serde_json::from_str::<FeedMessage>(trimmed).map(|msg| vec![msg])
    }
}
