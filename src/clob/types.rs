//! Signable-order wire types and the market-data transport seam.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(SdkError::validation(format!(
                "side must be BUY or SELL, got {other:?}"
            ))),
        }
    }
}

/// Order time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "GTD")]
    Gtd,
    #[serde(rename = "FAK")]
    Fak,
    #[serde(rename = "FOK")]
    Fok,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Gtc => "GTC",
            OrderType::Gtd => "GTD",
            OrderType::Fak => "FAK",
            OrderType::Fok => "FOK",
        };
        f.write_str(s)
    }
}

/// A signable order in the exchange's JSON shape.
///
/// Integer fields are base-10 strings; amounts are USDC base units (x 10^6);
/// `signatureType` is the bare numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "makerAmount")]
    pub maker_amount: String,
    #[serde(rename = "takerAmount")]
    pub taker_amount: String,
    pub expiration: String,
    pub side: Side,
    #[serde(rename = "feeRateBps")]
    pub fee_rate_bps: String,
    pub nonce: String,
    #[serde(rename = "signatureType")]
    pub signature_type: u8,
}

/// An order paired with its submission metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignableOrder {
    pub order: Order,
    pub order_type: OrderType,
    pub post_only: Option<bool>,
}

/// One aggregated price level. Prices and sizes stay decimal strings on the
/// wire; book arrays keep the exchange convention of best level last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: String,
    pub size: String,
}

impl PriceLevel {
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            size: size.into(),
        }
    }
}

/// An aggregated order book snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub hash: String,
}

/// Market-data lookups the order builder performs when a transport is
/// available. The HTTP layer implementing this lives outside the core.
#[async_trait]
pub trait MarketDataTransport: Send + Sync {
    /// The market's minimum tick size for the token.
    async fn minimum_tick_size(&self, token_id: &str) -> Result<Decimal, SdkError>;

    /// The market's maker fee rate in basis points.
    async fn fee_rate_bps(&self, token_id: &str) -> Result<i64, SdkError>;

    /// The current aggregated book for the token.
    async fn order_book(&self, token_id: &str) -> Result<OrderBook, SdkError>;
}
