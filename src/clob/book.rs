//! Aggregated-book analysis: top-of-book parsing, spread/imbalance summary,
//! and the slippage guard used when turning a mid quote into a price cap.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::clob::types::{OrderBook, PriceLevel, Side};
use crate::error::SdkError;

/// Parses the first level of a book side into `(price, depth)`.
pub fn top_of_book(levels: &[PriceLevel]) -> Result<(Decimal, Decimal), SdkError> {
    let level = levels
        .first()
        .ok_or_else(|| SdkError::validation("empty book side"))?;
    let price = Decimal::from_str(&level.price)
        .map_err(|e| SdkError::validation(format!("bad price {:?}: {e}", level.price)))?;
    let depth = Decimal::from_str(&level.size)
        .map_err(|e| SdkError::validation(format!("bad size {:?}: {e}", level.size)))?;
    Ok((price, depth))
}

/// Derived quote metrics for one token's book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub bid_depth: Decimal,
    pub ask_depth: Decimal,
    pub mid: Decimal,
    pub spread: Decimal,
    pub spread_bps: Decimal,
    /// `(bid_depth - ask_depth) / (bid_depth + ask_depth)`, in [-1, 1].
    pub imbalance: Decimal,
}

impl BookSummary {
    /// Computes quote metrics from a two-sided book. Fails on an empty side
    /// or a crossed book.
    pub fn analyze(book: &OrderBook) -> Result<Self, SdkError> {
        let (best_bid, bid_depth) = top_of_book(&book.bids)?;
        let (best_ask, ask_depth) = top_of_book(&book.asks)?;
        if best_ask <= best_bid {
            return Err(SdkError::validation(format!(
                "crossed book: bid {best_bid} >= ask {best_ask}"
            )));
        }

        let two = Decimal::from(2);
        let mid = (best_bid + best_ask) / two;
        let spread = best_ask - best_bid;
        let spread_bps = if mid.is_zero() {
            Decimal::ZERO
        } else {
            spread / mid * Decimal::from(10_000)
        };

        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > Decimal::ZERO {
            (bid_depth - ask_depth) / total_depth
        } else {
            Decimal::ZERO
        };

        Ok(Self {
            best_bid,
            best_ask,
            bid_depth,
            ask_depth,
            mid,
            spread,
            spread_bps,
            imbalance,
        })
    }
}

/// Worst acceptable price for a marketable order `max_slippage_bps` away from
/// the mid: above mid for buys, below for sells, floored at 0.01.
pub fn slippage_guard_price(mid: Decimal, side: Side, max_slippage_bps: Decimal) -> Decimal {
    let delta = mid * max_slippage_bps / Decimal::from(10_000);
    match side {
        Side::Buy => mid + delta,
        Side::Sell => {
            let guard = mid - delta;
            let floor = Decimal::new(1, 2);
            if guard <= Decimal::ZERO {
                floor
            } else {
                guard
            }
        }
    }
}
