//! CLOB order construction and book utilities.
//!
//! [`builder::OrderBuilder`] produces signable orders per the exchange's
//! contract: tick-size and fee-rate resolution, market-order price discovery
//! against a live book, fixed-point amount scaling, and maker-address
//! derivation by signature type.

pub mod book;
pub mod builder;
pub mod pagination;
pub mod types;

pub use book::{slippage_guard_price, top_of_book, BookSummary};
pub use builder::OrderBuilder;
pub use pagination::{collect_pages, Page, END_CURSOR, INITIAL_CURSOR};
pub use types::{
    MarketDataTransport, Order, OrderBook, OrderType, PriceLevel, Side, SignableOrder,
};
