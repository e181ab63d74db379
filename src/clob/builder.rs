//! Signable-order builder.
//!
//! Resolves tick size and fee rate against an optional market-data
//! transport, discovers market-order prices from the live book, scales
//! amounts to integer base units, and derives the maker address from the
//! signature type.

use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::auth::{
    derive_proxy_wallet, derive_proxy_wallet_for_chain, derive_safe_wallet,
    derive_safe_wallet_for_chain, Address, SignatureType, Signer,
};
use crate::clob::types::{MarketDataTransport, Order, OrderType, Side, SignableOrder};
use crate::error::SdkError;
use crate::shared::{decimal_places, to_fixed_units, LOT_SIZE_SCALE, USDC_DECIMALS};

/// Salts must fit in 53 bits so they survive JSON number round-trips.
const SALT_BITS: u32 = 53;

type SaltGenerator = Arc<dyn Fn() -> Result<u64, SdkError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountKind {
    Usdc,
    Shares,
}

#[derive(Clone, Copy)]
struct MarketAmount {
    kind: AmountKind,
    value: Decimal,
}

/// Fluent builder for signable limit and market orders.
pub struct OrderBuilder {
    transport: Option<Arc<dyn MarketDataTransport>>,
    signer: Arc<dyn Signer>,

    token_id: String,
    side: Option<Side>,
    price: Decimal,
    size: Decimal,
    fee_rate_bps: Decimal,
    tick_size: Option<Decimal>,
    order_type: Option<OrderType>,

    maker: Option<Address>,
    funder: Option<Address>,
    taker: Option<Address>,
    nonce: Option<u64>,
    expiration: Option<u64>,
    signature_type: Option<SignatureType>,
    post_only: Option<bool>,

    salt_generator: Option<SaltGenerator>,
    amount: Option<MarketAmount>,
}

impl OrderBuilder {
    pub fn new(transport: Option<Arc<dyn MarketDataTransport>>, signer: Arc<dyn Signer>) -> Self {
        Self {
            transport,
            signer,
            token_id: String::new(),
            side: None,
            price: Decimal::ZERO,
            size: Decimal::ZERO,
            fee_rate_bps: Decimal::ZERO,
            tick_size: None,
            order_type: None,
            maker: None,
            funder: None,
            taker: None,
            nonce: None,
            expiration: None,
            signature_type: None,
            post_only: None,
            salt_generator: None,
            amount: None,
        }
    }

    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = token_id.into();
        self
    }

    pub fn side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    /// Price per share.
    pub fn price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }

    pub fn price_f64(self, price: f64) -> Self {
        let price = Decimal::from_f64(price).unwrap_or(Decimal::ZERO);
        self.price(price)
    }

    /// Number of shares for limit orders.
    pub fn size(mut self, size: Decimal) -> Self {
        self.size = size;
        self
    }

    pub fn size_f64(self, size: f64) -> Self {
        let size = Decimal::from_f64(size).unwrap_or(Decimal::ZERO);
        self.size(size)
    }

    /// Fee rate in basis points; must be integer-valued.
    pub fn fee_rate_bps(mut self, bps: Decimal) -> Self {
        self.fee_rate_bps = bps;
        self
    }

    /// Manual tick-size override (e.g. 0.01).
    pub fn tick_size(mut self, tick: Decimal) -> Self {
        self.tick_size = Some(tick);
        self
    }

    pub fn order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = Some(order_type);
        self
    }

    pub fn post_only(mut self, post_only: bool) -> Self {
        self.post_only = Some(post_only);
        self
    }

    /// Expiration as seconds since the Unix epoch, for GTD orders.
    pub fn expiration_unix(mut self, timestamp: u64) -> Self {
        self.expiration = Some(timestamp);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn maker(mut self, maker: Address) -> Self {
        self.maker = Some(maker);
        self
    }

    pub fn taker(mut self, taker: Address) -> Self {
        self.taker = Some(taker);
        self
    }

    /// Funding wallet override; only valid for non-EOA signature types.
    pub fn funder(mut self, funder: Address) -> Self {
        self.funder = Some(funder);
        self
    }

    /// Signs through the user's proxy wallet.
    pub fn use_proxy(mut self) -> Self {
        self.signature_type = Some(SignatureType::Proxy);
        self
    }

    /// Signs through the user's Gnosis Safe.
    pub fn use_safe(mut self) -> Self {
        self.signature_type = Some(SignatureType::GnosisSafe);
        self
    }

    pub fn signature_type(mut self, signature_type: SignatureType) -> Self {
        self.signature_type = Some(signature_type);
        self
    }

    /// Market-order amount denominated in USDC.
    pub fn amount_usdc(mut self, amount: Decimal) -> Self {
        self.amount = Some(MarketAmount {
            kind: AmountKind::Usdc,
            value: amount,
        });
        self
    }

    /// Market-order amount denominated in shares.
    pub fn amount_shares(mut self, amount: Decimal) -> Self {
        self.amount = Some(MarketAmount {
            kind: AmountKind::Shares,
            value: amount,
        });
        self
    }

    pub fn salt_generator(
        mut self,
        generator: impl Fn() -> Result<u64, SdkError> + Send + Sync + 'static,
    ) -> Self {
        self.salt_generator = Some(Arc::new(generator));
        self
    }

    /// Builds a limit order.
    pub async fn build(&self) -> Result<Order, SdkError> {
        self.build_limit().await
    }

    /// Builds a limit order with its time-in-force metadata.
    pub async fn build_signable(&self) -> Result<SignableOrder, SdkError> {
        let order = self.build_limit().await?;

        let order_type = self.order_type.unwrap_or(OrderType::Gtc);
        let expiration = self.expiration.unwrap_or(0);
        if expiration > 0 && order_type != OrderType::Gtd {
            return Err(SdkError::validation(
                "expiration is only supported for GTD orders",
            ));
        }
        if order_type == OrderType::Gtd && expiration == 0 {
            return Err(SdkError::validation(
                "GTD orders require a non-zero expiration",
            ));
        }
        if self.post_only == Some(true)
            && order_type != OrderType::Gtc
            && order_type != OrderType::Gtd
        {
            return Err(SdkError::validation(
                "post-only is only supported for GTC and GTD orders",
            ));
        }

        Ok(SignableOrder {
            order,
            order_type,
            post_only: self.post_only,
        })
    }

    /// Builds a market order, discovering the price from the book when the
    /// caller has not set one.
    pub async fn build_market(&self) -> Result<SignableOrder, SdkError> {
        if self.token_id.is_empty() {
            return Err(SdkError::validation("token_id is required"));
        }
        let side = self
            .side
            .ok_or_else(|| SdkError::validation("side must be BUY or SELL"))?;
        let amount = self
            .amount
            .ok_or_else(|| SdkError::validation("amount is required for market orders"))?;
        if amount.value <= Decimal::ZERO {
            return Err(SdkError::validation("amount must be positive"));
        }
        let amount_scale = decimal_places(amount.value);
        match amount.kind {
            AmountKind::Shares if amount_scale > LOT_SIZE_SCALE => {
                return Err(SdkError::validation(format!(
                    "amount has too many decimal places (max {LOT_SIZE_SCALE})"
                )));
            }
            AmountKind::Usdc if amount_scale > USDC_DECIMALS => {
                return Err(SdkError::validation(format!(
                    "amount has too many decimal places (max {USDC_DECIMALS})"
                )));
            }
            _ => {}
        }

        let order_type = self.order_type.unwrap_or(OrderType::Fak);
        if order_type != OrderType::Fak && order_type != OrderType::Fok {
            return Err(SdkError::validation(
                "market orders require FAK or FOK order type",
            ));
        }
        if self.post_only == Some(true) {
            return Err(SdkError::validation(
                "post-only is not supported for market orders",
            ));
        }
        if side == Side::Sell && amount.kind == AmountKind::Usdc {
            return Err(SdkError::validation(
                "sell market orders must specify amount in shares",
            ));
        }

        validate_token_id(&self.token_id)?;

        let tick_size = self.resolve_tick_size().await?;
        let tick_scale = decimal_places(tick_size);

        if self.price < Decimal::ZERO {
            return Err(SdkError::validation("price must be positive"));
        }
        let price = if self.price > Decimal::ZERO {
            if decimal_places(self.price) > tick_scale {
                return Err(SdkError::validation(format!(
                    "price has too many decimal places for tick size {tick_size}"
                )));
            }
            self.price
        } else {
            self.resolve_market_price(side, order_type, amount).await?
        };
        let price = price.trunc_with_scale(tick_scale);
        check_price_bounds(price, tick_size)?;

        let fee_rate_bps = self.resolve_fee_rate_bps().await?;

        let trunc_scale = tick_scale + LOT_SIZE_SCALE;
        let raw = amount.value;
        let (maker_amount, taker_amount) = match (side, amount.kind) {
            (Side::Buy, AmountKind::Usdc) => {
                let taker = raw
                    .checked_div(price)
                    .ok_or_else(|| SdkError::validation("price must be non-zero"))?
                    .trunc_with_scale(trunc_scale);
                (raw, taker)
            }
            (Side::Buy, AmountKind::Shares) => {
                let maker = (raw * price).trunc_with_scale(trunc_scale);
                (maker, raw)
            }
            (Side::Sell, AmountKind::Shares) => {
                let taker = (raw * price).trunc_with_scale(trunc_scale);
                (raw, taker)
            }
            (Side::Sell, AmountKind::Usdc) => unreachable!("rejected above"),
        };

        let order = self
            .assemble(side, maker_amount, taker_amount, fee_rate_bps, 0)
            .await?;
        Ok(SignableOrder {
            order,
            order_type,
            post_only: None,
        })
    }

    async fn build_limit(&self) -> Result<Order, SdkError> {
        if self.token_id.is_empty() {
            return Err(SdkError::validation("token_id is required"));
        }
        let side = self
            .side
            .ok_or_else(|| SdkError::validation("side must be BUY or SELL"))?;
        if self.price <= Decimal::ZERO {
            return Err(SdkError::validation("price must be positive"));
        }
        if self.size <= Decimal::ZERO {
            return Err(SdkError::validation("size must be positive"));
        }

        validate_token_id(&self.token_id)?;

        let tick_size = self.resolve_tick_size().await?;
        let tick_scale = decimal_places(tick_size);

        let price = self.price;
        if decimal_places(price) > tick_scale {
            return Err(SdkError::validation(format!(
                "price has too many decimal places for tick size {tick_size}"
            )));
        }
        check_price_bounds(price, tick_size)?;

        let size = self.size;
        if decimal_places(size) > LOT_SIZE_SCALE {
            return Err(SdkError::validation(format!(
                "size has too many decimal places (max {LOT_SIZE_SCALE})"
            )));
        }

        let fee_rate_bps = self.resolve_fee_rate_bps().await?;

        let trunc_scale = tick_scale + LOT_SIZE_SCALE;
        let notional = (size * price).trunc_with_scale(trunc_scale);
        let (maker_amount, taker_amount) = match side {
            Side::Buy => (notional, size),
            Side::Sell => (size, notional),
        };

        let expiration = self.expiration.unwrap_or(0);
        self.assemble(side, maker_amount, taker_amount, fee_rate_bps, expiration)
            .await
    }

    async fn assemble(
        &self,
        side: Side,
        maker_amount: Decimal,
        taker_amount: Decimal,
        fee_rate_bps: i64,
        expiration: u64,
    ) -> Result<Order, SdkError> {
        let maker_fixed = to_fixed_units(maker_amount)?;
        let taker_fixed = to_fixed_units(taker_amount)?;

        let signature_type = self.signature_type.unwrap_or_default();
        let maker = self.resolve_maker(signature_type)?;
        let taker = self.taker.unwrap_or(Address::ZERO);
        let nonce = self.nonce.unwrap_or(0);
        let salt = self.generate_salt()?;

        Ok(Order {
            salt: salt.to_string(),
            maker: maker.to_string(),
            signer: self.signer.address().to_string(),
            taker: taker.to_string(),
            token_id: self.token_id.clone(),
            maker_amount: maker_fixed.to_string(),
            taker_amount: taker_fixed.to_string(),
            expiration: expiration.to_string(),
            side,
            fee_rate_bps: fee_rate_bps.to_string(),
            nonce: nonce.to_string(),
            signature_type: signature_type.code(),
        })
    }

    async fn resolve_tick_size(&self) -> Result<Decimal, SdkError> {
        let override_tick = self.tick_size.filter(|t| !t.is_zero());

        if let Some(transport) = &self.transport {
            match transport.minimum_tick_size(&self.token_id).await {
                Ok(minimum) => {
                    if let Some(tick) = override_tick {
                        if tick < minimum {
                            return Err(SdkError::validation(format!(
                                "tick size {tick} is smaller than minimum {minimum}"
                            )));
                        }
                        return Ok(tick);
                    }
                    Ok(minimum)
                }
                Err(e) => {
                    if let Some(tick) = override_tick {
                        return Ok(tick);
                    }
                    Err(SdkError::Transport(format!("tick size lookup failed: {e}")))
                }
            }
        } else {
            override_tick.ok_or_else(|| {
                SdkError::validation("tick size is required (set tick_size or provide a transport)")
            })
        }
    }

    async fn resolve_fee_rate_bps(&self) -> Result<i64, SdkError> {
        let user_fee = parse_fee_rate_bps(self.fee_rate_bps)?;

        let Some(transport) = &self.transport else {
            return Ok(user_fee);
        };

        let market_fee = match transport.fee_rate_bps(&self.token_id).await {
            Ok(fee) => fee,
            Err(e) => {
                if user_fee > 0 {
                    return Ok(user_fee);
                }
                return Err(SdkError::Transport(format!("fee rate lookup failed: {e}")));
            }
        };

        if market_fee > 0 && user_fee > 0 && user_fee != market_fee {
            return Err(SdkError::validation(format!(
                "invalid fee rate {user_fee}, market fee rate is {market_fee}"
            )));
        }
        if market_fee > 0 {
            return Ok(market_fee);
        }
        Ok(user_fee)
    }

    /// Walks the opposing side of the book from the far end toward the top
    /// (the exchange serves best levels last), accumulating notional for
    /// USDC amounts or shares otherwise. The cutoff is the first level where
    /// the running total covers the request.
    async fn resolve_market_price(
        &self,
        side: Side,
        order_type: OrderType,
        amount: MarketAmount,
    ) -> Result<Decimal, SdkError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| SdkError::validation("a transport is required to fetch the book"))?;
        let book = transport.order_book(&self.token_id).await?;

        let levels = match side {
            Side::Buy => &book.asks,
            Side::Sell => &book.bids,
        };
        if levels.is_empty() {
            return Err(SdkError::validation("no opposing orders"));
        }

        let first_price = parse_level_decimal(&levels[0].price)?;

        let mut sum = Decimal::ZERO;
        let mut cutoff = None;
        for level in levels.iter().rev() {
            let level_price = parse_level_decimal(&level.price)?;
            let level_size = parse_level_decimal(&level.size)?;
            sum += match amount.kind {
                AmountKind::Usdc => level_size * level_price,
                AmountKind::Shares => level_size,
            };
            if sum >= amount.value {
                cutoff = Some(level_price);
                break;
            }
        }

        if let Some(price) = cutoff {
            return Ok(price);
        }
        if order_type == OrderType::Fok {
            return Err(SdkError::validation("insufficient liquidity to fill order"));
        }
        Ok(first_price)
    }

    fn resolve_maker(&self, signature_type: SignatureType) -> Result<Address, SdkError> {
        if let Some(maker) = self.maker {
            return Ok(maker);
        }
        if let Some(funder) = self.funder {
            if signature_type == SignatureType::Eoa {
                return Err(SdkError::validation(
                    "funder requires a non-EOA signature type",
                ));
            }
            if funder.is_zero() {
                return Err(SdkError::validation("funder cannot be the zero address"));
            }
            return Ok(funder);
        }
        derive_maker(self.signer.as_ref(), signature_type)
    }

    fn generate_salt(&self) -> Result<u64, SdkError> {
        if let Some(generator) = &self.salt_generator {
            return generator();
        }
        let raw: u64 = rand::thread_rng().gen();
        Ok(raw & ((1u64 << SALT_BITS) - 1))
    }
}

fn derive_maker(signer: &dyn Signer, signature_type: SignatureType) -> Result<Address, SdkError> {
    let owner = signer.address();
    let chain_id = signer.chain_id();
    match signature_type {
        SignatureType::Eoa => Ok(owner),
        SignatureType::Proxy => derive_proxy_wallet_for_chain(owner, chain_id)
            .or_else(|e| {
                if chain_id == 0 {
                    derive_proxy_wallet(owner)
                } else {
                    Err(e)
                }
            })
            .map_err(|e| SdkError::validation(format!("failed to derive proxy wallet: {e}"))),
        SignatureType::GnosisSafe => derive_safe_wallet_for_chain(owner, chain_id)
            .or_else(|e| {
                if chain_id == 0 {
                    derive_safe_wallet(owner)
                } else {
                    Err(e)
                }
            })
            .map_err(|e| SdkError::validation(format!("failed to derive safe wallet: {e}"))),
    }
}

fn validate_token_id(token_id: &str) -> Result<(), SdkError> {
    if token_id.is_empty() || !token_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SdkError::validation("invalid token_id format"));
    }
    Ok(())
}

fn check_price_bounds(price: Decimal, tick_size: Decimal) -> Result<(), SdkError> {
    if price < tick_size || price > Decimal::ONE - tick_size {
        return Err(SdkError::validation(format!(
            "price {price} is out of bounds for tick size {tick_size}"
        )));
    }
    Ok(())
}

fn parse_fee_rate_bps(bps: Decimal) -> Result<i64, SdkError> {
    if bps <= Decimal::ZERO {
        return Ok(0);
    }
    if bps.fract() != Decimal::ZERO {
        return Err(SdkError::validation(
            "fee rate must be an integer bps value",
        ));
    }
    bps.to_i64()
        .ok_or_else(|| SdkError::validation("fee rate out of range"))
}

fn parse_level_decimal(raw: &str) -> Result<Decimal, SdkError> {
    Decimal::from_str(raw).map_err(|e| SdkError::validation(format!("invalid price level: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::types::{OrderBook, PriceLevel};
    use async_trait::async_trait;

    struct FakeSigner {
        chain_id: u64,
    }

    impl Signer for FakeSigner {
        fn address(&self) -> Address {
            "0x00000000000000000000000000000000000000a1".parse().unwrap()
        }

        fn chain_id(&self) -> u64 {
            self.chain_id
        }
    }

    struct FakeTransport {
        tick: &'static str,
        fee: i64,
        book: OrderBook,
    }

    #[async_trait]
    impl MarketDataTransport for FakeTransport {
        async fn minimum_tick_size(&self, _token_id: &str) -> Result<Decimal, SdkError> {
            Ok(dec(self.tick))
        }

        async fn fee_rate_bps(&self, _token_id: &str) -> Result<i64, SdkError> {
            Ok(self.fee)
        }

        async fn order_book(&self, _token_id: &str) -> Result<OrderBook, SdkError> {
            Ok(self.book.clone())
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn signer() -> Arc<dyn Signer> {
        Arc::new(FakeSigner { chain_id: 137 })
    }

    // Best level last, matching the exchange's wire order.
    fn ask_book() -> OrderBook {
        OrderBook {
            asks: vec![
                PriceLevel::new("0.52", "10"),
                PriceLevel::new("0.51", "3"),
                PriceLevel::new("0.50", "5"),
            ],
            bids: vec![PriceLevel::new("0.40", "50")],
            ..Default::default()
        }
    }

    fn transport() -> Arc<dyn MarketDataTransport> {
        Arc::new(FakeTransport {
            tick: "0.01",
            fee: 0,
            book: ask_book(),
        })
    }

    fn builder() -> OrderBuilder {
        OrderBuilder::new(Some(transport()), signer())
    }

    #[tokio::test]
    async fn test_limit_price_bounds() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("1.00"))
            .size(dec("10"))
            .build()
            .await;
        assert!(err.is_err(), "price 1.00 must be out of bounds");

        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.555"))
            .size(dec("10"))
            .build()
            .await;
        assert!(err.is_err(), "price 0.555 has too many decimals");

        let order = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .build()
            .await
            .unwrap();
        assert_eq!(order.maker_amount, "5500000");
        assert_eq!(order.taker_amount, "10000000");
        assert_eq!(order.expiration, "0");
    }

    #[tokio::test]
    async fn test_limit_sell_amounts() {
        let order = builder()
            .token_id("77")
            .side(Side::Sell)
            .price(dec("0.55"))
            .size(dec("10"))
            .build()
            .await
            .unwrap();
        assert_eq!(order.maker_amount, "10000000");
        assert_eq!(order.taker_amount, "5500000");
    }

    #[tokio::test]
    async fn test_market_price_discovery_buy_usdc() {
        // Walking toward the top: 0.50*5 + 0.51*3 = 4.03 < 9, then 0.52*10
        // brings the total to 9.23 >= 9, so the cutoff is 0.52.
        let signable = builder()
            .token_id("77")
            .side(Side::Buy)
            .amount_usdc(dec("9"))
            .build_market()
            .await
            .unwrap();
        let order = signable.order;
        assert_eq!(signable.order_type, OrderType::Fak);
        // maker = 9 USDC, taker = 9 / 0.52 truncated to 4 places = 17.3076
        assert_eq!(order.maker_amount, "9000000");
        assert_eq!(order.taker_amount, "17307600");
    }

    #[tokio::test]
    async fn test_market_fok_insufficient_liquidity() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .amount_usdc(dec("100"))
            .order_type(OrderType::Fok)
            .build_market()
            .await;
        match err {
            Err(SdkError::Validation(msg)) => assert!(msg.contains("insufficient liquidity")),
            other => panic!("expected insufficient liquidity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_market_fak_falls_back_to_far_end() {
        // Whole book is short of 100 USDC; FAK falls back to the first array
        // entry (the deepest level).
        let signable = builder()
            .token_id("77")
            .side(Side::Buy)
            .amount_usdc(dec("100"))
            .build_market()
            .await
            .unwrap();
        // taker = 100 / 0.52 truncated to 4 places
        assert_eq!(signable.order.taker_amount, "192307600");
    }

    #[tokio::test]
    async fn test_market_buy_shares_amounts() {
        let signable = builder()
            .token_id("77")
            .side(Side::Buy)
            .amount_shares(dec("20"))
            .price(dec("0.50"))
            .build_market()
            .await
            .unwrap();
        assert_eq!(signable.order.maker_amount, "10000000");
        assert_eq!(signable.order.taker_amount, "20000000");
    }

    #[tokio::test]
    async fn test_market_sell_shares_amounts() {
        let signable = builder()
            .token_id("77")
            .side(Side::Sell)
            .amount_shares(dec("20"))
            .price(dec("0.40"))
            .build_market()
            .await
            .unwrap();
        assert_eq!(signable.order.maker_amount, "20000000");
        assert_eq!(signable.order.taker_amount, "8000000");
    }

    #[tokio::test]
    async fn test_market_sell_usdc_rejected() {
        let err = builder()
            .token_id("77")
            .side(Side::Sell)
            .amount_usdc(dec("10"))
            .build_market()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_market_rejects_gtc() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .amount_usdc(dec("10"))
            .order_type(OrderType::Gtc)
            .build_market()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_gtd_requires_expiration() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .order_type(OrderType::Gtd)
            .build_signable()
            .await;
        assert!(err.is_err());

        let ok = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .order_type(OrderType::Gtd)
            .expiration_unix(1_900_000_000)
            .build_signable()
            .await
            .unwrap();
        assert_eq!(ok.order.expiration, "1900000000");
    }

    #[tokio::test]
    async fn test_expiration_requires_gtd() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .expiration_unix(1_900_000_000)
            .build_signable()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_post_only_limits() {
        let ok = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .post_only(true)
            .build_signable()
            .await
            .unwrap();
        assert_eq!(ok.post_only, Some(true));

        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .order_type(OrderType::Fak)
            .post_only(true)
            .build_signable()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_salt_fits_53_bits() {
        for _ in 0..32 {
            let order = builder()
                .token_id("77")
                .side(Side::Buy)
                .price(dec("0.55"))
                .size(dec("10"))
                .build()
                .await
                .unwrap();
            let salt: u64 = order.salt.parse().unwrap();
            assert!(salt < (1u64 << 53));
        }
    }

    #[tokio::test]
    async fn test_custom_salt_generator() {
        let order = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .salt_generator(|| Ok(42))
            .build()
            .await
            .unwrap();
        assert_eq!(order.salt, "42");
    }

    #[tokio::test]
    async fn test_invalid_token_id() {
        let err = builder()
            .token_id("0xdeadbeef")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .build()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_tick_override_below_minimum_rejected() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .tick_size(dec("0.001"))
            .build()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_no_transport_requires_tick_override() {
        let err = OrderBuilder::new(None, signer())
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .build()
            .await;
        assert!(err.is_err());

        let ok = OrderBuilder::new(None, signer())
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .tick_size(dec("0.01"))
            .build()
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_fee_conflict_rejected() {
        let transport = Arc::new(FakeTransport {
            tick: "0.01",
            fee: 30,
            book: ask_book(),
        });
        let err = OrderBuilder::new(Some(transport.clone()), signer())
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .fee_rate_bps(dec("20"))
            .build()
            .await;
        assert!(err.is_err());

        // Zero user fee defers to the market fee.
        let order = OrderBuilder::new(Some(transport), signer())
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .build()
            .await
            .unwrap();
        assert_eq!(order.fee_rate_bps, "30");
    }

    #[tokio::test]
    async fn test_fee_must_be_integer_bps() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .fee_rate_bps(dec("12.5"))
            .build()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_maker_defaults_to_signer_for_eoa() {
        let order = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .build()
            .await
            .unwrap();
        assert_eq!(order.maker, order.signer);
        assert_eq!(order.signature_type, 0);
    }

    #[tokio::test]
    async fn test_proxy_maker_derived() {
        let order = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .use_proxy()
            .build()
            .await
            .unwrap();
        assert_ne!(order.maker, order.signer);
        assert_eq!(order.signature_type, 1);
    }

    #[tokio::test]
    async fn test_funder_requires_non_eoa() {
        let funder: Address = "0x00000000000000000000000000000000000000b2".parse().unwrap();
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .funder(funder)
            .build()
            .await;
        assert!(err.is_err());

        let order = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .funder(funder)
            .use_safe()
            .build()
            .await
            .unwrap();
        assert_eq!(order.maker, funder.to_string());
        assert_eq!(order.signature_type, 2);
    }

    #[tokio::test]
    async fn test_zero_funder_rejected() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10"))
            .funder(Address::ZERO)
            .use_proxy()
            .build()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_size_scale_limited_to_lots() {
        let err = builder()
            .token_id("77")
            .side(Side::Buy)
            .price(dec("0.55"))
            .size(dec("10.123"))
            .build()
            .await;
        assert!(err.is_err());
    }
}
