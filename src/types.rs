//! Core data types used across the trading runtime

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are frequently cloned when passed into orders, positions and bars.
/// Using Arc<str> instead of String reduces heap allocations from O(n) to O(1)
/// per clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base part of a dotted `symbol.exchange` identifier, e.g. `rb2410.SHFE`
    /// yields `rb2410`. Returns the whole symbol when there is no dot.
    pub fn base(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// Whether an order opens a new position or closes an existing lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offset {
    Open,
    /// Close without selecting a lot; yesterday lots are consumed first
    Close,
    CloseToday,
    CloseYesterday,
}

/// High-level trade intent, mapped to a fixed (direction, offset) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeIntent {
    /// Open a long position
    Buy,
    /// Close a long position
    Sell,
    /// Close today's long lots only
    SellToday,
    /// Close yesterday's long lots only
    SellYesterday,
    /// Open a short position
    SellShort,
    /// Close a short position
    BuyToCover,
    /// Close today's short lots only
    BuyToCoverToday,
    /// Close yesterday's short lots only
    BuyToCoverYesterday,
}

impl TradeIntent {
    /// Fixed intent → (direction, offset) lookup
    pub fn direction_offset(self) -> (Direction, Offset) {
        match self {
            TradeIntent::Buy => (Direction::Long, Offset::Open),
            TradeIntent::Sell => (Direction::Short, Offset::Close),
            TradeIntent::SellToday => (Direction::Short, Offset::CloseToday),
            TradeIntent::SellYesterday => (Direction::Short, Offset::CloseYesterday),
            TradeIntent::SellShort => (Direction::Short, Offset::Open),
            TradeIntent::BuyToCover => (Direction::Long, Offset::Close),
            TradeIntent::BuyToCoverToday => (Direction::Long, Offset::CloseToday),
            TradeIntent::BuyToCoverYesterday => (Direction::Long, Offset::CloseYesterday),
        }
    }
}

/// Price type carried on order requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceKind {
    Limit,
    Market,
}

/// Venue order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses remove an order from the working set
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Local stop order state machine: Waiting → Triggered xor Waiting → Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOrderStatus {
    Waiting,
    Triggered,
    Cancelled,
}

/// Instrument price/volume snapshot from a market data venue
///
/// `volume` is the cumulative traded volume for the session, not an increment;
/// bar aggregation diffs consecutive values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub exchange: String,
    pub venue_id: String,
    pub trading_day: String,
    pub timestamp: DateTime<Utc>,
    pub last_price: f64,
    pub volume: f64,
    pub open_interest: f64,
    pub upper_limit: f64,
    pub lower_limit: f64,
}

/// OHLCV aggregate for one instrument and one period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub exchange: String,
    pub venue_id: String,
    pub trading_day: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_interest: f64,
}

impl Bar {
    /// Minute-of-day of the bar timestamp, 0..=1439
    pub fn minute_of_day(&self) -> u32 {
        self.timestamp.hour() * 60 + self.timestamp.minute()
    }
}

/// Execution report from a venue, identified by a venue-assigned unique id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub order_id: String,
    pub symbol: Symbol,
    pub exchange: String,
    pub venue_id: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

/// A working order as reported by a venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: Symbol,
    pub exchange: String,
    pub venue_id: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: i64,
    pub traded_volume: i64,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Quantity not yet filled
    pub fn remaining_volume(&self) -> i64 {
        self.volume - self.traded_volume
    }
}

/// Outgoing order request submitted to an execution gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    /// Venue-native symbol, resolved from contract metadata
    pub venue_symbol: String,
    pub exchange: String,
    pub venue_id: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: i64,
    pub price_kind: PriceKind,
}

/// Locally-held conditional order; never forwarded to a venue until triggered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopOrder {
    pub stop_order_id: String,
    pub symbol: Symbol,
    pub venue_id: String,
    pub intent: TradeIntent,
    pub direction: Direction,
    pub offset: Offset,
    /// Trigger price; the real order is sent at the exchange price bound
    pub price: f64,
    pub volume: i64,
    pub price_kind: PriceKind,
    pub status: StopOrderStatus,
}

/// Contract metadata resolved from a live venue or from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    pub symbol: String,
    pub exchange: String,
    pub price_tick: f64,
}

/// Round a price to the instrument tick size, ties away from zero
pub fn round_to_price_tick(price_tick: f64, price: f64) -> f64 {
    if price_tick <= 0.0 {
        return price;
    }
    (price / price_tick).round() * price_tick
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_lookup_covers_all_eight() {
        assert_eq!(
            TradeIntent::Buy.direction_offset(),
            (Direction::Long, Offset::Open)
        );
        assert_eq!(
            TradeIntent::Sell.direction_offset(),
            (Direction::Short, Offset::Close)
        );
        assert_eq!(
            TradeIntent::SellToday.direction_offset(),
            (Direction::Short, Offset::CloseToday)
        );
        assert_eq!(
            TradeIntent::SellYesterday.direction_offset(),
            (Direction::Short, Offset::CloseYesterday)
        );
        assert_eq!(
            TradeIntent::SellShort.direction_offset(),
            (Direction::Short, Offset::Open)
        );
        assert_eq!(
            TradeIntent::BuyToCover.direction_offset(),
            (Direction::Long, Offset::Close)
        );
        assert_eq!(
            TradeIntent::BuyToCoverToday.direction_offset(),
            (Direction::Long, Offset::CloseToday)
        );
        assert_eq!(
            TradeIntent::BuyToCoverYesterday.direction_offset(),
            (Direction::Long, Offset::CloseYesterday)
        );
    }

    #[test]
    fn test_price_tick_rounding() {
        assert_eq!(round_to_price_tick(1.0, 3500.4), 3500.0);
        assert_eq!(round_to_price_tick(1.0, 3500.5), 3501.0);
        assert_eq!(round_to_price_tick(0.5, 10.26), 10.5);
        assert_eq!(round_to_price_tick(0.5, 10.12), 10.0);
        // Non-positive tick leaves the price untouched
        assert_eq!(round_to_price_tick(0.0, 10.09), 10.09);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_symbol_base() {
        assert_eq!(Symbol::new("rb2410.SHFE").base(), "rb2410");
        assert_eq!(Symbol::new("BTCUSDT").base(), "BTCUSDT");
    }
}
