//! Multi-venue position ledger
//!
//! [`VenuePosition`] tracks one (instrument, venue) pair: long/short lots
//! split into today/yesterday plus open-order frozen quantities.
//! [`ContractPosition`] aggregates the venue children for one instrument.
//! Mutation is driven only by order requests, order reports and trade fills;
//! tick and bar processing never touches the ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::types::{Direction, Offset, Order, OrderRequest, Symbol, TradeFill};

/// Position for one (instrument, venue) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: Symbol,
    pub venue_id: String,
    pub trading_day: String,
    pub strategy_name: String,
    pub strategy_id: String,
    pub exchange: String,
    pub contract_size: i64,
    /// Long lots opened today
    pub long_td: i64,
    /// Long lots carried from yesterday
    pub long_yd: i64,
    /// Short lots opened today
    pub short_td: i64,
    /// Short lots carried from yesterday
    pub short_yd: i64,
    /// Long quantity reserved by pending opening orders
    pub long_open_frozen: i64,
    /// Short quantity reserved by pending opening orders
    pub short_open_frozen: i64,
}

impl VenuePosition {
    pub fn new(
        symbol: Symbol,
        venue_id: &str,
        trading_day: &str,
        strategy_name: &str,
        strategy_id: &str,
        exchange: &str,
        contract_size: i64,
    ) -> Self {
        Self {
            symbol,
            venue_id: venue_id.to_string(),
            trading_day: trading_day.to_string(),
            strategy_name: strategy_name.to_string(),
            strategy_id: strategy_id.to_string(),
            exchange: exchange.to_string(),
            contract_size,
            long_td: 0,
            long_yd: 0,
            short_td: 0,
            short_yd: 0,
            long_open_frozen: 0,
            short_open_frozen: 0,
        }
    }

    /// Total long position at this venue
    pub fn long_pos(&self) -> i64 {
        self.long_td + self.long_yd
    }

    /// Total short position at this venue
    pub fn short_pos(&self) -> i64 {
        self.short_td + self.short_yd
    }

    /// Reserve opening quantity when an opening order is sent
    pub fn apply_order_request(&mut self, request: &OrderRequest) {
        if request.offset != Offset::Open {
            return;
        }
        match request.direction {
            Direction::Long => self.long_open_frozen += request.volume,
            Direction::Short => self.short_open_frozen += request.volume,
        }
    }

    /// Release remaining frozen quantity when an opening order terminates
    ///
    /// Filled quantity has already been released fill-by-fill through
    /// [`apply_trade`](Self::apply_trade); only the unfilled remainder of a
    /// cancelled or rejected opening order is still reserved here.
    pub fn apply_order(&mut self, order: &Order) {
        if order.offset != Offset::Open || !order.status.is_terminal() {
            return;
        }
        let remaining = order.remaining_volume().max(0);
        match order.direction {
            Direction::Long => {
                self.long_open_frozen = (self.long_open_frozen - remaining).max(0);
            }
            Direction::Short => {
                self.short_open_frozen = (self.short_open_frozen - remaining).max(0);
            }
        }
    }

    /// Apply one execution report
    ///
    /// Opens add to today's lots and release the matching frozen quantity.
    /// Closes reduce the opposite side; a plain close consumes yesterday lots
    /// first. Lots may go negative on inconsistent input; the reconciliation
    /// helpers treat that as an invariant violation.
    pub fn apply_trade(&mut self, trade: &TradeFill) {
        let volume = trade.volume;
        match (trade.direction, trade.offset) {
            (Direction::Long, Offset::Open) => {
                self.long_td += volume;
                self.long_open_frozen = (self.long_open_frozen - volume).max(0);
            }
            (Direction::Short, Offset::Open) => {
                self.short_td += volume;
                self.short_open_frozen = (self.short_open_frozen - volume).max(0);
            }
            (Direction::Long, Offset::CloseToday) => self.short_td -= volume,
            (Direction::Long, Offset::CloseYesterday) => self.short_yd -= volume,
            (Direction::Long, Offset::Close) => {
                let from_yd = self.short_yd.min(volume).max(0);
                self.short_yd -= from_yd;
                self.short_td -= volume - from_yd;
            }
            (Direction::Short, Offset::CloseToday) => self.long_td -= volume,
            (Direction::Short, Offset::CloseYesterday) => self.long_yd -= volume,
            (Direction::Short, Offset::Close) => {
                let from_yd = self.long_yd.min(volume).max(0);
                self.long_yd -= from_yd;
                self.long_td -= volume - from_yd;
            }
        }
    }
}

/// Aggregate position for one instrument across its execution venues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractPosition {
    pub symbol: Symbol,
    pub exchange: String,
    pub trading_day: String,
    pub strategy_name: String,
    pub strategy_id: String,
    pub contract_size: i64,
    /// Venue children, keyed by venue id; BTreeMap keeps iteration order
    /// stable across runs
    venues: BTreeMap<String, VenuePosition>,
}

impl ContractPosition {
    pub fn new(
        symbol: Symbol,
        trading_day: &str,
        strategy_name: &str,
        strategy_id: &str,
        exchange: &str,
        contract_size: i64,
    ) -> Self {
        Self {
            symbol,
            exchange: exchange.to_string(),
            trading_day: trading_day.to_string(),
            strategy_name: strategy_name.to_string(),
            strategy_id: strategy_id.to_string(),
            contract_size,
            venues: BTreeMap::new(),
        }
    }

    /// Add a venue child; called once per configured venue at construction
    pub fn insert_venue(&mut self, venue_id: &str) {
        let position = VenuePosition::new(
            self.symbol.clone(),
            venue_id,
            &self.trading_day,
            &self.strategy_name,
            &self.strategy_id,
            &self.exchange,
            self.contract_size,
        );
        self.venues.insert(venue_id.to_string(), position);
    }

    /// Aggregate long position across venues
    pub fn long_pos(&self) -> i64 {
        self.venues.values().map(VenuePosition::long_pos).sum()
    }

    /// Aggregate short position across venues
    pub fn short_pos(&self) -> i64 {
        self.venues.values().map(VenuePosition::short_pos).sum()
    }

    pub fn venue(&self, venue_id: &str) -> Option<&VenuePosition> {
        self.venues.get(venue_id)
    }

    /// Venue children in stable (venue id) order
    pub fn venues(&self) -> impl Iterator<Item = &VenuePosition> {
        self.venues.values()
    }

    fn venue_mut(&mut self, venue_id: &str) -> Result<&mut VenuePosition> {
        let symbol = self.symbol.clone();
        self.venues
            .get_mut(venue_id)
            .ok_or_else(|| CoreError::MissingVenueConfig {
                symbol,
                venue_id: venue_id.to_string(),
            })
    }

    pub fn apply_order_request(&mut self, request: &OrderRequest) -> Result<()> {
        self.venue_mut(&request.venue_id)?.apply_order_request(request);
        Ok(())
    }

    pub fn apply_order(&mut self, order: &Order) -> Result<()> {
        self.venue_mut(&order.venue_id)?.apply_order(order);
        Ok(())
    }

    pub fn apply_trade(&mut self, trade: &TradeFill) -> Result<()> {
        self.venue_mut(&trade.venue_id)?.apply_trade(trade);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, PriceKind};
    use chrono::Utc;

    fn venue_position() -> VenuePosition {
        VenuePosition::new(
            Symbol::new("rb2410.SHFE"),
            "ctp-a",
            "20260823",
            "demo",
            "s-001",
            "SHFE",
            10,
        )
    }

    fn open_request(direction: Direction, volume: i64) -> OrderRequest {
        OrderRequest {
            symbol: Symbol::new("rb2410.SHFE"),
            venue_symbol: "rb2410".to_string(),
            exchange: "SHFE".to_string(),
            venue_id: "ctp-a".to_string(),
            direction,
            offset: Offset::Open,
            price: 3500.0,
            volume,
            price_kind: PriceKind::Limit,
        }
    }

    fn fill(direction: Direction, offset: Offset, volume: i64) -> TradeFill {
        TradeFill {
            trade_id: "t-1".to_string(),
            order_id: "o-1".to_string(),
            symbol: Symbol::new("rb2410.SHFE"),
            exchange: "SHFE".to_string(),
            venue_id: "ctp-a".to_string(),
            direction,
            offset,
            price: 3500.0,
            volume,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_open_request_freezes_quantity() {
        let mut position = venue_position();
        position.apply_order_request(&open_request(Direction::Long, 3));
        assert_eq!(position.long_open_frozen, 3);
        assert_eq!(position.long_pos(), 0);
    }

    #[test]
    fn test_close_request_freezes_nothing() {
        let mut position = venue_position();
        let mut request = open_request(Direction::Short, 3);
        request.offset = Offset::Close;
        position.apply_order_request(&request);
        assert_eq!(position.short_open_frozen, 0);
    }

    #[test]
    fn test_open_fill_converts_frozen_into_today_lots() {
        let mut position = venue_position();
        position.apply_order_request(&open_request(Direction::Long, 3));
        position.apply_trade(&fill(Direction::Long, Offset::Open, 3));
        assert_eq!(position.long_td, 3);
        assert_eq!(position.long_yd, 0);
        assert_eq!(position.long_open_frozen, 0);
        assert_eq!(position.long_pos(), 3);
    }

    #[test]
    fn test_plain_close_consumes_yesterday_first() {
        let mut position = venue_position();
        position.long_td = 2;
        position.long_yd = 3;
        position.apply_trade(&fill(Direction::Short, Offset::Close, 4));
        assert_eq!(position.long_yd, 0);
        assert_eq!(position.long_td, 1);
    }

    #[test]
    fn test_close_today_touches_only_today_lots() {
        let mut position = venue_position();
        position.short_td = 2;
        position.short_yd = 3;
        position.apply_trade(&fill(Direction::Long, Offset::CloseToday, 2));
        assert_eq!(position.short_td, 0);
        assert_eq!(position.short_yd, 3);
    }

    #[test]
    fn test_cancelled_open_order_releases_remaining_frozen() {
        let mut position = venue_position();
        position.apply_order_request(&open_request(Direction::Long, 5));
        position.apply_trade(&fill(Direction::Long, Offset::Open, 2));
        assert_eq!(position.long_open_frozen, 3);

        let order = Order {
            order_id: "o-1".to_string(),
            symbol: Symbol::new("rb2410.SHFE"),
            exchange: "SHFE".to_string(),
            venue_id: "ctp-a".to_string(),
            direction: Direction::Long,
            offset: Offset::Open,
            price: 3500.0,
            volume: 5,
            traded_volume: 2,
            status: OrderStatus::Cancelled,
            updated_at: Utc::now(),
        };
        position.apply_order(&order);
        assert_eq!(position.long_open_frozen, 0);
        assert_eq!(position.long_td, 2);
    }

    #[test]
    fn test_non_terminal_order_leaves_frozen_alone() {
        let mut position = venue_position();
        position.apply_order_request(&open_request(Direction::Short, 4));
        let order = Order {
            order_id: "o-1".to_string(),
            symbol: Symbol::new("rb2410.SHFE"),
            exchange: "SHFE".to_string(),
            venue_id: "ctp-a".to_string(),
            direction: Direction::Short,
            offset: Offset::Open,
            price: 3500.0,
            volume: 4,
            traded_volume: 0,
            status: OrderStatus::Submitted,
            updated_at: Utc::now(),
        };
        position.apply_order(&order);
        assert_eq!(position.short_open_frozen, 4);
    }

    #[test]
    fn test_contract_position_aggregates_venues() {
        let mut contract = ContractPosition::new(
            Symbol::new("rb2410.SHFE"),
            "20260823",
            "demo",
            "s-001",
            "SHFE",
            10,
        );
        contract.insert_venue("ctp-a");
        contract.insert_venue("ctp-b");

        let mut trade_a = fill(Direction::Long, Offset::Open, 2);
        trade_a.venue_id = "ctp-a".to_string();
        let mut trade_b = fill(Direction::Long, Offset::Open, 3);
        trade_b.trade_id = "t-2".to_string();
        trade_b.venue_id = "ctp-b".to_string();

        contract.apply_trade(&trade_a).unwrap();
        contract.apply_trade(&trade_b).unwrap();
        assert_eq!(contract.long_pos(), 5);
        assert_eq!(contract.short_pos(), 0);
        assert_eq!(contract.venue("ctp-a").unwrap().long_td, 2);
    }

    #[test]
    fn test_unknown_venue_is_an_error() {
        let mut contract = ContractPosition::new(
            Symbol::new("rb2410.SHFE"),
            "20260823",
            "demo",
            "s-001",
            "SHFE",
            10,
        );
        contract.insert_venue("ctp-a");
        let mut trade = fill(Direction::Long, Offset::Open, 1);
        trade.venue_id = "unknown".to_string();
        assert!(contract.apply_trade(&trade).is_err());
    }
}
