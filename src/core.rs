//! Strategy instance core
//!
//! [`StrategyCore`] owns everything a single strategy instance mutates:
//! parameter/variable maps, the multi-venue position ledger, the working
//! order and stop-order sets, the trade dedup set and the bar generators.
//! It is touched only by the instance's single consumer loop, so none of the
//! internal maps need locking.
//!
//! Operations that would re-enter the strategy (stop-order notifications,
//! fail-fast halts raised inside a hook-invoked helper) are queued as
//! [`Notice`]s; the runner delivers them after the current hook returns,
//! which keeps the hook ↔ core borrow one-directional.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{error, warn};

use crate::bars::{BarGenerator, XMinBarGenerator};
use crate::config::StrategySettings;
use crate::error::CoreError;
use crate::gateway::{EngineMode, ExecutionGateway};
use crate::persistence::PositionSink;
use crate::position::ContractPosition;
use crate::types::{
    round_to_price_tick, Bar, ContractInfo, Direction, Order, OrderRequest, PriceKind, StopOrder,
    StopOrderStatus, Symbol, Tick, TradeFill, TradeIntent,
};

/// Deferred strategy notification, delivered by the runner between hooks
#[derive(Debug)]
pub(crate) enum Notice {
    /// A stop order reached a terminal state and left the working set
    StopOrder(StopOrder),
    /// Trading was halted by the fail-fast policy from inside a core helper
    TradingHalted,
}

/// Which lots a closing-by-position helper may consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseLots {
    Both,
    TodayOnly,
    YesterdayOnly,
}

impl CloseLots {
    fn today(self) -> bool {
        self != CloseLots::YesterdayOnly
    }

    fn yesterday(self) -> bool {
        self != CloseLots::TodayOnly
    }
}

enum PlanOutcome {
    /// Nothing to do for this call
    Done,
    /// Invariant violation detected; halt and abandon the call
    Halt,
    /// Orders to send: (venue id, today volume, yesterday volume)
    Send(Vec<(String, i64, i64)>),
}

pub struct StrategyCore {
    settings: StrategySettings,
    log_tag: String,
    initialized: bool,
    trading: bool,
    params: HashMap<String, String>,
    vars: HashMap<String, String>,
    sync_vars: Vec<String>,
    positions: HashMap<Symbol, ContractPosition>,
    working_orders: HashMap<String, Order>,
    working_stop_orders: BTreeMap<String, StopOrder>,
    stop_order_seq: u64,
    seen_trade_ids: HashSet<String>,
    bar_generators: HashMap<Symbol, BarGenerator>,
    x_min_generators: HashMap<Symbol, XMinBarGenerator>,
    notices: VecDeque<Notice>,
    gateway: Arc<dyn ExecutionGateway>,
    sink: PositionSink,
}

impl StrategyCore {
    pub fn new(
        mut settings: StrategySettings,
        gateway: Arc<dyn ExecutionGateway>,
        sink: PositionSink,
    ) -> Result<Self> {
        settings.fix()?;
        let mut core = Self {
            log_tag: format!("Strategy:{} ID:{}", settings.name, settings.id),
            params: settings.params.clone(),
            vars: settings.vars.clone(),
            sync_vars: settings.sync_vars.clone(),
            settings,
            initialized: false,
            trading: false,
            positions: HashMap::new(),
            working_orders: HashMap::new(),
            working_stop_orders: BTreeMap::new(),
            stop_order_seq: 0,
            seen_trade_ids: HashSet::new(),
            bar_generators: HashMap::new(),
            x_min_generators: HashMap::new(),
            notices: VecDeque::new(),
            gateway,
            sink,
        };
        core.init_positions();
        Ok(core)
    }

    /// Build the position ledger skeleton from configuration
    fn init_positions(&mut self) {
        for contract in &self.settings.contracts {
            let mut book = ContractPosition::new(
                contract.symbol.clone(),
                &self.settings.trading_day,
                &self.settings.name,
                &self.settings.id,
                &contract.exchange,
                contract.size,
            );
            for venue in &contract.venues {
                book.insert_venue(&venue.venue_id);
            }
            self.positions.insert(contract.symbol.clone(), book);
        }
    }

    /// Clear and rebuild all derived state from a new configuration without
    /// creating a new instance
    pub fn reset(&mut self, mut settings: StrategySettings) -> Result<()> {
        settings.fix()?;
        self.vars.clear();
        self.params.clear();
        self.sync_vars.clear();
        self.positions.clear();
        self.working_orders.clear();
        self.working_stop_orders.clear();
        self.seen_trade_ids.clear();
        self.bar_generators.clear();
        self.x_min_generators.clear();
        self.notices.clear();

        self.log_tag = format!("Strategy:{} ID:{}", settings.name, settings.id);
        self.params = settings.params.clone();
        self.vars = settings.vars.clone();
        self.sync_vars = settings.sync_vars.clone();
        self.settings = settings;
        self.init_positions();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity and state accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn log_tag(&self) -> &str {
        &self.log_tag
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn trading(&self) -> bool {
        self.trading
    }

    pub(crate) fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    pub(crate) fn set_trading(&mut self, trading: bool) {
        self.trading = trading;
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Names of variables persisted alongside position snapshots
    pub fn sync_vars(&self) -> &[String] {
        &self.sync_vars
    }

    pub fn contract_position(&self, symbol: &Symbol) -> Option<&ContractPosition> {
        self.positions.get(symbol)
    }

    pub fn working_orders(&self) -> &HashMap<String, Order> {
        &self.working_orders
    }

    pub fn working_stop_orders(&self) -> impl Iterator<Item = &StopOrder> {
        self.working_stop_orders.values()
    }

    pub(crate) fn pop_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    /// Halt trading immediately; the runner delivers the stop notification
    /// after the current hook returns
    pub fn halt_trading(&mut self) {
        if !self.trading {
            warn!("{} trading already stopped", self.log_tag);
            return;
        }
        self.trading = false;
        self.notices.push_back(Notice::TradingHalted);
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Contract metadata comes from configuration in backtest mode and from
    /// the live venue otherwise
    fn resolve_contract(&self, symbol: &Symbol, venue_id: &str) -> Result<ContractInfo> {
        match self.gateway.mode() {
            EngineMode::Backtest => {
                let contract = self
                    .settings
                    .contract(symbol)
                    .ok_or_else(|| CoreError::MissingContractConfig(symbol.clone()))?;
                Ok(ContractInfo {
                    symbol: symbol.base().to_string(),
                    exchange: contract.exchange.clone(),
                    price_tick: contract.backtest_price_tick,
                })
            }
            EngineMode::Live => self.gateway.contract(symbol, venue_id),
        }
    }

    /// Build, round and submit an order request; returns the venue order id
    ///
    /// The opening quantity freeze is recorded against the venue position
    /// before the id is returned.
    pub fn send_order(
        &mut self,
        symbol: &Symbol,
        intent: TradeIntent,
        price_kind: PriceKind,
        price: f64,
        volume: i64,
        venue_id: &str,
    ) -> Result<String> {
        let contract = self.resolve_contract(symbol, venue_id)?;
        let (direction, offset) = intent.direction_offset();
        let request = OrderRequest {
            symbol: symbol.clone(),
            venue_symbol: contract.symbol,
            exchange: contract.exchange,
            venue_id: venue_id.to_string(),
            direction,
            offset,
            price: round_to_price_tick(contract.price_tick, price),
            volume,
            price_kind,
        };
        let order_id = self.gateway.send_order(&request)?;
        let book = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| CoreError::UnknownInstrument(symbol.clone()))?;
        book.apply_order_request(&request)?;
        Ok(order_id)
    }

    /// Register a locally-held stop order; nothing is sent to a venue
    pub fn send_stop_order(
        &mut self,
        symbol: &Symbol,
        intent: TradeIntent,
        price_kind: PriceKind,
        price: f64,
        volume: i64,
        venue_id: &str,
    ) -> Result<String> {
        // The counter must advance on every creation to keep ids unique.
        self.stop_order_seq += 1;
        let stop_order_id = format!(
            "SO.{}.{}.{}",
            self.stop_order_seq, self.settings.id, venue_id
        );
        let price_tick = self.resolve_contract(symbol, venue_id)?.price_tick;
        let (direction, offset) = intent.direction_offset();
        let stop_order = StopOrder {
            stop_order_id: stop_order_id.clone(),
            symbol: symbol.clone(),
            venue_id: venue_id.to_string(),
            intent,
            direction,
            offset,
            price: round_to_price_tick(price_tick, price),
            volume,
            price_kind,
            status: StopOrderStatus::Waiting,
        };
        self.working_stop_orders
            .insert(stop_order_id.clone(), stop_order);
        Ok(stop_order_id)
    }

    /// Cancel a working live order; no-op when the id is unknown
    pub fn cancel_order(&mut self, order_id: &str) -> Result<()> {
        if order_id.is_empty() {
            return Ok(());
        }
        if self.working_orders.contains_key(order_id) {
            self.gateway.cancel_order(order_id)?;
            self.working_orders.remove(order_id);
        }
        Ok(())
    }

    /// Cancel a working stop order; no-op when the id is unknown
    pub fn cancel_stop_order(&mut self, stop_order_id: &str) {
        if let Some(mut stop_order) = self.working_stop_orders.remove(stop_order_id) {
            stop_order.status = StopOrderStatus::Cancelled;
            self.notices.push_back(Notice::StopOrder(stop_order));
        }
    }

    /// Cancel every non-terminal live order and every waiting stop order
    pub fn cancel_all(&mut self) -> Result<()> {
        let live: Vec<String> = self
            .working_orders
            .iter()
            .filter(|(_, order)| !order.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for order_id in live {
            self.cancel_order(&order_id)?;
        }

        let stops: Vec<String> = self
            .working_stop_orders
            .iter()
            .filter(|(_, stop)| stop.status != StopOrderStatus::Cancelled)
            .map(|(id, _)| id.clone())
            .collect();
        for stop_order_id in stops {
            self.cancel_stop_order(&stop_order_id);
        }
        Ok(())
    }

    /// Evaluate stop-order trigger conditions against one tick
    ///
    /// A long stop fires when last price rises to or above its trigger, a
    /// short stop when last price falls to or below it. A fired stop submits
    /// a real order at the exchange price bound (upper limit for long, lower
    /// limit for short), transitions to `Triggered` and leaves the working
    /// set; the notification is queued for the runner. When the submit
    /// fails the stop stays `Waiting` in the working set, so it is still
    /// visible and can fire again once trading resumes.
    pub(crate) fn trigger_stop_orders(&mut self, tick: &Tick) -> Result<()> {
        if !self.trading {
            return Ok(());
        }
        let fired: Vec<String> = self
            .working_stop_orders
            .values()
            .filter(|stop| stop.symbol == tick.symbol)
            .filter(|stop| match stop.direction {
                Direction::Long => tick.last_price >= stop.price,
                Direction::Short => tick.last_price <= stop.price,
            })
            .map(|stop| stop.stop_order_id.clone())
            .collect();

        for stop_order_id in fired {
            let Some(stop) = self.working_stop_orders.get(&stop_order_id) else {
                continue;
            };
            let price = match stop.direction {
                Direction::Long => tick.upper_limit,
                Direction::Short => tick.lower_limit,
            };
            let symbol = stop.symbol.clone();
            let venue_id = stop.venue_id.clone();
            let intent = stop.intent;
            let price_kind = stop.price_kind;
            let volume = stop.volume;
            // Submit first; the entry leaves the working set only once the
            // gateway accepted the order.
            self.send_order(&symbol, intent, price_kind, price, volume, &venue_id)?;
            if let Some(mut stop_order) = self.working_stop_orders.remove(&stop_order_id) {
                stop_order.status = StopOrderStatus::Triggered;
                self.notices.push_back(Notice::StopOrder(stop_order));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Intent shortcuts (limit-price orders)
    // ------------------------------------------------------------------

    pub fn buy(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::Buy, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn sell(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::Sell, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn sell_td(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::SellToday, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn sell_yd(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::SellYesterday, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn sell_short(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::SellShort, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn buy_to_cover(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::BuyToCover, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn buy_to_cover_td(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::BuyToCoverToday, PriceKind::Limit, price, volume, venue_id)
    }

    pub fn buy_to_cover_yd(&mut self, symbol: &Symbol, volume: i64, price: f64, venue_id: &str) -> Result<String> {
        self.send_order(symbol, TradeIntent::BuyToCoverYesterday, PriceKind::Limit, price, volume, venue_id)
    }

    // ------------------------------------------------------------------
    // Preset reconciliation and by-position helpers
    // ------------------------------------------------------------------

    /// Open long positions up to the configured per-venue targets
    pub fn buy_by_preset(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.open_by_preset(symbol, price, Direction::Long)
    }

    /// Open short positions up to the configured per-venue targets
    pub fn sell_short_by_preset(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.open_by_preset(symbol, price, Direction::Short)
    }

    fn open_by_preset(&mut self, symbol: &Symbol, price: f64, direction: Direction) -> Result<()> {
        let (target, venues) = match self.settings.contract(symbol) {
            Some(contract) => (contract.fixed_pos, contract.venues.clone()),
            None => {
                error!("{} no contract configuration for {}", self.log_tag, symbol);
                self.halt_trading();
                return Ok(());
            }
        };
        if venues.is_empty() {
            error!("{} no venue configuration for {}", self.log_tag, symbol);
            self.halt_trading();
            return Ok(());
        }

        let outcome = {
            let book = self.positions.get(symbol);
            let held = book
                .map(|b| match direction {
                    Direction::Long => b.long_pos(),
                    Direction::Short => b.short_pos(),
                })
                .unwrap_or(0);
            if held == target {
                warn!(
                    "{} {} exposure already at preset target {}, nothing to do",
                    self.log_tag, symbol, target
                );
                PlanOutcome::Done
            } else if held > target {
                error!(
                    "{} {} exposure {} exceeds preset target {}",
                    self.log_tag, symbol, held, target
                );
                PlanOutcome::Halt
            } else {
                let mut plan = Vec::new();
                let mut violation = false;
                for venue in &venues {
                    if venue.fixed_pos <= 0 {
                        error!(
                            "{} invalid preset target {} for {} at venue {}",
                            self.log_tag, venue.fixed_pos, symbol, venue.venue_id
                        );
                        violation = true;
                        break;
                    }
                    let mut trade_pos = venue.fixed_pos;
                    if let Some(position) = book.and_then(|b| b.venue(&venue.venue_id)) {
                        let (venue_held, frozen) = match direction {
                            Direction::Long => {
                                (position.long_pos(), position.long_open_frozen)
                            }
                            Direction::Short => {
                                (position.short_pos(), position.short_open_frozen)
                            }
                        };
                        if venue_held > venue.fixed_pos {
                            error!(
                                "{} {} venue {} holds {} above its preset target {}",
                                self.log_tag, symbol, venue.venue_id, venue_held, venue.fixed_pos
                            );
                            violation = true;
                            break;
                        }
                        if venue_held + frozen >= venue.fixed_pos {
                            warn!(
                                "{} {} venue {} already at preset target counting {} frozen",
                                self.log_tag, symbol, venue.venue_id, frozen
                            );
                            continue;
                        }
                        trade_pos = venue.fixed_pos - (venue_held + frozen);
                    }
                    plan.push((venue.venue_id.clone(), trade_pos, 0));
                }
                if violation {
                    PlanOutcome::Halt
                } else {
                    PlanOutcome::Send(plan)
                }
            }
        };

        match outcome {
            PlanOutcome::Done => Ok(()),
            PlanOutcome::Halt => {
                self.halt_trading();
                Ok(())
            }
            PlanOutcome::Send(plan) => {
                let intent = match direction {
                    Direction::Long => TradeIntent::Buy,
                    Direction::Short => TradeIntent::SellShort,
                };
                for (venue_id, volume, _) in plan {
                    self.send_order(symbol, intent, PriceKind::Limit, price, volume, &venue_id)?;
                }
                Ok(())
            }
        }
    }

    /// Close long lots at every venue, sized to the lots actually held
    pub fn sell_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.close_by_position(symbol, price, Direction::Long, CloseLots::Both)
    }

    /// Close only today's long lots
    pub fn sell_td_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.close_by_position(symbol, price, Direction::Long, CloseLots::TodayOnly)
    }

    /// Close only yesterday's long lots
    pub fn sell_yd_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.close_by_position(symbol, price, Direction::Long, CloseLots::YesterdayOnly)
    }

    /// Close short lots at every venue, sized to the lots actually held
    pub fn buy_to_cover_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.close_by_position(symbol, price, Direction::Short, CloseLots::Both)
    }

    /// Close only today's short lots
    pub fn buy_to_cover_td_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.close_by_position(symbol, price, Direction::Short, CloseLots::TodayOnly)
    }

    /// Close only yesterday's short lots
    pub fn buy_to_cover_yd_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.close_by_position(symbol, price, Direction::Short, CloseLots::YesterdayOnly)
    }

    /// `closing` names the side being closed; today/yesterday volumes are
    /// taken from the lots actually held at each venue
    fn close_by_position(
        &mut self,
        symbol: &Symbol,
        price: f64,
        closing: Direction,
        lots: CloseLots,
    ) -> Result<()> {
        let outcome = {
            let Some(book) = self.positions.get(symbol) else {
                error!("{} no position book for {}", self.log_tag, symbol);
                return Ok(());
            };
            let total = match closing {
                Direction::Long => book.long_pos(),
                Direction::Short => book.short_pos(),
            };
            if total == 0 {
                warn!("{} {} has no position to close", self.log_tag, symbol);
                PlanOutcome::Done
            } else if total < 0 {
                error!(
                    "{} {} aggregate position {} is negative",
                    self.log_tag, symbol, total
                );
                PlanOutcome::Halt
            } else {
                let mut plan = Vec::new();
                let mut violation = false;
                for position in book.venues() {
                    let (held, td, yd, frozen) = match closing {
                        Direction::Long => (
                            position.long_pos(),
                            position.long_td,
                            position.long_yd,
                            position.long_open_frozen,
                        ),
                        Direction::Short => (
                            position.short_pos(),
                            position.short_td,
                            position.short_yd,
                            position.short_open_frozen,
                        ),
                    };
                    if held < 0 {
                        error!(
                            "{} {} venue {} position {} is negative",
                            self.log_tag, symbol, position.venue_id, held
                        );
                        violation = true;
                        break;
                    }
                    if held == 0 {
                        continue;
                    }
                    if lots.today() && frozen > 0 {
                        warn!(
                            "{} {} venue {} has {} open-frozen, left untouched",
                            self.log_tag, symbol, position.venue_id, frozen
                        );
                    }
                    plan.push((
                        position.venue_id.clone(),
                        if lots.today() { td } else { 0 },
                        if lots.yesterday() { yd } else { 0 },
                    ));
                }
                if violation {
                    PlanOutcome::Halt
                } else {
                    PlanOutcome::Send(plan)
                }
            }
        };

        match outcome {
            PlanOutcome::Done => Ok(()),
            PlanOutcome::Halt => {
                self.halt_trading();
                Ok(())
            }
            PlanOutcome::Send(plan) => {
                let (td_intent, yd_intent) = match closing {
                    Direction::Long => (TradeIntent::SellToday, TradeIntent::SellYesterday),
                    Direction::Short => (
                        TradeIntent::BuyToCoverToday,
                        TradeIntent::BuyToCoverYesterday,
                    ),
                };
                for (venue_id, td, yd) in plan {
                    if td > 0 {
                        self.send_order(symbol, td_intent, PriceKind::Limit, price, td, &venue_id)?;
                    }
                    if yd > 0 {
                        self.send_order(symbol, yd_intent, PriceKind::Limit, price, yd, &venue_id)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Open a long position equal to the existing short exposure, per venue
    pub fn buy_to_lock_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.lock_by_position(symbol, price, Direction::Short)
    }

    /// Open a short position equal to the existing long exposure, per venue
    pub fn sell_short_to_lock_by_position(&mut self, symbol: &Symbol, price: f64) -> Result<()> {
        self.lock_by_position(symbol, price, Direction::Long)
    }

    /// `existing` names the side being locked; an opposite-side opening order
    /// of the same size is sent per venue, ignoring preset targets
    fn lock_by_position(&mut self, symbol: &Symbol, price: f64, existing: Direction) -> Result<()> {
        let outcome = {
            let Some(book) = self.positions.get(symbol) else {
                error!("{} no position book for {}", self.log_tag, symbol);
                return Ok(());
            };
            let total = match existing {
                Direction::Long => book.long_pos(),
                Direction::Short => book.short_pos(),
            };
            if total == 0 {
                warn!("{} {} has no position to lock", self.log_tag, symbol);
                PlanOutcome::Done
            } else if total < 0 {
                error!(
                    "{} {} aggregate position {} is negative",
                    self.log_tag, symbol, total
                );
                PlanOutcome::Halt
            } else {
                let mut plan = Vec::new();
                let mut violation = false;
                for position in book.venues() {
                    let (held, frozen) = match existing {
                        Direction::Long => (position.long_pos(), position.long_open_frozen),
                        Direction::Short => (position.short_pos(), position.short_open_frozen),
                    };
                    if frozen > 0 {
                        warn!(
                            "{} {} venue {} has {} open-frozen, left untouched",
                            self.log_tag, symbol, position.venue_id, frozen
                        );
                    }
                    if held < 0 {
                        error!(
                            "{} {} venue {} position {} is negative",
                            self.log_tag, symbol, position.venue_id, held
                        );
                        violation = true;
                        break;
                    }
                    if held == 0 {
                        continue;
                    }
                    plan.push((position.venue_id.clone(), held, 0));
                }
                if violation {
                    PlanOutcome::Halt
                } else {
                    PlanOutcome::Send(plan)
                }
            }
        };

        match outcome {
            PlanOutcome::Done => Ok(()),
            PlanOutcome::Halt => {
                self.halt_trading();
                Ok(())
            }
            PlanOutcome::Send(plan) => {
                let intent = match existing {
                    // Lock an existing short with a long open and vice versa.
                    Direction::Short => TradeIntent::Buy,
                    Direction::Long => TradeIntent::SellShort,
                };
                for (venue_id, volume, _) in plan {
                    self.send_order(symbol, intent, PriceKind::Limit, price, volume, &venue_id)?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Ledger updates (driven only by trade and order events)
    // ------------------------------------------------------------------

    /// Apply one trade fill; returns false when the trade id was already seen
    ///
    /// A successful application hands a point-in-time snapshot to the
    /// persistence sink before returning.
    pub(crate) fn apply_trade_event(&mut self, trade: &TradeFill) -> Result<bool> {
        if self.seen_trade_ids.contains(&trade.trade_id) {
            return Ok(false);
        }
        let book = self
            .positions
            .get_mut(&trade.symbol)
            .ok_or_else(|| CoreError::UnknownInstrument(trade.symbol.clone()))?;
        book.apply_trade(trade)?;
        self.save_position();
        self.seen_trade_ids.insert(trade.trade_id.clone());
        Ok(true)
    }

    /// Apply one order status report to the working set and the ledger
    pub(crate) fn apply_order_event(&mut self, order: &Order) -> Result<()> {
        self.working_orders
            .insert(order.order_id.clone(), order.clone());
        if order.status.is_terminal() {
            self.working_orders.remove(&order.order_id);
        }
        let book = self
            .positions
            .get_mut(&order.symbol)
            .ok_or_else(|| CoreError::UnknownInstrument(order.symbol.clone()))?;
        book.apply_order(order)?;
        Ok(())
    }

    /// Hand a point-in-time snapshot of every venue position to the sink
    pub fn save_position(&self) {
        let snapshot: Vec<_> = self
            .positions
            .values()
            .flat_map(|book| book.venues().cloned())
            .collect();
        self.sink.save(snapshot);
    }

    // ------------------------------------------------------------------
    // Bar aggregation
    // ------------------------------------------------------------------

    pub(crate) fn update_minute_bar(&mut self, tick: &Tick) -> Option<Bar> {
        self.bar_generators
            .entry(tick.symbol.clone())
            .or_default()
            .update_tick(tick)
    }

    pub(crate) fn update_x_min_bar(&mut self, bar: &Bar) -> Option<Bar> {
        let x_min = self.settings.x_min;
        self.x_min_generators
            .entry(bar.symbol.clone())
            .or_insert_with(|| XMinBarGenerator::new(x_min))
            .update_bar(bar)
    }

    pub(crate) fn x_min(&self) -> u32 {
        self.settings.x_min
    }
}
