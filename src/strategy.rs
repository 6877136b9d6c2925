//! Strategy capability interface
//!
//! Concrete trading logic lives outside the runtime and plugs in through this
//! trait. The runtime invokes the hooks in a fixed order from its single
//! consumer loop and never reaches into strategy-specific state; strategies
//! act on the market through the [`StrategyCore`] they are handed.
//!
//! Every hook returns a `Result`: an `Err` is the strategy signalling failure
//! and triggers the runtime's fail-fast policy (trading halts, the event loop
//! keeps draining).

use anyhow::Result;

use crate::core::StrategyCore;
use crate::types::{Bar, Order, StopOrder, Tick, TradeFill};

/// Extension hooks invoked by the strategy runtime
///
/// All hooks default to a no-op so a strategy only implements the events it
/// cares about.
#[allow(unused_variables)]
pub trait Strategy: Send {
    /// Called once from `init`; load history, warm up indicators
    fn on_init(&mut self, core: &mut StrategyCore) -> Result<()> {
        Ok(())
    }

    /// Called when trading is switched on
    fn on_start_trading(&mut self, core: &mut StrategyCore) -> Result<()> {
        Ok(())
    }

    /// Called when trading is switched off; `exception` is true when the stop
    /// was forced by the fail-fast policy
    fn on_stop_trading(&mut self, core: &mut StrategyCore, exception: bool) -> Result<()> {
        Ok(())
    }

    /// Called for every accepted tick, after stop-order trigger evaluation
    fn on_tick(&mut self, core: &mut StrategyCore, tick: &Tick) -> Result<()> {
        Ok(())
    }

    /// Called for every finalized minute bar
    fn on_bar(&mut self, core: &mut StrategyCore, bar: &Bar) -> Result<()> {
        Ok(())
    }

    /// Called for every finalized N-minute composite bar (window > 1 only)
    fn on_x_min_bar(&mut self, core: &mut StrategyCore, bar: &Bar) -> Result<()> {
        Ok(())
    }

    /// Called once per unique trade fill, after the ledger is updated
    fn on_trade(&mut self, core: &mut StrategyCore, trade: &TradeFill) -> Result<()> {
        Ok(())
    }

    /// Called for every order status report, after the working set and ledger
    /// are updated
    fn on_order(&mut self, core: &mut StrategyCore, order: &Order) -> Result<()> {
        Ok(())
    }

    /// Called when a stop order leaves the working set (triggered or
    /// cancelled)
    fn on_stop_order(&mut self, core: &mut StrategyCore, stop_order: &StopOrder) -> Result<()> {
        Ok(())
    }
}
