//! Event dispatch and lifecycle
//!
//! [`StrategyRunner`] owns a strategy instance end to end: the single
//! consumer loop draining the event channel, the lifecycle transitions
//! (init, start, stop) and the fail-fast policy. Producers hold a cheap
//! [`StrategyHandle`] and never touch instance state directly, so every
//! mutation happens on the one consumer task.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::StrategySettings;
use crate::core::{Notice, StrategyCore};
use crate::gateway::ExecutionGateway;
use crate::persistence::PositionSink;
use crate::strategy::Strategy;
use crate::types::{Order, Tick, TradeFill};

/// One unit of work for the consumer loop
#[derive(Debug)]
pub enum StrategyEvent {
    Tick(Tick),
    Trade(TradeFill),
    Order(Order),
    Shutdown,
}

/// Cheap, cloneable producer side of an instance's event channel
#[derive(Clone)]
pub struct StrategyHandle {
    tx: mpsc::UnboundedSender<StrategyEvent>,
}

impl StrategyHandle {
    pub fn send(&self, event: StrategyEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("strategy event channel closed"))
    }

    pub fn tick(&self, tick: Tick) -> Result<()> {
        self.send(StrategyEvent::Tick(tick))
    }

    pub fn trade(&self, trade: TradeFill) -> Result<()> {
        self.send(StrategyEvent::Trade(trade))
    }

    pub fn order(&self, order: Order) -> Result<()> {
        self.send(StrategyEvent::Order(order))
    }

    /// Ask the consumer loop to stop trading and exit
    pub fn stop(&self) -> Result<()> {
        self.send(StrategyEvent::Shutdown)
    }
}

/// Owns one strategy instance and its consumer loop
pub struct StrategyRunner {
    core: StrategyCore,
    strategy: Box<dyn Strategy>,
    rx: mpsc::UnboundedReceiver<StrategyEvent>,
}

impl StrategyRunner {
    pub fn new(
        settings: StrategySettings,
        strategy: Box<dyn Strategy>,
        gateway: Arc<dyn ExecutionGateway>,
        sink: PositionSink,
    ) -> Result<(Self, StrategyHandle)> {
        let core = StrategyCore::new(settings, gateway, sink)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self { core, strategy, rx }, StrategyHandle { tx }))
    }

    pub fn core(&self) -> &StrategyCore {
        &self.core
    }

    /// Run the strategy's init hook; idempotent
    pub fn init(&mut self) -> Result<()> {
        if self.core.initialized() {
            warn!("{} already initialized", self.core.log_tag());
            return Ok(());
        }
        self.core.set_initialized(true);
        if let Err(err) = self.strategy.on_init(&mut self.core) {
            self.core.set_initialized(false);
            return Err(err.context("strategy init failed"));
        }
        self.deliver_notices();
        info!("{} initialized", self.core.log_tag());
        Ok(())
    }

    /// Switch trading on; requires a completed init
    pub fn start_trading(&mut self) -> Result<()> {
        if !self.core.initialized() {
            warn!("{} cannot start trading before init", self.core.log_tag());
            return Ok(());
        }
        if self.core.trading() {
            warn!("{} already trading", self.core.log_tag());
            return Ok(());
        }
        self.core.set_trading(true);
        if let Err(err) = self.strategy.on_start_trading(&mut self.core) {
            error!(
                "{} start hook failed: {:#}, stopping",
                self.core.log_tag(),
                err
            );
            self.stop_trading(true);
            return Ok(());
        }
        self.deliver_notices();
        info!("{} trading started", self.core.log_tag());
        Ok(())
    }

    /// Switch trading off; `exception` marks a fail-fast halt
    fn stop_trading(&mut self, exception: bool) {
        if !self.core.trading() {
            warn!("{} trading already stopped", self.core.log_tag());
            return;
        }
        self.core.set_trading(false);
        if let Err(err) = self.strategy.on_stop_trading(&mut self.core, exception) {
            error!("{} stop hook failed: {:#}", self.core.log_tag(), err);
        }
        info!(
            "{} trading stopped, exception={}",
            self.core.log_tag(),
            exception
        );
    }

    /// Drain events until shutdown
    ///
    /// Every failure inside event processing halts trading but keeps the loop
    /// draining; only an explicit shutdown or a closed channel ends it. The
    /// closing grace delay lets in-flight venue callbacks settle before the
    /// instance is dropped.
    pub async fn run(mut self) {
        loop {
            match self.rx.recv().await {
                Some(StrategyEvent::Tick(tick)) => {
                    if let Err(err) = self.process_tick(&tick) {
                        error!(
                            "{} tick processing failed: {:#}, stopping",
                            self.core.log_tag(),
                            err
                        );
                        self.stop_trading(true);
                    }
                    self.deliver_notices();
                }
                Some(StrategyEvent::Trade(trade)) => {
                    if let Err(err) = self.process_trade(&trade) {
                        error!(
                            "{} trade processing failed: {:#}, stopping",
                            self.core.log_tag(),
                            err
                        );
                        self.stop_trading(true);
                    }
                    self.deliver_notices();
                }
                Some(StrategyEvent::Order(order)) => {
                    if let Err(err) = self.process_order(&order) {
                        error!(
                            "{} order processing failed: {:#}, stopping",
                            self.core.log_tag(),
                            err
                        );
                        self.stop_trading(true);
                    }
                    self.deliver_notices();
                }
                Some(StrategyEvent::Shutdown) => {
                    if self.core.trading() {
                        self.stop_trading(false);
                    }
                    break;
                }
                // All producers gone without a shutdown: treat as a fault.
                None => {
                    error!("{} event channel interrupted", self.core.log_tag());
                    self.stop_trading(true);
                    break;
                }
            }
        }

        info!("{} consumer loop finished, settling", self.core.log_tag());
        tokio::time::sleep(Duration::from_millis(500)).await;
        info!("{} shut down", self.core.log_tag());
    }

    /// Stop triggers fire before the tick hook; bar aggregation runs after it
    fn process_tick(&mut self, tick: &Tick) -> Result<()> {
        self.core.trigger_stop_orders(tick)?;
        self.deliver_notices();
        self.strategy.on_tick(&mut self.core, tick)?;

        if let Some(bar) = self.core.update_minute_bar(tick) {
            self.strategy.on_bar(&mut self.core, &bar)?;
            if self.core.x_min() > 1 {
                if let Some(composite) = self.core.update_x_min_bar(&bar) {
                    self.strategy.on_x_min_bar(&mut self.core, &composite)?;
                }
            }
        }
        Ok(())
    }

    /// The trade hook fires only for fills the ledger actually applied
    fn process_trade(&mut self, trade: &TradeFill) -> Result<()> {
        if self.core.apply_trade_event(trade)? {
            self.strategy.on_trade(&mut self.core, trade)?;
        }
        Ok(())
    }

    fn process_order(&mut self, order: &Order) -> Result<()> {
        self.core.apply_order_event(order)?;
        self.strategy.on_order(&mut self.core, order)?;
        Ok(())
    }

    /// Deliver notifications queued by core helpers during the last hook
    fn deliver_notices(&mut self) {
        while let Some(notice) = self.core.pop_notice() {
            match notice {
                Notice::StopOrder(stop_order) => {
                    if let Err(err) = self.strategy.on_stop_order(&mut self.core, &stop_order) {
                        error!(
                            "{} stop order hook failed: {:#}, stopping",
                            self.core.log_tag(),
                            err
                        );
                        self.stop_trading(true);
                    }
                }
                // Trading flag is already down; run the stop hook only.
                Notice::TradingHalted => {
                    if let Err(err) = self.strategy.on_stop_trading(&mut self.core, true) {
                        error!("{} stop hook failed: {:#}", self.core.log_tag(), err);
                    }
                    info!("{} trading stopped, exception=true", self.core.log_tag());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{EngineMode, SimGateway};
    use crate::types::{
        Direction, Offset, PriceKind, StopOrder, Symbol, TradeIntent,
    };
    use chrono::{TimeZone, Utc};

    fn settings() -> StrategySettings {
        serde_json::from_str(
            r#"{
                "id": "s-001",
                "name": "demo",
                "trading_day": "20260823",
                "x_min": 1,
                "contracts": [
                    {
                        "symbol": "rb2410.SHFE",
                        "exchange": "SHFE",
                        "size": 10,
                        "backtest_price_tick": 1.0,
                        "venues": [{ "venue_id": "ctp-a", "fixed_pos": 3 }]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn symbol() -> Symbol {
        Symbol::new("rb2410.SHFE")
    }

    fn tick_at(min: u32, sec: u32, price: f64) -> Tick {
        Tick {
            symbol: symbol(),
            exchange: "SHFE".to_string(),
            venue_id: "ctp-a".to_string(),
            trading_day: "20260823".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 8, 23, 9, min, sec).unwrap(),
            last_price: price,
            volume: 100.0,
            open_interest: 1000.0,
            upper_limit: 3900.0,
            lower_limit: 3200.0,
        }
    }

    #[derive(Default)]
    struct Recorder {
        ticks: usize,
        bars: usize,
        stop_orders: Vec<StopOrder>,
        stops: Vec<bool>,
    }

    #[derive(Clone, Default)]
    struct RecorderHandle(std::sync::Arc<std::sync::Mutex<Recorder>>);

    struct RecordingStrategy {
        recorder: RecorderHandle,
        fail_on_tick: bool,
    }

    impl Strategy for RecordingStrategy {
        fn on_tick(&mut self, _core: &mut StrategyCore, _tick: &Tick) -> Result<()> {
            self.recorder.0.lock().unwrap().ticks += 1;
            if self.fail_on_tick {
                anyhow::bail!("tick hook failure");
            }
            Ok(())
        }

        fn on_bar(&mut self, _core: &mut StrategyCore, _bar: &crate::types::Bar) -> Result<()> {
            self.recorder.0.lock().unwrap().bars += 1;
            Ok(())
        }

        fn on_stop_order(
            &mut self,
            _core: &mut StrategyCore,
            stop_order: &StopOrder,
        ) -> Result<()> {
            self.recorder
                .0
                .lock()
                .unwrap()
                .stop_orders
                .push(stop_order.clone());
            Ok(())
        }

        fn on_stop_trading(&mut self, _core: &mut StrategyCore, exception: bool) -> Result<()> {
            self.recorder.0.lock().unwrap().stops.push(exception);
            Ok(())
        }
    }

    fn runner_with(
        fail_on_tick: bool,
    ) -> (StrategyRunner, StrategyHandle, RecorderHandle, Arc<SimGateway>) {
        let recorder = RecorderHandle::default();
        let gateway = Arc::new(SimGateway::new(EngineMode::Backtest));
        let (runner, handle) = StrategyRunner::new(
            settings(),
            Box::new(RecordingStrategy {
                recorder: recorder.clone(),
                fail_on_tick,
            }),
            gateway.clone() as Arc<dyn ExecutionGateway>,
            PositionSink::disabled(),
        )
        .unwrap();
        (runner, handle, recorder, gateway)
    }

    #[test]
    fn test_init_is_idempotent() {
        let (mut runner, _handle, _recorder, _gateway) = runner_with(false);
        runner.init().unwrap();
        runner.init().unwrap();
        assert!(runner.core().initialized());
    }

    #[test]
    fn test_start_requires_init() {
        let (mut runner, _handle, _recorder, _gateway) = runner_with(false);
        runner.start_trading().unwrap();
        assert!(!runner.core().trading());

        runner.init().unwrap();
        runner.start_trading().unwrap();
        assert!(runner.core().trading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_trading_cleanly() {
        let (mut runner, handle, recorder, _gateway) = runner_with(false);
        runner.init().unwrap();
        runner.start_trading().unwrap();

        handle.tick(tick_at(0, 1, 3500.0)).unwrap();
        handle.stop().unwrap();
        runner.run().await;

        let recorder = recorder.0.lock().unwrap();
        assert_eq!(recorder.ticks, 1);
        assert_eq!(recorder.stops, vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_failure_halts_but_keeps_draining() {
        let (mut runner, handle, recorder, _gateway) = runner_with(true);
        runner.init().unwrap();
        runner.start_trading().unwrap();

        handle.tick(tick_at(0, 1, 3500.0)).unwrap();
        handle.tick(tick_at(0, 2, 3501.0)).unwrap();
        handle.stop().unwrap();
        runner.run().await;

        let recorder = recorder.0.lock().unwrap();
        // Both ticks reach the hook even though the first one failed.
        assert_eq!(recorder.ticks, 2);
        assert_eq!(recorder.stops, vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_is_an_exceptional_stop() {
        let (mut runner, handle, recorder, _gateway) = runner_with(false);
        runner.init().unwrap();
        runner.start_trading().unwrap();

        drop(handle);
        runner.run().await;

        let recorder = recorder.0.lock().unwrap();
        assert_eq!(recorder.stops, vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_bar_emitted_through_dispatch() {
        let (mut runner, handle, recorder, _gateway) = runner_with(false);
        runner.init().unwrap();
        runner.start_trading().unwrap();

        handle.tick(tick_at(0, 1, 3500.0)).unwrap();
        handle.tick(tick_at(0, 30, 3502.0)).unwrap();
        handle.tick(tick_at(1, 1, 3501.0)).unwrap();
        handle.stop().unwrap();
        runner.run().await;

        let recorder = recorder.0.lock().unwrap();
        assert_eq!(recorder.ticks, 3);
        assert_eq!(recorder.bars, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggered_stop_notifies_before_tick_hook() {
        let (mut runner, handle, recorder, gateway) = runner_with(false);
        runner.init().unwrap();
        runner.start_trading().unwrap();
        runner
            .core
            .send_stop_order(
                &symbol(),
                TradeIntent::Buy,
                PriceKind::Limit,
                3600.0,
                1,
                "ctp-a",
            )
            .unwrap();

        handle.tick(tick_at(0, 1, 3650.0)).unwrap();
        handle.stop().unwrap();
        runner.run().await;

        let recorder = recorder.0.lock().unwrap();
        assert_eq!(recorder.stop_orders.len(), 1);
        let sent = gateway.sent_orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].direction, Direction::Long);
        assert_eq!(sent[0].offset, Offset::Open);
        assert_eq!(sent[0].price, 3900.0);
    }
}
