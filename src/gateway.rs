//! Execution gateway abstraction
//!
//! The runtime never talks to a venue directly; it goes through an
//! [`ExecutionGateway`]. Live implementations wrap broker connections, the
//! bundled [`SimGateway`] records requests in memory for wiring tests and dry
//! runs.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::{ContractInfo, OrderRequest, Symbol};

/// Where contract metadata comes from when building order requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Contract metadata resolved from the live venue
    Live,
    /// Contract metadata resolved from strategy configuration
    Backtest,
}

/// Execution/venue collaborator consumed by the runtime
pub trait ExecutionGateway: Send + Sync {
    fn mode(&self) -> EngineMode;

    /// Submit an order request, returning the venue-assigned order id
    fn send_order(&self, request: &OrderRequest) -> Result<String>;

    /// Ask the venue to cancel a working order
    fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Contract metadata for an instrument at a venue
    fn contract(&self, symbol: &Symbol, venue_id: &str) -> Result<ContractInfo>;

    /// Price tick for an instrument at a venue
    fn price_tick(&self, symbol: &Symbol, venue_id: &str) -> Result<f64> {
        Ok(self.contract(symbol, venue_id)?.price_tick)
    }
}

/// In-memory gateway that records every request and hands out sequential ids
pub struct SimGateway {
    mode: EngineMode,
    contracts: HashMap<String, ContractInfo>,
    sent: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl SimGateway {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            contracts: HashMap::new(),
            sent: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register contract metadata served in [`EngineMode::Live`]
    pub fn with_contract(mut self, symbol: &Symbol, info: ContractInfo) -> Self {
        self.contracts.insert(symbol.as_str().to_string(), info);
        self
    }

    /// Snapshot of every order request received so far
    pub fn sent_orders(&self) -> Vec<OrderRequest> {
        self.sent.lock().expect("sim gateway lock poisoned").clone()
    }

    /// Snapshot of every cancel received so far
    pub fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .expect("sim gateway lock poisoned")
            .clone()
    }
}

impl ExecutionGateway for SimGateway {
    fn mode(&self) -> EngineMode {
        self.mode
    }

    fn send_order(&self, request: &OrderRequest) -> Result<String> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sent
            .lock()
            .expect("sim gateway lock poisoned")
            .push(request.clone());
        Ok(format!("sim.{}.{}", request.venue_id, seq))
    }

    fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancelled
            .lock()
            .expect("sim gateway lock poisoned")
            .push(order_id.to_string());
        Ok(())
    }

    fn contract(&self, symbol: &Symbol, venue_id: &str) -> Result<ContractInfo> {
        self.contracts
            .get(symbol.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("no contract {} at venue {}", symbol, venue_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Offset, PriceKind};

    fn request(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: Symbol::new(symbol),
            venue_symbol: "rb2410".to_string(),
            exchange: "SHFE".to_string(),
            venue_id: "ctp-a".to_string(),
            direction: Direction::Long,
            offset: Offset::Open,
            price: 3500.0,
            volume: 2,
            price_kind: PriceKind::Limit,
        }
    }

    #[test]
    fn test_sequential_order_ids() {
        let gateway = SimGateway::new(EngineMode::Backtest);
        let id1 = gateway.send_order(&request("rb2410.SHFE")).unwrap();
        let id2 = gateway.send_order(&request("rb2410.SHFE")).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(gateway.sent_orders().len(), 2);
    }

    #[test]
    fn test_contract_lookup() {
        let symbol = Symbol::new("rb2410.SHFE");
        let gateway = SimGateway::new(EngineMode::Live).with_contract(
            &symbol,
            ContractInfo {
                symbol: "rb2410".to_string(),
                exchange: "SHFE".to_string(),
                price_tick: 1.0,
            },
        );
        assert_eq!(gateway.price_tick(&symbol, "ctp-a").unwrap(), 1.0);
        assert!(gateway.contract(&Symbol::new("missing"), "ctp-a").is_err());
    }
}
