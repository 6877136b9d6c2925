//! Strategy Runtime
//!
//! A per-instance trading strategy runtime: a single consumer loop dispatches
//! market and execution events to pluggable strategy logic, maintains a
//! multi-venue position ledger with automatic order sizing, manages live and
//! locally-held stop orders and aggregates ticks into minute and N-minute
//! bars. Failures halt trading fast while the event loop keeps draining.

pub mod bars;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod position;
pub mod runner;
pub mod strategy;
pub mod types;

pub use config::StrategySettings;
pub use core::StrategyCore;
pub use gateway::{EngineMode, ExecutionGateway, SimGateway};
pub use persistence::{PositionSink, PositionSnapshot};
pub use runner::{StrategyEvent, StrategyHandle, StrategyRunner};
pub use strategy::Strategy;
pub use types::*;
