//! Runtime error types
//!
//! Typed errors for the conditions the runtime itself detects. Collaborator
//! failures (gateway, persistence) surface as `anyhow::Error` at the hook
//! boundary and trigger the same fail-fast halt.

use crate::types::Symbol;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no contract configuration for instrument {0}")]
    MissingContractConfig(Symbol),

    #[error("no venue configuration for instrument {symbol} at venue {venue_id}")]
    MissingVenueConfig { symbol: Symbol, venue_id: String },

    #[error("no position book for instrument {0}")]
    UnknownInstrument(Symbol),
}

pub type Result<T> = std::result::Result<T, CoreError>;
