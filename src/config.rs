//! Strategy configuration
//!
//! Handles loading and normalizing the JSON strategy configuration: identity,
//! trading day, composite bar window, parameter/variable seeds and the traded
//! contracts with their per-venue settings.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::types::Symbol;

/// Recommended upper bound for the composite bar window, in minutes
pub const X_MIN_RECOMMENDED_MAX: u32 = 120;

/// Immutable strategy instance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    pub id: String,
    pub name: String,
    pub trading_day: String,
    /// Composite bar window in minutes; the composite aggregator is active
    /// only when this is greater than 1
    #[serde(default = "default_x_min")]
    pub x_min: u32,
    /// Parameter seeds, immutable after fix-up
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Variable seeds, mutated by strategy logic at runtime
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Names of variables persisted alongside position snapshots
    #[serde(default)]
    pub sync_vars: Vec<String>,
    pub contracts: Vec<ContractSetting>,
}

fn default_x_min() -> u32 {
    1
}

/// One traded instrument with its execution venues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSetting {
    pub symbol: Symbol,
    pub exchange: String,
    /// Contract multiplier
    pub size: i64,
    /// Price tick used when the gateway runs in backtest mode
    #[serde(default)]
    pub backtest_price_tick: f64,
    /// Aggregate target position; derived from venue targets when omitted
    #[serde(default)]
    pub fixed_pos: i64,
    pub venues: Vec<VenueSetting>,
}

impl ContractSetting {
    pub fn venue(&self, venue_id: &str) -> Option<&VenueSetting> {
        self.venues.iter().find(|v| v.venue_id == venue_id)
    }
}

/// Per-venue settings for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSetting {
    pub venue_id: String,
    /// Preset target position at this venue, used by automatic sizing
    #[serde(default)]
    pub fixed_pos: i64,
}

impl StrategySettings {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents =
            fs::read_to_string(path.as_ref()).context("Failed to read strategy config file")?;
        let settings: StrategySettings =
            serde_json::from_str(&contents).context("Failed to parse strategy config JSON")?;
        Ok(settings)
    }

    /// Normalize and validate the configuration
    ///
    /// Derives the aggregate `fixed_pos` of a contract from its venue targets
    /// when unset and validates the composite bar window. Must be called once
    /// before the settings are handed to a strategy instance.
    pub fn fix(&mut self) -> Result<()> {
        if self.id.is_empty() || self.name.is_empty() {
            bail!("strategy id and name must be set");
        }
        if self.x_min < 1 {
            bail!("x_min must be at least 1, got {}", self.x_min);
        }
        if self.x_min > X_MIN_RECOMMENDED_MAX {
            warn!(
                x_min = self.x_min,
                "composite bar window exceeds the recommended bound of {}", X_MIN_RECOMMENDED_MAX
            );
        }
        for contract in &mut self.contracts {
            if contract.fixed_pos == 0 {
                contract.fixed_pos = contract.venues.iter().map(|v| v.fixed_pos).sum();
            }
        }
        Ok(())
    }

    /// Look up the contract setting for an instrument
    pub fn contract(&self, symbol: &Symbol) -> Option<&ContractSetting> {
        self.contracts.iter().find(|c| &c.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> StrategySettings {
        serde_json::from_str(
            r#"{
                "id": "s-001",
                "name": "demo",
                "trading_day": "20260823",
                "x_min": 5,
                "contracts": [
                    {
                        "symbol": "rb2410.SHFE",
                        "exchange": "SHFE",
                        "size": 10,
                        "backtest_price_tick": 1.0,
                        "venues": [
                            { "venue_id": "ctp-a", "fixed_pos": 3 },
                            { "venue_id": "ctp-b", "fixed_pos": 2 }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_and_defaults() {
        let settings = sample_settings();
        assert_eq!(settings.x_min, 5);
        assert!(settings.params.is_empty());
        assert!(settings.sync_vars.is_empty());
        let contract = settings.contract(&Symbol::new("rb2410.SHFE")).unwrap();
        assert_eq!(contract.venues.len(), 2);
        assert_eq!(contract.fixed_pos, 0); // not yet fixed
    }

    #[test]
    fn test_fix_derives_aggregate_target() {
        let mut settings = sample_settings();
        settings.fix().unwrap();
        let contract = settings.contract(&Symbol::new("rb2410.SHFE")).unwrap();
        assert_eq!(contract.fixed_pos, 5);
    }

    #[test]
    fn test_fix_rejects_zero_window() {
        let mut settings = sample_settings();
        settings.x_min = 0;
        assert!(settings.fix().is_err());
    }

    #[test]
    fn test_fix_rejects_missing_identity() {
        let mut settings = sample_settings();
        settings.id.clear();
        assert!(settings.fix().is_err());
    }
}
