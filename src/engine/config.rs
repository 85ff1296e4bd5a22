//! Engine configuration options.

use crate::types::{ALLOCATION_TOLERANCE, SETTLEMENT_TOLERANCE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Conservation, non-negativity, zero-sum and feasibility tolerance.
    pub allocation_tolerance: Decimal,
    /// Settlement sum tolerance.
    pub settlement_tolerance: Decimal,
    /// Cap on events returned by one read.
    pub max_events_per_read: usize,
    /// Log every committed event at info instead of debug.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allocation_tolerance: ALLOCATION_TOLERANCE,
            settlement_tolerance: SETTLEMENT_TOLERANCE,
            max_events_per_read: 10_000,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "verbose": true }"#).unwrap();
        assert!(config.verbose);
        assert_eq!(config.allocation_tolerance, ALLOCATION_TOLERANCE);
        assert_eq!(config.max_events_per_read, 10_000);
    }
}
