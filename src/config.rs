use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub balance_check: BalanceCheck,
    pub penalty_source: PenaltySource,
    pub stage_thresholds: StageThresholds,
    /// how long a unit of work waits for a loan row lock; applied by
    /// `InMemoryStore::from_config` and `RepaymentEngine::in_memory`
    pub lock_timeout_ms: u64,
    /// prefix for generated receipt numbers
    pub receipt_prefix: String,
}

/// what to do with a payment larger than everything outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceCheck {
    /// allocate until the schedule is exhausted and report the remainder as excess
    ReportExcess,
    /// reject the payment outright
    RejectOverpayment,
}

/// where the allocator reads an installment's penalty from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltySource {
    /// assess with the penalty calculator at allocation time
    Computed,
    /// use the penalty already stored on the installment
    Stored,
}

/// upper bounds (inclusive, in days in arrears) of each stage;
/// anything above `doubtful_max_days` is a loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageThresholds {
    pub watch_max_days: u32,
    pub substandard_max_days: u32,
    pub doubtful_max_days: u32,
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            watch_max_days: 30,
            substandard_max_days: 90,
            doubtful_max_days: 180,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            balance_check: BalanceCheck::ReportExcess,
            penalty_source: PenaltySource::Computed,
            stage_thresholds: StageThresholds::default(),
            lock_timeout_ms: 5_000,
            receipt_prefix: "RCP".to_string(),
        }
    }
}

impl EngineConfig {
    /// parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| {
            EngineError::InvalidConfiguration {
                message: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.stage_thresholds;
        if t.watch_max_days == 0
            || t.watch_max_days >= t.substandard_max_days
            || t.substandard_max_days >= t.doubtful_max_days
        {
            return Err(EngineError::InvalidConfiguration {
                message: format!(
                    "stage thresholds must be positive and strictly increasing: {}/{}/{}",
                    t.watch_max_days, t.substandard_max_days, t.doubtful_max_days
                ),
            });
        }

        if self.receipt_prefix.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration {
                message: "receipt prefix must not be empty".to_string(),
            });
        }

        if self.lock_timeout_ms == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: "lock timeout must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// strict variant rejecting overpayments
    pub fn strict() -> Self {
        Self {
            balance_check: BalanceCheck::RejectOverpayment,
            ..Self::default()
        }
    }
}
