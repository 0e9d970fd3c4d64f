use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{days_between, Money, Rate};
use crate::state::Installment;
use crate::types::{PenaltyType, ProductId};

/// days per block for monthly penalties
const MONTHLY_BLOCK_DAYS: i64 = 30;

/// penalty policy attached to a loan product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPolicy {
    pub product_id: ProductId,
    pub penalty_type: PenaltyType,
    /// fraction of the overdue amount for daily/monthly, flat amount for fixed
    pub rate: Rate,
    pub grace_period_days: u32,
    pub max_penalty: Option<Money>,
    pub active: bool,
}

impl PenaltyPolicy {
    pub fn new(product_id: ProductId, penalty_type: PenaltyType, rate: Rate) -> Self {
        Self {
            product_id,
            penalty_type,
            rate,
            grace_period_days: 0,
            max_penalty: None,
            active: true,
        }
    }

    pub fn with_grace_period(mut self, days: u32) -> Self {
        self.grace_period_days = days;
        self
    }

    pub fn with_cap(mut self, cap: Money) -> Self {
        self.max_penalty = Some(cap);
        self
    }
}

/// penalty calculation result
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyCalculation {
    pub penalty_amount: Money,
    /// days past due after the grace period, zero when not chargeable
    pub days_charged: u32,
    pub overdue_base: Money,
    pub grace_applied: bool,
    pub capped: bool,
}

impl PenaltyCalculation {
    fn none(overdue_base: Money, grace_applied: bool) -> Self {
        Self {
            penalty_amount: Money::ZERO,
            days_charged: 0,
            overdue_base,
            grace_applied,
            capped: false,
        }
    }
}

/// derives penalties for overdue installments from a product's policy
#[derive(Debug, Clone, Default)]
pub struct PenaltyCalculator {
    policy: Option<PenaltyPolicy>,
}

impl PenaltyCalculator {
    pub fn new(policy: PenaltyPolicy) -> Self {
        Self {
            policy: Some(policy),
        }
    }

    /// calculator for a loan whose product may have no policy; inactive
    /// policies charge nothing
    pub fn for_policy(policy: Option<PenaltyPolicy>) -> Self {
        Self {
            policy: policy.filter(|p| p.active),
        }
    }

    pub fn policy(&self) -> Option<&PenaltyPolicy> {
        self.policy.as_ref()
    }

    /// penalty on `outstanding` for an installment due on `due_date`, evaluated on `as_of`
    pub fn calculate(
        &self,
        due_date: NaiveDate,
        outstanding: Money,
        as_of: NaiveDate,
    ) -> PenaltyCalculation {
        let Some(policy) = &self.policy else {
            return PenaltyCalculation::none(outstanding, false);
        };

        let days_overdue = days_between(due_date, as_of) - policy.grace_period_days as i64;
        if days_overdue <= 0 || !outstanding.is_positive() {
            return PenaltyCalculation::none(outstanding, days_overdue <= 0);
        }

        let rate = policy.rate.as_decimal();
        let raw = match policy.penalty_type {
            PenaltyType::Daily => (outstanding * rate) * Decimal::from(days_overdue),
            PenaltyType::Monthly => {
                let months = (days_overdue + MONTHLY_BLOCK_DAYS - 1) / MONTHLY_BLOCK_DAYS;
                (outstanding * rate) * Decimal::from(months)
            }
            PenaltyType::Fixed => Money::from_decimal(rate),
        };

        let (penalty_amount, capped) = match policy.max_penalty {
            Some(cap) if raw > cap => (cap, true),
            _ => (raw, false),
        };

        PenaltyCalculation {
            penalty_amount,
            days_charged: days_overdue as u32,
            overdue_base: outstanding,
            grace_applied: false,
            capped,
        }
    }

    /// penalty for an installment's unpaid scheduled amount
    pub fn assess(&self, installment: &Installment, as_of: NaiveDate) -> PenaltyCalculation {
        self.calculate(installment.due_date, installment.outstanding_scheduled(), as_of)
    }

    /// raise the installment's stored penalty to the amount assessed on `as_of`.
    /// Stored penalties are a high-water mark and are never lowered.
    /// Returns the increase.
    pub fn accrue(&self, installment: &mut Installment, as_of: NaiveDate) -> Money {
        let assessed = self.assess(installment, as_of).penalty_amount;
        if assessed > installment.penalty_due {
            let increase = assessed - installment.penalty_due;
            installment.penalty_due = assessed;
            increase
        } else {
            Money::ZERO
        }
    }
}
