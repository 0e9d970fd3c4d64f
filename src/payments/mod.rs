pub mod amortization;
pub mod waterfall;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::types::{LoanId, PaymentMethod};

pub use amortization::{AmortizationCalculator, ScheduleGenerator};
pub use waterfall::{Allocation, PaymentAllocator};

/// incoming payment against a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub loan_id: LoanId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    #[serde(default)]
    pub method: PaymentMethod,
    /// caller-supplied receipt number; generated when absent
    pub receipt_number: Option<String>,
    /// external reference such as a bank or mobile-money transaction id
    pub reference: Option<String>,
    pub recorded_by: String,
}

impl PaymentRequest {
    pub fn new(
        loan_id: LoanId,
        amount: Money,
        payment_date: NaiveDate,
        recorded_by: impl Into<String>,
    ) -> Self {
        Self {
            loan_id,
            amount,
            payment_date,
            method: PaymentMethod::default(),
            receipt_number: None,
            reference: None,
            recorded_by: recorded_by.into(),
        }
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_receipt(mut self, receipt_number: impl Into<String>) -> Self {
        self.receipt_number = Some(receipt_number.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(EngineError::validation(format!(
                "payment amount must be positive, got {}",
                self.amount
            )));
        }

        if let Some(receipt) = &self.receipt_number {
            if receipt.trim().is_empty() {
                return Err(EngineError::validation("receipt number must not be blank"));
            }
        }

        if self.recorded_by.trim().is_empty() {
            return Err(EngineError::validation("recorded_by must not be blank"));
        }

        Ok(())
    }
}

/// per-call overrides of the engine configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOptions {
    /// Some(true) rejects payments above the outstanding total regardless of
    /// the engine default, Some(false) forces excess reporting
    pub reject_overpayment: Option<bool>,
}

impl AllocationOptions {
    pub fn strict() -> Self {
        Self {
            reject_overpayment: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(amount: Money) -> PaymentRequest {
        PaymentRequest::new(
            Uuid::new_v4(),
            amount,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "cashier-1",
        )
    }

    #[test]
    fn test_payment_request_validation() {
        assert!(request(Money::ZERO).validate().is_err());
        assert!(request(Money::from_major(-5)).validate().is_err());
        assert!(request(Money::from_major(5)).validate().is_ok());
        assert!(request(Money::from_major(5)).with_receipt("  ").validate().is_err());

        let mut anonymous = request(Money::from_major(5));
        anonymous.recorded_by = String::new();
        assert!(anonymous.validate().is_err());
    }

    #[test]
    fn test_request_from_json_defaults_method() {
        let loan_id = Uuid::new_v4();
        let json = format!(
            r#"{{ "loan_id": "{loan_id}", "amount": "150.50", "payment_date": "2024-03-01",
                 "receipt_number": null, "reference": "MM-77", "recorded_by": "teller" }}"#
        );
        let parsed: PaymentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, PaymentMethod::Cash);
        assert_eq!(parsed.amount, Money::from_str_exact("150.50").unwrap());
        assert_eq!(parsed.reference.as_deref(), Some("MM-77"));
    }
}
