use thiserror::Error;

use crate::decimal::Money;
use crate::types::LoanId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    #[error("invalid state: current {current}, expected {expected}")]
    InvalidState {
        current: String,
        expected: String,
    },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("payment {amount} exceeds outstanding balance {outstanding}")]
    ExceedsBalance {
        amount: Money,
        outstanding: Money,
    },

    #[error("duplicate receipt number: {receipt_number}")]
    DuplicateReceipt {
        receipt_number: String,
    },

    #[error("nothing to allocate: loan {loan_id} has no outstanding installments")]
    NothingToAllocate {
        loan_id: LoanId,
    },

    #[error("concurrency conflict on loan {loan_id}: {message}")]
    ConcurrencyConflict {
        loan_id: LoanId,
        message: String,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl EngineError {
    pub fn loan_not_found(loan_id: LoanId) -> Self {
        EngineError::NotFound {
            entity: "loan",
            id: loan_id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    /// whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict { .. })
    }

    /// ValidationError family from the error model; strict overpayment
    /// rejection is reported as a validation failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation { .. } | EngineError::ExceedsBalance { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
