use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{LoanId, LoanStatus, PerformanceStage};

/// all events that can be emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // payment events
    PaymentAllocated {
        loan_id: LoanId,
        receipt_number: String,
        amount: Money,
        applied_to_penalties: Money,
        applied_to_fees: Money,
        applied_to_interest: Money,
        applied_to_principal: Money,
        payment_date: NaiveDate,
    },
    InstallmentSettled {
        loan_id: LoanId,
        installment_number: u32,
        payment_date: NaiveDate,
    },
    ExcessReported {
        loan_id: LoanId,
        receipt_number: String,
        excess: Money,
    },
    PaymentReversed {
        loan_id: LoanId,
        receipt_number: String,
        amount: Money,
        reason: String,
    },

    // balance events
    BalancesReconciled {
        loan_id: LoanId,
        principal_drift: Money,
        interest_drift: Money,
        installments_repaired: u32,
    },

    // charge events
    PenaltiesAccrued {
        loan_id: LoanId,
        amount: Money,
        installments: u32,
        as_of: NaiveDate,
    },

    // schedule events
    ScheduleRegenerated {
        loan_id: LoanId,
        removed: u32,
        created: u32,
    },

    // status change events
    LoanStatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        reason: String,
    },
    PerformanceStageChanged {
        loan_id: LoanId,
        old_stage: PerformanceStage,
        new_stage: PerformanceStage,
        days_in_arrears: u32,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// kind of mutating call recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PaymentAllocated,
    BalancesReconciled,
    LoanClassified,
    ScheduleRegenerated,
    PenaltiesAccrued,
    RepaymentReversed,
}

/// append-only audit log row, written in the same unit of work as the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub loan_id: LoanId,
    pub action: AuditAction,
    pub description: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        loan_id: LoanId,
        action: AuditAction,
        description: impl Into<String>,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            action,
            description: description.into(),
            actor: actor.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_events_drains_store() {
        let mut store = EventStore::new();
        let loan_id = Uuid::new_v4();
        store.emit(Event::ScheduleRegenerated {
            loan_id,
            removed: 3,
            created: 4,
        });

        assert_eq!(store.events().len(), 1);
        let taken = store.take_events();
        assert_eq!(taken.len(), 1);
        assert!(store.events().is_empty());
    }
}
