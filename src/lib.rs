pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod payments;
pub mod penalty;
pub mod performance;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod types;

// re-export key types
pub use config::{BalanceCheck, EngineConfig, PenaltySource, StageThresholds};
pub use decimal::{Money, Rate};
pub use engine::{Outcome, PaymentReceipt, PenaltyAccrual, RepaymentEngine, Reversal};
pub use errors::{EngineError, Result};
pub use events::{AuditAction, AuditEntry, Event, EventStore};
pub use payments::{
    Allocation, AllocationOptions, AmortizationCalculator, PaymentAllocator, PaymentRequest,
    ScheduleGenerator,
};
pub use penalty::{PenaltyCalculation, PenaltyCalculator, PenaltyPolicy};
pub use performance::{Classification, PerformanceClassifier};
pub use reconcile::{BalanceReconciler, ReconciliationReport, StatusTransition};
pub use state::{Installment, Loan, LoanSummary, LoanTerms, Repayment};
pub use store::{InMemoryStore, LoanStore, LoanTransaction};
pub use types::{
    AllocationLine, CalculationMethod, InstallmentStatus, LoanId, LoanStatus, PaymentApplication,
    PaymentMethod, PenaltyType, PerformanceStage, ProductId, RepaymentFrequency, RepaymentStatus,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
