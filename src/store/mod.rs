pub mod memory;

use crate::errors::Result;
use crate::events::AuditEntry;
use crate::penalty::PenaltyPolicy;
use crate::state::{Installment, Loan, Repayment};
use crate::types::{LoanId, ProductId};

pub use memory::InMemoryStore;

/// transactional access to persisted loan state.
///
/// `begin` takes the loan-row lock for the lifetime of the returned
/// transaction, so units of work against the same loan are serialized while
/// different loans proceed in parallel. A lock that cannot be acquired in time
/// surfaces as `EngineError::ConcurrencyConflict`.
pub trait LoanStore: Send + Sync {
    type Tx<'a>: LoanTransaction
    where
        Self: 'a;

    fn begin(&self, loan_id: LoanId) -> Result<Self::Tx<'_>>;

    /// loan owning a ledger entry, looked up without taking a lock
    fn find_loan_by_receipt(&self, receipt_number: &str) -> Result<Option<LoanId>>;
}

/// one unit of work against a single loan.
///
/// Reads observe committed state. Writes are staged and become visible only
/// on `commit`; dropping the transaction without committing discards them.
pub trait LoanTransaction {
    fn loan_id(&self) -> LoanId;

    fn loan(&self) -> Result<Loan>;

    /// schedule ordered by installment number
    fn installments(&self) -> Result<Vec<Installment>>;

    fn penalty_policy(&self, product_id: ProductId) -> Result<Option<PenaltyPolicy>>;

    /// ledger entries for the loan, oldest first
    fn repayments(&self) -> Result<Vec<Repayment>>;

    fn receipt_exists(&self, receipt_number: &str) -> Result<bool>;

    fn put_loan(&mut self, loan: Loan);

    /// update existing schedule lines, matched by installment number
    fn put_installments(&mut self, installments: Vec<Installment>);

    /// delete every schedule line of the loan and insert `installments`
    fn replace_schedule(&mut self, installments: Vec<Installment>);

    fn insert_repayment(&mut self, repayment: Repayment) -> Result<()>;

    /// update an existing ledger entry, matched by receipt number
    fn put_repayment(&mut self, repayment: Repayment);

    fn append_audit(&mut self, entry: AuditEntry);

    fn commit(self) -> Result<()>;
}
