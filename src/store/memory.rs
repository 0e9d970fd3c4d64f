use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::events::AuditEntry;
use crate::penalty::PenaltyPolicy;
use crate::state::{Installment, Loan, Repayment};
use crate::types::{LoanId, ProductId};

use super::{LoanStore, LoanTransaction};

#[derive(Debug, Default)]
struct Tables {
    loans: HashMap<LoanId, Loan>,
    installments: HashMap<LoanId, Vec<Installment>>,
    repayments: Vec<Repayment>,
    /// receipt number -> index into `repayments`
    receipts: HashMap<String, usize>,
    policies: HashMap<ProductId, PenaltyPolicy>,
    audit: Vec<AuditEntry>,
}

/// in-process store with row locks per loan and all-or-nothing commits
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashSet<LoanId>>,
    released: Condvar,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_millis(EngineConfig::default().lock_timeout_ms))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            row_locks: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            lock_timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // seeding

    pub fn insert_loan(&self, loan: Loan) {
        self.tables().loans.insert(loan.id, loan);
    }

    pub fn insert_installments(&self, loan_id: LoanId, mut installments: Vec<Installment>) {
        installments.sort_by_key(|i| i.installment_number);
        self.tables().installments.insert(loan_id, installments);
    }

    pub fn insert_policy(&self, policy: PenaltyPolicy) {
        self.tables().policies.insert(policy.product_id, policy);
    }

    // committed reads

    pub fn loan(&self, loan_id: LoanId) -> Option<Loan> {
        self.tables().loans.get(&loan_id).cloned()
    }

    pub fn installments(&self, loan_id: LoanId) -> Vec<Installment> {
        self.tables().installments.get(&loan_id).cloned().unwrap_or_default()
    }

    pub fn repayments(&self, loan_id: LoanId) -> Vec<Repayment> {
        self.tables()
            .repayments
            .iter()
            .filter(|r| r.loan_id == loan_id)
            .cloned()
            .collect()
    }

    pub fn audit_log(&self, loan_id: LoanId) -> Vec<AuditEntry> {
        self.tables()
            .audit
            .iter()
            .filter(|a| a.loan_id == loan_id)
            .cloned()
            .collect()
    }
}

impl LoanStore for InMemoryStore {
    type Tx<'a> = MemoryTransaction<'a>;

    fn begin(&self, loan_id: LoanId) -> Result<MemoryTransaction<'_>> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut held = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);

        while held.contains(&loan_id) {
            let now = Instant::now();
            if now >= deadline {
                warn!(%loan_id, timeout_ms = self.lock_timeout.as_millis() as u64, "row lock wait timed out");
                return Err(EngineError::ConcurrencyConflict {
                    loan_id,
                    message: format!("row lock not acquired within {:?}", self.lock_timeout),
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }

        held.insert(loan_id);
        debug!(%loan_id, "row lock acquired");

        Ok(MemoryTransaction {
            store: self,
            loan_id,
            staged: Staged::default(),
            committed: false,
        })
    }

    fn find_loan_by_receipt(&self, receipt_number: &str) -> Result<Option<LoanId>> {
        let tables = self.tables();
        Ok(tables
            .receipts
            .get(receipt_number)
            .map(|&idx| tables.repayments[idx].loan_id))
    }
}

#[derive(Debug, Default)]
struct Staged {
    loan: Option<Loan>,
    schedule: Option<Vec<Installment>>,
    installments: Vec<Installment>,
    new_repayments: Vec<Repayment>,
    updated_repayments: Vec<Repayment>,
    audit: Vec<AuditEntry>,
}

/// unit of work holding the row lock of one loan
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    store: &'a InMemoryStore,
    loan_id: LoanId,
    staged: Staged,
    committed: bool,
}

impl MemoryTransaction<'_> {
    fn apply(loan_id: LoanId, staged: Staged, tables: &mut Tables) {
        if let Some(loan) = staged.loan {
            tables.loans.insert(loan.id, loan);
        }

        let schedule = tables.installments.entry(loan_id).or_default();
        if let Some(replacement) = staged.schedule {
            *schedule = replacement;
        }
        for updated in staged.installments {
            match schedule
                .iter_mut()
                .find(|i| i.installment_number == updated.installment_number)
            {
                Some(existing) => *existing = updated,
                None => schedule.push(updated),
            }
        }
        schedule.sort_by_key(|i| i.installment_number);

        for repayment in staged.new_repayments {
            tables
                .receipts
                .insert(repayment.receipt_number.clone(), tables.repayments.len());
            tables.repayments.push(repayment);
        }
        for updated in staged.updated_repayments {
            if let Some(&idx) = tables.receipts.get(&updated.receipt_number) {
                tables.repayments[idx] = updated;
            }
        }

        tables.audit.extend(staged.audit);
    }
}

impl LoanTransaction for MemoryTransaction<'_> {
    fn loan_id(&self) -> LoanId {
        self.loan_id
    }

    fn loan(&self) -> Result<Loan> {
        self.store
            .loan(self.loan_id)
            .ok_or_else(|| EngineError::loan_not_found(self.loan_id))
    }

    fn installments(&self) -> Result<Vec<Installment>> {
        Ok(self.store.installments(self.loan_id))
    }

    fn penalty_policy(&self, product_id: ProductId) -> Result<Option<PenaltyPolicy>> {
        Ok(self.store.tables().policies.get(&product_id).cloned())
    }

    fn repayments(&self) -> Result<Vec<Repayment>> {
        Ok(self.store.repayments(self.loan_id))
    }

    fn receipt_exists(&self, receipt_number: &str) -> Result<bool> {
        let staged = self
            .staged
            .new_repayments
            .iter()
            .any(|r| r.receipt_number == receipt_number);
        Ok(staged || self.store.tables().receipts.contains_key(receipt_number))
    }

    fn put_loan(&mut self, loan: Loan) {
        self.staged.loan = Some(loan);
    }

    fn put_installments(&mut self, installments: Vec<Installment>) {
        self.staged.installments.extend(installments);
    }

    fn replace_schedule(&mut self, installments: Vec<Installment>) {
        self.staged.installments.clear();
        self.staged.schedule = Some(installments);
    }

    fn insert_repayment(&mut self, repayment: Repayment) -> Result<()> {
        if self.receipt_exists(&repayment.receipt_number)? {
            return Err(EngineError::DuplicateReceipt {
                receipt_number: repayment.receipt_number,
            });
        }
        self.staged.new_repayments.push(repayment);
        Ok(())
    }

    fn put_repayment(&mut self, repayment: Repayment) {
        self.staged.updated_repayments.push(repayment);
    }

    fn append_audit(&mut self, entry: AuditEntry) {
        self.staged.audit.push(entry);
    }

    fn commit(mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.store.tables();

        // a receipt may have been committed by another loan's unit of work
        if let Some(duplicate) = staged
            .new_repayments
            .iter()
            .find(|r| tables.receipts.contains_key(&r.receipt_number))
        {
            return Err(EngineError::DuplicateReceipt {
                receipt_number: duplicate.receipt_number.clone(),
            });
        }

        Self::apply(self.loan_id, staged, &mut tables);
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!(loan_id = %self.loan_id, "unit of work rolled back");
        }
        let mut held = self
            .store
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.loan_id);
        drop(held);
        self.store.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Money, Rate};
    use crate::events::AuditAction;
    use crate::state::LoanTerms;
    use crate::types::{CalculationMethod, PaymentMethod, RepaymentFrequency, RepaymentStatus};
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seeded() -> (InMemoryStore, Loan) {
        let terms = LoanTerms {
            principal: Money::from_major(1_000),
            interest_rate: Rate::from_percentage(10),
            term: 1,
            frequency: RepaymentFrequency::Monthly,
            calculation_method: CalculationMethod::Flat,
            first_due_date: date(2024, 2, 1),
            fee_per_installment: Money::ZERO,
        };
        let loan = Loan::new("LN-1", "CL-1", Uuid::new_v4(), terms, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));
        store.insert_loan(loan.clone());
        store.insert_installments(
            loan.id,
            vec![Installment::new(loan.id, 1, date(2024, 2, 1), Money::from_major(1_000), Money::from_major(10), Money::ZERO)],
        );
        (store, loan)
    }

    fn repayment(loan_id: LoanId, receipt: &str) -> Repayment {
        Repayment {
            id: Uuid::new_v4(),
            loan_id,
            receipt_number: receipt.to_string(),
            amount: Money::from_major(10),
            payment_date: date(2024, 2, 1),
            method: PaymentMethod::Cash,
            reference: None,
            principal_paid: Money::ZERO,
            interest_paid: Money::from_major(10),
            fee_paid: Money::ZERO,
            penalty_paid: Money::ZERO,
            excess_amount: Money::ZERO,
            lines: Vec::new(),
            status: RepaymentStatus::Confirmed,
            recorded_by: "teller".to_string(),
            recorded_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            reversed_at: None,
            reversal_reason: None,
        }
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let (store, loan) = seeded();
        let mut tx = store.begin(loan.id).unwrap();
        let mut updated = tx.loan().unwrap();
        updated.loan_balance = Money::from_major(5);
        tx.put_loan(updated);
        tx.insert_repayment(repayment(loan.id, "R-1")).unwrap();
        tx.append_audit(AuditEntry::new(loan.id, AuditAction::PaymentAllocated, "test", "teller", Utc::now()));

        // staged writes are not visible before commit
        assert_eq!(store.loan(loan.id).unwrap().loan_balance, loan.loan_balance);
        tx.commit().unwrap();

        assert_eq!(store.loan(loan.id).unwrap().loan_balance, Money::from_major(5));
        assert_eq!(store.repayments(loan.id).len(), 1);
        assert_eq!(store.audit_log(loan.id).len(), 1);
        assert_eq!(store.find_loan_by_receipt("R-1").unwrap(), Some(loan.id));
    }

    #[test]
    fn test_drop_rolls_back() {
        let (store, loan) = seeded();
        {
            let mut tx = store.begin(loan.id).unwrap();
            tx.insert_repayment(repayment(loan.id, "R-1")).unwrap();
            tx.replace_schedule(Vec::new());
        }
        assert!(store.repayments(loan.id).is_empty());
        assert_eq!(store.installments(loan.id).len(), 1);

        // the lock was released by the drop
        assert!(store.begin(loan.id).is_ok());
    }

    #[test]
    fn test_duplicate_receipts_rejected() {
        let (store, loan) = seeded();
        let mut tx = store.begin(loan.id).unwrap();
        tx.insert_repayment(repayment(loan.id, "R-1")).unwrap();
        let err = tx.insert_repayment(repayment(loan.id, "R-1")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateReceipt { .. }));
        tx.commit().unwrap();

        let mut tx = store.begin(loan.id).unwrap();
        assert!(tx.receipt_exists("R-1").unwrap());
        assert!(tx.insert_repayment(repayment(loan.id, "R-1")).is_err());
    }

    #[test]
    fn test_same_loan_lock_times_out_as_conflict() {
        let (store, loan) = seeded();
        let _held = store.begin(loan.id).unwrap();

        let err = store.begin(loan.id).unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));
        assert!(err.is_retryable());

        // other loans are unaffected
        assert!(store.begin(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_missing_loan_is_not_found() {
        let (store, _) = seeded();
        let tx = store.begin(Uuid::new_v4()).unwrap();
        assert!(matches!(tx.loan(), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn test_replace_schedule_then_update() {
        let (store, loan) = seeded();
        let mut tx = store.begin(loan.id).unwrap();
        let fresh: Vec<Installment> = (1..=3)
            .map(|n| Installment::new(loan.id, n, date(2024, 1 + n, 1), Money::from_major(100), Money::ZERO, Money::ZERO))
            .collect();
        tx.replace_schedule(fresh.into_iter().rev().collect());
        tx.commit().unwrap();

        let schedule = store.installments(loan.id);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.iter().map(|i| i.installment_number).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
