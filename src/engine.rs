use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{BalanceCheck, EngineConfig};
use crate::decimal::{days_between, Money};
use crate::errors::{EngineError, Result};
use crate::events::{AuditAction, AuditEntry, Event, EventStore};
use crate::payments::{
    AllocationOptions, AmortizationCalculator, PaymentAllocator, PaymentRequest, ScheduleGenerator,
};
use crate::penalty::PenaltyCalculator;
use crate::performance::{Classification, PerformanceClassifier};
use crate::reconcile::{BalanceReconciler, ReconciliationReport, StatusTransition};
use crate::state::{Installment, Loan, LoanSummary, Repayment};
use crate::store::{InMemoryStore, LoanStore, LoanTransaction};
use crate::types::{AllocationLine, InstallmentStatus, LoanId, LoanStatus, RepaymentStatus};

/// result of an engine call together with the events it produced
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub result: T,
    pub events: Vec<Event>,
}

/// what the caller gets back for an allocated payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub receipt_number: String,
    pub lines: Vec<AllocationLine>,
    pub principal_paid: Money,
    pub interest_paid: Money,
    pub fee_paid: Money,
    pub penalty_paid: Money,
    pub excess_amount: Money,
    pub loan: LoanSummary,
    pub classification: Classification,
}

/// penalties raised by an accrual run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyAccrual {
    pub as_of: NaiveDate,
    pub total_accrued: Money,
    pub installments_charged: u32,
    pub newly_overdue: u32,
}

/// result of reversing a ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reversal {
    pub receipt_number: String,
    pub amount: Money,
    pub report: ReconciliationReport,
    pub classification: Classification,
}

/// repayment allocation and loan performance engine
pub struct RepaymentEngine<S: LoanStore> {
    store: S,
    config: EngineConfig,
    generator: Box<dyn ScheduleGenerator>,
}

impl<S: LoanStore> RepaymentEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            generator: Box::new(AmortizationCalculator::new()),
        })
    }

    /// replace the schedule generator used for regeneration
    pub fn with_generator(mut self, generator: impl ScheduleGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn classifier(&self) -> PerformanceClassifier {
        PerformanceClassifier::new(self.config.stage_thresholds)
    }

    fn rejects_overpayment(&self, options: AllocationOptions) -> bool {
        options
            .reject_overpayment
            .unwrap_or(self.config.balance_check == BalanceCheck::RejectOverpayment)
    }

    fn generate_receipt_number(&self, payment_date: NaiveDate) -> String {
        let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
        format!(
            "{}-{}-{}",
            self.config.receipt_prefix,
            payment_date.format("%Y%m%d"),
            suffix
        )
    }

    /// allocate a payment across the loan's outstanding installments.
    ///
    /// The ledger entry, schedule updates, loan balances, classification and
    /// audit row are committed together or not at all.
    #[instrument(skip_all, fields(loan_id = %request.loan_id, amount = %request.amount))]
    pub fn allocate_payment(
        &self,
        request: PaymentRequest,
        options: AllocationOptions,
        time_provider: &SafeTimeProvider,
    ) -> Result<Outcome<PaymentReceipt>> {
        request.validate()?;

        let mut tx = self.store.begin(request.loan_id)?;
        let mut loan = tx.loan()?;
        if !loan.status.accepts_payments() {
            return Err(EngineError::InvalidState {
                current: loan.status.to_string(),
                expected: "disbursed or active".to_string(),
            });
        }

        let receipt_number = request
            .receipt_number
            .clone()
            .unwrap_or_else(|| self.generate_receipt_number(request.payment_date));
        if tx.receipt_exists(&receipt_number)? {
            return Err(EngineError::DuplicateReceipt { receipt_number });
        }

        let mut installments = tx.installments()?;
        if !installments.iter().any(|i| i.status.is_open()) {
            return Err(EngineError::NothingToAllocate { loan_id: loan.id });
        }

        let calculator = PenaltyCalculator::for_policy(tx.penalty_policy(loan.product_id)?);
        let allocator = PaymentAllocator::new(self.config.penalty_source, calculator);

        let outstanding = allocator.outstanding_total(&installments, request.payment_date);
        if outstanding.is_zero() {
            return Err(EngineError::NothingToAllocate { loan_id: loan.id });
        }
        if self.rejects_overpayment(options) && request.amount > outstanding {
            return Err(EngineError::ExceedsBalance {
                amount: request.amount,
                outstanding,
            });
        }

        let allocation = allocator.allocate(&mut installments, request.amount, request.payment_date);
        let application = &allocation.application;
        let now = time_provider.now();

        tx.insert_repayment(Repayment {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            receipt_number: receipt_number.clone(),
            amount: request.amount,
            payment_date: request.payment_date,
            method: request.method,
            reference: request.reference.clone(),
            principal_paid: application.to_principal,
            interest_paid: application.to_interest,
            fee_paid: application.to_fees,
            penalty_paid: application.to_penalties,
            excess_amount: application.excess,
            lines: allocation.lines.clone(),
            status: RepaymentStatus::Confirmed,
            recorded_by: request.recorded_by.clone(),
            recorded_at: now,
            reversed_at: None,
            reversal_reason: None,
        })?;

        let touched: Vec<Installment> = installments
            .iter()
            .filter(|i| allocation.touched().any(|n| n == i.installment_number))
            .cloned()
            .collect();
        tx.put_installments(touched);

        let mut events = EventStore::new();
        events.emit(Event::PaymentAllocated {
            loan_id: loan.id,
            receipt_number: receipt_number.clone(),
            amount: request.amount,
            applied_to_penalties: application.to_penalties,
            applied_to_fees: application.to_fees,
            applied_to_interest: application.to_interest,
            applied_to_principal: application.to_principal,
            payment_date: request.payment_date,
        });
        for &installment_number in &allocation.settled {
            events.emit(Event::InstallmentSettled {
                loan_id: loan.id,
                installment_number,
                payment_date: request.payment_date,
            });
        }
        if application.excess.is_positive() {
            warn!(excess = %application.excess, %receipt_number, "payment exceeds outstanding installments");
            events.emit(Event::ExcessReported {
                loan_id: loan.id,
                receipt_number: receipt_number.clone(),
                excess: application.excess,
            });
        }

        let transition = BalanceReconciler::apply_payment(
            &mut loan,
            application,
            allocation.settled.len() as u32,
            request.payment_date,
        );
        emit_transition(&mut events, loan.id, transition, "payment received");

        let classification = self.classify_into(&mut loan, &installments, request.payment_date, &mut events);
        loan.updated_at = now;

        tx.append_audit(AuditEntry::new(
            loan.id,
            AuditAction::PaymentAllocated,
            format!(
                "receipt {} for {}: penalty {}, fee {}, interest {}, principal {}, excess {}",
                receipt_number,
                request.amount,
                application.to_penalties,
                application.to_fees,
                application.to_interest,
                application.to_principal,
                application.excess
            ),
            request.recorded_by.as_str(),
            now,
        ));
        tx.put_loan(loan.clone());
        tx.commit()?;

        info!(
            %receipt_number,
            principal = %application.to_principal,
            interest = %application.to_interest,
            penalty = %application.to_penalties,
            excess = %application.excess,
            loan_balance = %loan.loan_balance,
            "payment allocated"
        );

        Ok(Outcome {
            result: PaymentReceipt {
                receipt_number,
                lines: allocation.lines.clone(),
                principal_paid: application.to_principal,
                interest_paid: application.to_interest,
                fee_paid: application.to_fees,
                penalty_paid: application.to_penalties,
                excess_amount: application.excess,
                loan: loan.summary(),
                classification,
            },
            events: events.take_events(),
        })
    }

    /// recompute balances and installment paid amounts from the confirmed ledger
    #[instrument(skip(self, time_provider))]
    pub fn reconcile_loan_balances(
        &self,
        loan_id: LoanId,
        actor: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<Outcome<ReconciliationReport>> {
        let mut tx = self.store.begin(loan_id)?;
        let mut loan = tx.loan()?;
        let mut installments = tx.installments()?;
        let ledger = tx.repayments()?;

        let report = BalanceReconciler::recompute(&mut loan, &mut installments, &ledger);
        let now = time_provider.now();
        loan.updated_at = now;

        let mut events = EventStore::new();
        events.emit(Event::BalancesReconciled {
            loan_id,
            principal_drift: report.principal_drift,
            interest_drift: report.interest_drift,
            installments_repaired: report.installments_repaired,
        });
        emit_transition(&mut events, loan_id, report.transition, "balance recomputation");

        if report.had_drift() {
            warn!(
                principal_drift = %report.principal_drift,
                interest_drift = %report.interest_drift,
                installments_repaired = report.installments_repaired,
                "stored balances drifted from ledger"
            );
        }

        tx.put_installments(installments);
        tx.put_loan(loan);
        tx.append_audit(AuditEntry::new(
            loan_id,
            AuditAction::BalancesReconciled,
            format!(
                "recomputed from {} confirmed repayments: principal {} -> {}, interest {} -> {}",
                report.repayments_counted,
                report.before.principal_balance,
                report.after.principal_balance,
                report.before.interest_balance,
                report.after.interest_balance
            ),
            actor,
            now,
        ));
        tx.commit()?;

        info!(loan_balance = %report.after.loan_balance, "balances reconciled");
        Ok(Outcome {
            result: report,
            events: events.take_events(),
        })
    }

    /// derive and store the loan's arrears classification as of `as_of`
    #[instrument(skip(self, time_provider))]
    pub fn classify_loan(
        &self,
        loan_id: LoanId,
        as_of: NaiveDate,
        actor: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<Outcome<Classification>> {
        let mut tx = self.store.begin(loan_id)?;
        let mut loan = tx.loan()?;
        let installments = tx.installments()?;

        let mut events = EventStore::new();
        let classification = self.classify_into(&mut loan, &installments, as_of, &mut events);
        let now = time_provider.now();
        loan.updated_at = now;

        tx.put_loan(loan);
        tx.append_audit(AuditEntry::new(
            loan_id,
            AuditAction::LoanClassified,
            format!(
                "stage {} with {} days in arrears as of {}",
                classification.stage, classification.days_in_arrears, as_of
            ),
            actor,
            now,
        ));
        tx.commit()?;

        debug!(stage = %classification.stage, days = classification.days_in_arrears, "loan classified");
        Ok(Outcome {
            result: classification,
            events: events.take_events(),
        })
    }

    /// delete and rebuild the schedule of a loan that has not been disbursed
    #[instrument(skip(self, time_provider))]
    pub fn regenerate_schedule(
        &self,
        loan_id: LoanId,
        actor: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<Outcome<Vec<Installment>>> {
        let mut tx = self.store.begin(loan_id)?;
        let mut loan = tx.loan()?;
        if !loan.status.allows_schedule_regeneration() {
            return Err(EngineError::InvalidState {
                current: loan.status.to_string(),
                expected: "pending or approved".to_string(),
            });
        }
        if tx.repayments()?.iter().any(Repayment::is_confirmed) {
            return Err(EngineError::InvalidState {
                current: "has recorded repayments".to_string(),
                expected: "no repayments".to_string(),
            });
        }

        let removed = tx.installments()?.len() as u32;
        let schedule = self.generator.generate(loan_id, &loan.terms)?;
        let now = time_provider.now();

        loan.apply_schedule(&schedule);
        loan.updated_at = now;

        let mut events = EventStore::new();
        events.emit(Event::ScheduleRegenerated {
            loan_id,
            removed,
            created: schedule.len() as u32,
        });

        tx.replace_schedule(schedule.clone());
        tx.put_loan(loan);
        tx.append_audit(AuditEntry::new(
            loan_id,
            AuditAction::ScheduleRegenerated,
            format!("replaced {} installments with {}", removed, schedule.len()),
            actor,
            now,
        ));
        tx.commit()?;

        info!(removed, created = schedule.len(), "schedule regenerated");
        Ok(Outcome {
            result: schedule,
            events: events.take_events(),
        })
    }

    /// store penalties for unpaid installments as of `as_of` and flag
    /// pending lines past their grace period as overdue
    #[instrument(skip(self, time_provider))]
    pub fn accrue_penalties(
        &self,
        loan_id: LoanId,
        as_of: NaiveDate,
        actor: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<Outcome<PenaltyAccrual>> {
        let mut tx = self.store.begin(loan_id)?;
        let loan = tx.loan()?;
        if !loan.status.accepts_payments() {
            return Err(EngineError::InvalidState {
                current: loan.status.to_string(),
                expected: "disbursed or active".to_string(),
            });
        }

        let calculator = PenaltyCalculator::for_policy(tx.penalty_policy(loan.product_id)?);
        let grace = calculator.policy().map_or(0, |p| p.grace_period_days as i64);

        let mut accrual = PenaltyAccrual {
            as_of,
            total_accrued: Money::ZERO,
            installments_charged: 0,
            newly_overdue: 0,
        };
        let mut changed = Vec::new();

        for mut installment in tx.installments()? {
            if !installment.status.is_open() || installment.due_date >= as_of {
                continue;
            }

            let increase = calculator.accrue(&mut installment, as_of);
            let mut dirty = increase.is_positive();
            if dirty {
                accrual.total_accrued += increase;
                accrual.installments_charged += 1;
            }

            if Self::flag_overdue(&mut installment, grace, as_of) {
                accrual.newly_overdue += 1;
                dirty = true;
            }

            if dirty {
                changed.push(installment);
            }
        }

        let mut events = EventStore::new();
        if accrual.total_accrued.is_positive() {
            events.emit(Event::PenaltiesAccrued {
                loan_id,
                amount: accrual.total_accrued,
                installments: accrual.installments_charged,
                as_of,
            });
        }

        let now = time_provider.now();
        tx.put_installments(changed);
        tx.append_audit(AuditEntry::new(
            loan_id,
            AuditAction::PenaltiesAccrued,
            format!(
                "accrued {} on {} installments, {} newly overdue as of {}",
                accrual.total_accrued, accrual.installments_charged, accrual.newly_overdue, as_of
            ),
            actor,
            now,
        ));
        tx.commit()?;

        info!(total = %accrual.total_accrued, charged = accrual.installments_charged, "penalties accrued");
        Ok(Outcome {
            result: accrual,
            events: events.take_events(),
        })
    }

    /// mark a ledger entry reversed and rebuild the loan from the remaining
    /// confirmed entries; the entry itself is kept
    #[instrument(skip(self, time_provider))]
    pub fn reverse_repayment(
        &self,
        receipt_number: &str,
        reason: &str,
        as_of: NaiveDate,
        actor: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<Outcome<Reversal>> {
        let loan_id = self
            .store
            .find_loan_by_receipt(receipt_number)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "repayment",
                id: receipt_number.to_string(),
            })?;

        let mut tx = self.store.begin(loan_id)?;
        let mut loan = tx.loan()?;
        if !matches!(
            loan.status,
            LoanStatus::Disbursed | LoanStatus::Active | LoanStatus::Completed
        ) {
            return Err(EngineError::InvalidState {
                current: loan.status.to_string(),
                expected: "disbursed, active or completed".to_string(),
            });
        }

        let mut ledger = tx.repayments()?;
        let entry = ledger
            .iter_mut()
            .find(|r| r.receipt_number == receipt_number)
            .ok_or_else(|| EngineError::NotFound {
                entity: "repayment",
                id: receipt_number.to_string(),
            })?;
        if entry.status == RepaymentStatus::Reversed {
            return Err(EngineError::InvalidState {
                current: "reversed".to_string(),
                expected: "confirmed".to_string(),
            });
        }

        let now = time_provider.now();
        entry.status = RepaymentStatus::Reversed;
        entry.reversed_at = Some(now);
        entry.reversal_reason = Some(reason.to_string());
        let reversed = entry.clone();

        let mut installments = tx.installments()?;
        let report = BalanceReconciler::recompute(&mut loan, &mut installments, &ledger);

        // unpaid lines re-derive as pending, so overdue flags are restored here
        let calculator = PenaltyCalculator::for_policy(tx.penalty_policy(loan.product_id)?);
        let grace = calculator.policy().map_or(0, |p| p.grace_period_days as i64);
        for installment in installments.iter_mut() {
            Self::flag_overdue(installment, grace, as_of);
        }

        let mut events = EventStore::new();
        events.emit(Event::PaymentReversed {
            loan_id,
            receipt_number: receipt_number.to_string(),
            amount: reversed.amount,
            reason: reason.to_string(),
        });
        emit_transition(&mut events, loan_id, report.transition, "payment reversed");

        let classification = self.classify_into(&mut loan, &installments, as_of, &mut events);
        loan.updated_at = now;

        tx.put_repayment(reversed.clone());
        tx.put_installments(installments);
        tx.put_loan(loan);
        tx.append_audit(AuditEntry::new(
            loan_id,
            AuditAction::RepaymentReversed,
            format!("receipt {} for {} reversed: {}", receipt_number, reversed.amount, reason),
            actor,
            now,
        ));
        tx.commit()?;

        info!(%receipt_number, amount = %reversed.amount, "repayment reversed");
        Ok(Outcome {
            result: Reversal {
                receipt_number: receipt_number.to_string(),
                amount: reversed.amount,
                report,
                classification,
            },
            events: events.take_events(),
        })
    }

    /// flag unpaid pending lines past due plus grace as overdue
    fn flag_overdue(installment: &mut Installment, grace_days: i64, as_of: NaiveDate) -> bool {
        let lapsed = installment.status == InstallmentStatus::Pending
            && days_between(installment.due_date, as_of) > grace_days;
        if lapsed {
            installment.status = InstallmentStatus::Overdue;
        }
        lapsed
    }

    fn classify_into(
        &self,
        loan: &mut Loan,
        installments: &[Installment],
        as_of: NaiveDate,
        events: &mut EventStore,
    ) -> Classification {
        let old_stage = loan.performance_stage;
        let classification = self.classifier().apply(loan, installments, as_of);
        if classification.stage != old_stage {
            events.emit(Event::PerformanceStageChanged {
                loan_id: loan.id,
                old_stage,
                new_stage: classification.stage,
                days_in_arrears: classification.days_in_arrears,
            });
        }
        classification
    }
}

impl RepaymentEngine<InMemoryStore> {
    /// engine over an in-memory store whose row lock wait follows
    /// `config.lock_timeout_ms`
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let store = InMemoryStore::from_config(&config);
        Self::new(store, config)
    }
}

fn emit_transition(
    events: &mut EventStore,
    loan_id: LoanId,
    transition: Option<StatusTransition>,
    reason: &str,
) {
    if let Some(StatusTransition { from, to }) = transition {
        info!(%loan_id, %from, %to, "loan status changed");
        events.emit(Event::LoanStatusChanged {
            loan_id,
            old_status: from,
            new_status: to,
            reason: reason.to_string(),
        });
    }
}
