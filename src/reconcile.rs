use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::state::{Installment, Loan, LoanSummary, Repayment};
use crate::types::{InstallmentStatus, LoanStatus, PaymentApplication};

/// loan status change caused by a balance update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: LoanStatus,
    pub to: LoanStatus,
}

/// outcome of a full recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub before: LoanSummary,
    pub after: LoanSummary,
    /// stored minus recomputed principal balance
    pub principal_drift: Money,
    /// stored minus recomputed interest balance
    pub interest_drift: Money,
    pub installments_repaired: u32,
    pub repayments_counted: u32,
    pub transition: Option<StatusTransition>,
}

impl ReconciliationReport {
    pub fn had_drift(&self) -> bool {
        !self.principal_drift.is_zero() || !self.interest_drift.is_zero() || self.installments_repaired > 0
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PaidTotals {
    principal: Money,
    interest: Money,
    fee: Money,
    penalty: Money,
    last_date: Option<NaiveDate>,
}

/// keeps loan balances and counters consistent with the schedule and ledger
pub struct BalanceReconciler;

impl BalanceReconciler {
    /// incremental update for one allocated payment
    pub fn apply_payment(
        loan: &mut Loan,
        application: &PaymentApplication,
        newly_settled: u32,
        payment_date: NaiveDate,
    ) -> Option<StatusTransition> {
        loan.principal_balance = (loan.principal_balance - application.to_principal).floor_zero();
        loan.interest_balance = (loan.interest_balance - application.to_interest).floor_zero();
        loan.loan_balance = loan.principal_balance + loan.interest_balance;

        loan.installments_paid += newly_settled;
        loan.installments_outstanding = loan.installments_outstanding.saturating_sub(newly_settled);
        loan.last_payment_date = loan.last_payment_date.max(Some(payment_date));

        Self::transition_status(loan, true)
    }

    /// rebuild installment paid amounts and loan balances from the confirmed
    /// ledger entries. Running it twice yields the same state.
    pub fn recompute(
        loan: &mut Loan,
        installments: &mut [Installment],
        ledger: &[Repayment],
    ) -> ReconciliationReport {
        let before = loan.summary();
        let confirmed: Vec<&Repayment> = ledger
            .iter()
            .filter(|r| r.loan_id == loan.id && r.is_confirmed())
            .collect();

        let mut per_installment: HashMap<u32, PaidTotals> = HashMap::new();
        for repayment in &confirmed {
            for line in &repayment.lines {
                let totals = per_installment.entry(line.installment_number).or_default();
                totals.principal += line.principal;
                totals.interest += line.interest;
                totals.fee += line.fee;
                totals.penalty += line.penalty;
                totals.last_date = totals.last_date.max(Some(repayment.payment_date));
            }
        }

        let mut installments_repaired = 0;
        for installment in installments.iter_mut() {
            let totals = per_installment
                .get(&installment.installment_number)
                .copied()
                .unwrap_or_default();
            if Self::restore_installment(installment, &totals) {
                installments_repaired += 1;
            }
        }

        let principal_paid: Money = confirmed.iter().map(|r| r.principal_paid).sum();
        let interest_paid: Money = confirmed.iter().map(|r| r.interest_paid).sum();
        let scheduled_interest: Money = installments.iter().map(|i| i.interest_due).sum();

        loan.principal_balance = (loan.original_principal() - principal_paid).floor_zero();
        loan.interest_balance = (scheduled_interest - interest_paid).floor_zero();
        loan.loan_balance = loan.principal_balance + loan.interest_balance;

        let paid = installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Paid)
            .count() as u32;
        loan.installments_paid = paid;
        loan.installments_outstanding = installments.len() as u32 - paid;
        loan.last_payment_date = confirmed.iter().map(|r| r.payment_date).max();

        let transition = Self::transition_status(loan, !confirmed.is_empty());
        let after = loan.summary();

        ReconciliationReport {
            principal_drift: before.principal_balance - after.principal_balance,
            interest_drift: before.interest_balance - after.interest_balance,
            before,
            after,
            installments_repaired,
            repayments_counted: confirmed.len() as u32,
            transition,
        }
    }

    /// overwrite paid amounts from ledger totals; true when anything changed
    fn restore_installment(installment: &mut Installment, totals: &PaidTotals) -> bool {
        let before = (
            installment.principal_paid,
            installment.interest_paid,
            installment.fee_paid,
            installment.penalty_paid,
            installment.status,
        );

        installment.principal_paid = totals.principal;
        installment.interest_paid = totals.interest;
        installment.fee_paid = totals.fee;
        installment.penalty_paid = totals.penalty;
        installment.status = installment.derived_status();
        installment.paid_date = if installment.status == InstallmentStatus::Paid {
            installment.paid_date.or(totals.last_date)
        } else {
            None
        };

        before
            != (
                installment.principal_paid,
                installment.interest_paid,
                installment.fee_paid,
                installment.penalty_paid,
                installment.status,
            )
    }

    /// disbursed -> active on the first payment, -> completed once nothing is owed;
    /// a completed loan that owes again (after a reversal) returns to active
    fn transition_status(loan: &mut Loan, has_payments: bool) -> Option<StatusTransition> {
        let from = loan.status;
        let settled = !loan.loan_balance.is_positive() && loan.installments_outstanding == 0;

        let to = match from {
            LoanStatus::Disbursed | LoanStatus::Active if settled && has_payments => LoanStatus::Completed,
            LoanStatus::Disbursed if has_payments => LoanStatus::Active,
            LoanStatus::Completed if !settled => LoanStatus::Active,
            other => other,
        };

        if to == from {
            return None;
        }
        loan.status = to;
        Some(StatusTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::state::LoanTerms;
    use crate::types::{AllocationLine, CalculationMethod, PaymentMethod, RepaymentFrequency, RepaymentStatus};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn loan_with_schedule() -> (Loan, Vec<Installment>) {
        let terms = LoanTerms {
            principal: Money::from_major(2_000),
            interest_rate: Rate::from_percentage(12),
            term: 2,
            frequency: RepaymentFrequency::Monthly,
            calculation_method: CalculationMethod::Flat,
            first_due_date: date(2024, 2, 1),
            fee_per_installment: Money::ZERO,
        };
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = Loan::new("LN-9", "CL-9", Uuid::new_v4(), terms, created);
        let schedule = vec![
            Installment::new(loan.id, 1, date(2024, 2, 1), Money::from_major(1_000), Money::from_major(20), Money::ZERO),
            Installment::new(loan.id, 2, date(2024, 3, 1), Money::from_major(1_000), Money::from_major(20), Money::ZERO),
        ];
        loan.apply_schedule(&schedule);
        loan.disburse(date(2024, 1, 1));
        (loan, schedule)
    }

    fn repayment(loan: &Loan, receipt: &str, lines: Vec<AllocationLine>, status: RepaymentStatus) -> Repayment {
        let principal_paid: Money = lines.iter().map(|l| l.principal).sum();
        let interest_paid: Money = lines.iter().map(|l| l.interest).sum();
        let amount: Money = lines.iter().map(|l| l.total()).sum();
        Repayment {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            receipt_number: receipt.to_string(),
            amount,
            payment_date: date(2024, 2, 1),
            method: PaymentMethod::Cash,
            reference: None,
            principal_paid,
            interest_paid,
            fee_paid: Money::ZERO,
            penalty_paid: Money::ZERO,
            excess_amount: Money::ZERO,
            lines,
            status,
            recorded_by: "teller".to_string(),
            recorded_at: Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
            reversed_at: None,
            reversal_reason: None,
        }
    }

    fn line(number: u32, interest: i64, principal: i64, status_after: InstallmentStatus) -> AllocationLine {
        AllocationLine {
            installment_number: number,
            penalty: Money::ZERO,
            fee: Money::ZERO,
            interest: Money::from_major(interest),
            principal: Money::from_major(principal),
            status_after,
        }
    }

    #[test]
    fn test_incremental_first_payment_activates() {
        let (mut loan, _) = loan_with_schedule();
        let application = PaymentApplication {
            to_interest: Money::from_major(20),
            to_principal: Money::from_major(1_000),
            ..Default::default()
        };

        let transition = BalanceReconciler::apply_payment(&mut loan, &application, 1, date(2024, 2, 1));

        assert_eq!(transition, Some(StatusTransition { from: LoanStatus::Disbursed, to: LoanStatus::Active }));
        assert_eq!(loan.principal_balance, Money::from_major(1_000));
        assert_eq!(loan.interest_balance, Money::from_major(20));
        assert_eq!(loan.loan_balance, Money::from_major(1_020));
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.installments_outstanding, 1);
    }

    #[test]
    fn test_incremental_completion_and_floor() {
        let (mut loan, _) = loan_with_schedule();
        loan.status = LoanStatus::Active;
        let application = PaymentApplication {
            to_interest: Money::from_major(50),
            to_principal: Money::from_major(2_500),
            ..Default::default()
        };

        let transition = BalanceReconciler::apply_payment(&mut loan, &application, 2, date(2024, 3, 1));

        assert_eq!(loan.loan_balance, Money::ZERO);
        assert_eq!(loan.principal_balance, Money::ZERO);
        assert_eq!(transition.map(|t| t.to), Some(LoanStatus::Completed));
    }

    #[test]
    fn test_recompute_matches_incremental_and_is_idempotent() {
        let (mut loan, mut schedule) = loan_with_schedule();
        schedule[0].interest_paid = Money::from_major(20);
        schedule[0].principal_paid = Money::from_major(1_000);
        schedule[0].status = InstallmentStatus::Paid;
        schedule[1].interest_paid = Money::from_major(20);
        schedule[1].principal_paid = Money::from_major(100);
        schedule[1].status = InstallmentStatus::Partial;

        let ledger = vec![
            repayment(&loan, "R-1", vec![line(1, 20, 1_000, InstallmentStatus::Paid)], RepaymentStatus::Confirmed),
            repayment(&loan, "R-2", vec![line(2, 20, 100, InstallmentStatus::Partial)], RepaymentStatus::Confirmed),
        ];

        // stored balances drifted
        loan.principal_balance = Money::from_major(1_234);

        let first = BalanceReconciler::recompute(&mut loan, &mut schedule, &ledger);
        assert_eq!(first.after.principal_balance, Money::from_major(900));
        assert_eq!(first.after.interest_balance, Money::ZERO);
        assert_eq!(first.after.loan_balance, Money::from_major(900));
        assert_eq!(first.principal_drift, Money::from_major(334));
        assert_eq!(first.after.installments_paid, 1);
        assert_eq!(first.after.status, LoanStatus::Active);
        assert_eq!(first.installments_repaired, 0);

        let second = BalanceReconciler::recompute(&mut loan, &mut schedule, &ledger);
        assert_eq!(second.after, first.after);
        assert!(!second.had_drift());
        assert_eq!(second.transition, None);
    }

    #[test]
    fn test_recompute_ignores_reversed_entries() {
        let (mut loan, mut schedule) = loan_with_schedule();
        loan.status = LoanStatus::Completed;
        for inst in schedule.iter_mut() {
            inst.interest_paid = inst.interest_due;
            inst.principal_paid = inst.principal_due;
            inst.status = InstallmentStatus::Paid;
        }

        let ledger = vec![
            repayment(&loan, "R-1", vec![line(1, 20, 1_000, InstallmentStatus::Paid)], RepaymentStatus::Confirmed),
            repayment(&loan, "R-2", vec![line(2, 20, 1_000, InstallmentStatus::Paid)], RepaymentStatus::Reversed),
        ];

        let report = BalanceReconciler::recompute(&mut loan, &mut schedule, &ledger);

        assert_eq!(report.repayments_counted, 1);
        assert_eq!(report.installments_repaired, 1);
        assert_eq!(schedule[1].status, InstallmentStatus::Pending);
        assert_eq!(schedule[1].total_paid(), Money::ZERO);
        assert_eq!(schedule[1].paid_date, None);
        assert_eq!(loan.loan_balance, Money::from_major(1_020));
        assert_eq!(report.transition, Some(StatusTransition { from: LoanStatus::Completed, to: LoanStatus::Active }));
    }

    #[test]
    fn test_recompute_without_payments_keeps_disbursed() {
        let (mut loan, mut schedule) = loan_with_schedule();
        let report = BalanceReconciler::recompute(&mut loan, &mut schedule, &[]);
        assert_eq!(report.after.status, LoanStatus::Disbursed);
        assert_eq!(report.after.loan_balance, Money::from_major(2_040));
        assert_eq!(report.after.installments_outstanding, 2);
    }
}
