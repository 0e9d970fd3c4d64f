use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::{
    AllocationLine, CalculationMethod, InstallmentStatus, LoanId, LoanStatus, PaymentMethod,
    PerformanceStage, ProductId, RepaymentFrequency, RepaymentStatus,
};

/// approved terms a schedule is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Money,
    /// annual nominal rate
    pub interest_rate: Rate,
    /// number of installments
    pub term: u32,
    pub frequency: RepaymentFrequency,
    pub calculation_method: CalculationMethod,
    pub first_due_date: NaiveDate,
    pub fee_per_installment: Money,
}

/// loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub loan_number: String,
    pub client_id: String,
    pub product_id: ProductId,

    pub terms: LoanTerms,

    // balances
    pub principal_balance: Money,
    pub interest_balance: Money,
    pub loan_balance: Money,

    // counters
    pub installments_paid: u32,
    pub installments_outstanding: u32,

    // status
    pub status: LoanStatus,
    pub performance_stage: PerformanceStage,
    pub days_in_arrears: u32,
    pub arrears_start_date: Option<NaiveDate>,

    // dates
    pub disbursement_date: Option<NaiveDate>,
    pub last_payment_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// create a pending loan with balances taken from the terms
    pub fn new(
        loan_number: impl Into<String>,
        client_id: impl Into<String>,
        product_id: ProductId,
        terms: LoanTerms,
        created_at: DateTime<Utc>,
    ) -> Self {
        let principal = terms.principal;
        Self {
            id: Uuid::new_v4(),
            loan_number: loan_number.into(),
            client_id: client_id.into(),
            product_id,
            terms,
            principal_balance: principal,
            interest_balance: Money::ZERO,
            loan_balance: principal,
            installments_paid: 0,
            installments_outstanding: 0,
            status: LoanStatus::Pending,
            performance_stage: PerformanceStage::Performing,
            days_in_arrears: 0,
            arrears_start_date: None,
            disbursement_date: None,
            last_payment_date: None,
            updated_at: created_at,
        }
    }

    /// original principal from the approved terms
    pub fn original_principal(&self) -> Money {
        self.terms.principal
    }

    /// reset balances and counters to a freshly generated schedule
    pub fn apply_schedule(&mut self, installments: &[Installment]) {
        self.principal_balance = installments.iter().map(|i| i.principal_due).sum();
        self.interest_balance = installments.iter().map(|i| i.interest_due).sum();
        self.loan_balance = self.principal_balance + self.interest_balance;
        self.installments_paid = 0;
        self.installments_outstanding = installments.len() as u32;
    }

    /// mark funds as released
    pub fn disburse(&mut self, date: NaiveDate) {
        self.status = LoanStatus::Disbursed;
        self.disbursement_date = Some(date);
    }

    pub fn summary(&self) -> LoanSummary {
        LoanSummary {
            loan_id: self.id,
            principal_balance: self.principal_balance,
            interest_balance: self.interest_balance,
            loan_balance: self.loan_balance,
            installments_paid: self.installments_paid,
            installments_outstanding: self.installments_outstanding,
            status: self.status,
            performance_stage: self.performance_stage,
            days_in_arrears: self.days_in_arrears,
            arrears_start_date: self.arrears_start_date,
        }
    }
}

/// balances and classification snapshot returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub loan_id: LoanId,
    pub principal_balance: Money,
    pub interest_balance: Money,
    pub loan_balance: Money,
    pub installments_paid: u32,
    pub installments_outstanding: u32,
    pub status: LoanStatus,
    pub performance_stage: PerformanceStage,
    pub days_in_arrears: u32,
    pub arrears_start_date: Option<NaiveDate>,
}

/// one schedule line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: Uuid,
    pub loan_id: LoanId,
    pub installment_number: u32,
    pub due_date: NaiveDate,

    pub principal_due: Money,
    pub interest_due: Money,
    pub fee_due: Money,
    pub penalty_due: Money,

    pub principal_paid: Money,
    pub interest_paid: Money,
    pub fee_paid: Money,
    pub penalty_paid: Money,

    pub status: InstallmentStatus,
    pub paid_date: Option<NaiveDate>,
}

impl Installment {
    pub fn new(
        loan_id: LoanId,
        installment_number: u32,
        due_date: NaiveDate,
        principal_due: Money,
        interest_due: Money,
        fee_due: Money,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            installment_number,
            due_date,
            principal_due,
            interest_due,
            fee_due,
            penalty_due: Money::ZERO,
            principal_paid: Money::ZERO,
            interest_paid: Money::ZERO,
            fee_paid: Money::ZERO,
            penalty_paid: Money::ZERO,
            status: InstallmentStatus::Pending,
            paid_date: None,
        }
    }

    pub fn total_due(&self) -> Money {
        self.principal_due + self.interest_due + self.fee_due + self.penalty_due
    }

    pub fn total_paid(&self) -> Money {
        self.principal_paid + self.interest_paid + self.fee_paid + self.penalty_paid
    }

    pub fn outstanding_principal(&self) -> Money {
        (self.principal_due - self.principal_paid).floor_zero()
    }

    pub fn outstanding_interest(&self) -> Money {
        (self.interest_due - self.interest_paid).floor_zero()
    }

    pub fn outstanding_fee(&self) -> Money {
        (self.fee_due - self.fee_paid).floor_zero()
    }

    pub fn outstanding_penalty(&self) -> Money {
        (self.penalty_due - self.penalty_paid).floor_zero()
    }

    /// unpaid scheduled amount, the base penalties are charged on
    pub fn outstanding_scheduled(&self) -> Money {
        self.outstanding_principal() + self.outstanding_interest() + self.outstanding_fee()
    }

    pub fn total_outstanding(&self) -> Money {
        self.outstanding_scheduled() + self.outstanding_penalty()
    }

    /// status implied by the paid amounts; unpaid lines keep their current
    /// waiting status (pending, overdue or follow-up)
    pub fn derived_status(&self) -> InstallmentStatus {
        if self.total_paid() > Money::ZERO && self.total_outstanding().is_zero() {
            InstallmentStatus::Paid
        } else if self.total_paid() > Money::ZERO {
            InstallmentStatus::Partial
        } else if self.status.rank() == 0 {
            self.status
        } else {
            InstallmentStatus::Pending
        }
    }
}

/// immutable ledger entry for one accepted payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: Uuid,
    pub loan_id: LoanId,
    pub receipt_number: String,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub reference: Option<String>,

    pub principal_paid: Money,
    pub interest_paid: Money,
    pub fee_paid: Money,
    pub penalty_paid: Money,
    pub excess_amount: Money,
    pub lines: Vec<AllocationLine>,

    pub status: RepaymentStatus,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversal_reason: Option<String>,
}

impl Repayment {
    pub fn is_confirmed(&self) -> bool {
        self.status == RepaymentStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn terms() -> LoanTerms {
        LoanTerms {
            principal: Money::from_major(1_000),
            interest_rate: Rate::from_percentage(12),
            term: 2,
            frequency: RepaymentFrequency::Monthly,
            calculation_method: CalculationMethod::Flat,
            first_due_date: date(2024, 2, 1),
            fee_per_installment: Money::ZERO,
        }
    }

    #[test]
    fn test_apply_schedule_sets_balances() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = Loan::new("LN-001", "CL-1", Uuid::new_v4(), terms(), created);
        let schedule = vec![
            Installment::new(loan.id, 1, date(2024, 2, 1), Money::from_major(500), Money::from_major(10), Money::ZERO),
            Installment::new(loan.id, 2, date(2024, 3, 1), Money::from_major(500), Money::from_major(10), Money::ZERO),
        ];

        loan.apply_schedule(&schedule);

        assert_eq!(loan.principal_balance, Money::from_major(1_000));
        assert_eq!(loan.interest_balance, Money::from_major(20));
        assert_eq!(loan.loan_balance, Money::from_major(1_020));
        assert_eq!(loan.installments_outstanding, 2);
        assert_eq!(loan.status, LoanStatus::Pending);
    }

    #[test]
    fn test_installment_outstanding_and_status() {
        let mut inst = Installment::new(Uuid::new_v4(), 1, date(2024, 2, 1), Money::from_major(100), Money::from_major(5), Money::from_major(1));
        inst.penalty_due = Money::from_major(2);
        assert_eq!(inst.total_due(), Money::from_major(108));
        assert_eq!(inst.outstanding_scheduled(), Money::from_major(106));

        inst.status = InstallmentStatus::Overdue;
        assert_eq!(inst.derived_status(), InstallmentStatus::Overdue);

        inst.penalty_paid = Money::from_major(2);
        assert_eq!(inst.derived_status(), InstallmentStatus::Partial);

        inst.fee_paid = Money::from_major(1);
        inst.interest_paid = Money::from_major(5);
        inst.principal_paid = Money::from_major(100);
        assert_eq!(inst.total_paid(), inst.total_due());
        assert_eq!(inst.derived_status(), InstallmentStatus::Paid);
    }
}
