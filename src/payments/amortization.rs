use chrono::{Duration, Months, NaiveDate};
use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};
use crate::errors::{EngineError, Result};
use crate::state::{Installment, LoanTerms};
use crate::types::{CalculationMethod, LoanId, RepaymentFrequency};

/// produces the installment list for a loan's approved terms
pub trait ScheduleGenerator: Send + Sync {
    fn generate(&self, loan_id: LoanId, terms: &LoanTerms) -> Result<Vec<Installment>>;
}

/// amortization calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortizationCalculator;

impl AmortizationCalculator {
    pub fn new() -> Self {
        Self
    }

    fn validate(terms: &LoanTerms) -> Result<()> {
        if terms.term == 0 {
            return Err(EngineError::validation("term must be at least one installment"));
        }
        if !terms.principal.is_positive() {
            return Err(EngineError::validation("principal must be positive"));
        }
        if terms.interest_rate.as_decimal() < Decimal::ZERO {
            return Err(EngineError::validation("interest rate must not be negative"));
        }
        Ok(())
    }

    /// (principal, interest) per installment
    fn split(terms: &LoanTerms) -> Vec<(Money, Money)> {
        let n = terms.term;
        let period_rate = period_rate(terms.interest_rate, terms.frequency);
        let principal = terms.principal;

        match terms.calculation_method {
            CalculationMethod::Flat => {
                let principal_portion = principal / Decimal::from(n);
                let interest_portion = principal * period_rate;
                (0..n).map(|_| (principal_portion, interest_portion)).collect()
            }
            CalculationMethod::DecliningBalance => {
                let principal_portion = principal / Decimal::from(n);
                let mut balance = principal;
                (0..n)
                    .map(|_| {
                        let interest_portion = balance * period_rate;
                        balance = (balance - principal_portion).floor_zero();
                        (principal_portion, interest_portion)
                    })
                    .collect()
            }
            CalculationMethod::EqualInstallments => {
                let emi = calculate_emi_amount(principal, period_rate, n);
                let mut balance = principal;
                (0..n)
                    .map(|_| {
                        let interest_portion = balance * period_rate;
                        let principal_portion = (emi - interest_portion).min(balance).floor_zero();
                        balance -= principal_portion;
                        (principal_portion, interest_portion)
                    })
                    .collect()
            }
        }
    }
}

impl ScheduleGenerator for AmortizationCalculator {
    fn generate(&self, loan_id: LoanId, terms: &LoanTerms) -> Result<Vec<Installment>> {
        Self::validate(terms)?;

        let mut split = Self::split(terms);

        // last installment absorbs rounding so principal sums to the loan amount
        let scheduled: Money = split.iter().map(|(p, _)| *p).sum();
        if let Some(last) = split.last_mut() {
            last.0 = (last.0 + (terms.principal - scheduled)).floor_zero();
        }

        split
            .into_iter()
            .enumerate()
            .map(|(idx, (principal_due, interest_due))| {
                let number = idx as u32 + 1;
                let due_date = due_date(terms.first_due_date, terms.frequency, idx as u32)?;
                Ok(Installment::new(
                    loan_id,
                    number,
                    due_date,
                    principal_due,
                    interest_due,
                    terms.fee_per_installment,
                ))
            })
            .collect()
    }
}

/// interest rate for one installment period
fn period_rate(annual_rate: Rate, frequency: RepaymentFrequency) -> Decimal {
    annual_rate.as_decimal() / Decimal::from(frequency.periods_per_year())
}

/// calculate EMI amount
fn calculate_emi_amount(principal: Money, period_rate: Decimal, periods: u32) -> Money {
    if period_rate.is_zero() {
        return principal / Decimal::from(periods);
    }

    // EMI = P * r * (1 + r)^n / ((1 + r)^n - 1)
    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + period_rate;
    for _ in 0..periods {
        compound *= base;
    }

    let numerator = principal.as_decimal() * period_rate * compound;
    let denominator = compound - Decimal::ONE;

    Money::from_decimal(numerator / denominator)
}

fn due_date(first: NaiveDate, frequency: RepaymentFrequency, offset: u32) -> Result<NaiveDate> {
    let date = match frequency {
        RepaymentFrequency::Weekly => first.checked_add_signed(Duration::weeks(offset as i64)),
        RepaymentFrequency::Biweekly => first.checked_add_signed(Duration::weeks(2 * offset as i64)),
        RepaymentFrequency::Monthly => first.checked_add_months(Months::new(offset)),
    };
    date.ok_or_else(|| EngineError::validation(format!("due date out of range for installment {}", offset + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn terms(method: CalculationMethod, frequency: RepaymentFrequency) -> LoanTerms {
        LoanTerms {
            principal: Money::from_major(100_000),
            interest_rate: Rate::from_percentage(12),
            term: 12,
            frequency,
            calculation_method: method,
            first_due_date: date(2024, 1, 31),
            fee_per_installment: Money::ZERO,
        }
    }

    fn principal_total(schedule: &[Installment]) -> Money {
        schedule.iter().map(|i| i.principal_due).sum()
    }

    #[test]
    fn test_flat_schedule() {
        let schedule = AmortizationCalculator::new()
            .generate(Uuid::new_v4(), &terms(CalculationMethod::Flat, RepaymentFrequency::Monthly))
            .unwrap();

        assert_eq!(schedule.len(), 12);
        assert_eq!(principal_total(&schedule), Money::from_major(100_000));
        for inst in &schedule {
            assert_eq!(inst.interest_due, Money::from_major(1_000));
        }
        // month-end anchoring clamps to the shorter month
        assert_eq!(schedule[1].due_date, date(2024, 2, 29));
        assert_eq!(schedule[11].due_date, date(2024, 12, 31));
    }

    #[test]
    fn test_declining_balance_schedule() {
        let schedule = AmortizationCalculator::new()
            .generate(Uuid::new_v4(), &terms(CalculationMethod::DecliningBalance, RepaymentFrequency::Monthly))
            .unwrap();

        assert_eq!(principal_total(&schedule), Money::from_major(100_000));
        for pair in schedule.windows(2) {
            assert!(pair[1].interest_due < pair[0].interest_due);
        }
    }

    #[test]
    fn test_equal_installments_schedule() {
        let schedule = AmortizationCalculator::new()
            .generate(Uuid::new_v4(), &terms(CalculationMethod::EqualInstallments, RepaymentFrequency::Monthly))
            .unwrap();

        assert_eq!(principal_total(&schedule), Money::from_major(100_000));
        let emi = schedule[0].principal_due + schedule[0].interest_due;
        for inst in &schedule[..11] {
            let payment = inst.principal_due + inst.interest_due;
            assert!((payment - emi).abs() <= Money::CENT);
        }
        assert!(schedule[0].interest_due > schedule[11].interest_due);
    }

    #[test]
    fn test_weekly_due_dates_and_fees() {
        let mut t = terms(CalculationMethod::Flat, RepaymentFrequency::Weekly);
        t.term = 4;
        t.fee_per_installment = Money::from_major(10);
        let schedule = AmortizationCalculator::new().generate(Uuid::new_v4(), &t).unwrap();

        assert_eq!(schedule[1].due_date, date(2024, 2, 7));
        assert_eq!(schedule[3].due_date, date(2024, 2, 21));
        assert!(schedule.iter().all(|i| i.fee_due == Money::from_major(10)));
        assert_eq!(schedule.iter().map(|i| i.installment_number).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_empty_term() {
        let mut t = terms(CalculationMethod::Flat, RepaymentFrequency::Monthly);
        t.term = 0;
        assert!(AmortizationCalculator::new().generate(Uuid::new_v4(), &t).is_err());
    }
}
