use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::PenaltySource;
use crate::decimal::Money;
use crate::penalty::PenaltyCalculator;
use crate::state::Installment;
use crate::types::{AllocationLine, InstallmentStatus, PaymentApplication};

/// charge categories in the order a partial payment reaches them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Penalty,
    Fee,
    Interest,
    Principal,
}

const WATERFALL: [Component; 4] = [
    Component::Penalty,
    Component::Fee,
    Component::Interest,
    Component::Principal,
];

/// allocation result for one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub lines: Vec<AllocationLine>,
    pub application: PaymentApplication,
    /// installments that became fully paid with this payment
    pub settled: Vec<u32>,
    /// penalty raised on touched installments while allocating
    pub penalty_assessed: Money,
}

impl Allocation {
    /// installments touched by the payment
    pub fn touched(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.iter().map(|l| l.installment_number)
    }
}

/// oldest-first, penalty -> fee -> interest -> principal allocator
#[derive(Debug, Clone)]
pub struct PaymentAllocator {
    penalty_source: PenaltySource,
    calculator: PenaltyCalculator,
}

impl PaymentAllocator {
    pub fn new(penalty_source: PenaltySource, calculator: PenaltyCalculator) -> Self {
        Self {
            penalty_source,
            calculator,
        }
    }

    /// refresh penalties on open installments according to the penalty source
    fn refresh_penalty(&self, installment: &mut Installment, as_of: NaiveDate) -> Money {
        match self.penalty_source {
            PenaltySource::Computed => self.calculator.accrue(installment, as_of),
            PenaltySource::Stored => Money::ZERO,
        }
    }

    /// total the schedule would absorb on `as_of`, penalties included
    pub fn outstanding_total(&self, installments: &[Installment], as_of: NaiveDate) -> Money {
        installments
            .iter()
            .filter(|i| i.status.is_open())
            .map(|i| {
                let mut probe = i.clone();
                self.refresh_penalty(&mut probe, as_of);
                probe.total_outstanding()
            })
            .sum()
    }

    /// apply `amount` to the open installments of `installments` in place.
    ///
    /// Installments are consumed in ascending installment number. Each one is
    /// either fully satisfied or, for the last one reached, split by the
    /// waterfall. What remains once every open installment is satisfied is
    /// returned as excess.
    pub fn allocate(
        &self,
        installments: &mut [Installment],
        amount: Money,
        payment_date: NaiveDate,
    ) -> Allocation {
        let mut order: Vec<usize> = (0..installments.len())
            .filter(|&idx| installments[idx].status.is_open())
            .collect();
        order.sort_by_key(|&idx| installments[idx].installment_number);

        let mut remaining = amount;
        let mut application = PaymentApplication::default();
        let mut lines = Vec::new();
        let mut settled = Vec::new();
        let mut penalty_assessed = Money::ZERO;

        for idx in order {
            if remaining.is_zero() {
                break;
            }

            let installment = &mut installments[idx];
            penalty_assessed += self.refresh_penalty(installment, payment_date);

            let outstanding = installment.total_outstanding();
            if outstanding.is_zero() {
                continue;
            }

            let mut line = AllocationLine {
                installment_number: installment.installment_number,
                penalty: Money::ZERO,
                fee: Money::ZERO,
                interest: Money::ZERO,
                principal: Money::ZERO,
                status_after: installment.status,
            };

            for component in WATERFALL {
                let portion = remaining.min(Self::outstanding_of(installment, component));
                if portion.is_zero() {
                    continue;
                }
                Self::apply(installment, &mut line, component, portion);
                remaining -= portion;
            }

            let previous = installment.status;
            let next = installment.derived_status();
            debug_assert!(next.rank() >= previous.rank(), "installment status regressed");
            installment.status = next;
            if next == InstallmentStatus::Paid {
                installment.paid_date = Some(payment_date);
                settled.push(installment.installment_number);
            }
            line.status_after = next;

            application.to_penalties += line.penalty;
            application.to_fees += line.fee;
            application.to_interest += line.interest;
            application.to_principal += line.principal;
            lines.push(line);
        }

        application.excess = remaining;

        Allocation {
            lines,
            application,
            settled,
            penalty_assessed,
        }
    }

    fn outstanding_of(installment: &Installment, component: Component) -> Money {
        match component {
            Component::Penalty => installment.outstanding_penalty(),
            Component::Fee => installment.outstanding_fee(),
            Component::Interest => installment.outstanding_interest(),
            Component::Principal => installment.outstanding_principal(),
        }
    }

    fn apply(
        installment: &mut Installment,
        line: &mut AllocationLine,
        component: Component,
        portion: Money,
    ) {
        let (paid, applied) = match component {
            Component::Penalty => (&mut installment.penalty_paid, &mut line.penalty),
            Component::Fee => (&mut installment.fee_paid, &mut line.fee),
            Component::Interest => (&mut installment.interest_paid, &mut line.interest),
            Component::Principal => (&mut installment.principal_paid, &mut line.principal),
        };
        *paid += portion;
        *applied += portion;
    }
}
