use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a loan product
pub type ProductId = Uuid;

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// application captured, not yet approved
    Pending,
    /// approved, awaiting disbursement
    Approved,
    /// funds released, no payment received yet
    Disbursed,
    /// repaying
    Active,
    /// fully repaid
    Completed,
    Defaulted,
    WrittenOff,
}

impl LoanStatus {
    /// statuses that accept repayments
    pub fn accepts_payments(&self) -> bool {
        matches!(self, LoanStatus::Disbursed | LoanStatus::Active)
    }

    /// statuses that still allow the schedule to be rebuilt
    pub fn allows_schedule_regeneration(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::WrittenOff => "written_off",
        };
        f.write_str(s)
    }
}

/// schedule line status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    FollowUp,
}

impl InstallmentStatus {
    /// statuses the allocator draws from
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            InstallmentStatus::Pending | InstallmentStatus::Partial | InstallmentStatus::Overdue
        )
    }

    /// progress rank; a payment may only move an installment to an equal or higher rank
    pub fn rank(&self) -> u8 {
        match self {
            InstallmentStatus::Pending | InstallmentStatus::Overdue | InstallmentStatus::FollowUp => 0,
            InstallmentStatus::Partial => 1,
            InstallmentStatus::Paid => 2,
        }
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Partial => "partial",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
            InstallmentStatus::FollowUp => "follow_up",
        };
        f.write_str(s)
    }
}

/// arrears-based risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStage {
    Performing,
    Watch,
    Substandard,
    Doubtful,
    Loss,
}

impl fmt::Display for PerformanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceStage::Performing => "performing",
            PerformanceStage::Watch => "watch",
            PerformanceStage::Substandard => "substandard",
            PerformanceStage::Doubtful => "doubtful",
            PerformanceStage::Loss => "loss",
        };
        f.write_str(s)
    }
}

/// how the cash reached the lender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    BankTransfer,
    MobileMoney,
    Cheque,
    Other,
}

/// ledger entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentStatus {
    Confirmed,
    Reversed,
}

/// penalty policy type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyType {
    /// outstanding x rate per overdue day
    Daily,
    /// outstanding x rate per started 30-day block
    Monthly,
    /// flat amount equal to the rate
    Fixed,
}

/// interest calculation method used when building a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// interest on the original principal for every period
    Flat,
    /// equal principal, interest on the remaining balance
    DecliningBalance,
    /// equal total payment per period
    EqualInstallments,
}

/// installment frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl RepaymentFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            RepaymentFrequency::Weekly => 52,
            RepaymentFrequency::Biweekly => 26,
            RepaymentFrequency::Monthly => 12,
        }
    }
}

/// portion of one payment applied to one installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub installment_number: u32,
    pub penalty: Money,
    pub fee: Money,
    pub interest: Money,
    pub principal: Money,
    pub status_after: InstallmentStatus,
}

impl AllocationLine {
    pub fn total(&self) -> Money {
        self.penalty + self.fee + self.interest + self.principal
    }
}

/// payment application result for a whole payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PaymentApplication {
    pub to_penalties: Money,
    pub to_fees: Money,
    pub to_interest: Money,
    pub to_principal: Money,
    pub excess: Money,
}

impl PaymentApplication {
    pub fn total_applied(&self) -> Money {
        self.to_penalties + self.to_fees + self.to_interest + self.to_principal
    }

    /// applied plus excess; equals the tendered amount
    pub fn total(&self) -> Money {
        self.total_applied() + self.excess
    }
}
