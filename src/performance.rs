use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::StageThresholds;
use crate::decimal::days_between;
use crate::state::{Installment, Loan};
use crate::types::PerformanceStage;

/// arrears classification of a loan on a given date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub stage: PerformanceStage,
    pub days_in_arrears: u32,
    pub arrears_start_date: Option<NaiveDate>,
    /// oldest unpaid installment past its due date
    pub oldest_overdue_installment: Option<u32>,
}

/// derives days in arrears and a risk stage from the oldest unpaid installment
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceClassifier {
    thresholds: StageThresholds,
}

impl PerformanceClassifier {
    pub fn new(thresholds: StageThresholds) -> Self {
        Self { thresholds }
    }

    pub fn stage_for(&self, days_in_arrears: u32) -> PerformanceStage {
        let t = &self.thresholds;
        match days_in_arrears {
            0 => PerformanceStage::Performing,
            d if d <= t.watch_max_days => PerformanceStage::Watch,
            d if d <= t.substandard_max_days => PerformanceStage::Substandard,
            d if d <= t.doubtful_max_days => PerformanceStage::Doubtful,
            _ => PerformanceStage::Loss,
        }
    }

    /// oldest unpaid installment strictly past due on `as_of`
    fn oldest_overdue<'a>(installments: &'a [Installment], as_of: NaiveDate) -> Option<&'a Installment> {
        installments
            .iter()
            .filter(|i| i.status.is_open() && i.due_date < as_of)
            .min_by_key(|i| (i.due_date, i.installment_number))
    }

    /// classify without touching the loan; `previous_start` is the loan's
    /// current arrears start date, kept while arrears continue
    pub fn classify(
        &self,
        installments: &[Installment],
        previous_start: Option<NaiveDate>,
        as_of: NaiveDate,
    ) -> Classification {
        let Some(oldest) = Self::oldest_overdue(installments, as_of) else {
            return Classification {
                stage: PerformanceStage::Performing,
                days_in_arrears: 0,
                arrears_start_date: None,
                oldest_overdue_installment: None,
            };
        };

        let days_in_arrears = days_between(oldest.due_date, as_of).max(0) as u32;

        Classification {
            stage: self.stage_for(days_in_arrears),
            days_in_arrears,
            arrears_start_date: previous_start.or(Some(oldest.due_date)),
            oldest_overdue_installment: Some(oldest.installment_number),
        }
    }

    /// classify and write the result onto the loan
    pub fn apply(&self, loan: &mut Loan, installments: &[Installment], as_of: NaiveDate) -> Classification {
        let classification = self.classify(installments, loan.arrears_start_date, as_of);
        loan.performance_stage = classification.stage;
        loan.days_in_arrears = classification.days_in_arrears;
        loan.arrears_start_date = classification.arrears_start_date;
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::types::InstallmentStatus;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn installment(number: u32, due: NaiveDate, status: InstallmentStatus) -> Installment {
        let mut inst = Installment::new(Uuid::new_v4(), number, due, Money::from_major(100), Money::from_major(10), Money::ZERO);
        inst.status = status;
        inst
    }

    #[test]
    fn test_no_overdue_is_performing() {
        let classifier = PerformanceClassifier::default();
        let schedule = vec![
            installment(1, date(2024, 1, 1), InstallmentStatus::Paid),
            installment(2, date(2024, 2, 1), InstallmentStatus::Pending),
        ];

        // due today is not yet in arrears
        let result = classifier.classify(&schedule, Some(date(2023, 12, 2)), date(2024, 2, 1));
        assert_eq!(result.stage, PerformanceStage::Performing);
        assert_eq!(result.days_in_arrears, 0);
        assert_eq!(result.arrears_start_date, None);
    }

    #[test]
    fn test_45_days_is_substandard() {
        let classifier = PerformanceClassifier::default();
        let schedule = vec![
            installment(1, date(2024, 1, 1), InstallmentStatus::Partial),
            installment(2, date(2024, 2, 1), InstallmentStatus::Pending),
        ];

        let result = classifier.classify(&schedule, None, date(2024, 2, 15));
        assert_eq!(result.days_in_arrears, 45);
        assert_eq!(result.stage, PerformanceStage::Substandard);
        assert_eq!(result.oldest_overdue_installment, Some(1));
        assert_eq!(result.arrears_start_date, Some(date(2024, 1, 1)));
    }

    #[test]
    fn test_stage_boundaries() {
        let classifier = PerformanceClassifier::default();
        assert_eq!(classifier.stage_for(1), PerformanceStage::Watch);
        assert_eq!(classifier.stage_for(30), PerformanceStage::Watch);
        assert_eq!(classifier.stage_for(31), PerformanceStage::Substandard);
        assert_eq!(classifier.stage_for(90), PerformanceStage::Substandard);
        assert_eq!(classifier.stage_for(91), PerformanceStage::Doubtful);
        assert_eq!(classifier.stage_for(180), PerformanceStage::Doubtful);
        assert_eq!(classifier.stage_for(181), PerformanceStage::Loss);
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = PerformanceClassifier::new(StageThresholds {
            watch_max_days: 7,
            substandard_max_days: 30,
            doubtful_max_days: 60,
        });
        assert_eq!(classifier.stage_for(8), PerformanceStage::Substandard);
        assert_eq!(classifier.stage_for(61), PerformanceStage::Loss);
    }

    #[test]
    fn test_arrears_start_kept_while_in_arrears() {
        let classifier = PerformanceClassifier::default();
        let schedule = vec![
            installment(1, date(2024, 1, 1), InstallmentStatus::Paid),
            installment(2, date(2024, 2, 1), InstallmentStatus::Overdue),
        ];

        // arrears began with installment 1, which has since been paid
        let result = classifier.classify(&schedule, Some(date(2024, 1, 1)), date(2024, 2, 10));
        assert_eq!(result.days_in_arrears, 9);
        assert_eq!(result.stage, PerformanceStage::Watch);
        assert_eq!(result.arrears_start_date, Some(date(2024, 1, 1)));
    }

    #[test]
    fn test_follow_up_lines_ignored() {
        let classifier = PerformanceClassifier::default();
        let schedule = vec![installment(1, date(2024, 1, 1), InstallmentStatus::FollowUp)];
        let result = classifier.classify(&schedule, None, date(2024, 6, 1));
        assert_eq!(result.stage, PerformanceStage::Performing);
    }
}
