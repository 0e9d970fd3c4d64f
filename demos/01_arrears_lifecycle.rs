/// arrears lifecycle - penalties, classification, reversal and reconciliation
use loan_repayment_rs::chrono::{NaiveDate, TimeZone, Utc};
use loan_repayment_rs::{
    AllocationOptions, AmortizationCalculator, CalculationMethod, EngineConfig, Loan, LoanTerms,
    Money, PaymentRequest, PenaltyPolicy, PenaltyType, Rate, RepaymentEngine,
    RepaymentFrequency, SafeTimeProvider, ScheduleGenerator, TimeSource, Uuid,
};

fn date(y: i32, m: u32, d: u32) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    Ok(NaiveDate::from_ymd_opt(y, m, d).ok_or("bad date")?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).single().ok_or("bad time")?;
    let time = SafeTimeProvider::new(TimeSource::Test(now));
    let engine = RepaymentEngine::in_memory(EngineConfig::default())?;

    let product_id = Uuid::new_v4();
    engine.store().insert_policy(
        PenaltyPolicy::new(product_id, PenaltyType::Daily, Rate::from_bps(10))
            .with_grace_period(5)
            .with_cap(Money::from_major(20_000)),
    );

    let terms = LoanTerms {
        principal: Money::from_major(600_000),
        interest_rate: Rate::from_percentage(24),
        term: 6,
        frequency: RepaymentFrequency::Monthly,
        calculation_method: CalculationMethod::DecliningBalance,
        first_due_date: date(2024, 1, 15)?,
        fee_per_installment: Money::from_major(1_000),
    };
    let mut loan = Loan::new("LN-0002", "CL-0042", product_id, terms, time.now());
    let schedule = AmortizationCalculator::new().generate(loan.id, &loan.terms)?;
    loan.apply_schedule(&schedule);
    loan.disburse(date(2023, 12, 15)?);
    engine.store().insert_loan(loan.clone());
    engine.store().insert_installments(loan.id, schedule);

    // nightly batch finds the borrower behind
    let accrual = engine.accrue_penalties(loan.id, date(2024, 3, 1)?, "batch", &time)?;
    println!("accrued: {:?}", accrual.result);

    let classification = engine.classify_loan(loan.id, date(2024, 3, 1)?, "batch", &time)?;
    println!("classified: {:?}", classification.result);

    // a catch-up payment that later bounces
    let request = PaymentRequest::new(loan.id, Money::from_major(250_000), date(2024, 3, 4)?, "teller-07")
        .with_reference("CHQ-88120");
    let payment = engine.allocate_payment(request, AllocationOptions::default(), &time)?;
    println!("allocated: {}", serde_json::to_string_pretty(&payment.result)?);

    let reversal = engine.reverse_repayment(
        &payment.result.receipt_number,
        "cheque returned unpaid",
        date(2024, 3, 10)?,
        "supervisor",
        &time,
    )?;
    println!("after reversal: {:?}", reversal.result.classification);

    let report = engine.reconcile_loan_balances(loan.id, "ops", &time)?;
    println!("drift after reconcile: {}", report.result.had_drift());

    Ok(())
}
