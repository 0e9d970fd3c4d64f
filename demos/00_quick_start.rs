/// quick start - allocate one payment against a fresh schedule
use loan_repayment_rs::chrono::NaiveDate;
use loan_repayment_rs::{
    AllocationOptions, AmortizationCalculator, CalculationMethod, EngineConfig, Loan, LoanTerms,
    Money, PaymentRequest, Rate, RepaymentEngine, RepaymentFrequency, SafeTimeProvider,
    ScheduleGenerator, TimeSource, Uuid,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::System);
    let engine = RepaymentEngine::in_memory(EngineConfig::default())?;

    // 1,200,000 over 6 months, flat 18%
    let terms = LoanTerms {
        principal: Money::from_major(1_200_000),
        interest_rate: Rate::from_percentage(18),
        term: 6,
        frequency: RepaymentFrequency::Monthly,
        calculation_method: CalculationMethod::Flat,
        first_due_date: NaiveDate::from_ymd_opt(2024, 2, 1).ok_or("bad date")?,
        fee_per_installment: Money::ZERO,
    };
    let mut loan = Loan::new("LN-0001", "CL-0001", Uuid::new_v4(), terms, time.now());
    let schedule = AmortizationCalculator::new().generate(loan.id, &loan.terms)?;
    loan.apply_schedule(&schedule);
    loan.disburse(NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("bad date")?);
    engine.store().insert_loan(loan.clone());
    engine.store().insert_installments(loan.id, schedule);

    // pay a little more than one installment
    let request = PaymentRequest::new(
        loan.id,
        Money::from_major(250_000),
        NaiveDate::from_ymd_opt(2024, 2, 1).ok_or("bad date")?,
        "teller-01",
    );
    let outcome = engine.allocate_payment(request, AllocationOptions::default(), &time)?;

    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    for event in &outcome.events {
        println!("{event:?}");
    }

    Ok(())
}
