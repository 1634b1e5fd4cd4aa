mod engine;
mod types;

pub use engine::{
    HistoricalSampler, ReturnSampler, monthly_liability, one_time_expense, run, run_trial,
    run_with_progress,
};
pub use types::{
    AggregateStats, InvalidConfiguration, SP500_ANNUAL_RETURNS, SimulationConfig, TrialOutcome,
};
