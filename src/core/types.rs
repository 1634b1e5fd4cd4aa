use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// S&P 500 annual total-return multipliers, 1928-2023 (1.24 = +24%).
pub const SP500_ANNUAL_RETURNS: &[f64] = &[
    1.24, 0.81, 1.27, 1.16, 1.29, 0.94, 1.19, 1.10, //
    0.99, 1.11, 1.30, 1.13, 1.00, 1.13, 1.23, 0.62, //
    1.04, 1.14, 1.03, 1.09, 1.26, 0.77, 0.87, 0.90, //
    1.20, 1.27, 1.31, 1.20, 1.34, 0.98, 1.07, 1.04, //
    1.26, 0.93, 1.27, 1.12, 1.02, 1.15, 1.26, 1.01, //
    1.17, 1.15, 0.90, 1.26, 1.12, 1.01, 0.89, 1.19, //
    1.32, 0.70, 0.83, 1.16, 1.11, 1.00, 0.89, 1.08, //
    1.20, 0.87, 1.09, 1.13, 1.19, 0.88, 1.23, 0.97, //
    1.08, 1.38, 0.86, 1.03, 1.26, 1.45, 0.93, 1.12, //
    1.16, 1.22, 1.10, 0.99, 1.00, 0.88, 1.31, 1.14, //
    1.19, 1.12, 0.82, 0.85, 0.95, 1.25, 0.61, 1.28, //
    1.41, 0.94, 1.47, 0.85, 0.53, 0.72, 0.88, 1.38,
];

/// Economic assumptions for one simulation run. Immutable once built; every
/// engine function borrows it read-only, so independent runs with different
/// assumptions can proceed side by side.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub annual_inflation_rate: f64,
    pub starting_balance: f64,
    pub monthly_post_tax_need: f64,
    pub num_withdraw_years: u32,
    pub tax_rate: f64,
    /// Monthly mortgage payment, exempt from inflation while active. Zero
    /// disables all mortgage handling.
    pub mortgage_monthly_amount: f64,
    pub remaining_mortgage_years: u32,
    /// Year index -> nominal lump expense for that year, inflation adjusted
    /// when applied.
    pub one_time_expenses: BTreeMap<u32, f64>,
    /// Historical annual return multipliers sampled with replacement.
    pub annual_returns: Vec<f64>,
    pub seed: u64,
}

/// How a single trial ended. Both variants carry the terminal balance; a
/// depleted trial stops before the horizon, a surviving trial funds every
/// year with money left over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrialOutcome {
    Survived { terminal_balance: f64 },
    Depleted { terminal_balance: f64 },
}

impl TrialOutcome {
    pub fn terminal_balance(self) -> f64 {
        match self {
            TrialOutcome::Survived { terminal_balance }
            | TrialOutcome::Depleted { terminal_balance } => terminal_balance,
        }
    }

    /// A terminal balance of exactly zero counts as ruin.
    pub fn is_ruin(self) -> bool {
        matches!(self, TrialOutcome::Depleted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub average_ending_balance: f64,
    /// Share of trials ending at or below zero, in percent (0-100).
    pub probability_of_ruin: f64,
}

/// Rejected configuration. Detected once before any trial runs; the run
/// aborts without producing a partial aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidConfiguration {
    EmptyReturnSeries,
    TooFewTrials,
    TaxRateOutOfRange,
    InflationOutOfRange,
    NegativeStartingBalance,
    NegativeMonthlyNeed,
    NegativeMortgageAmount,
}

impl fmt::Display for InvalidConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            InvalidConfiguration::EmptyReturnSeries => {
                "historical return series must not be empty"
            }
            InvalidConfiguration::TooFewTrials => "trial count must be at least 1",
            InvalidConfiguration::TaxRateOutOfRange => "tax rate must be in [0, 1)",
            InvalidConfiguration::InflationOutOfRange => {
                "annual inflation rate must be greater than -1"
            }
            InvalidConfiguration::NegativeStartingBalance => "starting balance must be >= 0",
            InvalidConfiguration::NegativeMonthlyNeed => "monthly post-tax need must be >= 0",
            InvalidConfiguration::NegativeMortgageAmount => "mortgage monthly amount must be >= 0",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for InvalidConfiguration {}
