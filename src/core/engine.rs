use super::types::{AggregateStats, InvalidConfiguration, SimulationConfig, TrialOutcome};

const MONTHS_PER_YEAR: u32 = 12;
const PROGRESS_INTERVAL: u32 = 100;

/// Source of one month's growth factor. The production implementation draws
/// from historical data; tests substitute deterministic stubs.
pub trait ReturnSampler {
    fn sample_monthly_return(&mut self) -> f64;
}

/// Draws one historical annual return uniformly at random with replacement
/// and converts it to a monthly-equivalent multiplier (root-twelfth). Each
/// calendar month is treated as an independent draw of an annualized year,
/// which approximates monthly volatility from annual data only; it does not
/// preserve sequential-year autocorrelation.
pub struct HistoricalSampler<'a> {
    returns: &'a [f64],
    rng: Rng,
}

impl<'a> HistoricalSampler<'a> {
    pub fn new(returns: &'a [f64], seed: u64) -> Result<Self, InvalidConfiguration> {
        if returns.is_empty() {
            return Err(InvalidConfiguration::EmptyReturnSeries);
        }
        Ok(Self {
            returns,
            rng: Rng::new(seed),
        })
    }
}

impl ReturnSampler for HistoricalSampler<'_> {
    fn sample_monthly_return(&mut self) -> f64 {
        let annual = self.returns[self.rng.next_index(self.returns.len())];
        annual.powf(1.0 / 12.0)
    }
}

fn validate(config: &SimulationConfig) -> Result<(), InvalidConfiguration> {
    if config.annual_returns.is_empty() {
        return Err(InvalidConfiguration::EmptyReturnSeries);
    }
    if !(0.0..1.0).contains(&config.tax_rate) {
        return Err(InvalidConfiguration::TaxRateOutOfRange);
    }
    if !config.annual_inflation_rate.is_finite() || config.annual_inflation_rate <= -1.0 {
        return Err(InvalidConfiguration::InflationOutOfRange);
    }
    if config.starting_balance < 0.0 {
        return Err(InvalidConfiguration::NegativeStartingBalance);
    }
    if config.monthly_post_tax_need < 0.0 {
        return Err(InvalidConfiguration::NegativeMonthlyNeed);
    }
    if config.mortgage_monthly_amount < 0.0 {
        return Err(InvalidConfiguration::NegativeMortgageAmount);
    }
    Ok(())
}

/// Nominal monthly post-tax need for the given simulation year. While the
/// mortgage is active its fixed payment is exempt from inflation, so only
/// the remainder of the need is scaled; once the mortgage terminates the
/// whole remaining need inflates.
pub fn monthly_liability(config: &SimulationConfig, year_index: u32) -> f64 {
    let inflation_factor = (1.0 + config.annual_inflation_rate).powi(year_index as i32);
    let base_need = config.monthly_post_tax_need;

    let has_mortgage = config.mortgage_monthly_amount > 0.0;
    let mortgage_paid_off = year_index + 1 > config.remaining_mortgage_years;
    if has_mortgage && mortgage_paid_off {
        (base_need - config.mortgage_monthly_amount) * inflation_factor
    } else if has_mortgage {
        (base_need - config.mortgage_monthly_amount) * inflation_factor
            + config.mortgage_monthly_amount
    } else {
        base_need * inflation_factor
    }
}

/// Inflation-adjusted lump expense scheduled for the given year, zero if
/// none is scheduled.
pub fn one_time_expense(config: &SimulationConfig, year_index: u32) -> f64 {
    let nominal = config
        .one_time_expenses
        .get(&year_index)
        .copied()
        .unwrap_or(0.0);
    nominal * (1.0 + config.annual_inflation_rate).powi(year_index as i32)
}

/// Runs one full withdrawal trial: per year, deduct the scheduled lump
/// expense, then withdraw the grossed-up monthly need and apply one sampled
/// growth factor for each of twelve months. A balance at or below zero after
/// a year's twelve months ends the trial early.
pub fn run_trial<S: ReturnSampler>(config: &SimulationConfig, sampler: &mut S) -> TrialOutcome {
    let mut balance = config.starting_balance;

    for year in 0..config.num_withdraw_years {
        balance -= one_time_expense(config, year);
        let monthly_need = monthly_liability(config, year);

        for _ in 0..MONTHS_PER_YEAR {
            // Gross up so the post-tax need is met after withdrawal tax.
            let monthly_drawdown = monthly_need / (1.0 - config.tax_rate);
            balance -= monthly_drawdown;
            balance *= sampler.sample_monthly_return();
        }

        if balance <= 0.0 {
            return TrialOutcome::Depleted {
                terminal_balance: balance,
            };
        }
    }

    if balance > 0.0 {
        TrialOutcome::Survived {
            terminal_balance: balance,
        }
    } else {
        TrialOutcome::Depleted {
            terminal_balance: balance,
        }
    }
}

/// Runs `trials` independent trials and aggregates their terminal balances.
pub fn run(config: &SimulationConfig, trials: u32) -> Result<AggregateStats, InvalidConfiguration> {
    run_with_progress(config, trials, |_, _| {})
}

/// Like [`run`], reporting `(completed, total)` every 100 trials so callers
/// can surface progress. The callback is observational only and never
/// affects the computed statistics.
pub fn run_with_progress(
    config: &SimulationConfig,
    trials: u32,
    mut on_progress: impl FnMut(u32, u32),
) -> Result<AggregateStats, InvalidConfiguration> {
    validate(config)?;
    if trials < 1 {
        return Err(InvalidConfiguration::TooFewTrials);
    }

    let mut terminal_balances = Vec::with_capacity(trials as usize);
    for trial_id in 0..trials {
        if trial_id % PROGRESS_INTERVAL == 0 {
            on_progress(trial_id, trials);
        }

        // Independent sub-seed per trial; trials share no generator state.
        let trial_seed = derive_seed(config.seed, trial_id);
        let mut sampler = HistoricalSampler::new(&config.annual_returns, trial_seed)?;
        terminal_balances.push(run_trial(config, &mut sampler).terminal_balance());
    }

    let sum: f64 = terminal_balances.iter().sum();
    let survived = terminal_balances.iter().filter(|b| **b > 0.0).count();

    Ok(AggregateStats {
        average_ending_balance: sum / trials as f64,
        probability_of_ruin: (1.0 - survived as f64 / trials as f64) * 100.0,
    })
}

fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(base_seed ^ ((trial_id as u64) << 32) ^ trial_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn next_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        let idx = (self.next_f64() * len as f64) as usize;
        idx.min(len - 1)
    }
}
