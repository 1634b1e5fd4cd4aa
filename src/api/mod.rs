use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::{self, SP500_ANNUAL_RETURNS, SimulationConfig};

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Monte Carlo retirement drawdown estimator (historical-return sampling + inflation-adjusted liabilities)"
)]
struct Cli {
    #[arg(long, default_value_t = 3.25, help = "Annual inflation rate in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 100_000.0)]
    starting_balance: f64,
    #[arg(
        long,
        default_value_t = 5_100.0,
        help = "Monthly post-tax spending need in today's money"
    )]
    monthly_post_tax_need: f64,
    #[arg(long, default_value_t = 55, help = "Withdrawal horizon in years")]
    withdraw_years: u32,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Tax rate applied when grossing up withdrawals, in percent"
    )]
    tax_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Monthly mortgage payment; 0 disables mortgage handling"
    )]
    mortgage_monthly_payment: f64,
    #[arg(
        long,
        default_value_t = 0,
        help = "Years of mortgage payments remaining at the start of the horizon"
    )]
    remaining_mortgage_years: u32,
    #[arg(
        long,
        value_name = "YEAR=AMOUNT",
        help = "Nominal one-time expense for a year index; repeat for multiple years"
    )]
    one_time_expense: Vec<String>,
    #[arg(long, default_value_t = 3000)]
    trials: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    inflation_rate: Option<f64>,
    starting_balance: Option<f64>,
    monthly_post_tax_need: Option<f64>,
    withdraw_years: Option<u32>,
    tax_rate: Option<f64>,
    mortgage_monthly_payment: Option<f64>,
    remaining_mortgage_years: Option<u32>,
    one_time_expenses: Option<BTreeMap<u32, f64>>,
    annual_returns: Option<Vec<f64>>,
    trials: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    average_ending_balance: f64,
    probability_of_ruin: f64,
    trials: u32,
    withdraw_years: u32,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn default_cli_for_api() -> Cli {
    Cli::parse_from(["drawdown"])
}

fn parse_one_time_expense(entry: &str) -> Result<(u32, f64), String> {
    let Some((year, amount)) = entry.split_once('=') else {
        return Err(format!(
            "--one-time-expense entry '{entry}' must use YEAR=AMOUNT"
        ));
    };
    let year = year
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("--one-time-expense year '{year}' must be a non-negative integer"))?;
    let amount = amount
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("--one-time-expense amount '{amount}' must be a number"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err("--one-time-expense amount must be >= 0".to_string());
    }
    Ok((year, amount))
}

fn build_config(cli: Cli) -> Result<(SimulationConfig, u32), String> {
    if cli.trials < 1 {
        return Err("--trials must be at least 1".to_string());
    }

    if !(0.0..100.0).contains(&cli.tax_rate) {
        return Err("--tax-rate must be at least 0 and below 100".to_string());
    }

    if !cli.inflation_rate.is_finite() || cli.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    if !cli.starting_balance.is_finite() || cli.starting_balance < 0.0 {
        return Err("--starting-balance must be >= 0".to_string());
    }

    if !cli.monthly_post_tax_need.is_finite() || cli.monthly_post_tax_need < 0.0 {
        return Err("--monthly-post-tax-need must be >= 0".to_string());
    }

    if !cli.mortgage_monthly_payment.is_finite() || cli.mortgage_monthly_payment < 0.0 {
        return Err("--mortgage-monthly-payment must be >= 0".to_string());
    }

    let mut one_time_expenses = BTreeMap::new();
    for entry in &cli.one_time_expense {
        let (year, amount) = parse_one_time_expense(entry)?;
        one_time_expenses.insert(year, amount);
    }

    let config = SimulationConfig {
        annual_inflation_rate: cli.inflation_rate / 100.0,
        starting_balance: cli.starting_balance,
        monthly_post_tax_need: cli.monthly_post_tax_need,
        num_withdraw_years: cli.withdraw_years,
        tax_rate: cli.tax_rate / 100.0,
        mortgage_monthly_amount: cli.mortgage_monthly_payment,
        remaining_mortgage_years: cli.remaining_mortgage_years,
        one_time_expenses,
        annual_returns: SP500_ANNUAL_RETURNS.to_vec(),
        seed: cli.seed,
    };

    Ok((config, cli.trials))
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<(SimulationConfig, u32), String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.starting_balance {
        cli.starting_balance = v;
    }
    if let Some(v) = payload.monthly_post_tax_need {
        cli.monthly_post_tax_need = v;
    }
    if let Some(v) = payload.withdraw_years {
        cli.withdraw_years = v;
    }
    if let Some(v) = payload.tax_rate {
        cli.tax_rate = v;
    }
    if let Some(v) = payload.mortgage_monthly_payment {
        cli.mortgage_monthly_payment = v;
    }
    if let Some(v) = payload.remaining_mortgage_years {
        cli.remaining_mortgage_years = v;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    let (mut config, trials) = build_config(cli)?;

    if let Some(expenses) = payload.one_time_expenses {
        for (year, amount) in &expenses {
            if !amount.is_finite() || *amount < 0.0 {
                return Err(format!("oneTimeExpenses[{year}] must be >= 0"));
            }
        }
        config.one_time_expenses = expenses;
    }

    if let Some(returns) = payload.annual_returns {
        if returns.is_empty() {
            return Err("annualReturns must not be empty".to_string());
        }
        if returns.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err("annualReturns entries must be finite multipliers >= 0".to_string());
        }
        config.annual_returns = returns;
    }

    Ok((config, trials))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("Drawdown HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

pub fn run_cli() -> Result<(), String> {
    let cli = Cli::parse();
    let (config, trials) = build_config(cli)?;

    let stats = core::run_with_progress(&config, trials, |done, total| {
        eprint!("Trials completed: {done}/{total}...\r");
    })
    .map_err(|e| e.to_string())?;
    eprintln!();

    println!("{}", "-".repeat(20));
    println!();
    println!("Average ending amount: ${:.2}", stats.average_ending_balance);
    println!(
        "Probability of running out of money before {} years: {:.2}%",
        config.num_withdraw_years, stats.probability_of_ruin
    );
    Ok(())
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let (config, trials) = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match core::run(&config, trials) {
        Ok(stats) => json_response(
            StatusCode::OK,
            SimulateResponse {
                average_ending_balance: stats.average_ending_balance,
                probability_of_ruin: stats.probability_of_ruin,
                trials,
                withdraw_years: config.num_withdraw_years,
            },
        ),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<(SimulationConfig, u32), String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn build_config_defaults_reproduce_baseline_assumptions() {
        let (config, trials) = build_config(default_cli_for_api()).expect("valid defaults");

        assert_approx(config.annual_inflation_rate, 0.0325);
        assert_approx(config.starting_balance, 100_000.0);
        assert_approx(config.monthly_post_tax_need, 5_100.0);
        assert_eq!(config.num_withdraw_years, 55);
        assert_approx(config.tax_rate, 0.25);
        assert_approx(config.mortgage_monthly_amount, 0.0);
        assert!(config.one_time_expenses.is_empty());
        assert_eq!(config.annual_returns.len(), 96);
        assert_eq!(trials, 3000);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn build_config_converts_percent_rates() {
        let mut cli = default_cli_for_api();
        cli.inflation_rate = 2.0;
        cli.tax_rate = 40.0;

        let (config, _) = build_config(cli).expect("valid inputs");
        assert_approx(config.annual_inflation_rate, 0.02);
        assert_approx(config.tax_rate, 0.40);
    }

    #[test]
    fn build_config_parses_repeated_one_time_expenses() {
        let mut cli = default_cli_for_api();
        cli.one_time_expense = vec!["17=62500".to_string(), "19=125000".to_string()];

        let (config, _) = build_config(cli).expect("valid inputs");
        assert_approx(config.one_time_expenses[&17], 62_500.0);
        assert_approx(config.one_time_expenses[&19], 125_000.0);
    }

    #[test]
    fn build_config_rejects_malformed_one_time_expense() {
        let mut cli = default_cli_for_api();
        cli.one_time_expense = vec!["17".to_string()];

        let err = build_config(cli).expect_err("must reject missing amount");
        assert!(err.contains("--one-time-expense"));
    }

    #[test]
    fn build_config_rejects_full_tax_rate() {
        let mut cli = default_cli_for_api();
        cli.tax_rate = 100.0;

        let err = build_config(cli).expect_err("must reject 100% tax");
        assert!(err.contains("--tax-rate"));
    }

    #[test]
    fn build_config_rejects_zero_trials() {
        let mut cli = default_cli_for_api();
        cli.trials = 0;

        let err = build_config(cli).expect_err("must reject zero trials");
        assert!(err.contains("--trials"));
    }

    #[test]
    fn build_config_rejects_negative_starting_balance() {
        let mut cli = default_cli_for_api();
        cli.starting_balance = -1.0;

        let err = build_config(cli).expect_err("must reject negative balance");
        assert!(err.contains("--starting-balance"));
    }

    #[test]
    fn api_request_from_json_parses_camel_case_overrides() {
        let (config, trials) = api_request_from_json(
            r#"{
                "inflationRate": 2.5,
                "startingBalance": 750000,
                "monthlyPostTaxNeed": 6100,
                "withdrawYears": 40,
                "taxRate": 20,
                "mortgageMonthlyPayment": 5100,
                "remainingMortgageYears": 28,
                "oneTimeExpenses": {"17": 62500, "18": 62500},
                "trials": 500,
                "seed": 9
            }"#,
        )
        .expect("valid payload");

        assert_approx(config.annual_inflation_rate, 0.025);
        assert_approx(config.starting_balance, 750_000.0);
        assert_approx(config.monthly_post_tax_need, 6_100.0);
        assert_eq!(config.num_withdraw_years, 40);
        assert_approx(config.tax_rate, 0.20);
        assert_approx(config.mortgage_monthly_amount, 5_100.0);
        assert_eq!(config.remaining_mortgage_years, 28);
        assert_approx(config.one_time_expenses[&17], 62_500.0);
        assert_approx(config.one_time_expenses[&18], 62_500.0);
        assert_eq!(trials, 500);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn api_request_from_json_accepts_custom_return_series() {
        let (config, _) =
            api_request_from_json(r#"{"annualReturns": [1.0, 1.1, 0.9]}"#).expect("valid payload");
        assert_eq!(config.annual_returns, vec![1.0, 1.1, 0.9]);
    }

    #[test]
    fn api_request_from_json_rejects_empty_return_series() {
        let err = api_request_from_json(r#"{"annualReturns": []}"#)
            .expect_err("must reject empty series");
        assert!(err.contains("annualReturns"));
    }

    #[test]
    fn api_request_from_json_rejects_negative_one_time_expense() {
        let err = api_request_from_json(r#"{"oneTimeExpenses": {"5": -1}}"#)
            .expect_err("must reject negative expense");
        assert!(err.contains("oneTimeExpenses"));
    }

    #[test]
    fn api_request_feeds_a_runnable_config() {
        let (config, _) = api_request_from_json(
            r#"{"startingBalance": 1000000000, "withdrawYears": 10, "trials": 20}"#,
        )
        .expect("valid payload");

        let stats = core::run(&config, 20).expect("valid config");
        assert_approx(stats.probability_of_ruin, 0.0);
    }
}
