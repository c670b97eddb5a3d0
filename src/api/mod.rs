use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{Inputs, run_simulation};

/// Wire payload for one simulation request. Every field is optional;
/// missing fields fall back to the defaults on `Config`. Rates and
/// probabilities arrive as percentages.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    current_savings: Option<f64>,
    monthly_expenses: Option<f64>,
    emergency_fund_amount: Option<f64>,
    annual_income: Option<f64>,
    savings_rate: Option<f64>,
    expected_return: Option<f64>,
    inflation_rate: Option<f64>,
    volatility: Option<f64>,
    unemployment_probability: Option<f64>,
    unemployment_duration: Option<u32>,
    healthcare_shock_probability: Option<f64>,
    healthcare_shock_cost: Option<f64>,
    simulations_count: Option<u32>,
    max_simulation_years: Option<u32>,
    seed: Option<u64>,
}

/// Canonical defaulted configuration, in the percentage units used on the
/// wire. API payload fields are applied as overrides before validation.
#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo estimator of retirement survival under market, job-loss and health-cost shocks"
)]
struct Config {
    #[arg(long, default_value_t = 30)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(long, default_value_t = 100_000.0)]
    current_savings: f64,
    #[arg(long, default_value_t = 5_000.0)]
    monthly_expenses: f64,
    #[arg(long, default_value_t = 0.0, help = "Cash buffer drawn before the portfolio while unemployed")]
    emergency_fund_amount: f64,
    #[arg(long, default_value_t = 120_000.0)]
    annual_income: f64,
    #[arg(long, default_value_t = 20.0, help = "Share of income saved each month, in percent")]
    savings_rate: f64,
    #[arg(long, default_value_t = 7.0, help = "Expected return in percent")]
    expected_return: f64,
    #[arg(long, default_value_t = 3.0, help = "Expected inflation in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 15.0, help = "Return volatility in percent")]
    volatility: f64,
    #[arg(long, default_value_t = 5.0, help = "Monthly probability of losing employment, in percent")]
    unemployment_probability: f64,
    #[arg(long, default_value_t = 6, help = "Months an unemployment spell lasts")]
    unemployment_duration: u32,
    #[arg(long, default_value_t = 5.0, help = "Monthly probability of a healthcare cost shock, in percent")]
    healthcare_shock_probability: f64,
    #[arg(long, default_value_t = 20.0, help = "Permanent expense increase per healthcare shock, in percent")]
    healthcare_shock_cost: f64,
    #[arg(long, default_value_t = 1_000)]
    simulations: u32,
    #[arg(long, default_value_t = 35, help = "Horizon to simulate, in years")]
    max_simulation_years: u32,
    #[arg(long, help = "Base seed for reproducible runs; omitted means entropy-seeded")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(config: Config) -> Result<Inputs, String> {
    if config.retirement_age < config.current_age {
        return Err("--retirement-age must be >= --current-age".to_string());
    }

    if config.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if config.max_simulation_years == 0 {
        return Err("--max-simulation-years must be > 0".to_string());
    }

    for (name, value) in [
        ("--current-savings", config.current_savings),
        ("--monthly-expenses", config.monthly_expenses),
        ("--emergency-fund-amount", config.emergency_fund_amount),
        ("--annual-income", config.annual_income),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    for (name, pct) in [
        ("--savings-rate", config.savings_rate),
        ("--unemployment-probability", config.unemployment_probability),
        (
            "--healthcare-shock-probability",
            config.healthcare_shock_probability,
        ),
    ] {
        if !(0.0..=100.0).contains(&pct) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    if !config.volatility.is_finite() || config.volatility < 0.0 {
        return Err("--volatility must be >= 0".to_string());
    }

    if !config.healthcare_shock_cost.is_finite() || config.healthcare_shock_cost < 0.0 {
        return Err("--healthcare-shock-cost must be >= 0".to_string());
    }

    if !config.expected_return.is_finite() || config.expected_return <= -100.0 {
        return Err("--expected-return must be > -100".to_string());
    }

    if !config.inflation_rate.is_finite() || config.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    Ok(Inputs {
        current_age: config.current_age,
        retirement_age: config.retirement_age,
        current_savings: config.current_savings,
        monthly_expenses: config.monthly_expenses,
        emergency_fund: config.emergency_fund_amount,
        annual_income: config.annual_income,
        savings_rate: config.savings_rate / 100.0,
        expected_return: config.expected_return / 100.0,
        inflation_rate: config.inflation_rate / 100.0,
        volatility: config.volatility / 100.0,
        unemployment_probability: config.unemployment_probability / 100.0,
        unemployment_duration_months: config.unemployment_duration,
        healthcare_shock_probability: config.healthcare_shock_probability / 100.0,
        healthcare_shock_cost: config.healthcare_shock_cost / 100.0,
        simulations: config.simulations,
        horizon_years: config.max_simulation_years,
        seed: config.seed,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        // Submitting a configuration is the only valid operation; axum
        // answers other methods on the route with 405.
        .route("/api/simulate", post(simulate_post_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("nestegg HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/simulate");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match run_simulation(&inputs) {
        Ok(results) => json_response(StatusCode::OK, results),
        Err(msg) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg),
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
fn inputs_from_json(json: &str) -> Result<Inputs, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload)
}

fn inputs_from_payload(payload: SimulatePayload) -> Result<Inputs, String> {
    let mut config = default_config_for_api();

    if let Some(v) = payload.current_age {
        config.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        config.retirement_age = v;
    }
    if let Some(v) = payload.current_savings {
        config.current_savings = v;
    }
    if let Some(v) = payload.monthly_expenses {
        config.monthly_expenses = v;
    }
    if let Some(v) = payload.emergency_fund_amount {
        config.emergency_fund_amount = v;
    }
    if let Some(v) = payload.annual_income {
        config.annual_income = v;
    }
    if let Some(v) = payload.savings_rate {
        config.savings_rate = v;
    }
    if let Some(v) = payload.expected_return {
        config.expected_return = v;
    }
    if let Some(v) = payload.inflation_rate {
        config.inflation_rate = v;
    }
    if let Some(v) = payload.volatility {
        config.volatility = v;
    }
    if let Some(v) = payload.unemployment_probability {
        config.unemployment_probability = v;
    }
    if let Some(v) = payload.unemployment_duration {
        config.unemployment_duration = v;
    }
    if let Some(v) = payload.healthcare_shock_probability {
        config.healthcare_shock_probability = v;
    }
    if let Some(v) = payload.healthcare_shock_cost {
        config.healthcare_shock_cost = v;
    }
    if let Some(v) = payload.simulations_count {
        config.simulations = v;
    }
    if let Some(v) = payload.max_simulation_years {
        config.max_simulation_years = v;
    }
    if let Some(v) = payload.seed {
        config.seed = Some(v);
    }

    build_inputs(config)
}

fn default_config_for_api() -> Config {
    Config {
        current_age: 30,
        retirement_age: 65,
        current_savings: 100_000.0,
        monthly_expenses: 5_000.0,
        emergency_fund_amount: 0.0,
        annual_income: 120_000.0,
        savings_rate: 20.0,
        expected_return: 7.0,
        inflation_rate: 3.0,
        volatility: 15.0,
        unemployment_probability: 5.0,
        unemployment_duration: 6,
        healthcare_shock_probability: 5.0,
        healthcare_shock_cost: 20.0,
        simulations: 1_000,
        max_simulation_years: 35,
        seed: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_config() -> Config {
        default_config_for_api()
    }

    #[test]
    fn build_inputs_converts_percentages_to_fractions() {
        let config = sample_config();
        let inputs = build_inputs(config).expect("valid inputs");

        assert_approx(inputs.savings_rate, 0.20);
        assert_approx(inputs.expected_return, 0.07);
        assert_approx(inputs.inflation_rate, 0.03);
        assert_approx(inputs.volatility, 0.15);
        assert_approx(inputs.unemployment_probability, 0.05);
        assert_approx(inputs.healthcare_shock_probability, 0.05);
        assert_approx(inputs.healthcare_shock_cost, 0.20);
    }

    #[test]
    fn build_inputs_rejects_retirement_before_current_age() {
        let mut config = sample_config();
        config.current_age = 50;
        config.retirement_age = 40;

        let err = build_inputs(config).expect_err("must reject inverted ages");
        assert!(err.contains("--retirement-age"));
    }

    #[test]
    fn build_inputs_rejects_zero_simulations() {
        let mut config = sample_config();
        config.simulations = 0;

        let err = build_inputs(config).expect_err("must reject zero trials");
        assert!(err.contains("--simulations"));
    }

    #[test]
    fn build_inputs_rejects_zero_horizon() {
        let mut config = sample_config();
        config.max_simulation_years = 0;

        let err = build_inputs(config).expect_err("must reject zero horizon");
        assert!(err.contains("--max-simulation-years"));
    }

    #[test]
    fn build_inputs_rejects_out_of_range_probability() {
        let mut config = sample_config();
        config.unemployment_probability = 140.0;

        let err = build_inputs(config).expect_err("must reject probability > 100");
        assert!(err.contains("--unemployment-probability"));
    }

    #[test]
    fn build_inputs_rejects_negative_balances() {
        let mut config = sample_config();
        config.current_savings = -1.0;

        let err = build_inputs(config).expect_err("must reject negative savings");
        assert!(err.contains("--current-savings"));
    }

    #[test]
    fn inputs_from_json_parses_wizard_keys() {
        let json = r#"{
          "currentAge": 31,
          "retirementAge": 62,
          "currentSavings": 150000,
          "monthlyExpenses": 4200,
          "emergencyFundAmount": 18000,
          "annualIncome": 95000,
          "savingsRate": 22,
          "expectedReturn": 6.5,
          "inflationRate": 2.8,
          "volatility": 12,
          "unemploymentProbability": 4,
          "unemploymentDuration": 9,
          "healthcareShockProbability": 2,
          "healthcareShockCost": 35,
          "simulationsCount": 500,
          "maxSimulationYears": 40,
          "seed": 99
        }"#;
        let inputs = inputs_from_json(json).expect("json should parse");

        assert_eq!(inputs.current_age, 31);
        assert_eq!(inputs.retirement_age, 62);
        assert_approx(inputs.current_savings, 150_000.0);
        assert_approx(inputs.monthly_expenses, 4_200.0);
        assert_approx(inputs.emergency_fund, 18_000.0);
        assert_approx(inputs.annual_income, 95_000.0);
        assert_approx(inputs.savings_rate, 0.22);
        assert_approx(inputs.expected_return, 0.065);
        assert_approx(inputs.inflation_rate, 0.028);
        assert_approx(inputs.volatility, 0.12);
        assert_approx(inputs.unemployment_probability, 0.04);
        assert_eq!(inputs.unemployment_duration_months, 9);
        assert_approx(inputs.healthcare_shock_probability, 0.02);
        assert_approx(inputs.healthcare_shock_cost, 0.35);
        assert_eq!(inputs.simulations, 500);
        assert_eq!(inputs.horizon_years, 40);
        assert_eq!(inputs.seed, Some(99));
    }

    #[test]
    fn inputs_from_json_applies_defaults_for_missing_fields() {
        let inputs = inputs_from_json(r#"{ "currentAge": 45 }"#).expect("json should parse");

        assert_eq!(inputs.current_age, 45);
        assert_eq!(inputs.retirement_age, 65);
        assert_eq!(inputs.simulations, 1_000);
        assert_eq!(inputs.horizon_years, 35);
        assert_eq!(inputs.seed, None);
    }

    #[test]
    fn inputs_from_json_reports_validation_failures() {
        let err = inputs_from_json(r#"{ "simulationsCount": 0 }"#)
            .expect_err("must surface validation error");
        assert!(err.contains("--simulations"));
    }

    #[test]
    fn simulation_response_serializes_contract_fields() {
        let mut config = sample_config();
        config.simulations = 20;
        config.max_simulation_years = 3;
        config.seed = Some(5);

        let inputs = build_inputs(config).expect("valid inputs");
        let results = run_simulation(&inputs).expect("engine should run");
        let json = serde_json::to_string(&results).expect("results should serialize");

        assert!(json.contains("\"successProbability\""));
        assert!(json.contains("\"netWorthProjections\""));
        assert!(json.contains("\"retirementAgeDistribution\""));
        assert!(json.contains("\"annualExpensesHistory\""));
        assert!(json.contains("\"percentiles\""));
        assert!(json.contains("\"timestamp\""));
        assert!(json.contains("\"p5\""));
        assert!(json.contains("\"p50\""));
        assert!(json.contains("\"p95\""));
        assert!(json.contains("\"value\""));
        assert!(json.contains("\"year\""));
    }
}
