use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Utc};

use super::types::{
    Inputs, PercentileSummary, ProjectionPoint, RetirementAgeBucket, SimulationResults,
};

/// Everything one trial reports back to the aggregator. The per-year
/// series hold one sample per 12 elapsed months; a trial that exhausts its
/// portfolio early simply has shorter series.
#[derive(Debug)]
struct TrialOutcome {
    net_worth_by_year: Vec<f64>,
    annual_expenses_by_year: Vec<f64>,
    retirement_age: Option<u32>,
    success: bool,
}

/// Mutable state of one simulated household, advanced one month at a time.
#[derive(Debug, Clone, Copy)]
struct TrialState {
    portfolio: f64,
    emergency_fund: f64,
    employed: bool,
    unemployment_months_left: u32,
    retired: bool,
    month: u32,
    monthly_expenses: f64,
}

impl TrialState {
    fn new(inputs: &Inputs) -> Self {
        Self {
            portfolio: inputs.current_savings,
            emergency_fund: inputs.emergency_fund,
            employed: true,
            unemployment_months_left: 0,
            retired: false,
            month: 0,
            monthly_expenses: inputs.monthly_expenses,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PercentileBand {
    p5: f64,
    p50: f64,
    p95: f64,
}

/// Pure cross-trial statistics, before the result contract is assembled.
#[derive(Debug)]
struct Aggregates {
    success_probability: f64,
    bands: Vec<PercentileBand>,
    retirement_age_distribution: Vec<RetirementAgeBucket>,
    average_annual_expenses: Vec<f64>,
    summary: PercentileSummary,
}

pub fn run_simulation(inputs: &Inputs) -> Result<SimulationResults, String> {
    run_simulation_cancellable(inputs, &AtomicBool::new(false))
}

/// Runs the full trial set, checking the cancellation flag between trials.
/// Trials are short and independent, so there is no mid-trial cancellation
/// point.
pub fn run_simulation_cancellable(
    inputs: &Inputs,
    cancel: &AtomicBool,
) -> Result<SimulationResults, String> {
    if inputs.simulations < 1 {
        return Err("simulations must be >= 1".to_string());
    }

    // A zero-year horizon runs no trials at all: zero-length projections
    // and a 0% success probability rather than a vacuous 100%.
    if inputs.horizon_years == 0 {
        return Ok(assemble_results(aggregate(&[], inputs.simulations)));
    }

    let base_seed = inputs.seed.unwrap_or_else(entropy_seed);
    let mut outcomes = Vec::with_capacity(inputs.simulations as usize);
    for trial_id in 0..inputs.simulations {
        if cancel.load(Ordering::Relaxed) {
            return Err("simulation cancelled".to_string());
        }
        let mut rng = Rng::new(derive_seed(base_seed, trial_id));
        outcomes.push(simulate_trial(inputs, &mut rng));
    }

    Ok(assemble_results(aggregate(&outcomes, inputs.simulations)))
}

/// Simulates one household trajectory in monthly steps, for up to
/// `horizon_years * 12` months or until the portfolio is exhausted.
fn simulate_trial(inputs: &Inputs, rng: &mut Rng) -> TrialOutcome {
    let horizon_months = inputs.horizon_years.saturating_mul(12);
    // The reference trigger compares the elapsed-month counter against the
    // raw age difference, so retirement fires long before the nominal
    // retirement date. Preserved as-is; see DESIGN.md.
    let retirement_offset = inputs.retirement_age.saturating_sub(inputs.current_age);

    let mut state = TrialState::new(inputs);
    let mut outcome = TrialOutcome {
        net_worth_by_year: Vec::with_capacity(inputs.horizon_years as usize),
        annual_expenses_by_year: Vec::with_capacity(inputs.horizon_years as usize),
        retirement_age: None,
        success: false,
    };

    while state.month < horizon_months && state.portfolio > 0.0 {
        advance_month(inputs, &mut state, rng, retirement_offset, &mut outcome);
    }

    outcome.success = state.portfolio > 0.0;
    outcome
}

/// One month of the household state machine, applied in the fixed order:
/// employment shock, unemployment consumption, market return,
/// contribution, retirement transition, withdrawal, expense drift,
/// annual sampling.
fn advance_month(
    inputs: &Inputs,
    state: &mut TrialState,
    rng: &mut Rng,
    retirement_offset: u32,
    outcome: &mut TrialOutcome,
) {
    if state.employed && rng.next_f64() < inputs.unemployment_probability {
        state.employed = false;
        state.unemployment_months_left = inputs.unemployment_duration_months;
    }

    if state.unemployment_months_left > 0 {
        // Emergency fund absorbs unemployment spending first; it may go
        // negative once before the portfolio takes over.
        if state.emergency_fund > 0.0 {
            state.emergency_fund -= state.monthly_expenses;
        } else {
            state.portfolio -= state.monthly_expenses;
        }
        state.unemployment_months_left -= 1;
        if state.unemployment_months_left == 0 {
            state.employed = true;
        }
    } else {
        state.employed = true;
    }

    // Annual-scale mean and volatility applied per month without
    // rescaling, exactly as the reference does.
    let drift = inputs.expected_return - inputs.volatility * inputs.volatility / 2.0;
    state.portfolio *= (drift + inputs.volatility * rng.standard_normal()).exp();

    if state.employed && !state.retired {
        state.portfolio += inputs.annual_income * inputs.savings_rate / 12.0;
    }

    if !state.retired && state.month >= retirement_offset {
        state.retired = true;
        outcome.retirement_age = Some(state.month + retirement_offset);
    }

    if state.retired {
        state.portfolio -= state.monthly_expenses;
    }

    state.monthly_expenses *= 1.0 + inputs.inflation_rate / 12.0;
    if rng.next_f64() < inputs.healthcare_shock_probability {
        // Healthcare shocks raise the ongoing expense level permanently.
        state.monthly_expenses *= 1.0 + inputs.healthcare_shock_cost;
    }

    if state.month % 12 == 0 {
        outcome.net_worth_by_year.push(state.portfolio);
        outcome
            .annual_expenses_by_year
            .push(state.monthly_expenses * 12.0);
    }

    state.month += 1;
}

/// Collapses the full trial set into cross-trial statistics. Portfolio
/// percentiles at each year use only the trials still solvent at that
/// year, while expense averages keep every trial in the denominator with
/// missing samples counted as zero. Both policies are preserved reference
/// behavior and intentionally differ.
fn aggregate(outcomes: &[TrialOutcome], trial_count: u32) -> Aggregates {
    let successes = outcomes.iter().filter(|o| o.success).count();
    let year_count = outcomes
        .iter()
        .map(|o| o.net_worth_by_year.len())
        .max()
        .unwrap_or(0);

    let mut bands = Vec::with_capacity(year_count);
    let mut average_annual_expenses = Vec::with_capacity(year_count);
    for index in 0..year_count {
        let mut samples: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| o.net_worth_by_year.get(index).copied())
            .collect();
        bands.push(PercentileBand {
            p5: percentile(&mut samples, 5.0),
            p50: percentile(&mut samples, 50.0),
            p95: percentile(&mut samples, 95.0),
        });

        let expense_sum: f64 = outcomes
            .iter()
            .map(|o| o.annual_expenses_by_year.get(index).copied().unwrap_or(0.0))
            .sum();
        average_annual_expenses.push(expense_sum / trial_count as f64);
    }

    let mut histogram: BTreeMap<u32, u32> = BTreeMap::new();
    for outcome in outcomes {
        if let Some(age) = outcome.retirement_age {
            *histogram.entry(age).or_insert(0) += 1;
        }
    }
    let retirement_age_distribution = histogram
        .into_iter()
        .map(|(age, count)| RetirementAgeBucket { age, count })
        .collect();

    let mut p5_series: Vec<f64> = bands.iter().map(|b| b.p5).collect();
    let mut p50_series: Vec<f64> = bands.iter().map(|b| b.p50).collect();
    let mut p95_series: Vec<f64> = bands.iter().map(|b| b.p95).collect();
    let summary = PercentileSummary {
        p5: percentile(&mut p5_series, 5.0),
        p50: percentile(&mut p50_series, 50.0),
        p95: percentile(&mut p95_series, 95.0),
    };

    Aggregates {
        success_probability: successes as f64 / trial_count as f64 * 100.0,
        bands,
        retirement_age_distribution,
        average_annual_expenses,
        summary,
    }
}

/// Packages aggregates into the output contract, stamping the projection
/// entries with calendar years and the results with the generation time.
fn assemble_results(aggregates: Aggregates) -> SimulationResults {
    let now = Utc::now();
    let base_year = now.year();

    SimulationResults {
        success_probability: aggregates.success_probability,
        net_worth_projections: aggregates
            .bands
            .iter()
            .enumerate()
            .map(|(index, band)| ProjectionPoint {
                year: base_year + index as i32,
                value: band.p50,
                p5: band.p5,
                p50: band.p50,
                p95: band.p95,
            })
            .collect(),
        retirement_age_distribution: aggregates.retirement_age_distribution,
        annual_expenses_history: aggregates.average_annual_expenses,
        percentiles: aggregates.summary,
        timestamp: now.timestamp_millis(),
    }
}

/// Nearest-rank percentile: sort ascending and select
/// `floor(p/100 * (n - 1))`, with 0 as the empty-collection fallback.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (p / 100.0 * (values.len() as f64 - 1.0)).floor() as usize;
    values.get(rank).copied().unwrap_or(0.0)
}

fn entropy_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5EED_CAFE_F00D_D1CE);
    splitmix64(nanos)
}

fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(base_seed ^ ((trial_id as u64) << 1 | 1))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Per-trial xorshift64* stream. Each trial owns one, derived from the
/// base seed, so trial order and parallel execution cannot change any
/// trial's draws.
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

    /// Uniform draw in [0, 1); zero is a possible value.
    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        (self.next_u64() >> 11) as f64 / DENOM
    }

    /// Box-Muller standard normal. Consumes two uniform draws; the first
    /// is resampled until strictly positive so it never reaches the
    /// logarithm as zero.
    fn standard_normal(&mut self) -> f64 {
        let mut u = self.next_f64();
        while u <= 0.0 {
            u = self.next_f64();
        }
        let v = self.next_f64();
        (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
    }
}
