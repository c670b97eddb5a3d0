use serde::Serialize;

/// Engine-scale configuration for one simulation run. Rates and
/// probabilities are fractions; the API boundary converts from the
/// percentage units used on the wire.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub current_age: u32,
    pub retirement_age: u32,
    pub current_savings: f64,
    pub monthly_expenses: f64,
    pub emergency_fund: f64,
    pub annual_income: f64,
    pub savings_rate: f64,
    pub expected_return: f64,
    pub inflation_rate: f64,
    pub volatility: f64,
    pub unemployment_probability: f64,
    pub unemployment_duration_months: u32,
    pub healthcare_shock_probability: f64,
    pub healthcare_shock_cost: f64,
    pub simulations: u32,
    pub horizon_years: u32,
    /// None means an entropy-derived base seed; runs are then not
    /// reproducible, matching the unseeded reference behavior.
    pub seed: Option<u64>,
}

/// Cross-trial percentile band of portfolio value at one projection year.
/// `value` duplicates `p50`; the consuming chart layer reads both.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionPoint {
    pub year: i32,
    pub value: f64,
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementAgeBucket {
    pub age: u32,
    pub count: u32,
}

/// Percentiles taken over the projection's own p5/p50/p95 series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileSummary {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResults {
    pub success_probability: f64,
    pub net_worth_projections: Vec<ProjectionPoint>,
    pub retirement_age_distribution: Vec<RetirementAgeBucket>,
    pub annual_expenses_history: Vec<f64>,
    pub percentiles: PercentileSummary,
    pub timestamp: i64,
}
