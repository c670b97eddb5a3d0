mod engine;
mod types;

pub use engine::{run_simulation, run_simulation_cancellable};
pub use types::{
    Inputs, PercentileSummary, ProjectionPoint, RetirementAgeBucket, SimulationResults,
};
