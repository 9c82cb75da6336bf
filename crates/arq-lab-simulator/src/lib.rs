pub mod engine;
pub mod scenario_runner;
pub mod trace;

pub use engine::{LinkEventSummary, NodeId, Simulator};
pub use scenario_runner::{
    DEFAULT_TIME_LIMIT, check_assertions, load_scenario, run_scenario, scenario_config,
};
pub use trace::SimulationReport;
