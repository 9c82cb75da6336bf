use anyhow::{Context, anyhow, bail};
use arq_lab_abstract::{
    SimConfig, SimTime, TestAction, TestAssertion, TestScenario, TransportProtocol, pad_message,
};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::Simulator;
use crate::trace::SimulationReport;

/// Virtual-time budget when a scenario has no `max_duration` assertion.
pub const DEFAULT_TIME_LIMIT: f64 = 100_000.0;

pub fn load_scenario(path: impl AsRef<Path>) -> anyhow::Result<TestScenario> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

/// Default config with the scenario's overrides applied, validated.
pub fn scenario_config(scenario: &TestScenario) -> anyhow::Result<SimConfig> {
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    config
        .validate()
        .with_context(|| format!("Invalid config in scenario '{}'", scenario.name))?;
    Ok(config)
}

pub fn run_scenario(
    scenario: &TestScenario,
    sender: Box<dyn TransportProtocol>,
    receiver: Box<dyn TransportProtocol>,
) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let config = scenario_config(scenario)?;
    let mut sim = Simulator::new(config, sender, receiver)?;

    // Configure actions (App sends, deterministic faults, etc.)
    for action in &scenario.actions {
        match action {
            TestAction::AppSend { time, data } => {
                sim.schedule_app_send(*time, data.as_bytes().to_vec());
            }
            TestAction::GenerateMessages {
                count,
                interval,
                start,
            } => {
                sim.schedule_messages(*count, *start, *interval);
            }
            TestAction::DropNextFromSenderSeq { seq } => {
                sim.add_drop_sender_seq_once(*seq);
            }
            TestAction::DropNextFromReceiverAck { ack } => {
                sim.add_drop_receiver_ack_once(*ack);
            }
        }
    }

    let limit = scenario
        .assertions
        .iter()
        .find_map(|a| match a {
            TestAssertion::MaxDuration { time } => Some(*time),
            _ => None,
        })
        .unwrap_or(DEFAULT_TIME_LIMIT);

    if !sim.run_until(SimTime(limit)) {
        bail!("Test timed out after {} time units", limit);
    }

    let report = sim.export_report();
    check_assertions(&scenario.assertions, &report)?;

    info!("Test Scenario Passed!");
    Ok(report)
}

/// Check every assertion against a finished run. `max_duration` is
/// enforced while running and re-checked here against the final clock.
pub fn check_assertions(
    assertions: &[TestAssertion],
    report: &SimulationReport,
) -> anyhow::Result<()> {
    for assertion in assertions {
        match assertion {
            TestAssertion::DataDelivered { data } => {
                let expected = pad_message(data.as_bytes());
                let found = report
                    .delivered_data
                    .iter()
                    .any(|d| d.as_slice() == expected.as_slice());
                if !found {
                    return Err(anyhow!(
                        "Assertion Failed: Data {:?} was not delivered",
                        data
                    ));
                }
            }
            TestAssertion::AllDeliveredInOrder => {
                if !report.delivered_in_order() {
                    return Err(anyhow!(
                        "Assertion Failed: {} messages submitted, {} delivered, or order differs",
                        report.submitted.len(),
                        report.delivered_data.len()
                    ));
                }
            }
            TestAssertion::SenderPacketCount { min, max } => {
                if report.sender_packet_count < *min {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected min {}",
                        report.sender_packet_count,
                        min
                    ));
                }
                if let Some(max) = max {
                    if report.sender_packet_count > *max {
                        return Err(anyhow!(
                            "Assertion Failed: Sender sent {} packets, expected max {}",
                            report.sender_packet_count,
                            max
                        ));
                    }
                }
            }
            TestAssertion::MaxInFlight { max } => {
                let peak = report.max_metric("in_flight").unwrap_or(0.0);
                if peak > *max as f64 {
                    return Err(anyhow!(
                        "Assertion Failed: {} packets in flight, expected at most {}",
                        peak,
                        max
                    ));
                }
            }
            TestAssertion::MaxDuration { time } => {
                if report.duration.as_f64() > *time {
                    return Err(anyhow!(
                        "Assertion Failed: finished at {}, limit {}",
                        report.duration,
                        time
                    ));
                }
            }
        }
    }
    Ok(())
}
