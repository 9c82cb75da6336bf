use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arq_lab_abstract::{SimConfig, SimTime};
use arq_lab_protocols::{Discipline, ProtocolParams};
use arq_lab_simulator::{
    DEFAULT_TIME_LIMIT, SimulationReport, Simulator, load_scenario, run_scenario, scenario_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Alternating-Bit / Go-Back-N / Selective-Repeat simulator")]
struct Args {
    /// Discipline: abt, gbn or sr. A scenario's own protocol takes precedence.
    #[arg(long)]
    protocol: Option<Discipline>,

    /// Number of 20-byte messages the application submits.
    #[arg(long, default_value_t = 10)]
    messages: usize,

    /// Virtual time between two submitted messages.
    #[arg(long, default_value_t = 10.0)]
    interval: f64,

    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,

    #[arg(long)]
    min_latency: Option<f64>,
    #[arg(long)]
    max_latency: Option<f64>,

    #[arg(long)]
    window: Option<usize>,

    /// Retransmission timeout.
    #[arg(long)]
    timeout: Option<f64>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Give up when the run has not finished by this virtual time.
    #[arg(long, default_value_t = DEFAULT_TIME_LIMIT)]
    max_time: f64,

    /// Load a scenario from disk instead of generating messages.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("arq-lab-sim starting…");

    let report = match &args.scenario {
        Some(path) => run_scenario_file(path, args.protocol)?,
        None => run_generated(&args)?,
    };

    print_summary(&report);

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

impl Args {
    /// Defaults overridden by whichever flags were given.
    fn sim_config(&self) -> Result<SimConfig> {
        let defaults = SimConfig::default();
        let config = SimConfig {
            loss_rate: self.loss,
            corrupt_rate: self.corrupt,
            min_latency: self.min_latency.unwrap_or(defaults.min_latency),
            max_latency: self.max_latency.unwrap_or(defaults.max_latency),
            seed: self.seed,
            window_size: self.window.unwrap_or(defaults.window_size),
            timeout: self.timeout.unwrap_or(defaults.timeout),
        };
        config.validate().context("Invalid simulation parameters")?;
        Ok(config)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_generated(args: &Args) -> Result<SimulationReport> {
    let config = args.sim_config()?;
    let discipline = args.protocol.unwrap_or(Discipline::GoBackN);
    let params = ProtocolParams::try_from(&config)?;
    info!(
        "Simulating {} with window {} over {} messages",
        discipline,
        discipline.effective_window(&params),
        args.messages
    );

    let (sender, receiver) = discipline.pair(&params);
    let mut sim = Simulator::new(config, sender, receiver)?;
    sim.schedule_messages(args.messages, 0.0, args.interval);
    let limit = args.max_time;
    if !sim.run_until(SimTime(limit)) {
        anyhow::bail!("simulation did not finish within {limit} time units");
    }
    info!("Simulation complete.");
    Ok(sim.export_report())
}

fn run_scenario_file(path: &Path, requested: Option<Discipline>) -> Result<SimulationReport> {
    let scenario = load_scenario(path)?;
    let discipline = match (&scenario.protocol, requested) {
        (Some(name), Some(cli)) => {
            let own: Discipline = name.parse()?;
            if own != cli {
                warn!("Scenario pins protocol {}, ignoring --protocol {}", own, cli);
            }
            own
        }
        (Some(name), None) => name.parse()?,
        (None, cli) => cli.unwrap_or(Discipline::GoBackN),
    };

    let config = scenario_config(&scenario)?;
    let (sender, receiver) = discipline.pair(&ProtocolParams::try_from(&config)?);
    run_scenario(&scenario, sender, receiver)
}

fn print_summary(report: &SimulationReport) {
    info!(
        "Finished at t={}: {}/{} messages delivered{}",
        report.duration,
        report.delivered_data.len(),
        report.submitted.len(),
        if report.delivered_in_order() {
            " in order"
        } else {
            " (MISMATCH)"
        }
    );
    info!(
        "Packets: sender {}, receiver {}, lost {}, corrupted {}",
        report.sender_packet_count,
        report.receiver_packet_count,
        report.packets_lost,
        report.packets_corrupted
    );
    if let Some(peak) = report.max_metric("in_flight") {
        info!("Peak packets in flight: {}", peak);
    }
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    info!("Trace written to {}", path.display());
    Ok(())
}
