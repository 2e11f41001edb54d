use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use toml::Table;

use crate::error::SimError;
use crate::pipeline::DeviceConfig;
use crate::sim::config::{Config, PipelineConfig, SimConfig};
use crate::sim::top::Sim;
use crate::sim::trace::load_trace;
use crate::sim::workload::WorkloadConfig;

#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct StorpipeArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: Option<PathBuf>,
    #[arg(long, help = "Command trace to replay instead of the synthetic workload")]
    pub trace: Option<PathBuf>,
    #[arg(long, help = "Override number of device queues")]
    pub num_queues: Option<usize>,
    #[arg(long, help = "Override per-queue depth")]
    pub queue_depth: Option<usize>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Write the run summary as JSON to this path")]
    pub summary_json: Option<PathBuf>,
    #[arg(long, help = "Override the cycle limit")]
    pub timeout: Option<u64>,
}

/// Map `--log` / `sim.log_level` onto a filter: 0 is silent, 1 info, anything higher debug.
pub fn level_filter(level: u64) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Make a Sim object from the TOML configuration, loaded with its command stream.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<&StorpipeArgs>) -> Result<Sim, SimError> {
    let config_table: Table = toml::from_str(toml_string)?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"))?;
    let mut pipeline_config = PipelineConfig::from_section(config_table.get("pipeline"))?;
    let device_config = DeviceConfig::from_section(config_table.get("device"))?;
    let workload = WorkloadConfig::from_section(config_table.get("workload"))?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        sim_config.log_level = args.log.unwrap_or(sim_config.log_level);
        sim_config.timeout = args.timeout.unwrap_or(sim_config.timeout);
        sim_config.trace = args.trace.clone().or(sim_config.trace);
        sim_config.summary_json = args.summary_json.clone().or(sim_config.summary_json);
        pipeline_config.num_queues = args.num_queues.unwrap_or(pipeline_config.num_queues);
        pipeline_config.queue_depth = args.queue_depth.unwrap_or(pipeline_config.queue_depth);
    }

    workload.validate()?;
    let commands = match &sim_config.trace {
        Some(path) => load_trace(path)?,
        None => workload.generate(),
    };

    let mut sim = Sim::new(sim_config, pipeline_config, device_config)?;
    sim.load(commands)?;
    Ok(sim)
}
