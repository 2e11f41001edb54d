use std::fs;

use anyhow::Context;
use clap::Parser;
use log::{info, LevelFilter};
use storpipe::sim::perf_log::write_summary;
use storpipe::ui::{level_filter, make_sim, StorpipeArgs};

pub fn main() -> anyhow::Result<()> {
    let argv = StorpipeArgs::parse();

    // RUST_LOG wins unless a level was asked for on the command line
    let env_filter = std::env::var_os("RUST_LOG").is_some() && argv.log.is_none();
    let mut logger = env_logger::Builder::from_default_env();
    if !env_filter {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();
    if !env_filter {
        log::set_max_level(level_filter(argv.log.unwrap_or(0)));
    }

    let config = match &argv.config_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?,
        None => String::new(),
    };
    let mut sim = make_sim(&config, Some(&argv)).context("cannot set up simulation")?;
    if !env_filter {
        log::set_max_level(level_filter(sim.config().log_level));
    }

    let summary = sim.simulate();
    println!("{summary}");

    let json_path = sim.config().summary_json.clone();
    if json_path.is_some() || sim.config().perf_log {
        let path = write_summary(&summary, json_path.as_deref())
            .context("cannot write run summary")?;
        info!("summary written to {}", path.display());
    }

    if summary.timed_out {
        anyhow::bail!("simulation timed out after {} cycles", summary.report.total_cycles);
    }
    Ok(())
}
