use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use toml::Table;

use hybridsim::sim::config::{
    CacheConfig, Config, DeviceConfig, PrefetchConfig, SimConfig, StateConfig,
};
use hybridsim::sim::top::HybridSim;

#[derive(Parser)]
#[command(version, about)]
struct HybridSimArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override trace file path")]
    trace: Option<PathBuf>,
    #[arg(long, help = "Override synthetic access count")]
    accesses: Option<u64>,
    #[arg(long, help = "Override synthetic miss rate (percent)")]
    miss_rate: Option<u64>,
    #[arg(long, help = "Override synthetic workload seed")]
    seed: Option<u64>,
    #[arg(long, help = "Override timeout in cycles")]
    timeout: Option<u64>,
    #[arg(long, help = "Override sequential prefetch window in pages")]
    prefetch_window: Option<u64>,
    #[arg(long, help = "Restore the cache table from this file")]
    restore: Option<PathBuf>,
    #[arg(long, help = "Save the cache table to this file at the end")]
    save: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();

    let argv = HybridSimArgs::parse();
    let config = fs::read_to_string(&argv.config_path).with_context(|| {
        format!("cannot read config file {}", argv.config_path.display())
    })?;
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;

    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut cache_config = CacheConfig::from_section(config_table.get("cache"));
    let dram_config = DeviceConfig::from_section(config_table.get("dram"));
    let flash_config = match config_table.get("flash") {
        Some(section) => DeviceConfig::from_section(Some(section)),
        None => DeviceConfig::flash_default(),
    };
    let prefetch_config = PrefetchConfig::from_section(config_table.get("prefetch"));
    let mut state_config = StateConfig::from_section(config_table.get("state"));

    // override toml configs with argv
    sim_config.trace = argv.trace.unwrap_or(sim_config.trace);
    sim_config.accesses = argv.accesses.unwrap_or(sim_config.accesses);
    sim_config.miss_rate = argv.miss_rate.unwrap_or(sim_config.miss_rate);
    sim_config.seed = argv.seed.unwrap_or(sim_config.seed);
    sim_config.timeout = argv.timeout.unwrap_or(sim_config.timeout);
    cache_config.prefetch_window = argv.prefetch_window.unwrap_or(cache_config.prefetch_window);
    state_config.restore = argv.restore.unwrap_or(state_config.restore);
    state_config.save = argv.save.unwrap_or(state_config.save);

    let mut sim = HybridSim::new(
        &sim_config,
        &cache_config,
        &dram_config,
        &flash_config,
        &prefetch_config,
        &state_config,
    )?;
    let report = sim.run()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("cannot serialize run report")?
    );
    Ok(())
}
