use std::path::PathBuf;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::mem::Cycle;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// Maximum number of controller cycles before the run is declared hung.
    pub timeout: u64,
    /// Trace file driving the run; empty selects the synthetic workload.
    pub trace: PathBuf,
    /// Synthetic workload: number of accesses to generate.
    pub accesses: u64,
    /// Synthetic workload: percentage of accesses that should miss.
    pub miss_rate: u64,
    /// Synthetic workload seed.
    pub seed: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timeout: 10000000,
            trace: PathBuf::new(),
            accesses: 1000,
            miss_rate: 50,
            seed: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CacheConfig {
    pub page_size: u64,
    /// Associativity of the cache.
    pub set_size: u64,
    pub cache_pages: u64,
    pub total_pages: u64,
    /// Cache-medium burst size in bytes.
    pub burst_size: u64,
    /// Backing-store burst size in bytes.
    pub flash_burst_size: u64,
    /// Cycles the controller stalls on the SRAM tag lookup.
    pub controller_delay: u64,
    /// Sequential prefetch window in pages; 0 disables it.
    pub prefetch_window: u64,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            set_size: 64,
            cache_pages: 262144,
            total_pages: 524288,
            burst_size: 64,
            flash_burst_size: 4096,
            controller_delay: 2,
            prefetch_window: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DeviceConfig {
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    pub bytes_per_cycle: u64,
    /// Maximum in-flight sub-transactions per lane.
    pub queue_capacity: usize,
    /// Latency until the first burst of a read is internally available, used
    /// for critical-word events. 0 disables them.
    pub critical_latency: Cycle,
}

impl Config for DeviceConfig {}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            read_latency: 50,
            write_latency: 50,
            bytes_per_cycle: 8,
            queue_capacity: 32,
            critical_latency: 0,
        }
    }
}

impl DeviceConfig {
    /// Defaults for the nonvolatile backing store: much slower than the cache
    /// medium, asymmetric writes, early critical-word reporting.
    pub fn flash_default() -> Self {
        Self {
            read_latency: 500,
            write_latency: 2000,
            bytes_per_cycle: 4,
            queue_capacity: 64,
            critical_latency: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Trace-driven prefetch schedule file; empty disables the mechanism.
    pub schedule: PathBuf,
}

impl Config for PrefetchConfig {}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StateConfig {
    /// Cache-table file to restore at startup; empty starts cold.
    pub restore: PathBuf,
    /// Cache-table file to save at the end of the run; empty skips saving.
    pub save: PathBuf,
}

impl Config for StateConfig {}
