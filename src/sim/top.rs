use std::collections::VecDeque;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Serialize;

use crate::cache::controller::CacheController;
use crate::cache::geometry::CacheGeometry;
use crate::cache::metrics::Metrics;
use crate::cache::prefetch::Prefetcher;
use crate::cache::table::CacheTable;
use crate::mem::{DeviceId, DeviceModel};
use crate::sim::config::{
    CacheConfig, DeviceConfig, PrefetchConfig, SimConfig, StateConfig,
};
use crate::sim::trace::{load_trace, SyntheticWorkload, TraceEntry};

enum Workload {
    Trace(VecDeque<TraceEntry>),
    Synthetic(SyntheticWorkload),
}

/// End-of-run report, serialized to JSON.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub cycles: u64,
    pub accesses_issued: u64,
    pub metrics: Metrics,
}

/// Simulation top: the controller, its two device models and the workload
/// feeding it, stepped together until the system drains.
pub struct HybridSim {
    controller: CacheController,
    workload: Workload,
    timeout: u64,
    accesses_issued: u64,
    state: StateConfig,
}

impl HybridSim {
    pub fn new(
        sim: &SimConfig,
        cache: &CacheConfig,
        dram: &DeviceConfig,
        flash: &DeviceConfig,
        prefetch: &PrefetchConfig,
        state: &StateConfig,
    ) -> Result<Self> {
        let geo = CacheGeometry::new(cache)?;
        let table = if state.restore.as_os_str().is_empty() {
            CacheTable::new(geo)
        } else {
            info!("restoring cache table from {}", state.restore.display());
            CacheTable::restore(&state.restore, geo)?
        };

        let mut prefetcher = Prefetcher::new(cache.prefetch_window);
        if !prefetch.schedule.as_os_str().is_empty() {
            prefetcher
                .load_schedule(&prefetch.schedule)
                .context("cannot load prefetch schedule")?;
        }

        let workload = if sim.trace.as_os_str().is_empty() {
            info!(
                "synthetic workload: {} accesses, {}% target miss rate, seed {}",
                sim.accesses, sim.miss_rate, sim.seed
            );
            Workload::Synthetic(SyntheticWorkload::new(
                sim.seed,
                sim.accesses,
                sim.miss_rate,
                geo.page_size,
                geo.total_pages,
            ))
        } else {
            let entries = load_trace(&sim.trace)?;
            info!(
                "trace workload: {} accesses from {}",
                entries.len(),
                sim.trace.display()
            );
            Workload::Trace(entries)
        };

        Ok(Self {
            controller: CacheController::new(
                table,
                cache.controller_delay,
                prefetcher,
                Box::new(DeviceModel::new(DeviceId::CacheMedium, dram)),
                Box::new(DeviceModel::new(DeviceId::BackingStore, flash)),
            ),
            workload,
            timeout: sim.timeout,
            accesses_issued: 0,
            state: state.clone(),
        })
    }

    fn feed(&mut self) {
        let now = self.controller.cycle();
        match &mut self.workload {
            Workload::Trace(entries) => {
                while entries.front().is_some_and(|entry| entry.cycle <= now) {
                    let entry = entries.pop_front().expect("front checked above");
                    self.controller.submit(entry.kind(), entry.addr);
                    self.accesses_issued += 1;
                }
            }
            // One access per cycle keeps the queue busy without swamping it.
            Workload::Synthetic(workload) => {
                if let Some((kind, addr)) = workload.next_access(&self.controller) {
                    self.controller.submit(kind, addr);
                    self.accesses_issued += 1;
                }
            }
        }
    }

    fn workload_done(&self) -> bool {
        match &self.workload {
            Workload::Trace(entries) => entries.is_empty(),
            Workload::Synthetic(workload) => workload.is_done(),
        }
    }

    /// Run until every submitted access has drained, then optionally save
    /// the cache table.
    pub fn run(&mut self) -> Result<RunReport> {
        loop {
            self.feed();
            self.controller.tick();
            for completion in self.controller.take_completions() {
                debug!(
                    "{}: completed {:?} at {:#x}",
                    completion.cycle, completion.kind, completion.addr
                );
            }

            if self.workload_done() && self.controller.outstanding() == 0 {
                break;
            }
            if self.controller.cycle() >= self.timeout {
                bail!(
                    "timed out after {} cycles with {} transactions outstanding",
                    self.controller.cycle(),
                    self.controller.outstanding()
                );
            }
        }

        if !self.state.save.as_os_str().is_empty() {
            info!("saving cache table to {}", self.state.save.display());
            self.controller.save_cache_table(&self.state.save)?;
        }

        Ok(RunReport {
            cycles: self.controller.cycle(),
            accesses_issued: self.accesses_issued,
            metrics: *self.controller.metrics(),
        })
    }

    pub fn controller(&self) -> &CacheController {
        &self.controller
    }
}
