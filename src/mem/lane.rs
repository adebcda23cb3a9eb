use std::collections::VecDeque;

use serde::Deserialize;

use crate::mem::Cycle;

/// Service law for one lane of a device: every accepted request costs the
/// base latency plus a throughput component in bytes-per-cycle, and at most
/// `queue_capacity` requests may be in flight.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u64,
    pub queue_capacity: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            base_latency: 0,
            bytes_per_cycle: 1,
            queue_capacity: 1,
        }
    }
}

#[derive(Debug)]
struct Inflight {
    addr: u64,
    /// Cycle at which service for this request began.
    start: Cycle,
    ready_at: Cycle,
}

/// Single-issue FIFO lane enforcing the configured latency/bandwidth budget.
/// Requests complete in acceptance order within a lane; cross-lane ordering
/// is unconstrained.
#[derive(Debug)]
pub struct TimedLane {
    config: LaneConfig,
    inflight: VecDeque<Inflight>,
    busy_until: Cycle,
}

impl TimedLane {
    pub fn new(config: LaneConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            inflight: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    /// Attempt to accept a request at `now`. On success returns the cycle at
    /// which service begins and the cycle the result becomes available.
    pub fn try_accept(&mut self, now: Cycle, addr: u64, bytes: u64) -> Option<(Cycle, Cycle)> {
        if self.inflight.len() >= self.config.queue_capacity {
            return None;
        }

        let start = self.busy_until.max(now);
        let service_cycles = ceil_div(bytes, self.config.bytes_per_cycle);
        let ready_at = start
            .saturating_add(self.config.base_latency)
            .saturating_add(service_cycles);

        self.busy_until = ready_at;
        self.inflight.push_back(Inflight {
            addr,
            start,
            ready_at,
        });
        Some((start, ready_at))
    }

    /// Drain every request that has completed by `now`.
    pub fn drain_ready<F>(&mut self, now: Cycle, mut on_ready: F)
    where
        F: FnMut(u64),
    {
        while let Some(front) = self.inflight.front() {
            if front.ready_at > now {
                break;
            }
            let inflight = self.inflight.pop_front().expect("front just checked");
            on_ready(inflight.addr);
        }

        if self.inflight.is_empty() && now > self.busy_until {
            self.busy_until = now;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn oldest_start(&self) -> Option<Cycle> {
        self.inflight.front().map(|inflight| inflight.start)
    }
}

fn ceil_div(nom: u64, denom: u64) -> Cycle {
    debug_assert!(denom > 0);
    (nom + denom - 1) / denom
}
