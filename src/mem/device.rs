use log::trace;

use crate::mem::lane::{LaneConfig, TimedLane};
use crate::mem::{Cycle, DeviceEvent, DeviceEventKind, DeviceId, DeviceRequest, MemoryDevice};
use crate::sim::config::DeviceConfig;

/// Generic backing-device timing model: independent read and write lanes so
/// slow writes (flash victim writebacks) do not stall line fetches. The same
/// model serves as the DRAM-like cache medium and the flash-like backing
/// store; only the configuration differs.
pub struct DeviceModel {
    id: DeviceId,
    cycle: Cycle,
    read: TimedLane,
    write: TimedLane,
    /// Latency from service start until the burst is internally available.
    /// 0 disables critical-word events.
    critical_latency: Cycle,
    /// Scheduled critical-word events, unordered.
    criticals: Vec<(Cycle, u64)>,
}

impl DeviceModel {
    pub fn new(id: DeviceId, config: &DeviceConfig) -> Self {
        Self {
            id,
            cycle: 0,
            read: TimedLane::new(LaneConfig {
                base_latency: config.read_latency,
                bytes_per_cycle: config.bytes_per_cycle,
                queue_capacity: config.queue_capacity,
            }),
            write: TimedLane::new(LaneConfig {
                base_latency: config.write_latency,
                bytes_per_cycle: config.bytes_per_cycle,
                queue_capacity: config.queue_capacity,
            }),
            critical_latency: config.critical_latency,
            criticals: Vec::new(),
        }
    }
}

impl MemoryDevice for DeviceModel {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn try_enqueue(&mut self, request: DeviceRequest) -> bool {
        let lane = if request.is_write {
            &mut self.write
        } else {
            &mut self.read
        };
        let Some((start, ready_at)) = lane.try_accept(self.cycle, request.addr, request.bytes)
        else {
            return false;
        };
        trace!(
            "{:?}: accepted {} addr={:#x} ready_at={}",
            self.id,
            if request.is_write { "write" } else { "read" },
            request.addr,
            ready_at
        );

        if request.critical_word && !request.is_write && self.critical_latency > 0 {
            // Report the burst as soon as it lands in the device's internal
            // buffers, never later than the full completion.
            let at = start
                .saturating_add(self.critical_latency)
                .min(ready_at)
                .max(self.cycle + 1);
            self.criticals.push((at, request.addr));
        }
        true
    }

    fn tick(&mut self, events: &mut Vec<DeviceEvent>) {
        self.cycle += 1;
        let now = self.cycle;
        let id = self.id;

        // Critical-word events precede completions raised on the same cycle.
        let mut i = 0;
        while i < self.criticals.len() {
            if self.criticals[i].0 <= now {
                let (_, addr) = self.criticals.swap_remove(i);
                events.push(DeviceEvent {
                    device: id,
                    kind: DeviceEventKind::CriticalWord,
                    addr,
                    cycle: now,
                });
            } else {
                i += 1;
            }
        }

        self.read.drain_ready(now, |addr| {
            events.push(DeviceEvent {
                device: id,
                kind: DeviceEventKind::ReadDone,
                addr,
                cycle: now,
            });
        });
        self.write.drain_ready(now, |addr| {
            events.push(DeviceEvent {
                device: id,
                kind: DeviceEventKind::WriteDone,
                addr,
                cycle: now,
            });
        });
    }
}
