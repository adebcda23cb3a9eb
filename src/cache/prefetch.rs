use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

/// One trigger of the trace-driven schedule: once the set's access counter
/// exceeds `access_count`, flush `flush_addr` and prefetch `new_addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchTrigger {
    pub access_count: u64,
    pub flush_addr: u64,
    pub new_addr: u64,
}

/// Synthesizes the extra transactions injected at the front of the entry
/// queue: a sequential window on misses and an optional per-set schedule
/// loaded once at startup.
#[derive(Debug, Default)]
pub struct Prefetcher {
    /// Sequential window size in pages; 0 disables the mechanism.
    window: u64,
    /// Per-set trigger queues, consumed front to back.
    schedule: HashMap<u64, VecDeque<PrefetchTrigger>>,
    /// Per-set count of real read/write accesses.
    counters: HashMap<u64, u64>,
}

impl Prefetcher {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            schedule: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    /// Append a trigger programmatically, after any loaded schedule.
    pub fn push_trigger(&mut self, set_index: u64, trigger: PrefetchTrigger) {
        self.schedule.entry(set_index).or_default().push_back(trigger);
    }

    /// Load a schedule file: one trigger per line,
    /// `set_index access_count flush_addr new_addr`, `#` comments.
    pub fn load_schedule(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read prefetch schedule {}", path.display()))?;
        let mut count = 0usize;
        for (number, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<u64> = line
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .with_context(|| {
                    format!("malformed prefetch trigger on line {}", number + 1)
                })?;
            if fields.len() != 4 {
                bail!(
                    "prefetch trigger on line {} must hold 4 fields, got {}",
                    number + 1,
                    fields.len()
                );
            }
            self.schedule
                .entry(fields[0])
                .or_default()
                .push_back(PrefetchTrigger {
                    access_count: fields[1],
                    flush_addr: fields[2],
                    new_addr: fields[3],
                });
            count += 1;
        }
        info!(
            "loaded {count} prefetch triggers for {} sets from {}",
            self.schedule.len(),
            path.display()
        );
        Ok(())
    }

    /// Record a real read/write access to `set_index` and return the trigger
    /// to fire, if its threshold has been crossed. At most one trigger fires
    /// per access.
    pub fn record_access(&mut self, set_index: u64) -> Option<PrefetchTrigger> {
        let counter = self.counters.entry(set_index).or_insert(0);
        *counter += 1;
        let queue = self.schedule.get_mut(&set_index)?;
        if queue.front().is_some_and(|t| *counter > t.access_count) {
            queue.pop_front()
        } else {
            None
        }
    }

    /// Page addresses of the sequential window following a missed page,
    /// clipped to the address-space bound.
    pub fn sequential_window(
        &self,
        page_addr: u64,
        page_size: u64,
        total_pages: u64,
    ) -> Vec<u64> {
        let bound = total_pages * page_size;
        (1..=self.window)
            .map(|i| page_addr + i * page_size)
            .take_while(|&addr| addr < bound)
            .collect()
    }

    pub fn window(&self) -> u64 {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::{PrefetchTrigger, Prefetcher};

    #[test]
    fn sequential_window_stops_at_bound() {
        let prefetcher = Prefetcher::new(4);
        // 8 total pages of 1 KiB; window from page 5 clips to pages 6 and 7.
        let pages = prefetcher.sequential_window(5 * 1024, 1024, 8);
        assert_eq!(pages, vec![6 * 1024, 7 * 1024]);
    }

    #[test]
    fn zero_window_produces_nothing() {
        let prefetcher = Prefetcher::new(0);
        assert!(prefetcher.sequential_window(0, 1024, 8).is_empty());
    }

    #[test]
    fn trigger_fires_once_threshold_exceeded() {
        let mut prefetcher = Prefetcher::new(0);
        prefetcher.push_trigger(
            2,
            PrefetchTrigger {
                access_count: 2,
                flush_addr: 0x1000,
                new_addr: 0x2000,
            },
        );

        assert!(prefetcher.record_access(2).is_none()); // counter 1
        assert!(prefetcher.record_access(2).is_none()); // counter 2, not yet above
        let fired = prefetcher.record_access(2).unwrap(); // counter 3
        assert_eq!(fired.flush_addr, 0x1000);
        assert_eq!(fired.new_addr, 0x2000);
        assert!(prefetcher.record_access(2).is_none());
    }

    #[test]
    fn triggers_fire_in_schedule_order() {
        let mut prefetcher = Prefetcher::new(0);
        prefetcher.push_trigger(
            0,
            PrefetchTrigger {
                access_count: 0,
                flush_addr: 0xA000,
                new_addr: 0xB000,
            },
        );
        prefetcher.push_trigger(
            0,
            PrefetchTrigger {
                access_count: 1,
                flush_addr: 0xC000,
                new_addr: 0xD000,
            },
        );

        assert_eq!(prefetcher.record_access(0).unwrap().new_addr, 0xB000);
        assert_eq!(prefetcher.record_access(0).unwrap().new_addr, 0xD000);
        assert!(prefetcher.record_access(0).is_none());
    }

    #[test]
    fn counters_are_per_set() {
        let mut prefetcher = Prefetcher::new(0);
        prefetcher.push_trigger(
            1,
            PrefetchTrigger {
                access_count: 0,
                flush_addr: 0,
                new_addr: 0x4000,
            },
        );
        assert!(prefetcher.record_access(0).is_none());
        assert!(prefetcher.record_access(1).is_some());
    }
}
