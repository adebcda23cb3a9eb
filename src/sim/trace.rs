use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cache::controller::{CacheController, TransactionKind};
use crate::mem::Cycle;

/// One access of a replayed trace: `cycle is_write addr`.
#[derive(Debug, Clone, Copy)]
pub struct TraceEntry {
    pub cycle: Cycle,
    pub is_write: bool,
    pub addr: u64,
}

impl TraceEntry {
    pub fn kind(&self) -> TransactionKind {
        if self.is_write {
            TransactionKind::Write
        } else {
            TransactionKind::Read
        }
    }
}

/// Parse a line-oriented trace file. Lines are `cycle is_write addr` with
/// `#` comments; entries must be sorted by cycle.
pub fn load_trace(path: &Path) -> Result<VecDeque<TraceEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read trace file {}", path.display()))?;

    let mut entries = VecDeque::new();
    let mut last_cycle = 0;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            bail!(
                "{}:{}: expected `cycle is_write addr`, got {} fields",
                path.display(),
                lineno + 1,
                fields.len()
            );
        }
        let parse = |field: &str, what: &str| -> Result<u64> {
            field
                .parse()
                .with_context(|| format!("{}:{}: bad {what}", path.display(), lineno + 1))
        };
        let entry = TraceEntry {
            cycle: parse(fields[0], "cycle")?,
            is_write: parse(fields[1], "is_write")? != 0,
            addr: parse(fields[2], "address")?,
        };
        if entry.cycle < last_cycle {
            bail!(
                "{}:{}: cycle {} goes backwards",
                path.display(),
                lineno + 1,
                entry.cycle
            );
        }
        last_cycle = entry.cycle;
        entries.push_back(entry);
    }
    Ok(entries)
}

/// Random workload aiming for a configured miss percentage: misses come from
/// a bump pointer walking fresh pages, hits from a random resident page.
pub struct SyntheticWorkload {
    rng: StdRng,
    remaining: u64,
    miss_rate: u64,
    page_size: u64,
    total_pages: u64,
    next_fresh_page: u64,
}

impl SyntheticWorkload {
    pub fn new(seed: u64, accesses: u64, miss_rate: u64, page_size: u64, total_pages: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            remaining: accesses,
            miss_rate: miss_rate.min(100),
            page_size,
            total_pages,
            next_fresh_page: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Produce the next access, or `None` once the budget is spent. Needs the
    /// controller to find resident pages for the hit fraction.
    pub fn next_access(&mut self, ctl: &CacheController) -> Option<(TransactionKind, u64)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let want_miss =
            ctl.resident_pages() == 0 || self.rng.gen_range(0..100) < self.miss_rate;
        let addr = if want_miss {
            let page = self.next_fresh_page;
            self.next_fresh_page = (self.next_fresh_page + 1) % self.total_pages;
            page * self.page_size
        } else {
            ctl.random_hit_address(&mut self.rng)
        };
        let kind = if self.rng.gen_bool(0.5) {
            TransactionKind::Write
        } else {
            TransactionKind::Read
        };
        Some((kind, addr))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::load_trace;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("hybridsim-trace-{name}-{}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_entries_and_comments() {
        let path = write_temp(
            "ok",
            "# header\n0 0 4096\n10 1 8192 # inline\n\n12 0 0\n",
        );
        let entries = load_trace(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].cycle, 0);
        assert!(!entries[0].is_write);
        assert_eq!(entries[1].addr, 8192);
        assert!(entries[1].is_write);
    }

    #[test]
    fn rejects_unsorted_cycles() {
        let path = write_temp("unsorted", "10 0 0\n5 0 0\n");
        let result = load_trace(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_short_lines() {
        let path = write_temp("short", "10 0\n");
        let result = load_trace(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
