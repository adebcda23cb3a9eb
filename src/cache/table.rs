use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

use crate::cache::geometry::CacheGeometry;
use crate::mem::Cycle;

/// Per-line metadata, keyed externally by the line's cache-medium base
/// address. Materialized lazily on first touch and never destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLine {
    pub valid: bool,
    pub dirty: bool,
    /// Which backing-store page currently occupies this line.
    pub tag: u64,
    /// Excluded from victim selection and from new hits while an in-flight
    /// operation targets this line.
    pub locked: bool,
    /// Data word carried through save/restore; the simulator does not model
    /// contents beyond it.
    pub data: u64,
    /// Last-touch cycle, used for LRU.
    pub ts: Cycle,
}

#[derive(Debug, Clone, Copy)]
pub struct Lookup {
    pub set_index: u64,
    pub tag: u64,
    /// Cache-medium address of the hit line, if any.
    pub hit: Option<u64>,
}

/// Sparse per-line metadata table plus the set-scan operations on it.
pub struct CacheTable {
    geo: CacheGeometry,
    lines: HashMap<u64, CacheLine>,
}

impl CacheTable {
    pub fn new(geo: CacheGeometry) -> Self {
        Self {
            geo,
            lines: HashMap::new(),
        }
    }

    pub fn line(&mut self, cache_addr: u64) -> &mut CacheLine {
        self.lines.entry(cache_addr).or_default()
    }

    pub fn peek(&self, cache_addr: u64) -> Option<&CacheLine> {
        self.lines.get(&cache_addr)
    }

    /// Scan the candidate lines of the set holding `backing_addr` in fixed
    /// offset order. The first valid line with a matching tag is the hit.
    pub fn lookup(&mut self, backing_addr: u64) -> Lookup {
        let set_index = self.geo.set_index(backing_addr);
        let tag = self.geo.tag(backing_addr);
        let mut hit = None;
        for offset in 0..self.geo.set_size {
            let cache_addr = self.geo.cache_line_address(offset, set_index);
            let line = self.lines.entry(cache_addr).or_default();
            if line.valid && line.tag == tag {
                hit = Some(cache_addr);
                break;
            }
        }
        Lookup {
            set_index,
            tag,
            hit,
        }
    }

    /// LRU victim for a miss in `set_index`: the unlocked line with the
    /// smallest timestamp, ties broken by scan order. Returns None only if
    /// every line in the set is locked, which admission must have prevented.
    pub fn select_victim(&mut self, set_index: u64) -> Option<u64> {
        let mut victim: Option<(u64, Cycle)> = None;
        for offset in 0..self.geo.set_size {
            let cache_addr = self.geo.cache_line_address(offset, set_index);
            let line = self.lines.entry(cache_addr).or_default();
            if line.locked {
                continue;
            }
            match victim {
                Some((_, min_ts)) if line.ts >= min_ts => {}
                _ => victim = Some((cache_addr, line.ts)),
            }
        }
        victim.map(|(cache_addr, _)| cache_addr)
    }

    /// Hit check without mutating the table; used by diagnostics and the
    /// synthetic workload generator.
    pub fn is_hit(&self, backing_addr: u64) -> bool {
        let set_index = self.geo.set_index(backing_addr);
        let tag = self.geo.tag(backing_addr);
        (0..self.geo.set_size).any(|offset| {
            let cache_addr = self.geo.cache_line_address(offset, set_index);
            self.lines
                .get(&cache_addr)
                .map(|line| line.valid && line.tag == tag)
                .unwrap_or(false)
        })
    }

    /// Cache-medium addresses of every valid line, in address order.
    pub fn valid_lines(&self) -> Vec<u64> {
        let mut addrs: Vec<u64> = self
            .lines
            .iter()
            .filter(|(_, line)| line.valid)
            .map(|(addr, _)| *addr)
            .collect();
        addrs.sort_unstable();
        addrs
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geo
    }

    /// Write the table as a line-oriented text file: a parameter header, then
    /// one line per valid cache line.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {} {}\n",
            self.geo.page_size, self.geo.set_size, self.geo.cache_pages, self.geo.total_pages
        ));
        for cache_addr in self.valid_lines() {
            let line = self.lines[&cache_addr];
            out.push_str(&format!(
                "{} {} {} {} {} {}\n",
                cache_addr,
                line.valid as u8,
                line.dirty as u8,
                line.tag,
                line.data,
                line.ts
            ));
        }

        let mut file = fs::File::create(path)
            .with_context(|| format!("cannot create cache table file {}", path.display()))?;
        file.write_all(out.as_bytes())
            .with_context(|| format!("cannot write cache table file {}", path.display()))?;
        info!("saved {} cache lines to {}", self.lines.len(), path.display());
        Ok(())
    }

    /// Rebuild a table from a save file. The header parameters must match the
    /// live geometry exactly; a mismatch aborts the run.
    pub fn restore(path: &Path, geo: CacheGeometry) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read cache table file {}", path.display()))?;
        let mut lines = text.lines();

        let header = lines
            .next()
            .context("cache table file is empty, expected parameter header")?;
        let params: Vec<u64> = header
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .with_context(|| format!("malformed cache table header: '{header}'"))?;
        if params.len() != 4 {
            bail!("cache table header must hold 4 parameters, got {}", params.len());
        }
        let expected = [geo.page_size, geo.set_size, geo.cache_pages, geo.total_pages];
        if params != expected {
            bail!(
                "cache table parameters {:?} do not match the configured geometry {:?}",
                params,
                expected
            );
        }

        let mut table = Self::new(geo);
        for (number, entry) in lines.enumerate() {
            if entry.trim().is_empty() {
                continue;
            }
            let fields: Vec<u64> = entry
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .with_context(|| format!("malformed cache table entry on line {}", number + 2))?;
            if fields.len() != 6 {
                bail!(
                    "cache table entry on line {} must hold 6 fields, got {}",
                    number + 2,
                    fields.len()
                );
            }
            let line = CacheLine {
                valid: fields[1] != 0,
                dirty: fields[2] != 0,
                tag: fields[3],
                locked: false,
                data: fields[4],
                ts: fields[5],
            };
            let _ = table.lines.insert(fields[0], line);
        }
        info!(
            "restored {} cache lines from {}",
            table.lines.len(),
            path.display()
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheLine, CacheTable};
    use crate::cache::geometry::CacheGeometry;
    use crate::sim::config::CacheConfig;

    fn small_geometry() -> CacheGeometry {
        let config = CacheConfig {
            page_size: 1024,
            set_size: 2,
            cache_pages: 8,
            total_pages: 32,
            burst_size: 64,
            flash_burst_size: 1024,
            controller_delay: 0,
            prefetch_window: 0,
        };
        CacheGeometry::new(&config).unwrap()
    }

    fn filled_table() -> CacheTable {
        let geo = small_geometry();
        let mut table = CacheTable::new(geo);
        // Fill set 0 (lines at 0 and 4096) with tags 0 and 1.
        for (offset, tag, ts) in [(0, 0, 5), (1, 1, 3)] {
            let addr = geo.cache_line_address(offset, 0);
            *table.line(addr) = CacheLine {
                valid: true,
                dirty: offset == 1,
                tag,
                locked: false,
                data: 0,
                ts,
            };
        }
        table
    }

    #[test]
    fn lookup_hits_matching_tag() {
        let mut table = filled_table();
        let geo = *table.geometry();
        // Page number 4 maps to set 0 with tag 1.
        let backing = 4 * geo.page_size;
        let lookup = table.lookup(backing);
        assert_eq!(lookup.set_index, 0);
        assert_eq!(lookup.tag, 1);
        assert_eq!(lookup.hit, Some(geo.cache_line_address(1, 0)));
    }

    #[test]
    fn lookup_misses_unknown_tag() {
        let mut table = filled_table();
        let geo = *table.geometry();
        let backing = 8 * geo.page_size; // set 0, tag 2
        assert!(table.lookup(backing).hit.is_none());
    }

    #[test]
    fn victim_is_min_timestamp() {
        let mut table = filled_table();
        let geo = *table.geometry();
        // ts=3 at offset 1 loses to ts=5 at offset 0.
        assert_eq!(table.select_victim(0), Some(geo.cache_line_address(1, 0)));
    }

    #[test]
    fn victim_never_locked() {
        let mut table = filled_table();
        let geo = *table.geometry();
        table.line(geo.cache_line_address(1, 0)).locked = true;
        assert_eq!(table.select_victim(0), Some(geo.cache_line_address(0, 0)));
        table.line(geo.cache_line_address(0, 0)).locked = true;
        assert_eq!(table.select_victim(0), None);
    }

    #[test]
    fn victim_tie_breaks_on_scan_order() {
        let geo = small_geometry();
        let mut table = CacheTable::new(geo);
        for offset in 0..2 {
            let addr = geo.cache_line_address(offset, 1);
            *table.line(addr) = CacheLine {
                valid: true,
                ts: 7,
                ..CacheLine::default()
            };
        }
        assert_eq!(table.select_victim(1), Some(geo.cache_line_address(0, 1)));
    }

    #[test]
    fn save_restore_round_trip() {
        let table = filled_table();
        let geo = *table.geometry();
        let dir = std::env::temp_dir().join(format!("hybridsim_table_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache_table.txt");

        table.save(&path).unwrap();
        let restored = CacheTable::restore(&path, geo).unwrap();

        assert_eq!(table.valid_lines(), restored.valid_lines());
        for addr in table.valid_lines() {
            let a = table.peek(addr).unwrap();
            let b = restored.peek(addr).unwrap();
            assert_eq!(a, b, "line {addr} differs after round trip");
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn restore_rejects_mismatched_geometry() {
        let table = filled_table();
        let dir = std::env::temp_dir().join(format!("hybridsim_mismatch_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache_table.txt");
        table.save(&path).unwrap();

        let other = CacheGeometry::new(&CacheConfig {
            page_size: 2048,
            set_size: 2,
            cache_pages: 8,
            total_pages: 32,
            burst_size: 64,
            flash_burst_size: 2048,
            controller_delay: 0,
            prefetch_window: 0,
        })
        .unwrap();
        assert!(CacheTable::restore(&path, other).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
