use anyhow::{bail, Result};

use crate::sim::config::CacheConfig;

/// Address math shared by the controller, the cache table and the trace
/// driver. Backing-store addresses and cache-medium addresses are distinct
/// spaces; both are byte addresses with page-aligned allocation.
///
/// Derived values, never stored:
///   page_number = addr / page_size
///   set_index   = page_number % num_sets
///   tag         = page_number / num_sets
///   cache_line_address(offset, set) = (offset * num_sets + set) * page_size
#[derive(Debug, Clone, Copy)]
pub struct CacheGeometry {
    pub page_size: u64,
    /// Associativity: lines per set.
    pub set_size: u64,
    pub cache_pages: u64,
    pub total_pages: u64,
    /// Cache-medium sub-transaction granularity in bytes.
    pub burst_size: u64,
    /// Backing-store sub-transaction granularity in bytes.
    pub flash_burst_size: u64,
}

impl CacheGeometry {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let geo = Self {
            page_size: config.page_size,
            set_size: config.set_size,
            cache_pages: config.cache_pages,
            total_pages: config.total_pages,
            burst_size: config.burst_size,
            flash_burst_size: config.flash_burst_size,
        };
        geo.validate()?;
        Ok(geo)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.set_size == 0 || self.cache_pages == 0 {
            bail!("cache geometry fields must be nonzero");
        }
        if self.cache_pages % self.set_size != 0 {
            bail!(
                "cache_pages ({}) must be a multiple of set_size ({})",
                self.cache_pages,
                self.set_size
            );
        }
        if self.burst_size == 0 || self.page_size % self.burst_size != 0 {
            bail!(
                "page_size ({}) must be a multiple of burst_size ({})",
                self.page_size,
                self.burst_size
            );
        }
        if self.flash_burst_size == 0 || self.page_size % self.flash_burst_size != 0 {
            bail!(
                "page_size ({}) must be a multiple of flash_burst_size ({})",
                self.page_size,
                self.flash_burst_size
            );
        }
        if self.total_pages < self.cache_pages {
            bail!(
                "total_pages ({}) must not be smaller than cache_pages ({})",
                self.total_pages,
                self.cache_pages
            );
        }
        Ok(())
    }

    pub fn num_sets(&self) -> u64 {
        self.cache_pages / self.set_size
    }

    pub fn page_number(&self, addr: u64) -> u64 {
        addr / self.page_size
    }

    pub fn page_address(&self, addr: u64) -> u64 {
        (addr / self.page_size) * self.page_size
    }

    pub fn page_offset(&self, addr: u64) -> u64 {
        addr % self.page_size
    }

    pub fn set_index(&self, addr: u64) -> u64 {
        self.page_number(addr) % self.num_sets()
    }

    pub fn tag(&self, addr: u64) -> u64 {
        self.page_number(addr) / self.num_sets()
    }

    /// Truncate a client address to the cache-medium burst granularity.
    pub fn align(&self, addr: u64) -> u64 {
        (addr / self.burst_size) * self.burst_size
    }

    /// Cache-medium address of the line at `offset_in_set` within `set_index`.
    pub fn cache_line_address(&self, offset_in_set: u64, set_index: u64) -> u64 {
        (offset_in_set * self.num_sets() + set_index) * self.page_size
    }

    /// Reconstruct the backing-store page address of the line holding `tag`
    /// in `set_index`.
    pub fn backing_address(&self, tag: u64, set_index: u64) -> u64 {
        (tag * self.num_sets() + set_index) * self.page_size
    }

    pub fn in_bounds(&self, addr: u64) -> bool {
        addr < self.total_pages * self.page_size
    }

    /// Burst-aligned sub-transaction addresses covering the page at `base`.
    pub fn page_bursts(&self, base: u64, burst: u64) -> impl Iterator<Item = u64> {
        let count = self.page_size / burst;
        (0..count).map(move |i| base + i * burst)
    }
}

#[cfg(test)]
mod tests {
    use super::CacheGeometry;
    use crate::sim::config::CacheConfig;

    fn geometry() -> CacheGeometry {
        // 16 cache pages, 2-way: 8 sets of 1 KiB pages.
        let config = CacheConfig {
            page_size: 1024,
            set_size: 2,
            cache_pages: 16,
            total_pages: 64,
            burst_size: 64,
            flash_burst_size: 256,
            controller_delay: 2,
            prefetch_window: 0,
        };
        CacheGeometry::new(&config).unwrap()
    }

    #[test]
    fn set_and_tag_decomposition() {
        let geo = geometry();
        assert_eq!(geo.num_sets(), 8);
        let addr = 17 * 1024 + 72;
        assert_eq!(geo.page_number(addr), 17);
        assert_eq!(geo.set_index(addr), 1);
        assert_eq!(geo.tag(addr), 2);
        assert_eq!(geo.page_offset(addr), 72);
    }

    #[test]
    fn line_address_round_trips_through_set_index() {
        let geo = geometry();
        for set in 0..geo.num_sets() {
            for offset in 0..geo.set_size {
                let line = geo.cache_line_address(offset, set);
                assert_eq!(geo.set_index(line), set);
                assert_eq!(geo.page_offset(line), 0);
            }
        }
    }

    #[test]
    fn backing_address_inverts_tag() {
        let geo = geometry();
        let addr = 37 * 1024;
        let rebuilt = geo.backing_address(geo.tag(addr), geo.set_index(addr));
        assert_eq!(rebuilt, addr);
    }

    #[test]
    fn align_truncates_to_burst() {
        let geo = geometry();
        assert_eq!(geo.align(130), 128);
        assert_eq!(geo.align(64), 64);
        assert_eq!(geo.align(63), 0);
    }

    #[test]
    fn bounds_check() {
        let geo = geometry();
        assert!(geo.in_bounds(64 * 1024 - 1));
        assert!(!geo.in_bounds(64 * 1024));
    }

    #[test]
    fn page_bursts_cover_the_page() {
        let geo = geometry();
        let bursts: Vec<u64> = geo.page_bursts(2048, 256).collect();
        assert_eq!(bursts, vec![2048, 2304, 2560, 2816]);
    }

    #[test]
    fn rejects_unaligned_geometry() {
        let config = CacheConfig {
            page_size: 1000,
            set_size: 2,
            cache_pages: 16,
            total_pages: 64,
            burst_size: 64,
            flash_burst_size: 1000,
            controller_delay: 2,
            prefetch_window: 0,
        };
        assert!(CacheGeometry::new(&config).is_err());
    }
}
