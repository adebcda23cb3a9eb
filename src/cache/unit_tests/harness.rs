use crate::cache::controller::{CacheController, Completion};
use crate::cache::geometry::CacheGeometry;
use crate::cache::prefetch::Prefetcher;
use crate::cache::table::CacheTable;
use crate::mem::{DeviceId, DeviceModel, MemoryDevice};
use crate::sim::config::{CacheConfig, DeviceConfig};

/// 8 cache pages, 2-way: 4 sets of 1 KiB pages over a 64-page backing store.
pub fn small_cache() -> CacheConfig {
    CacheConfig {
        page_size: 1024,
        set_size: 2,
        cache_pages: 8,
        total_pages: 64,
        burst_size: 256,
        flash_burst_size: 1024,
        controller_delay: 2,
        prefetch_window: 0,
    }
}

pub fn fast_dram() -> DeviceConfig {
    DeviceConfig {
        read_latency: 2,
        write_latency: 2,
        bytes_per_cycle: 256,
        queue_capacity: 32,
        critical_latency: 0,
    }
}

pub fn slow_flash() -> DeviceConfig {
    DeviceConfig {
        read_latency: 20,
        write_latency: 40,
        bytes_per_cycle: 1024,
        queue_capacity: 64,
        critical_latency: 0,
    }
}

pub fn build(cache: &CacheConfig, dram: &DeviceConfig, flash: &DeviceConfig) -> CacheController {
    build_with_prefetcher(cache, dram, flash, Prefetcher::new(cache.prefetch_window))
}

pub fn build_with_prefetcher(
    cache: &CacheConfig,
    dram: &DeviceConfig,
    flash: &DeviceConfig,
    prefetcher: Prefetcher,
) -> CacheController {
    build_with_devices(
        cache,
        Box::new(DeviceModel::new(DeviceId::CacheMedium, dram)),
        Box::new(DeviceModel::new(DeviceId::BackingStore, flash)),
        prefetcher,
    )
}

pub fn build_with_devices(
    cache: &CacheConfig,
    dram: Box<dyn MemoryDevice>,
    flash: Box<dyn MemoryDevice>,
    prefetcher: Prefetcher,
) -> CacheController {
    let geo = CacheGeometry::new(cache).unwrap();
    CacheController::new(
        CacheTable::new(geo),
        cache.controller_delay,
        prefetcher,
        dram,
        flash,
    )
}

/// Backing-store address of byte 0 of the page holding `tag` in `set`.
pub fn page_addr(cache: &CacheConfig, tag: u64, set: u64) -> u64 {
    let num_sets = cache.cache_pages / cache.set_size;
    (tag * num_sets + set) * cache.page_size
}

pub fn run_until_quiescent(ctl: &mut CacheController, limit: u64) -> Vec<Completion> {
    let mut done = Vec::new();
    for _ in 0..limit {
        ctl.tick();
        done.append(&mut ctl.take_completions());
        if ctl.outstanding() == 0 {
            return done;
        }
    }
    panic!(
        "not quiescent after {limit} cycles: outstanding={} queue={}",
        ctl.outstanding(),
        ctl.queue_len()
    );
}
