use serde::Serialize;

/// Run counters and high-water marks, owned by the controller and serialized
/// to JSON at the end of a run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Metrics {
    pub submitted_reads: u64,
    pub submitted_writes: u64,
    pub injected_prefetches: u64,
    pub injected_flushes: u64,

    pub hits: u64,
    pub misses: u64,
    pub dirty_evictions: u64,
    pub prefetch_hits: u64,
    pub flush_hits: u64,

    pub completed_reads: u64,
    pub completed_writes: u64,
    pub critical_word_deliveries: u64,

    /// Admission scans that skipped at least one transaction behind a lock.
    pub admission_skips: u64,

    pub max_trans_queue: u64,
    pub max_pending_pages: u64,
    pub max_dram_pending: u64,
    pub max_flash_pending: u64,
}

impl Metrics {
    pub fn watermark(&mut self, trans_queue: usize, pages: usize, dram: usize, flash: usize) {
        self.max_trans_queue = self.max_trans_queue.max(trans_queue as u64);
        self.max_pending_pages = self.max_pending_pages.max(pages as u64);
        self.max_dram_pending = self.max_dram_pending.max(dram as u64);
        self.max_flash_pending = self.max_flash_pending.max(flash as u64);
    }
}
