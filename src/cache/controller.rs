use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;
use log::{debug, error};
use rand::Rng;

use crate::cache::contention::ContentionTracker;
use crate::cache::geometry::CacheGeometry;
use crate::cache::metrics::Metrics;
use crate::cache::pending::{Pending, PendingOp, PendingTable, VictimInfo, WaitSet};
use crate::cache::prefetch::Prefetcher;
use crate::cache::table::{CacheLine, CacheTable};
use crate::mem::{
    Cycle, DeviceEvent, DeviceEventKind, DeviceId, DeviceRequest, MemoryDevice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
    /// Warm a page into the cache without notifying any caller.
    Prefetch,
    /// Administrative eviction hint: force the page to be the next LRU
    /// victim of its set.
    Flush,
}

/// A client-visible request in the backing-store address space.
#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub addr: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Read,
    Write,
}

/// Caller-visible completion, reported with the original client address.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub kind: CompletionKind,
    pub addr: u64,
    pub cycle: Cycle,
}

/// The cache controller: admission with page-level contention locking,
/// set-associative lookup, LRU victim selection, the staged miss pipeline
/// across the two backing devices, and prefetch injection.
///
/// Single-threaded and cycle-stepped; device completions arrive as events
/// drained once per [`tick`](Self::tick).
pub struct CacheController {
    geo: CacheGeometry,
    controller_delay: u64,
    cycle: Cycle,

    table: CacheTable,
    contention: ContentionTracker,
    dram_pending: PendingTable,
    flash_pending: PendingTable,

    /// Entry queue; FIFO among transactions whose pages are free.
    trans_queue: VecDeque<Transaction>,
    /// Sub-transactions waiting for the cache medium, drained one per cycle.
    dram_queue: VecDeque<DeviceRequest>,
    /// Sub-transactions waiting for the backing store, drained one per cycle.
    flash_queue: VecDeque<DeviceRequest>,

    /// Transaction held for the SRAM tag-lookup delay.
    active: Option<Transaction>,
    delay_counter: u64,
    /// Cleared when a scan found nothing admissible; set again by a submit
    /// or a lock release.
    check_queue: bool,

    dram: Box<dyn MemoryDevice>,
    flash: Box<dyn MemoryDevice>,
    prefetcher: Prefetcher,

    completions: Vec<Completion>,
    /// Admitted-but-unreleased transactions; 0 means quiescent.
    outstanding: u64,
    metrics: Metrics,
    events: Vec<DeviceEvent>,
}

impl CacheController {
    pub fn new(
        table: CacheTable,
        controller_delay: u64,
        prefetcher: Prefetcher,
        dram: Box<dyn MemoryDevice>,
        flash: Box<dyn MemoryDevice>,
    ) -> Self {
        let geo = *table.geometry();
        Self {
            geo,
            controller_delay,
            cycle: 0,
            table,
            contention: ContentionTracker::new(),
            dram_pending: PendingTable::new("cache-medium"),
            flash_pending: PendingTable::new("backing-store"),
            trans_queue: VecDeque::new(),
            dram_queue: VecDeque::new(),
            flash_queue: VecDeque::new(),
            active: None,
            delay_counter: 0,
            check_queue: true,
            dram,
            flash,
            prefetcher,
            completions: Vec::new(),
            outstanding: 0,
            metrics: Metrics::default(),
            events: Vec::new(),
        }
    }

    /// Append a client transaction to the entry queue. Queueing is unbounded,
    /// so this always accepts.
    pub fn submit(&mut self, kind: TransactionKind, addr: u64) -> bool {
        match kind {
            TransactionKind::Read => self.metrics.submitted_reads += 1,
            TransactionKind::Write => self.metrics.submitted_writes += 1,
            TransactionKind::Prefetch => self.metrics.injected_prefetches += 1,
            TransactionKind::Flush => self.metrics.injected_flushes += 1,
        }
        self.trans_queue.push_back(Transaction { kind, addr });
        self.outstanding += 1;
        self.check_queue = true;
        true
    }

    /// Advance the whole system by one cycle: retire the transaction whose
    /// lookup delay expired, admit at most one new transaction, hand at most
    /// one sub-transaction to each device, step both devices, and run their
    /// completion events through the state machine.
    pub fn tick(&mut self) {
        self.metrics.watermark(
            self.trans_queue.len(),
            self.contention.locked_pages(),
            self.dram_pending.len(),
            self.flash_pending.len(),
        );

        if self.delay_counter == 0 {
            if let Some(trans) = self.active.take() {
                self.process_transaction(trans);
            }
        }

        if self.check_queue && self.delay_counter == 0 && self.active.is_none() {
            self.admit_one();
        }

        if let Some(&request) = self.dram_queue.front() {
            if self.dram.try_enqueue(request) {
                let _ = self.dram_queue.pop_front();
            }
        }
        if let Some(&request) = self.flash_queue.front() {
            if self.flash.try_enqueue(request) {
                let _ = self.flash_queue.pop_front();
            }
        }

        if self.delay_counter > 0 {
            self.delay_counter -= 1;
        }

        let mut events = std::mem::take(&mut self.events);
        events.clear();
        self.dram.tick(&mut events);
        self.flash.tick(&mut events);
        for event in events.drain(..) {
            self.handle_event(event);
        }
        self.events = events;

        self.cycle += 1;
    }

    // ------------------------------------------------------------------
    // Admission

    /// Scan the entry queue front to back and admit the first transaction
    /// whose page is free. Transactions behind a locked page keep their
    /// position.
    fn admit_one(&mut self) {
        let mut admitted = false;
        let mut idx = 0;
        while idx < self.trans_queue.len() {
            let trans = self.trans_queue[idx];
            let aligned = self.geo.align(trans.addr);
            let page_addr = self.geo.page_address(aligned);
            if self.admissible(page_addr, trans.kind) {
                let trans = self
                    .trans_queue
                    .remove(idx)
                    .expect("index checked by the scan loop");
                self.contention.lock_page(page_addr);
                self.active = Some(trans);
                self.delay_counter = self.controller_delay;
                admitted = true;
                break;
            }
            self.metrics.admission_skips += 1;
            idx += 1;
        }

        // Nothing to do: stop scanning until a submit or an unlock re-arms
        // the queue. Never park while a delay countdown is running, or a
        // transaction arriving meanwhile could be stranded.
        if !admitted && self.delay_counter == 0 {
            self.check_queue = false;
        }
    }

    fn admissible(&mut self, page_addr: u64, kind: TransactionKind) -> bool {
        if self.contention.is_page_locked(page_addr) {
            return false;
        }
        let lookup = self.table.lookup(page_addr);
        match lookup.hit {
            Some(cache_addr) => {
                let locked = self
                    .table
                    .peek(cache_addr)
                    .map_or(false, |line| line.locked);
                !locked
            }
            None => {
                // A miss needs an unlocked victim; a flush miss is a no-op
                // and needs none.
                kind == TransactionKind::Flush
                    || self.contention.locked_in_set(lookup.set_index) < self.geo.set_size
            }
        }
    }

    // ------------------------------------------------------------------
    // Transaction processing

    fn process_transaction(&mut self, trans: Transaction) {
        let aligned = self.geo.align(trans.addr);
        if !self.geo.in_bounds(aligned) {
            panic!(
                "address out of range: orig={:#x} aligned={:#x} total_pages={}",
                trans.addr, aligned, self.geo.total_pages
            );
        }
        let page_addr = self.geo.page_address(aligned);
        debug!(
            "{}: starting {:?} for address {:#x}",
            self.cycle, trans.kind, aligned
        );

        if matches!(trans.kind, TransactionKind::Read | TransactionKind::Write) {
            let set_index = self.geo.set_index(aligned);
            if let Some(trigger) = self.prefetcher.record_access(set_index) {
                // Both go to the front; the flush is pushed last so it runs
                // first.
                self.inject_front(TransactionKind::Prefetch, trigger.new_addr);
                self.inject_front(TransactionKind::Flush, trigger.flush_addr);
            }
        }

        let lookup = self.table.lookup(aligned);
        match lookup.hit {
            Some(cache_addr) => self.process_hit(trans, aligned, page_addr, cache_addr),
            None => self.process_miss(trans, aligned, page_addr, lookup.set_index),
        }
    }

    fn process_hit(&mut self, trans: Transaction, aligned: u64, page_addr: u64, cache_addr: u64) {
        debug!(
            "{}: HIT {:#x} -> line {:#x}",
            self.cycle, aligned, cache_addr
        );
        self.metrics.hits += 1;
        match trans.kind {
            TransactionKind::Read => {
                self.lock_line(cache_addr);
                self.cache_read(trans.addr, aligned, cache_addr);
            }
            TransactionKind::Write => {
                self.lock_line(cache_addr);
                self.cache_write(trans.addr, aligned, cache_addr);
            }
            TransactionKind::Flush => {
                self.metrics.flush_hits += 1;
                // Make this line the next LRU victim of its set; no device
                // traffic.
                self.table.line(cache_addr).ts = 0;
                self.release_locks(page_addr, None, None);
            }
            TransactionKind::Prefetch => {
                // Already resident: silent no-op that leaves dirty and ts
                // untouched.
                self.metrics.prefetch_hits += 1;
                self.release_locks(page_addr, None, None);
            }
        }
    }

    fn process_miss(&mut self, trans: Transaction, aligned: u64, page_addr: u64, set_index: u64) {
        if trans.kind == TransactionKind::Flush {
            // Flushing a non-resident page is tolerated; nothing to evict.
            self.release_locks(page_addr, None, None);
            return;
        }
        self.metrics.misses += 1;

        let victim_addr = self.table.select_victim(set_index).unwrap_or_else(|| {
            self.dram_pending.dump();
            self.flash_pending.dump();
            panic!(
                "no unlocked victim in set {set_index} for {aligned:#x}; \
                 admission granted a miss to a fully locked set"
            );
        });
        let victim_line = *self.table.line(victim_addr);
        debug!(
            "{}: MISS {:#x}, victim line {:#x} (valid={} dirty={} ts={})",
            self.cycle, aligned, victim_addr, victim_line.valid, victim_line.dirty, victim_line.ts
        );

        self.lock_line(victim_addr);
        let victim = victim_line.valid.then_some(VictimInfo {
            tag: victim_line.tag,
            dirty: victim_line.dirty,
        });
        if victim.is_some() {
            // Nested lock on the evicted page's own backing address, held
            // until the primary page releases.
            let victim_page = self.geo.backing_address(victim_line.tag, set_index);
            self.contention.lock_page(victim_page);
        }

        // The line fetch starts immediately to minimize the waiting client's
        // latency; the victim read only runs for dirty data.
        self.line_read(trans, aligned, victim_addr, victim);
        if victim_line.valid && victim_line.dirty {
            self.metrics.dirty_evictions += 1;
            self.victim_read(trans, aligned, victim_addr, victim);
        }

        if matches!(trans.kind, TransactionKind::Read | TransactionKind::Write) {
            for page in self.prefetcher.sequential_window(
                page_addr,
                self.geo.page_size,
                self.geo.total_pages,
            ) {
                self.inject_front(TransactionKind::Prefetch, page);
            }
        }
    }

    // ------------------------------------------------------------------
    // Miss pipeline stages

    /// Fetch the missed page from the backing store, fragmented into flash
    /// bursts. The burst holding the requested word asks the device for
    /// critical-word reporting.
    fn line_read(
        &mut self,
        trans: Transaction,
        backing_addr: u64,
        cache_addr: u64,
        victim: Option<VictimInfo>,
    ) {
        let page_addr = self.geo.page_address(backing_addr);
        debug!(
            "{}: LineRead for ({:#x}, {:#x})",
            self.cycle, backing_addr, cache_addr
        );
        self.contention.increment(page_addr);

        let critical_addr = match trans.kind {
            TransactionKind::Read | TransactionKind::Write => {
                let offset = self.geo.page_offset(backing_addr);
                Some(page_addr + (offset / self.geo.flash_burst_size) * self.geo.flash_burst_size)
            }
            _ => None,
        };

        let bursts = self.geo.page_bursts(page_addr, self.geo.flash_burst_size);
        let wait = WaitSet::from_bursts(bursts);
        for addr in self.geo.page_bursts(page_addr, self.geo.flash_burst_size) {
            let mut request = DeviceRequest::read(addr, self.geo.flash_burst_size);
            if critical_addr == Some(addr) {
                request = request.with_critical_word();
            }
            self.flash_queue.push_back(request);
        }

        self.flash_pending.insert(
            page_addr,
            Pending {
                orig_addr: trans.addr,
                backing_addr,
                cache_addr,
                kind: trans.kind,
                victim,
                callback_sent: false,
                op: PendingOp::LineRead {
                    wait,
                    critical_addr,
                },
            },
        );
    }

    fn line_read_finish(&mut self, pending: Pending) {
        let page_addr = self.geo.page_address(pending.backing_addr);
        debug!(
            "{}: LineRead finished for ({:#x}, {:#x})",
            self.cycle, pending.backing_addr, pending.cache_addr
        );

        let tag = self.geo.tag(pending.backing_addr);
        let now = self.cycle;
        {
            let line = self.table.line(pending.cache_addr);
            line.tag = tag;
            line.dirty = false;
            line.valid = true;
            line.ts = now;
        }

        self.contention.decrement(page_addr);
        self.line_write(&pending);

        match pending.kind {
            TransactionKind::Read => self.cache_read_finish(pending),
            TransactionKind::Write => self.cache_write_finish(pending),
            // No caller to notify; just release once siblings are done.
            TransactionKind::Prefetch => self.release_if_idle(&pending),
            TransactionKind::Flush => {
                panic!("flush transaction entered the line-read pipeline")
            }
        }
    }

    /// Store the fetched page into the cache medium. Fire and forget: the
    /// controller does not track these writes.
    fn line_write(&mut self, pending: &Pending) {
        debug!(
            "{}: LineWrite for ({:#x}, {:#x})",
            self.cycle, pending.backing_addr, pending.cache_addr
        );
        for addr in self
            .geo
            .page_bursts(pending.cache_addr, self.geo.burst_size)
        {
            self.dram_queue
                .push_back(DeviceRequest::write(addr, self.geo.burst_size));
        }
    }

    /// Read the dirty victim line out of the cache medium, fragmented into
    /// cache-medium bursts.
    fn victim_read(
        &mut self,
        trans: Transaction,
        backing_addr: u64,
        cache_addr: u64,
        victim: Option<VictimInfo>,
    ) {
        let page_addr = self.geo.page_address(backing_addr);
        debug!(
            "{}: VictimRead for ({:#x}, {:#x})",
            self.cycle, backing_addr, cache_addr
        );
        self.contention.increment(page_addr);

        let wait = WaitSet::from_bursts(self.geo.page_bursts(cache_addr, self.geo.burst_size));
        for addr in self.geo.page_bursts(cache_addr, self.geo.burst_size) {
            self.dram_queue
                .push_back(DeviceRequest::read(addr, self.geo.burst_size));
        }

        self.dram_pending.insert(
            cache_addr,
            Pending {
                orig_addr: trans.addr,
                backing_addr,
                cache_addr,
                kind: trans.kind,
                victim,
                callback_sent: false,
                op: PendingOp::VictimRead { wait },
            },
        );
    }

    fn victim_read_finish(&mut self, pending: Pending) {
        let page_addr = self.geo.page_address(pending.backing_addr);
        debug!(
            "{}: VictimRead finished for ({:#x}, {:#x})",
            self.cycle, pending.backing_addr, pending.cache_addr
        );
        self.contention.decrement(page_addr);
        self.release_if_idle(&pending);
        self.victim_write(&pending);
    }

    /// Write the evicted line back to its backing-store page. Fire and
    /// forget, like LineWrite.
    fn victim_write(&mut self, pending: &Pending) {
        let victim = pending
            .victim
            .expect("victim write scheduled without victim info");
        let set_index = self.geo.set_index(pending.backing_addr);
        let victim_page = self.geo.backing_address(victim.tag, set_index);
        debug!(
            "{}: VictimWrite of line {:#x} to page {:#x}",
            self.cycle, pending.cache_addr, victim_page
        );
        for addr in self
            .geo
            .page_bursts(victim_page, self.geo.flash_burst_size)
        {
            self.flash_queue
                .push_back(DeviceRequest::write(addr, self.geo.flash_burst_size));
        }
    }

    /// Hit path: read the exact requested word from the cache medium and
    /// complete when the device answers.
    fn cache_read(&mut self, orig_addr: u64, backing_addr: u64, cache_addr: u64) {
        let data_addr = cache_addr + self.geo.page_offset(backing_addr);
        debug_assert_eq!(self.geo.page_address(data_addr), cache_addr);
        debug!(
            "{}: CacheRead for ({:#x}, {:#x})",
            self.cycle, backing_addr, cache_addr
        );

        self.dram_queue
            .push_back(DeviceRequest::read(data_addr, self.geo.burst_size));
        let now = self.cycle;
        self.table.line(cache_addr).ts = now;

        self.dram_pending.insert(
            cache_addr,
            Pending {
                orig_addr,
                backing_addr,
                cache_addr,
                kind: TransactionKind::Read,
                victim: None,
                callback_sent: false,
                op: PendingOp::CacheRead,
            },
        );
    }

    fn cache_read_finish(&mut self, pending: Pending) {
        debug!(
            "{}: CacheRead finished for ({:#x}, {:#x})",
            self.cycle, pending.backing_addr, pending.cache_addr
        );
        if !pending.callback_sent {
            self.complete(CompletionKind::Read, pending.orig_addr);
        }
        self.release_if_idle(&pending);
    }

    /// Hit path: write the exact requested word to the cache medium. The
    /// transaction completes immediately; only the device transfer lingers.
    fn cache_write(&mut self, orig_addr: u64, backing_addr: u64, cache_addr: u64) {
        let data_addr = cache_addr + self.geo.page_offset(backing_addr);
        debug!(
            "{}: CacheWrite for ({:#x}, {:#x})",
            self.cycle, backing_addr, cache_addr
        );
        self.dram_queue
            .push_back(DeviceRequest::write(data_addr, self.geo.burst_size));

        self.cache_write_finish(Pending {
            orig_addr,
            backing_addr,
            cache_addr,
            kind: TransactionKind::Write,
            victim: None,
            callback_sent: false,
            op: PendingOp::CacheWrite,
        });
    }

    fn cache_write_finish(&mut self, pending: Pending) {
        let now = self.cycle;
        {
            let line = self.table.line(pending.cache_addr);
            line.dirty = true;
            line.valid = true;
            line.ts = now;
        }
        if !pending.callback_sent {
            self.complete(CompletionKind::Write, pending.orig_addr);
        }
        self.release_if_idle(&pending);
    }

    // ------------------------------------------------------------------
    // Locking helpers

    fn lock_line(&mut self, cache_addr: u64) {
        let set_index = self.geo.set_index(cache_addr);
        let line = self.table.line(cache_addr);
        assert!(!line.locked, "line {cache_addr:#x} locked twice");
        line.locked = true;
        self.contention.lock_line(set_index);
    }

    /// Release the page, line and victim-page locks of a finished pipeline,
    /// but only once every sibling sub-operation has drained.
    fn release_if_idle(&mut self, pending: &Pending) {
        let page_addr = self.geo.page_address(pending.backing_addr);
        if self.contention.use_count(page_addr) != 0 {
            return;
        }
        let victim_page = pending.victim.map(|victim| {
            self.geo
                .backing_address(victim.tag, self.geo.set_index(pending.backing_addr))
        });
        self.release_locks(page_addr, Some(pending.cache_addr), victim_page);
    }

    fn release_locks(&mut self, page_addr: u64, line: Option<u64>, victim_page: Option<u64>) {
        self.contention.release_page(page_addr);
        if let Some(cache_addr) = line {
            let set_index = self.geo.set_index(cache_addr);
            let line = self.table.line(cache_addr);
            assert!(line.locked, "released line {cache_addr:#x} was not locked");
            line.locked = false;
            self.contention.unlock_line(set_index);
        }
        if let Some(victim_page) = victim_page {
            self.contention.release_page(victim_page);
        }
        self.check_queue = true;
        self.outstanding -= 1;
    }

    fn inject_front(&mut self, kind: TransactionKind, addr: u64) {
        match kind {
            TransactionKind::Prefetch => self.metrics.injected_prefetches += 1,
            TransactionKind::Flush => self.metrics.injected_flushes += 1,
            _ => {}
        }
        self.trans_queue.push_front(Transaction { kind, addr });
        self.outstanding += 1;
        self.check_queue = true;
    }

    fn complete(&mut self, kind: CompletionKind, orig_addr: u64) {
        match kind {
            CompletionKind::Read => self.metrics.completed_reads += 1,
            CompletionKind::Write => self.metrics.completed_writes += 1,
        }
        self.completions.push(Completion {
            kind,
            addr: orig_addr,
            cycle: self.cycle,
        });
    }

    // ------------------------------------------------------------------
    // Device completion events

    fn handle_event(&mut self, event: DeviceEvent) {
        match (event.device, event.kind) {
            (DeviceId::CacheMedium, DeviceEventKind::ReadDone) => self.dram_read_done(event.addr),
            (DeviceId::BackingStore, DeviceEventKind::ReadDone) => self.flash_read_done(event.addr),
            (DeviceId::BackingStore, DeviceEventKind::CriticalWord) => {
                self.flash_critical_word(event.addr)
            }
            // Write completions need no action: LineWrite, VictimWrite and
            // CacheWrite are fire-and-forget as long as they happen.
            (_, DeviceEventKind::WriteDone) => {}
            (DeviceId::CacheMedium, DeviceEventKind::CriticalWord) => {
                error!("cache medium raised a critical-word event for {:#x}", event.addr);
                panic!("critical-word event from the cache medium");
            }
        }
    }

    fn dram_read_done(&mut self, addr: u64) {
        let base = self.geo.page_address(addr);
        let Some(mut pending) = self.dram_pending.remove(base) else {
            self.dram_pending.dump();
            panic!("cache-medium read completion for {addr:#x} has no pending record");
        };

        let ready = match &mut pending.op {
            PendingOp::VictimRead { wait } => {
                if !wait.remove(addr) {
                    self.dram_pending.dump();
                    panic!("burst {addr:#x} not in the victim-read wait set of {base:#x}");
                }
                debug!(
                    "{}: VictimRead burst {:#x} done, {} left",
                    self.cycle,
                    addr,
                    wait.len()
                );
                wait.is_empty()
            }
            PendingOp::CacheRead => true,
            other => {
                self.dram_pending.dump();
                panic!(
                    "cache-medium read completion for a {} record at {base:#x}",
                    other.name()
                );
            }
        };

        if !ready {
            self.dram_pending.reinsert(base, pending);
            return;
        }
        if matches!(pending.op, PendingOp::VictimRead { .. }) {
            self.victim_read_finish(pending);
        } else {
            self.cache_read_finish(pending);
        }
    }

    fn flash_read_done(&mut self, addr: u64) {
        let base = self.geo.page_address(addr);
        let Some(mut pending) = self.flash_pending.remove(base) else {
            self.flash_pending.dump();
            panic!("backing-store read completion for {addr:#x} has no pending record");
        };

        let PendingOp::LineRead { wait, .. } = &mut pending.op else {
            self.flash_pending.dump();
            panic!(
                "backing-store read completion for a {} record at {base:#x}",
                pending.op.name()
            );
        };
        if !wait.remove(addr) {
            self.flash_pending.dump();
            panic!("burst {addr:#x} not in the line-read wait set of {base:#x}");
        }
        debug!(
            "{}: LineRead burst {:#x} done, {} left",
            self.cycle,
            addr,
            wait.len()
        );
        if wait.is_empty() {
            self.line_read_finish(pending);
        } else {
            self.flash_pending.reinsert(base, pending);
        }
    }

    /// Critical-line-first early delivery: the requested word's burst is
    /// available before the rest of the page, so the caller can make
    /// progress now. Firing twice for one pending record is a simulator bug.
    fn flash_critical_word(&mut self, addr: u64) {
        let base = self.geo.page_address(addr);
        let delivery = {
            let Some(pending) = self.flash_pending.get_mut(base) else {
                self.flash_pending.dump();
                panic!("critical-word event for {addr:#x} has no pending record");
            };
            let PendingOp::LineRead { critical_addr, .. } = &pending.op else {
                let op_name = pending.op.name();
                self.flash_pending.dump();
                panic!("critical-word event for a {op_name} record at {base:#x}");
            };
            if *critical_addr != Some(addr) {
                self.flash_pending.dump();
                panic!("critical-word event for {addr:#x} which was not marked critical");
            }
            if pending.callback_sent {
                self.flash_pending.dump();
                panic!("critical-word event delivered twice for page {base:#x}");
            }
            pending.callback_sent = true;
            (pending.kind, pending.orig_addr)
        };

        self.metrics.critical_word_deliveries += 1;
        match delivery {
            (TransactionKind::Read, orig_addr) => self.complete(CompletionKind::Read, orig_addr),
            (TransactionKind::Write, orig_addr) => self.complete(CompletionKind::Write, orig_addr),
            // Prefetch and flush have no caller waiting.
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Caller-facing state

    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    /// Admitted-but-unfinished transactions; 0 once the system is quiescent.
    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn queue_len(&self) -> usize {
        self.trans_queue.len()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Whether `addr` would hit right now. Diagnostic only; does not touch
    /// LRU state.
    pub fn is_hit(&self, addr: u64) -> bool {
        let aligned = self.geo.align(addr);
        if !self.geo.in_bounds(aligned) {
            panic!("address out of range: {addr:#x}");
        }
        self.table.is_hit(aligned)
    }

    pub fn resident_pages(&self) -> usize {
        self.table.valid_lines().len()
    }

    /// Backing-store address of a uniformly random resident page. Panics if
    /// the cache holds no valid line.
    pub fn random_hit_address<R: Rng>(&self, rng: &mut R) -> u64 {
        let valid = self.table.valid_lines();
        assert!(!valid.is_empty(), "cache holds no valid line");
        let cache_addr = valid[rng.gen_range(0..valid.len())];
        let line = self
            .table
            .peek(cache_addr)
            .expect("valid_lines returned a missing line");
        let addr = self
            .geo
            .backing_address(line.tag, self.geo.set_index(cache_addr));
        debug_assert!(self.table.is_hit(addr));
        addr
    }

    /// Cache line currently holding `backing_addr`, if resident.
    pub fn resident_line(&self, backing_addr: u64) -> Option<(u64, CacheLine)> {
        let aligned = self.geo.align(backing_addr);
        let set_index = self.geo.set_index(aligned);
        let tag = self.geo.tag(aligned);
        (0..self.geo.set_size).find_map(|offset| {
            let cache_addr = self.geo.cache_line_address(offset, set_index);
            self.table
                .peek(cache_addr)
                .filter(|line| line.valid && line.tag == tag)
                .map(|line| (cache_addr, *line))
        })
    }

    pub fn peek_line(&self, cache_addr: u64) -> Option<CacheLine> {
        self.table.peek(cache_addr).copied()
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geo
    }

    pub fn save_cache_table(&self, path: &Path) -> Result<()> {
        self.table.save(path)
    }
}
