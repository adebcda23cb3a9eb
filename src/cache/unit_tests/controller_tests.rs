use crate::cache::controller::{CompletionKind, TransactionKind};

use super::harness::{build, fast_dram, page_addr, run_until_quiescent, slow_flash, small_cache};

#[test]
fn compulsory_miss_then_hit() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let addr = page_addr(&cache, 0, 0);

    ctl.submit(TransactionKind::Read, addr);
    let done = run_until_quiescent(&mut ctl, 10_000);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].kind, CompletionKind::Read);
    assert_eq!(done[0].addr, addr);
    assert_eq!(ctl.metrics().misses, 1);
    assert_eq!(ctl.metrics().hits, 0);

    ctl.submit(TransactionKind::Read, addr);
    let done = run_until_quiescent(&mut ctl, 10_000);
    assert_eq!(done.len(), 1);
    assert_eq!(ctl.metrics().misses, 1);
    assert_eq!(ctl.metrics().hits, 1);
    assert_eq!(ctl.metrics().completed_reads, 2);
}

#[test]
fn lru_evicts_oldest_line_in_set() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let first = page_addr(&cache, 0, 0);
    let second = page_addr(&cache, 1, 0);
    let third = page_addr(&cache, 2, 0);

    ctl.submit(TransactionKind::Read, first);
    run_until_quiescent(&mut ctl, 10_000);
    ctl.submit(TransactionKind::Read, second);
    run_until_quiescent(&mut ctl, 10_000);
    assert!(ctl.is_hit(first));
    assert!(ctl.is_hit(second));

    // Set is full; the third tag must displace the oldest line.
    ctl.submit(TransactionKind::Read, third);
    run_until_quiescent(&mut ctl, 10_000);
    assert!(!ctl.is_hit(first));
    assert!(ctl.is_hit(second));
    assert!(ctl.is_hit(third));
    assert_eq!(ctl.metrics().misses, 3);
}

#[test]
fn dirty_victim_is_written_back() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let dirty = page_addr(&cache, 0, 0);

    ctl.submit(TransactionKind::Write, dirty);
    run_until_quiescent(&mut ctl, 10_000);
    let (_, line) = ctl.resident_line(dirty).unwrap();
    assert!(line.dirty);

    ctl.submit(TransactionKind::Read, page_addr(&cache, 1, 0));
    run_until_quiescent(&mut ctl, 10_000);
    ctl.submit(TransactionKind::Read, page_addr(&cache, 2, 0));
    run_until_quiescent(&mut ctl, 10_000);

    assert!(!ctl.is_hit(dirty));
    assert_eq!(ctl.metrics().dirty_evictions, 1);

    // The evicted page can be brought back in without incident.
    ctl.submit(TransactionKind::Read, dirty);
    run_until_quiescent(&mut ctl, 10_000);
    assert!(ctl.is_hit(dirty));
}

#[test]
fn page_lock_serializes_write_then_read() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let addr = page_addr(&cache, 3, 1) + 512;

    // Both submitted before any cycle runs; the read must wait for the
    // write's page lock and then observe the written line.
    ctl.submit(TransactionKind::Write, addr);
    ctl.submit(TransactionKind::Read, addr);
    let done = run_until_quiescent(&mut ctl, 10_000);

    assert_eq!(done.len(), 2);
    assert_eq!(done[0].kind, CompletionKind::Write);
    assert_eq!(done[1].kind, CompletionKind::Read);
    assert!(done[0].cycle <= done[1].cycle);
    assert!(ctl.metrics().admission_skips > 0);

    let (_, line) = ctl.resident_line(addr).unwrap();
    assert!(line.dirty);
    assert_eq!(ctl.metrics().hits, 1);
    assert_eq!(ctl.metrics().misses, 1);
}

#[test]
fn flush_hit_marks_line_as_next_victim() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let first = page_addr(&cache, 0, 2);
    let second = page_addr(&cache, 1, 2);
    let third = page_addr(&cache, 2, 2);

    ctl.submit(TransactionKind::Read, first);
    run_until_quiescent(&mut ctl, 10_000);
    ctl.submit(TransactionKind::Read, second);
    run_until_quiescent(&mut ctl, 10_000);

    // Without the flush, LRU would pick `first`.
    ctl.submit(TransactionKind::Flush, second);
    let done = run_until_quiescent(&mut ctl, 10_000);
    assert!(done.is_empty());
    assert_eq!(ctl.metrics().flush_hits, 1);

    ctl.submit(TransactionKind::Read, third);
    run_until_quiescent(&mut ctl, 10_000);
    assert!(ctl.is_hit(first));
    assert!(!ctl.is_hit(second));
    assert!(ctl.is_hit(third));
}

#[test]
fn flush_of_absent_page_is_a_noop() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());

    ctl.submit(TransactionKind::Flush, page_addr(&cache, 5, 0));
    let done = run_until_quiescent(&mut ctl, 1_000);
    assert!(done.is_empty());
    assert_eq!(ctl.metrics().misses, 0);
    assert_eq!(ctl.metrics().flush_hits, 0);
}

#[test]
fn prefetch_warms_cache_without_completion() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let addr = page_addr(&cache, 4, 3);

    ctl.submit(TransactionKind::Prefetch, addr);
    let done = run_until_quiescent(&mut ctl, 10_000);
    assert!(done.is_empty());
    assert!(ctl.is_hit(addr));
    let (_, line) = ctl.resident_line(addr).unwrap();
    assert!(!line.dirty);

    // The warmed page now hits.
    ctl.submit(TransactionKind::Read, addr);
    run_until_quiescent(&mut ctl, 10_000);
    assert_eq!(ctl.metrics().hits, 1);
}

#[test]
fn prefetch_of_resident_page_leaves_line_untouched() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let addr = page_addr(&cache, 2, 1);

    ctl.submit(TransactionKind::Write, addr);
    run_until_quiescent(&mut ctl, 10_000);
    let (cache_addr, before) = ctl.resident_line(addr).unwrap();

    ctl.submit(TransactionKind::Prefetch, addr);
    let done = run_until_quiescent(&mut ctl, 1_000);
    assert!(done.is_empty());
    assert_eq!(ctl.metrics().prefetch_hits, 1);

    let after = ctl.peek_line(cache_addr).unwrap();
    assert!(after.dirty);
    assert_eq!(after.ts, before.ts);
}

#[test]
fn unaligned_address_completes_with_original_address() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let addr = page_addr(&cache, 1, 1) + 300;

    ctl.submit(TransactionKind::Read, addr);
    let done = run_until_quiescent(&mut ctl, 10_000);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].addr, addr);
    assert!(ctl.is_hit(addr));
}

#[test]
fn fully_locked_set_defers_admission() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    ctl.submit(TransactionKind::Read, page_addr(&cache, 0, 0));
    ctl.submit(TransactionKind::Read, page_addr(&cache, 1, 0));
    ctl.submit(TransactionKind::Read, page_addr(&cache, 2, 0));

    // Both ways of set 0 are busy with the first two misses well before the
    // 20-cycle flash reads return; the third must still be queued.
    for _ in 0..15 {
        ctl.tick();
    }
    assert_eq!(ctl.queue_len(), 1);
    assert!(ctl.metrics().admission_skips > 0);

    let done = run_until_quiescent(&mut ctl, 10_000);
    assert_eq!(done.len(), 3);
    assert_eq!(ctl.metrics().completed_reads, 3);
}

#[test]
fn random_hit_address_returns_resident_page() {
    let cache = small_cache();
    let mut ctl = build(&cache, &fast_dram(), &slow_flash());
    let addr = page_addr(&cache, 3, 2);
    ctl.submit(TransactionKind::Write, addr);
    run_until_quiescent(&mut ctl, 10_000);

    let mut rng = rand::rngs::mock::StepRng::new(0, 1);
    for _ in 0..8 {
        assert!(ctl.is_hit(ctl.random_hit_address(&mut rng)));
    }
}
