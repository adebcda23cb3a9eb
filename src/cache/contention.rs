use std::collections::HashMap;

/// Page-granularity contention locks plus per-set locked-line counters.
///
/// A page enters the map with a use count of 0 when a transaction to it is
/// admitted; every outstanding sub-operation on the page (line fetch and, if
/// present, victim writeback) raises the count and lowers it on completion.
/// The page is released only at a zero-count check point, so overlapping
/// asynchronous completions cannot unlock it early. The victim's own backing
/// page is held as a nested lock with no count of its own.
#[derive(Debug, Default)]
pub struct ContentionTracker {
    pages: HashMap<u64, u64>,
    locked_lines: HashMap<u64, u64>,
}

impl ContentionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_page_locked(&self, page_addr: u64) -> bool {
        self.pages.contains_key(&page_addr)
    }

    /// Lock a page with an idle use count. Locking an already-locked page is
    /// a pipeline bug.
    pub fn lock_page(&mut self, page_addr: u64) {
        let prev = self.pages.insert(page_addr, 0);
        assert!(
            prev.is_none(),
            "page {page_addr:#x} locked while already locked"
        );
    }

    pub fn increment(&mut self, page_addr: u64) {
        let count = self
            .pages
            .get_mut(&page_addr)
            .unwrap_or_else(|| panic!("increment on unlocked page {page_addr:#x}"));
        *count += 1;
    }

    pub fn decrement(&mut self, page_addr: u64) {
        let count = self
            .pages
            .get_mut(&page_addr)
            .unwrap_or_else(|| panic!("decrement on unlocked page {page_addr:#x}"));
        assert!(*count > 0, "use count underflow on page {page_addr:#x}");
        *count -= 1;
    }

    pub fn use_count(&self, page_addr: u64) -> u64 {
        *self
            .pages
            .get(&page_addr)
            .unwrap_or_else(|| panic!("use count of unlocked page {page_addr:#x}"))
    }

    /// Drop a page lock. Only legal once its use count is back to zero.
    pub fn release_page(&mut self, page_addr: u64) {
        match self.pages.remove(&page_addr) {
            Some(0) => {}
            Some(count) => panic!("page {page_addr:#x} released with use count {count}"),
            None => panic!("page {page_addr:#x} released while not locked"),
        }
    }

    pub fn lock_line(&mut self, set_index: u64) {
        *self.locked_lines.entry(set_index).or_insert(0) += 1;
    }

    pub fn unlock_line(&mut self, set_index: u64) {
        let count = self
            .locked_lines
            .get_mut(&set_index)
            .unwrap_or_else(|| panic!("unlock_line on set {set_index} with no locked lines"));
        assert!(*count > 0, "locked-line underflow in set {set_index}");
        *count -= 1;
        if *count == 0 {
            let _ = self.locked_lines.remove(&set_index);
        }
    }

    pub fn locked_in_set(&self, set_index: u64) -> u64 {
        self.locked_lines.get(&set_index).copied().unwrap_or(0)
    }

    pub fn locked_pages(&self) -> usize {
        self.pages.len()
    }
}
