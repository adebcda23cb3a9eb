use std::collections::HashMap;

use log::error;
use smallvec::SmallVec;

use crate::cache::controller::TransactionKind;

/// Outstanding burst addresses of a fragmented page operation. Page/burst
/// ratios are small (16 for a 1 KiB page over 64-byte bursts), so the set
/// lives inline in the pending record.
#[derive(Debug, Clone, Default)]
pub struct WaitSet {
    addrs: SmallVec<[u64; 16]>,
}

impl WaitSet {
    pub fn from_bursts(bursts: impl Iterator<Item = u64>) -> Self {
        Self {
            addrs: bursts.collect(),
        }
    }

    /// Remove a finished burst. Returns false if the address was not waited
    /// on, which the caller treats as a device protocol violation.
    pub fn remove(&mut self, addr: u64) -> bool {
        match self.addrs.iter().position(|&a| a == addr) {
            Some(idx) => {
                let _ = self.addrs.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }
}

/// Which multi-step operation a pending record is in, with the payload that
/// only that step needs.
#[derive(Debug, Clone)]
pub enum PendingOp {
    /// Reading the dirty victim line out of the cache medium.
    VictimRead { wait: WaitSet },
    /// Fetching the missed page from the backing store. `critical_addr` is
    /// the burst holding the originally requested word, or None when no
    /// early delivery is wanted (prefetch).
    LineRead {
        wait: WaitSet,
        critical_addr: Option<u64>,
    },
    /// Hit-path read of the exact requested word from the cache medium.
    CacheRead,
    /// Hit-path write of the exact requested word to the cache medium.
    CacheWrite,
}

impl PendingOp {
    pub fn name(&self) -> &'static str {
        match self {
            PendingOp::VictimRead { .. } => "VictimRead",
            PendingOp::LineRead { .. } => "LineRead",
            PendingOp::CacheRead => "CacheRead",
            PendingOp::CacheWrite => "CacheWrite",
        }
    }
}

/// Victim bookkeeping carried by a miss. Present iff the victim slot held
/// valid data; the tag reconstructs the victim's backing-store page.
#[derive(Debug, Clone, Copy)]
pub struct VictimInfo {
    pub tag: u64,
    pub dirty: bool,
}

/// An in-flight sub-operation descriptor, registered in one of the two
/// per-device pending tables while device activity is outstanding.
#[derive(Debug, Clone)]
pub struct Pending {
    /// Client address of the originating transaction, reported back in the
    /// completion.
    pub orig_addr: u64,
    /// Burst-aligned backing-store address being serviced.
    pub backing_addr: u64,
    /// Cache-medium address of the destination line.
    pub cache_addr: u64,
    pub kind: TransactionKind,
    pub victim: Option<VictimInfo>,
    /// Set once the critical-word early delivery has fired, so the final
    /// stage does not complete the transaction twice.
    pub callback_sent: bool,
    pub op: PendingOp,
}

/// Pending registry for one backing device, keyed by the in-flight base
/// address (page address for backing-store operations, line address for
/// cache-medium operations).
#[derive(Debug, Default)]
pub struct PendingTable {
    name: &'static str,
    entries: HashMap<u64, Pending>,
}

impl PendingTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, base_addr: u64, pending: Pending) {
        let prev = self.entries.insert(base_addr, pending);
        if let Some(prev) = prev {
            self.dump();
            panic!(
                "{} pending table already holds {} for base {base_addr:#x}",
                self.name,
                prev.op.name()
            );
        }
    }

    pub fn reinsert(&mut self, base_addr: u64, pending: Pending) {
        let _ = self.entries.insert(base_addr, pending);
    }

    pub fn remove(&mut self, base_addr: u64) -> Option<Pending> {
        self.entries.remove(&base_addr)
    }

    pub fn get_mut(&mut self, base_addr: u64) -> Option<&mut Pending> {
        self.entries.get_mut(&base_addr)
    }

    pub fn contains(&self, base_addr: u64) -> bool {
        self.entries.contains_key(&base_addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Postmortem dump logged right before a protocol-violation abort.
    pub fn dump(&self) {
        error!("{} pending table: {} entries", self.name, self.entries.len());
        let mut keys: Vec<u64> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            let pending = &self.entries[&key];
            let wait_left = match &pending.op {
                PendingOp::VictimRead { wait } => wait.len(),
                PendingOp::LineRead { wait, .. } => wait.len(),
                _ => 0,
            };
            error!(
                "  base={key:#x} op={} orig={:#x} backing={:#x} cache={:#x} wait_left={wait_left}",
                pending.op.name(),
                pending.orig_addr,
                pending.backing_addr,
                pending.cache_addr,
            );
        }
    }
}
