pub mod contention;
pub mod controller;
pub mod geometry;
pub mod metrics;
pub mod pending;
pub mod prefetch;
pub mod table;

pub use controller::{CacheController, Completion, CompletionKind, Transaction, TransactionKind};
pub use geometry::CacheGeometry;
pub use metrics::Metrics;
pub use prefetch::{PrefetchTrigger, Prefetcher};
pub use table::{CacheLine, CacheTable};

#[cfg(test)]
mod unit_tests;
