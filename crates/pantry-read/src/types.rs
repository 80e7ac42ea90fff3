use pantry_records::CanonicalRecord;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Cache,
    Store,
    Adapter,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::Store => "store",
            Self::Adapter => "adapter",
        })
    }
}

/// Outcome of a tiered read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found { record: CanonicalRecord, tier: Tier },
    /// Confirmed absent: by a negative cache entry, by upstream, or because
    /// the identifier can never exist
    NotFound,
    /// Not found here, but upstream could not be asked; nothing was cached
    Degraded { reason: String },
}

impl Lookup {
    pub fn record(&self) -> Option<&CanonicalRecord> {
        match self {
            Self::Found { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<CanonicalRecord> {
        match self {
            Self::Found { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Per-tier time limits for one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTimeouts {
    pub cache: Duration,
    pub store: Duration,
    pub adapter: Duration,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            cache: Duration::from_millis(50),
            store: Duration::from_secs(2),
            adapter: Duration::from_secs(10),
        }
    }
}

/// Snapshot of orchestrator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    pub reads: u64,
    pub cache_hits: u64,
    pub store_hits: u64,
    pub adapter_hits: u64,
    pub negative_hits: u64,
    pub not_found: u64,
    pub degraded: u64,
    pub tier_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub reads: AtomicU64,
    pub cache_hits: AtomicU64,
    pub store_hits: AtomicU64,
    pub adapter_hits: AtomicU64,
    pub negative_hits: AtomicU64,
    pub not_found: AtomicU64,
    pub degraded: AtomicU64,
    pub tier_failures: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReadStats {
        ReadStats {
            reads: self.reads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            adapter_hits: self.adapter_hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            tier_failures: self.tier_failures.load(Ordering::Relaxed),
        }
    }
}
