//! Tiered read path for Pantry
//!
//! [`ReadOrchestrator::read`] consults the cache tier, then the record store,
//! then the upstream source adapter, filling the faster tiers on the way
//! back. Tier outages never fail a read: a broken cache or store is skipped,
//! and an unreachable upstream yields [`Lookup::Degraded`].

mod orchestrator;
mod types;

pub use orchestrator::ReadOrchestrator;
pub use types::{Lookup, ReadStats, Tier, TierTimeouts};
