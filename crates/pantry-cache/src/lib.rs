//! Cache tier for Pantry.
//!
//! A [`CacheTier`] holds disposable copies of canonical records (or
//! negative markers for confirmed not-found lookups) with a TTL set by a
//! [`CachePolicy`]. [`MemoryCacheTier`] keeps them in process with moka;
//! [`RedisCacheTier`] shares them through Redis.

pub mod error;
pub mod memory;
pub mod policy;
pub mod remote;
pub mod tier;

pub use error::{CacheError, Result};
pub use memory::MemoryCacheTier;
pub use policy::{CachePolicy, DEFAULT_NEGATIVE_TTL, DEFAULT_POSITIVE_TTL};
pub use remote::RedisCacheTier;
pub use tier::{cache_key, CacheEntry, CacheStats, CacheTier, CachedValue, DEFAULT_KEY_PREFIX};
