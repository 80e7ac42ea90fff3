//! External source adapters for Pantry
//!
//! Each adapter fetches one upstream's records and maps them to
//! [`pantry_records::CanonicalRecord`]s:
//!
//! - [`FsaSource`] - FSA hygiene ratings (`establishment`)
//! - [`OffSource`] - Open Food Facts nutrition (`nutrition_fact`)
//! - [`OpenPricesSource`] - Open Prices observations (`price_point`)
//! - [`CompositionSource`] - government nutrient table CSV (`food_composition`)
//!
//! Adapters retry transient failures on a [`BackoffPolicy`] and surface
//! upstream throttling as [`SourceError::RateLimited`]. The read path keeps a
//! [`ThrottleGate`] so it stops calling a throttled upstream until the
//! requested wait has passed.

mod adapter;
mod backoff;
mod composition;
mod error;
mod fsa;
mod memory;
mod off;
mod prices;
mod throttle;

pub use adapter::{fetch_all, Page, SourceAdapter, SourceRegistry};
pub use backoff::{with_timeout, BackoffPolicy};
pub use composition::{parse_composition_csv, CompositionSource};
pub use error::{Result, SourceError};
pub use fsa::{establishment_record, parse_fsa_datetime, FsaSource};
pub use memory::MemorySource;
pub use off::{nutrition_record, OffSource};
pub use prices::{price_record, OpenPricesSource};
pub use throttle::{ThrottleGate, DEFAULT_THROTTLE};
