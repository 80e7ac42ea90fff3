//! Rust client for the Food Standards Agency Food Hygiene Rating Scheme API v2
//!
//! # Example
//!
//! ```no_run
//! use fsa_api::{EstablishmentQuery, FsaClient};
//!
//! # async fn example() -> Result<(), fsa_api::FsaError> {
//! let client = FsaClient::new()?;
//!
//! if let Some(est) = client.get_establishment("1234567").await? {
//!     println!("{:?} rated {:?}", est.business_name, est.rating_value);
//! }
//!
//! let page = client.list_establishments(&EstablishmentQuery::default()).await?;
//! println!("{} establishments on page 1", page.establishments.len());
//! # Ok(())
//! # }
//! ```
//!
//! # API Coverage
//!
//! - `GET /Establishments/{id}` - One establishment by FHRSID
//! - `GET /Establishments` - Paged listing, optionally by local authority

mod client;
mod error;
mod types;

pub use client::{parse_retry_after, FsaClient};
pub use error::{FsaError, Result};
pub use types::{
    EstablishmentPage, EstablishmentQuery, FsaEstablishment, FsaGeocode, FsaMeta, FsaScores,
};
