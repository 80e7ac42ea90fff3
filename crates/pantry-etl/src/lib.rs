//! Pantry ETL Library
//!
//! Provides the ingestion pipeline, its configuration and the status server
//! used by the `pantry-etl` binary.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod types;

pub use config::Config;
pub use error::{EtlError, Result};
pub use pipeline::Pipeline;
pub use server::{router, serve, ServerState, SharedState};
pub use types::*;
