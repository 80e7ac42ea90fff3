//! Rust clients for Open Food Facts and Open Prices
//!
//! # API Coverage
//!
//! ## Open Food Facts
//! - `GET /api/v2/product/{barcode}` - Product with per-100g nutriments
//! - `GET /api/v2/search` - Paged product search (UK products)
//!
//! ## Open Prices
//! - `GET /api/v1/prices/{id}` - One price observation
//! - `GET /api/v1/prices` - Paged price listing by currency

mod client;
mod error;
mod http;
mod prices;
mod types;

pub use client::OffClient;
pub use error::{OffError, Result};
pub use prices::OpenPricesClient;
pub use types::{
    Nutriments, OffProduct, OpenPrice, PriceLocation, PricePage, PriceProduct, ProductResponse,
    SearchPage,
};
