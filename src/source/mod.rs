//! Crawl source adapter.
//!
//! Turns a crawl task's catalog query into [`DiscoveredItem`]s through the
//! catalog's JSON API.

mod catalog;
mod error;

pub use catalog::{CatalogClient, DiscoveredItem};
pub use error::CatalogError;
