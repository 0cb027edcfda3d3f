//! Content collection for the research stage.
//!
//! - **web**: the `ContentFetcher` seam and its HTTP implementation
//! - **page**: title, description and text excerpt extraction from HTML

pub mod page;
pub mod web;

pub use page::{digest_html, PageDigest};
pub use web::{ContentFetcher, FetchError, FetchedPage, HttpFetcher};
