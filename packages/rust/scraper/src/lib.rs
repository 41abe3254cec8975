//! Fetching and parsing of the DIAN concepts listing.
//!
//! This crate provides:
//! - [`fetcher`]: paced HTTP GET with retry/backoff and 429 handling
//! - [`parser`]: month index, listing table and detail page extraction
//! - [`ConceptSource`]: the seam the pipeline drives, with [`ConceptScraper`]
//!   as the cijuf.org.co implementation

pub mod fetcher;
pub mod parser;
mod source;

pub use fetcher::{BackoffPolicy, FetchedDocument, Fetcher};
pub use parser::MonthListing;
pub use source::{ConceptBatch, ConceptScraper, ConceptSource};
