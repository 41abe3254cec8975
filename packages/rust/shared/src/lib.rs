//! Shared types, error model, text normalization and configuration for taxwatch.
//!
//! This crate is the foundation depended on by all other taxwatch crates.
//! It provides:
//! - [`TaxwatchError`]: the unified error type
//! - Domain types ([`Concept`], [`ConceptFilter`], [`SearchQuery`], [`SearchPage`])
//! - [`text`]: whitespace/unicode cleanup for scraped fragments
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`EnrichmentConfig`], config loading)

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EnrichmentConfig, EnrichmentSection, FetchConfig, NotifySection, ScraperConfig,
    ScraperSection, StorageSection, apply_env_overrides, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_config,
};
pub use error::{Result, TaxwatchError};
pub use types::{Concept, ConceptFilter, NO_THEME, SearchPage, SearchQuery};
