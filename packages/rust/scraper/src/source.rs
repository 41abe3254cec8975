//! The concept source seam and its cijuf.org.co implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use url::Url;

use taxwatch_shared::{Concept, Result, ScraperConfig, TaxwatchError};

use crate::fetcher::Fetcher;
use crate::parser;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Where concepts come from. The pipeline drives discovery and parsing as
/// separate stages through this trait.
#[async_trait]
pub trait ConceptSource: Send + Sync {
    /// Human-readable source name for logs.
    fn name(&self) -> &str;

    /// Month pages to scan. Never empty: falls back to the index itself.
    async fn discover_month_links(&self) -> Result<Vec<Url>>;

    /// Listing rows of one month page, without full text.
    async fn parse_month(&self, url: &Url) -> Result<Vec<Concept>>;

    /// Detail-page body text; empty on any failure.
    async fn fetch_full_text(&self, link: &str) -> String;

    /// Parse every month, dedupe by link and attach full text.
    ///
    /// A month that fails is logged and skipped, and so is a listing that
    /// fails validation. When a link repeats, the later listing's fields
    /// replace the earlier ones in place and the full text already fetched
    /// is kept.
    async fn collect(&self, months: &[Url]) -> Vec<Concept> {
        let mut batch = ConceptBatch::default();

        for month in months {
            let concepts = match self.parse_month(month).await {
                Ok(concepts) => concepts,
                Err(e) => {
                    warn!(source = self.name(), %month, error = %e, "skipping month");
                    continue;
                }
            };

            for concept in concepts {
                if let Err(e) = concept.validate() {
                    warn!(
                        source = self.name(),
                        %month,
                        link = %concept.link,
                        error = %e,
                        "skipping invalid listing"
                    );
                    continue;
                }
                if batch.contains(&concept.link) {
                    batch.replace(concept);
                } else {
                    let full_text = self.fetch_full_text(&concept.link).await;
                    batch.push(concept.with_full_text(full_text));
                }
            }
        }

        batch.into_valid()
    }
}

// ---------------------------------------------------------------------------
// Dedup buffer
// ---------------------------------------------------------------------------

/// Insertion-ordered concepts keyed by link.
#[derive(Debug, Default)]
pub struct ConceptBatch {
    index: HashMap<String, usize>,
    concepts: Vec<Concept>,
}

impl ConceptBatch {
    pub fn contains(&self, link: &str) -> bool {
        self.index.contains_key(link)
    }

    /// Append a concept with an unseen link. A seen link is replaced instead.
    pub fn push(&mut self, concept: Concept) {
        if self.contains(&concept.link) {
            self.replace(concept);
            return;
        }
        self.index.insert(concept.link.clone(), self.concepts.len());
        self.concepts.push(concept);
    }

    /// Overwrite the listing fields of a seen link, keeping its position and
    /// full text. An invalid listing never replaces a valid one.
    pub fn replace(&mut self, mut concept: Concept) {
        match self.index.get(&concept.link) {
            Some(&pos) => {
                let existing = &mut self.concepts[pos];
                if let Err(e) = concept.validate() {
                    if existing.validate().is_ok() {
                        warn!(
                            link = %concept.link,
                            error = %e,
                            "keeping earlier listing over invalid repeat"
                        );
                        return;
                    }
                }
                if concept.full_text.is_empty() {
                    concept.full_text = std::mem::take(&mut existing.full_text);
                }
                *existing = concept;
            }
            None => self.push(concept),
        }
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Drop concepts that fail validation, logging each one.
    pub fn into_valid(self) -> Vec<Concept> {
        self.concepts
            .into_iter()
            .filter(|concept| match concept.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(link = %concept.link, error = %e, "dropping invalid concept");
                    false
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ConceptScraper
// ---------------------------------------------------------------------------

/// Scraper for the DIAN concepts listing on cijuf.org.co.
#[derive(Debug)]
pub struct ConceptScraper {
    fetcher: Fetcher,
    index_url: Url,
    base_url: Url,
}

impl ConceptScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let index_url = Url::parse(&config.index_url)
            .map_err(|e| TaxwatchError::config(format!("index_url '{}': {e}", config.index_url)))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| TaxwatchError::config(format!("base_url '{}': {e}", config.base_url)))?;

        Ok(Self {
            fetcher: Fetcher::new(config.fetch.clone())?,
            index_url,
            base_url,
        })
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }
}

#[async_trait]
impl ConceptSource for ConceptScraper {
    fn name(&self) -> &str {
        "DIAN concepts"
    }

    #[instrument(skip_all, fields(index = %self.index_url))]
    async fn discover_month_links(&self) -> Result<Vec<Url>> {
        let doc = match self.fetcher.fetch(&self.index_url).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "index fetch failed, scanning the index url only");
                return Ok(vec![self.index_url.clone()]);
            }
        };

        let links = parser::parse_month_links(&doc.body, &self.base_url);
        if links.is_empty() {
            warn!("no month links found, scanning the index url only");
            return Ok(vec![self.index_url.clone()]);
        }

        info!(months = links.len(), "discovered month pages");
        Ok(links)
    }

    #[instrument(skip_all, fields(month = %url))]
    async fn parse_month(&self, url: &Url) -> Result<Vec<Concept>> {
        let doc = self.fetcher.fetch(url).await?;
        let listing = parser::parse_month_rows(&doc.body, &self.base_url);

        if listing.skipped > 0 {
            warn!(skipped = listing.skipped, "skipped malformed listing rows");
        }
        info!(concepts = listing.concepts.len(), "parsed month page");
        Ok(listing.concepts)
    }

    async fn fetch_full_text(&self, link: &str) -> String {
        let url = match Url::parse(link) {
            Ok(url) => url,
            Err(e) => {
                warn!(link, error = %e, "cannot fetch full text for malformed link");
                return String::new();
            }
        };

        match self.fetcher.fetch(&url).await {
            Ok(doc) => parser::extract_full_text(&doc.body),
            Err(e) => {
                warn!(link, error = %e, "full text unavailable");
                String::new()
            }
        }
    }
}
