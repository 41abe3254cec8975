//! Core domain types for taxwatch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TaxwatchError};

/// Theme assigned to concepts whose listing row carries none.
pub const NO_THEME: &str = "Sin tema";

// ---------------------------------------------------------------------------
// Concept
// ---------------------------------------------------------------------------

/// A single regulatory publication scraped from the source site.
///
/// `link` is the natural key: two concepts with the same link are the same
/// record, and the most recently written one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Title taken from the listing anchor.
    pub title: String,
    /// Publication date (day granularity).
    pub date: NaiveDate,
    /// Category, [`NO_THEME`] when the listing has none.
    pub theme: String,
    /// Free-text descriptor, may be empty.
    pub descriptor: String,
    /// Absolute URL of the detail page. Unique key.
    pub link: String,
    /// Body text of the detail page, empty when extraction failed.
    #[serde(default)]
    pub full_text: String,
    /// AI-generated summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// AI-generated analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl Concept {
    /// Build a concept from listing fields, applying the field cleaning rules.
    pub fn new(
        title: impl Into<String>,
        date: NaiveDate,
        theme: impl Into<String>,
        descriptor: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            date,
            theme: theme.into(),
            descriptor: descriptor.into(),
            link: link.into(),
            full_text: String::new(),
            summary: None,
            analysis: None,
        }
        .cleaned()
    }

    /// Attach the detail-page text.
    pub fn with_full_text(mut self, full_text: impl Into<String>) -> Self {
        self.full_text = full_text.into().trim().to_string();
        self
    }

    /// Trim text fields, default the theme and drop blank enrichment output.
    pub fn cleaned(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.theme = match self.theme.trim() {
            "" => NO_THEME.to_string(),
            theme => theme.to_string(),
        };
        self.descriptor = self.descriptor.trim().to_string();
        self.link = self.link.trim().to_string();
        self.full_text = self.full_text.trim().to_string();
        self.summary = non_blank(self.summary.take());
        self.analysis = non_blank(self.analysis.take());
        self
    }

    /// Check the invariants a concept must satisfy before it may be persisted.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(TaxwatchError::validation(format!(
                "concept {} has an empty title",
                self.link
            )));
        }
        if self.link.trim().is_empty() {
            return Err(TaxwatchError::validation(format!(
                "concept '{}' has an empty link",
                self.title
            )));
        }
        let parsed = Url::parse(&self.link).map_err(|e| {
            TaxwatchError::validation(format!("invalid link '{}': {e}", self.link))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(TaxwatchError::validation(format!(
                "link '{}' is not an absolute http(s) URL",
                self.link
            )));
        }
        Ok(())
    }

    /// Whether both summary and analysis are present.
    pub fn has_enrichment(&self) -> bool {
        self.summary.is_some() && self.analysis.is_some()
    }

    /// Short preview: full text, else descriptor, else title.
    pub fn preview(&self, max_chars: usize) -> String {
        let content = [&self.full_text, &self.descriptor, &self.title]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or_default();

        if content.chars().count() <= max_chars {
            content.to_string()
        } else {
            format!("{}...", crate::text::truncate_chars(content, max_chars))
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Optional narrowing applied by list and search queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptFilter {
    /// Case-insensitive substring of the theme.
    pub theme: Option<String>,
    /// Inclusive lower date bound.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper date bound.
    pub date_to: Option<NaiveDate>,
}

impl ConceptFilter {
    pub fn matches(&self, concept: &Concept) -> bool {
        if let Some(theme) = &self.theme {
            if !crate::text::contains_ignore_case(&concept.theme, theme) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if concept.date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if concept.date > to {
                return false;
            }
        }
        true
    }
}

/// A full-text search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filter: ConceptFilter,
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, limit: usize, offset: usize) -> Self {
        Self {
            query: query.into(),
            filter: ConceptFilter::default(),
            limit,
            offset,
        }
    }

    pub fn with_filter(mut self, filter: ConceptFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub concepts: Vec<Concept>,
    /// Filtered match count before pagination.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    /// `offset + concepts.len() < total`.
    pub has_more: bool,
}
