//! HTML extraction for the concepts listing.
//!
//! All functions here are synchronous and take the raw body, so no
//! `scraper::Html` (which is `!Send`) ever lives across an `.await`.

use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use taxwatch_shared::text::{clean_text, strip_label};
use taxwatch_shared::{Concept, NO_THEME, Result, TaxwatchError};

/// Detail-page text shorter than this is treated as navigation chrome.
const MIN_FULL_TEXT_CHARS: usize = 100;

/// Date formats tried in order on the listing's `<time>` text.
const DATE_FORMATS: [&str; 3] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

/// Detail-page containers, most specific first.
const FULL_TEXT_SELECTORS: [&str; 5] = [
    "div.field--name-body",
    "div.region-content",
    "div.content",
    "main",
    "article",
];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

static MONTH_LINK: LazyLock<Selector> = LazyLock::new(|| selector("div.view-content a.btn"));
static TABLE_ROW: LazyLock<Selector> = LazyLock::new(|| selector("table.table tbody tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time"));
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| selector("p"));
static FULL_TEXT: LazyLock<Vec<Selector>> =
    LazyLock::new(|| FULL_TEXT_SELECTORS.iter().map(|css| selector(css)).collect());

// ---------------------------------------------------------------------------
// Index page
// ---------------------------------------------------------------------------

/// Month page links on the index, resolved against `base`, in page order.
///
/// Returns an empty list when the index has no month buttons; the caller
/// decides the fallback.
pub fn parse_month_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let mut links: Vec<Url> = Vec::new();

    for anchor in doc.select(&MONTH_LINK) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }
        match base.join(href) {
            Ok(url) if !links.contains(&url) => links.push(url),
            Ok(_) => {}
            Err(e) => debug!(href, error = %e, "skipping unresolvable month link"),
        }
    }

    links
}

// ---------------------------------------------------------------------------
// Month page
// ---------------------------------------------------------------------------

/// Concepts parsed from one month page.
#[derive(Debug, Clone, Default)]
pub struct MonthListing {
    /// Valid rows, in table order. `full_text` is still empty.
    pub concepts: Vec<Concept>,
    /// Rows dropped for structural problems.
    pub skipped: usize,
}

/// Parse the listing table. Malformed rows are counted and skipped.
pub fn parse_month_rows(html: &str, base: &Url) -> MonthListing {
    let doc = Html::parse_document(html);
    let mut listing = MonthListing::default();

    for (index, row) in doc.select(&TABLE_ROW).enumerate() {
        match parse_row(row, base) {
            Ok(concept) => listing.concepts.push(concept),
            Err(e) => {
                debug!(row = index + 1, error = %e, "skipping listing row");
                listing.skipped += 1;
            }
        }
    }

    listing
}

fn parse_row(row: ElementRef<'_>, base: &Url) -> Result<Concept> {
    let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
    if cells.len() < 2 {
        return Err(TaxwatchError::parse(format!(
            "expected at least 2 cells, found {}",
            cells.len()
        )));
    }

    let anchor = cells[0]
        .select(&ANCHOR)
        .next()
        .ok_or_else(|| TaxwatchError::parse("first cell has no anchor"))?;
    let href = anchor
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .ok_or_else(|| TaxwatchError::parse("anchor has no href"))?;
    let link = base
        .join(href)
        .map_err(|e| TaxwatchError::parse(format!("bad href '{href}': {e}")))?;

    let title = clean_text(&anchor.text().collect::<String>());
    let date = row_date(cells[0]).unwrap_or_else(|| Utc::now().date_naive());
    let (theme, descriptor) = extract_theme_descriptor(cells[1]);

    Ok(Concept::new(title, date, theme, descriptor, link.to_string()))
}

/// Date from the cell's `<time>` element: its text first, then the
/// `datetime` attribute.
fn row_date(cell: ElementRef<'_>) -> Option<NaiveDate> {
    let time = cell.select(&TIME).next()?;
    parse_date(&clean_text(&time.text().collect::<String>())).or_else(|| {
        time.value()
            .attr("datetime")
            .and_then(|dt| dt.get(..10))
            .and_then(parse_date)
    })
}

/// Parse a listing date, trying each known format in order.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Split the second cell's paragraphs into a theme and a descriptor.
///
/// A paragraph mentioning "tema" sets the theme, one mentioning "descriptor"
/// contributes its labelled value, anything else is descriptor text.
pub fn extract_theme_descriptor(cell: ElementRef<'_>) -> (String, String) {
    let mut theme = NO_THEME.to_string();
    let mut parts: Vec<String> = Vec::new();

    for paragraph in cell.select(&PARAGRAPH) {
        let text = element_text(paragraph);
        if text.is_empty() {
            continue;
        }

        let lower = text.to_lowercase();
        if lower.contains("tema") {
            let candidate = strip_label(&text, "tema");
            if !candidate.is_empty() {
                theme = candidate;
            }
        } else if lower.contains("descriptor") {
            let candidate = strip_label(&text, "descriptor");
            if !candidate.is_empty() {
                parts.push(candidate);
            }
        } else {
            parts.push(text);
        }
    }

    (theme, parts.join(" ").trim().to_string())
}

// ---------------------------------------------------------------------------
// Detail page
// ---------------------------------------------------------------------------

/// Body text of a concept detail page, or empty when no container qualifies.
pub fn extract_full_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    for sel in FULL_TEXT.iter() {
        if let Some(container) = doc.select(sel).next() {
            let text = element_text(container);
            if text.chars().count() > MIN_FULL_TEXT_CHARS {
                return text;
            }
        }
    }

    String::new()
}

/// Text nodes joined by a single space, then normalized.
fn element_text(element: ElementRef<'_>) -> String {
    let joined = element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    clean_text(&joined)
}
