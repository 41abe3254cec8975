//! In-memory query helpers over a loaded dataset.
//!
//! Inputs are expected in store order (theme asc, date desc, link asc).

use std::cmp::Reverse;
use std::collections::BTreeSet;

use taxwatch_shared::text::contains_ignore_case;
use taxwatch_shared::{Concept, ConceptFilter, Result, SearchPage, SearchQuery, TaxwatchError};

/// Store ordering: theme ascending, date descending, link ascending.
pub fn sort_for_store(concepts: &mut [Concept]) {
    concepts.sort_by(|a, b| {
        a.theme
            .cmp(&b.theme)
            .then_with(|| b.date.cmp(&a.date))
            .then_with(|| a.link.cmp(&b.link))
    });
}

/// Filtered page in store order.
pub fn filter_page(
    concepts: Vec<Concept>,
    filter: &ConceptFilter,
    limit: usize,
    offset: usize,
) -> Vec<Concept> {
    concepts
        .into_iter()
        .filter(|c| filter.matches(c))
        .skip(offset)
        .take(limit)
        .collect()
}

/// Whether `query` occurs in any searchable field.
fn matches_query(concept: &Concept, query: &str) -> bool {
    [
        Some(concept.title.as_str()),
        Some(concept.theme.as_str()),
        Some(concept.descriptor.as_str()),
        concept.summary.as_deref(),
        concept.analysis.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| contains_ignore_case(field, query))
}

/// Case-insensitive substring search across title, theme, descriptor,
/// summary and analysis. `total` counts every match before pagination.
pub fn search(concepts: Vec<Concept>, query: &SearchQuery) -> Result<SearchPage> {
    let needle = query.query.trim();
    if needle.is_empty() {
        return Err(TaxwatchError::validation("search query must not be blank"));
    }

    let matched: Vec<Concept> = concepts
        .into_iter()
        .filter(|c| query.filter.matches(c) && matches_query(c, needle))
        .collect();

    let total = matched.len();
    let page: Vec<Concept> = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();
    let has_more = query.offset + page.len() < total;

    Ok(SearchPage {
        concepts: page,
        total,
        limit: query.limit,
        offset: query.offset,
        has_more,
    })
}

/// Distinct non-empty themes, sorted.
pub fn themes(concepts: &[Concept]) -> Vec<String> {
    concepts
        .iter()
        .map(|c| c.theme.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Most recent concepts first. Ties keep store order.
pub fn latest(mut concepts: Vec<Concept>, limit: usize) -> Vec<Concept> {
    concepts.sort_by_key(|c| Reverse(c.date));
    concepts.truncate(limit);
    concepts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn concept(link: &str, theme: &str, day: u32, descriptor: &str) -> Concept {
        Concept::new(
            format!("Concepto {link}"),
            NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            theme,
            descriptor,
            format!("https://cijuf.org.co/{link}"),
        )
    }

    fn dataset() -> Vec<Concept> {
        let mut all = vec![
            concept("a", "Renta", 1, "Deducciones por dependientes"),
            concept("b", "IVA", 5, "Exclusión de bienes"),
            concept("c", "Renta", 9, "Ingresos no constitutivos"),
            concept("d", "IVA", 2, "Responsables del impuesto"),
        ];
        sort_for_store(&mut all);
        all
    }

    fn links(concepts: &[Concept]) -> Vec<&str> {
        concepts
            .iter()
            .map(|c| c.link.trim_start_matches("https://cijuf.org.co/"))
            .collect()
    }

    #[test]
    fn store_order_is_theme_then_newest() {
        assert_eq!(links(&dataset()), vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn filter_page_applies_offset_after_filter() {
        let filter = ConceptFilter {
            theme: Some("renta".into()),
            ..Default::default()
        };
        let page = filter_page(dataset(), &filter, 1, 1);
        assert_eq!(links(&page), vec!["a"]);
    }

    #[test]
    fn search_matches_any_field_case_insensitively() {
        let page = search(dataset(), &SearchQuery::new("EXCLUSIÓN", 10, 0)).unwrap();
        assert_eq!(links(&page.concepts), vec!["b"]);
        assert_eq!(page.total, 1);
        assert!(!page.has_more);

        let mut with_summary = dataset();
        with_summary[3].summary = Some("Resumen sobre IVA implícito".into());
        let page = search(with_summary, &SearchQuery::new("iva", 10, 0)).unwrap();
        assert_eq!(links(&page.concepts), vec!["b", "d", "a"]);
    }

    #[test]
    fn search_total_counts_before_pagination() {
        let page = search(dataset(), &SearchQuery::new("concepto", 2, 1)).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.concepts.len(), 2);
        assert!(page.has_more);

        let last = search(dataset(), &SearchQuery::new("concepto", 2, 2)).unwrap();
        assert!(!last.has_more);
    }

    #[test]
    fn blank_query_is_rejected() {
        let err = search(dataset(), &SearchQuery::new("   ", 10, 0)).unwrap_err();
        assert!(matches!(err, TaxwatchError::Validation { .. }));
    }

    #[test]
    fn themes_are_distinct_and_sorted() {
        assert_eq!(themes(&dataset()), vec!["IVA", "Renta"]);
    }

    #[test]
    fn latest_sorts_by_date_desc() {
        let newest = latest(dataset(), 2);
        assert_eq!(links(&newest), vec!["c", "b"]);
    }
}
