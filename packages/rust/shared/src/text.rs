//! Text normalization for scraped HTML fragments.
//!
//! Each helper is a pure `&str -> String` pass. Scraped text arrives with
//! non-breaking spaces, stray control characters and layout whitespace; the
//! parser and the enrichment prompts both go through [`clean_text`].

use std::sync::LazyLock;

use regex::Regex;

/// Normalize a scraped fragment: NBSP to space, drop control characters,
/// collapse whitespace runs, trim.
pub fn clean_text(text: &str) -> String {
    static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F]").expect("valid regex")
    });

    if text.is_empty() {
        return String::new();
    }

    let text = text.replace('\u{a0}', " ");
    let text = CONTROL_RE.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove a leading `label` (case-insensitive) and any `:`/space after it.
///
/// `"Tema: IVA"` with label `"tema"` yields `"IVA"`. Text without the label is
/// returned cleaned but otherwise untouched.
pub fn strip_label(text: &str, label: &str) -> String {
    match label_end(text, label) {
        Some(end) => clean_text(text[end..].trim_start_matches([':', ' ', '\u{a0}'])),
        None => clean_text(text),
    }
}

/// Byte offset just past the first case-insensitive match of `label` in `text`.
///
/// Characters are compared one by one on the original text, so a character
/// whose lowercase form is longer (`İ`) never shifts the cut.
fn label_end(text: &str, label: &str) -> Option<usize> {
    if label.is_empty() {
        return None;
    }
    text.char_indices().find_map(|(start, _)| {
        let mut end = start;
        let mut window = text[start..].chars();
        for expected in label.chars() {
            let actual = window.next()?;
            if !actual.to_lowercase().eq(expected.to_lowercase()) {
                return None;
            }
            end += actual.len_utf8();
        }
        Some(end)
    })
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Case-insensitive substring test.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace_and_nbsp() {
        assert_eq!(clean_text("  Concepto\u{a0}\u{a0}100 \n\t de 2025 "), "Concepto 100 de 2025");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn clean_text_drops_control_characters() {
        assert_eq!(clean_text("IVA\u{0007} y\u{0085}renta"), "IVA yrenta");
    }

    #[test]
    fn strip_label_handles_case_and_separators() {
        assert_eq!(strip_label("Tema: Impuesto a las ventas", "tema"), "Impuesto a las ventas");
        assert_eq!(strip_label("DESCRIPTOR :  Exclusión", "descriptor"), "Exclusión");
        assert_eq!(strip_label("Sin etiqueta", "tema"), "Sin etiqueta");
    }

    #[test]
    fn strip_label_after_multibyte_prefix() {
        assert_eq!(strip_label("Último tema: Renta", "tema"), "Renta");
    }

    #[test]
    fn strip_label_when_lowercase_grows_before_label() {
        assert_eq!(strip_label("İİ Tema IVA", "tema"), "IVA");
        assert_eq!(strip_label("İstanbul descriptor: Exclusión", "DESCRIPTOR"), "Exclusión");
    }

    #[test]
    fn strip_label_with_empty_label_only_cleans() {
        assert_eq!(strip_label("  Tema:  IVA ", ""), "Tema: IVA");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("áéíóú", 3), "áéí");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn contains_ignore_case_matches_accents() {
        assert!(contains_ignore_case("Régimen IVA", "iva"));
        assert!(contains_ignore_case("RÉGIMEN", "régimen"));
        assert!(!contains_ignore_case("Renta", "iva"));
    }
}
