//! Scalar and chapter-key normalization shared across pipeline stages.
//!
//! Every cell value that enters the pipeline passes through [`normalize_scalar`];
//! the chapter-key helpers implement the composite-key convention used by the
//! concordance sheets (`3.29;3.30` denotes a span over two Berendes chapters).

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static RE_FLOAT_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.0+$").expect("float-int regex"));

/// Normalize a raw cell value.
///
/// Trims, maps `#N/A` to empty, collapses whitespace runs, and strips Excel
/// float-formatted integers (`17.0` -> `17`).
pub fn normalize_scalar(value: &str) -> String {
    let v = value.trim();
    if v.eq_ignore_ascii_case("#N/A") {
        return String::new();
    }
    let v = RE_WS.replace_all(v, " ").into_owned();
    if RE_FLOAT_INT.is_match(&v) {
        if let Some((head, _)) = v.split_once('.') {
            return head.to_string();
        }
    }
    v
}

/// True when a normalized value carries no information.
pub fn is_empty(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("#N/A")
}

/// Expand a possibly composite chapter key (`3.29;3.30`) into its parts.
///
/// Returns an empty vec for empty input; a single-part key passes through
/// normalized.
pub fn expand_chapter_key(raw: &str) -> Vec<String> {
    let v = normalize_scalar(raw);
    if is_empty(&v) {
        return Vec::new();
    }
    let parts: Vec<String> = v
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.len() > 1 {
        parts
    } else {
        vec![v]
    }
}

/// Order-preserving deduplicated `"; "` join of normalized, non-empty values.
pub fn unique_join<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    for v in values {
        let nv = normalize_scalar(v.as_ref());
        if is_empty(&nv) {
            continue;
        }
        if seen.insert(nv.clone()) {
            out.push(nv);
        }
    }
    out.join("; ")
}

/// Leading dotted component of a chapter key, when numeric (`3.29` -> `3`).
pub fn berendes_book_num(chapter_key: &str) -> String {
    let ck = normalize_scalar(chapter_key);
    if ck.is_empty() {
        return String::new();
    }
    let head = ck.split('.').next().unwrap_or("");
    if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
        head.to_string()
    } else {
        String::new()
    }
}

/// One dotted component of a chapter key, ordered numerics-first.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyPart {
    Num(u64),
    Text(String),
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Num(a), KeyPart::Num(b)) => a.cmp(b),
            (KeyPart::Num(_), KeyPart::Text(_)) => Ordering::Less,
            (KeyPart::Text(_), KeyPart::Num(_)) => Ordering::Greater,
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Numeric-aware sort key for dotted chapter keys (`1.4.5` < `1.10`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChapterSortKey(Vec<KeyPart>);

/// Build a sort key for a chapter key like `3.29` or `1.4.5`.
pub fn chapter_sort_key(chapter_key: &str) -> ChapterSortKey {
    ChapterSortKey(
        chapter_key
            .trim()
            .split('.')
            .map(|p| match p.parse::<u64>() {
                Ok(n) if p.chars().all(|c| c.is_ascii_digit()) => KeyPart::Num(n),
                _ => KeyPart::Text(p.to_string()),
            })
            .collect(),
    )
}

/// Header-row guess: a row looks like a header when its lowercased join
/// contains any of the well-known column tokens.
pub fn looks_like_header(row: &[String]) -> bool {
    let joined = row
        .iter()
        .filter(|c| !c.is_empty())
        .map(|c| c.to_lowercase())
        .collect::<Vec<_>>()
        .join("|");
    ["dmm_id", "chapter", "scan", "teitok_id", "term"]
        .iter()
        .any(|token| joined.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scalar() {
        assert_eq!(normalize_scalar("  17.0 "), "17");
        assert_eq!(normalize_scalar("3.000"), "3");
        assert_eq!(normalize_scalar("1.10"), "1.10");
        assert_eq!(normalize_scalar("#n/a"), "");
        assert_eq!(normalize_scalar("a  b\tc"), "a b c");
    }

    #[test]
    fn test_expand_chapter_key() {
        assert_eq!(expand_chapter_key("3.29;3.30"), vec!["3.29", "3.30"]);
        assert_eq!(expand_chapter_key(" 3.29 "), vec!["3.29"]);
        assert!(expand_chapter_key("#N/A").is_empty());
        assert!(expand_chapter_key("").is_empty());
    }

    #[test]
    fn test_unique_join() {
        assert_eq!(unique_join(["a", "b", "a", "", "#N/A", "b"]), "a; b");
        assert_eq!(unique_join(Vec::<String>::new()), "");
    }

    #[test]
    fn test_berendes_book_num() {
        assert_eq!(berendes_book_num("3.29"), "3");
        assert_eq!(berendes_book_num("pref.1"), "");
        assert_eq!(berendes_book_num(""), "");
    }

    #[test]
    fn test_chapter_sort_key_order() {
        assert!(chapter_sort_key("1.4.5") < chapter_sort_key("1.10"));
        assert!(chapter_sort_key("2") < chapter_sort_key("10"));
        assert!(chapter_sort_key("3.9") < chapter_sort_key("3.appendix"));
    }

    #[test]
    fn test_looks_like_header() {
        let hdr = vec!["dmm_id".to_string(), "beck_greek_lemma".to_string()];
        assert!(looks_like_header(&hdr));
        let data = vec!["DMM1001".to_string(), "ἶρις".to_string()];
        assert!(!looks_like_header(&data));
    }
}
