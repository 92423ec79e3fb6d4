//! Canonical citation rows built from the revised per-edition TSVs.
//!
//! Each source file carries its own header convention and column vocabulary;
//! a per-file config maps columns onto the canonical citation schema.
//! Unmapped columns are preserved in `extra_json` (compact, sorted keys) so
//! no source data is lost. Citation refs are synthesized from whatever
//! identifying components a row has, and collisions inside an edition are
//! resolved by suffixing the source row.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::error::{ConcordError, Result};

pub const CITATIONS_HEADER: &[&str] = &[
    "edition_id",
    "citation_ref",
    "source_file",
    "source_row",
    "book_label",
    "book_num",
    "chapter_label",
    "chapter_num",
    "page_label",
    "scan_id",
    "iiif_key",
    "headword",
    "headword_greek",
    "headword_latin",
    "headword_english",
    "notes",
    "extra_json",
];

static ROMAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[IVXLCDM]+\b").expect("roman numeral regex"));
static ROMAN_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(CAP\.?|CHAP\.?|CAPIT\.?|CAPITUL\.?|LIB\.?|LIBER)\s+").expect("prefix regex")
});
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Normal,
    /// Header line split on whitespace rather than tabs (beck.tsv).
    SpaceHeader,
    NoHeader,
}

pub struct SourceConfig {
    pub edition_id: &'static str,
    pub header_mode: HeaderMode,
    pub headers: &'static [&'static str],
    /// (source column, citation field) pairs.
    pub column_map: &'static [(&'static str, &'static str)],
    pub citation_ref_source: Option<&'static str>,
    pub skip: bool,
}

const fn config(
    edition_id: &'static str,
    header_mode: HeaderMode,
    column_map: &'static [(&'static str, &'static str)],
) -> SourceConfig {
    SourceConfig {
        edition_id,
        header_mode,
        headers: &[],
        column_map,
        citation_ref_source: None,
        skip: false,
    }
}

pub static SOURCE_CONFIGS: &[(&str, SourceConfig)] = &[
    (
        "barbaro.tsv",
        config(
            "barbaro",
            HeaderMode::Normal,
            &[
                ("barbaro_iiif", "iiif_key"),
                ("barbaro_page", "page_label"),
                ("barbaro_term", "headword"),
                ("barbaro_chapter", "chapter_label"),
            ],
        ),
    ),
    (
        "beck.tsv",
        SourceConfig {
            edition_id: "beck",
            header_mode: HeaderMode::SpaceHeader,
            headers: &[],
            column_map: &[
                ("beck_id", "citation_ref"),
                ("beck_greek_name", "headword_greek"),
                ("beck_english_name", "headword_english"),
            ],
            citation_ref_source: Some("beck_id"),
            skip: false,
        },
    ),
    (
        "berendes.tsv",
        SourceConfig {
            edition_id: "berendes",
            header_mode: HeaderMode::Normal,
            headers: &[],
            column_map: &[
                ("berendes_book.chapter", "citation_ref"),
                ("berendes_name", "headword"),
            ],
            citation_ref_source: Some("berendes_book.chapter"),
            skip: false,
        },
    ),
    (
        "editions_table.tsv",
        SourceConfig {
            edition_id: "editions_table",
            header_mode: HeaderMode::Normal,
            headers: &[],
            column_map: &[],
            citation_ref_source: None,
            skip: true,
        },
    ),
    (
        "gunther.tsv",
        config(
            "gunther",
            HeaderMode::Normal,
            &[
                ("book", "book_num"),
                ("chapter", "chapter_num"),
                ("chapter_title", "headword"),
                ("chapter_description", "notes"),
            ],
        ),
    ),
    (
        "laguna.tsv",
        config(
            "laguna",
            HeaderMode::Normal,
            &[
                ("laguna_scan_id", "scan_id"),
                ("laguna_book", "book_label"),
                ("laguna_page", "page_label"),
                ("laguna_chapter", "chapter_label"),
                ("laguna_title", "headword"),
                ("laguna_iiif", "iiif_key"),
            ],
        ),
    ),
    (
        "lusitanus.tsv",
        config(
            "lusitanus",
            HeaderMode::Normal,
            &[
                ("lusitanus_iiif", "iiif_key"),
                ("lusitanus_entry", "headword"),
                ("lusitanus_chapter", "chapter_label"),
            ],
        ),
    ),
    (
        "matthioli.tsv",
        config(
            "matthioli",
            HeaderMode::Normal,
            &[
                ("mattioli_chapter", "chapter_label"),
                ("mattioli_book", "book_num"),
                ("mattioli_greek", "headword_greek"),
                ("mattioli_latin", "headword_latin"),
            ],
        ),
    ),
    (
        "moulins.tsv",
        config(
            "desmoulins",
            HeaderMode::Normal,
            &[
                ("desmoulins_page", "page_label"),
                ("desmoulins_term", "headword"),
                ("desmoulins_book", "book_num"),
                ("desmoulins_chapter", "chapter_label"),
            ],
        ),
    ),
    (
        "ruel.tsv",
        config(
            "ruellius",
            HeaderMode::Normal,
            &[
                ("ruel_web", "extra_json"),
                ("ruel_book", "book_label"),
                ("ruel_page", "page_label"),
                ("ruel_chapter", "chapter_label"),
                ("ruel_entry", "headword"),
            ],
        ),
    ),
    (
        "wechel.tsv",
        config(
            "wechel",
            HeaderMode::Normal,
            &[
                ("wechel_scan_id", "scan_id"),
                ("wechel_book", "book_label"),
                ("wechel_page", "page_label"),
                ("wechel_title", "headword"),
                ("wechel_chapter", "chapter_label"),
            ],
        ),
    ),
    (
        "wellmann.tsv",
        SourceConfig {
            edition_id: "wellmann",
            header_mode: HeaderMode::NoHeader,
            headers: &["book_num", "chapter_num", "headword_greek"],
            column_map: &[
                ("book_num", "book_num"),
                ("chapter_num", "chapter_num"),
                ("headword_greek", "headword_greek"),
            ],
            citation_ref_source: None,
            skip: false,
        },
    ),
];

// === Parsing helpers ===

pub fn normalize_ref_component(value: &str) -> String {
    WS_RE.replace_all(value.trim(), "_").replace('|', "/")
}

pub fn parse_int(value: &str) -> Option<i64> {
    let v = value.trim();
    if v.is_empty() || !v.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    v.parse().ok()
}

/// Parse a Roman numeral, ignoring `CAP.`/`LIB.`-style prefixes. The additive
/// form `IIII` is accepted as 4.
pub fn parse_roman(value: &str) -> Option<i64> {
    let v = value.trim().to_uppercase();
    if v.is_empty() {
        return None;
    }
    let v = ROMAN_PREFIX_RE.replace(&v, "");
    let roman = ROMAN_RE.find(&v)?.as_str();
    if roman == "IIII" {
        return Some(4);
    }
    let digit = |c: char| -> Option<i64> {
        Some(match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        })
    };
    let mut total = 0i64;
    let mut prev = 0i64;
    for c in roman.chars().rev() {
        let val = digit(c)?;
        if val < prev {
            total -= val;
        } else {
            total += val;
            prev = val;
        }
    }
    Some(total)
}

/// Sort key placing plain numbers first, then folio labels (`12r` before
/// `12v`), then everything else lexically.
pub fn page_label_sort_key(label: &str) -> (u8, i64, u8, String) {
    static FOLIO_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(\d+)([rv])$").expect("folio regex"));
    let v = label.trim().to_lowercase();
    if v.is_empty() {
        return (2, 0, 0, String::new());
    }
    if let Some(n) = parse_int(&v) {
        return (0, n, 0, v);
    }
    if let Some(caps) = FOLIO_RE.captures(&v) {
        if let Ok(num) = caps[1].parse::<i64>() {
            let side = u8::from(&caps[2] == "v");
            return (1, num, side, v);
        }
    }
    (2, 0, 0, v)
}

// === Citation rows ===

#[derive(Debug, Default, Clone)]
pub struct Citation {
    pub edition_id: String,
    pub citation_ref: String,
    pub source_file: String,
    pub source_row: u32,
    pub book_label: Option<String>,
    pub book_num: Option<String>,
    pub chapter_label: Option<String>,
    pub chapter_num: Option<String>,
    pub page_label: Option<String>,
    pub scan_id: Option<String>,
    pub iiif_key: Option<String>,
    pub headword: Option<String>,
    pub headword_greek: Option<String>,
    pub headword_latin: Option<String>,
    pub headword_english: Option<String>,
    pub notes: Option<String>,
    pub extra_json: Option<String>,
}

impl Citation {
    fn set_field(&mut self, target: &str, value: Option<String>) {
        match target {
            "citation_ref" => self.citation_ref = value.unwrap_or_default(),
            "book_label" => self.book_label = value,
            "book_num" => self.book_num = value,
            "chapter_label" => self.chapter_label = value,
            "chapter_num" => self.chapter_num = value,
            "page_label" => self.page_label = value,
            "scan_id" => self.scan_id = value,
            "iiif_key" => self.iiif_key = value,
            "headword" => self.headword = value,
            "headword_greek" => self.headword_greek = value,
            "headword_latin" => self.headword_latin = value,
            "headword_english" => self.headword_english = value,
            "notes" => self.notes = value,
            _ => {}
        }
    }
}

fn opt(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

fn build_citation_ref(row: &Citation) -> String {
    if !row.citation_ref.is_empty() {
        return row.citation_ref.clone();
    }
    let mut components: Vec<String> = Vec::new();
    if !opt(&row.book_num).is_empty() {
        components.push(format!("b{}", normalize_ref_component(opt(&row.book_num))));
    } else if !opt(&row.book_label).is_empty() {
        components.push(format!("b{}", normalize_ref_component(opt(&row.book_label))));
    }
    if !opt(&row.chapter_num).is_empty() {
        components.push(format!("c{}", normalize_ref_component(opt(&row.chapter_num))));
    } else if !opt(&row.chapter_label).is_empty() {
        components.push(format!("c{}", normalize_ref_component(opt(&row.chapter_label))));
    }
    if !opt(&row.page_label).is_empty() {
        components.push(format!("p{}", normalize_ref_component(opt(&row.page_label))));
    }
    if !opt(&row.scan_id).is_empty() {
        components.push(format!("s{}", normalize_ref_component(opt(&row.scan_id))));
    }
    if !opt(&row.iiif_key).is_empty() {
        components.push(format!("i{}", normalize_ref_component(opt(&row.iiif_key))));
    }
    if components.is_empty() && !opt(&row.headword).is_empty() {
        components.push(format!("h{}", normalize_ref_component(opt(&row.headword))));
    }
    if components.is_empty() {
        components.push(format!("row{}", row.source_row));
    }
    components.join("|")
}

type RawRow = (Vec<(String, String)>, u32);

fn read_tsv_rows(path: &Path, config: &SourceConfig) -> Result<Vec<RawRow>> {
    let content = fs::read_to_string(path)?;
    let mut out: Vec<RawRow> = Vec::new();

    let (headers, body, first_row_num): (Vec<String>, &str, u32) = match config.header_mode {
        HeaderMode::SpaceHeader => {
            let Some((header_line, rest)) = content.split_once('\n') else {
                return Ok(out);
            };
            let headers = header_line.split_whitespace().map(str::to_string).collect();
            (headers, rest, 2)
        }
        HeaderMode::NoHeader => (
            config.headers.iter().map(|h| (*h).to_string()).collect(),
            content.as_str(),
            1,
        ),
        HeaderMode::Normal => {
            let Some((header_line, rest)) = content.split_once('\n') else {
                return Ok(out);
            };
            let headers = header_line
                .trim_end_matches('\r')
                .split('\t')
                .map(str::to_string)
                .collect();
            (headers, rest, 2)
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut row_num = first_row_num;
    for record in reader.records() {
        let record = record?;
        let mut data: Vec<(String, String)> = Vec::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            data.push((header.clone(), record.get(i).unwrap_or("").to_string()));
        }
        out.push((data, row_num));
        row_num += 1;
    }
    Ok(out)
}

fn normalize_row(
    raw_row: &[(String, String)],
    source_row: u32,
    source_file: &str,
    edition_id: &str,
    config: &SourceConfig,
) -> Result<Citation> {
    let mut row = Citation {
        edition_id: edition_id.to_string(),
        source_file: source_file.to_string(),
        source_row,
        ..Default::default()
    };
    let mut extra: BTreeMap<String, Value> = BTreeMap::new();

    for (src_key, value) in raw_row {
        let value = value.trim();
        let target = config
            .column_map
            .iter()
            .find(|(k, _)| k == src_key)
            .map(|(_, t)| *t);
        match target {
            Some("extra_json") => {
                if !value.is_empty() {
                    extra.insert(src_key.clone(), Value::String(value.to_string()));
                }
            }
            Some(target @ ("book_num" | "chapter_num")) => {
                let resolved = match parse_int(value) {
                    Some(n) => Some(n.to_string()),
                    None if value.is_empty() => None,
                    None => Some(value.to_string()),
                };
                row.set_field(target, resolved);
            }
            Some(target) => {
                row.set_field(
                    target,
                    (!value.is_empty()).then(|| value.to_string()),
                );
            }
            None => {
                if !value.is_empty() {
                    extra.insert(src_key.clone(), Value::String(value.to_string()));
                }
            }
        }
    }

    // Derive book/chapter numbers from labels, trying Roman numerals too.
    if opt(&row.book_num).is_empty() {
        if let Some(label) = row.book_label.clone() {
            if let Some(n) = parse_int(&label).or_else(|| parse_roman(&label)) {
                row.book_num = Some(n.to_string());
            }
        }
    }
    if opt(&row.chapter_num).is_empty() {
        if let Some(label) = row.chapter_label.clone() {
            if let Some(n) = parse_int(&label).or_else(|| parse_roman(&label)) {
                row.chapter_num = Some(n.to_string());
            }
        }
    }

    // Berendes refs are "book.chapter" and populate both numbers.
    if config.citation_ref_source == Some("berendes_book.chapter") && !row.citation_ref.is_empty() {
        let parts: Vec<&str> = row.citation_ref.split('.').collect();
        if parts.len() == 2 {
            if let Some(book) = parse_int(parts[0]) {
                row.book_num = Some(book.to_string());
            }
            if let Some(chapter) = parse_int(parts[1]) {
                row.chapter_num = Some(chapter.to_string());
            }
        }
    }

    row.citation_ref = build_citation_ref(&row);
    if !extra.is_empty() {
        row.extra_json = Some(serde_json::to_string(&extra)?);
    }
    Ok(row)
}

fn resolve_citation_ref_collisions(rows: &mut [Citation]) -> Result<()> {
    let mut by_key: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_key
            .entry((row.edition_id.clone(), row.citation_ref.clone()))
            .or_default()
            .push(i);
    }
    for ((_, base_ref), group) in by_key {
        if group.len() <= 1 {
            continue;
        }
        for i in group {
            let row = &mut rows[i];
            let resolved = format!("{base_ref}-r{}", row.source_row);
            row.citation_ref = resolved.clone();
            let mut extra: BTreeMap<String, Value> = match &row.extra_json {
                Some(json) => serde_json::from_str(json).unwrap_or_else(|_| {
                    let mut m = BTreeMap::new();
                    m.insert(
                        "_extra_json_parse_error".to_string(),
                        Value::String(json.clone()),
                    );
                    m
                }),
                None => BTreeMap::new(),
            };
            extra.insert(
                "citation_ref_collision".to_string(),
                serde_json::json!({ "base": base_ref, "resolved": resolved }),
            );
            row.extra_json = Some(serde_json::to_string(&extra)?);
        }
    }
    Ok(())
}

fn none_last(value: &Option<String>) -> (u8, String) {
    match value.as_deref() {
        None | Some("") => (1, String::new()),
        Some(v) => (0, v.to_string()),
    }
}

fn none_last_num(value: &Option<String>) -> (u8, i64) {
    match value.as_deref() {
        None | Some("") => (1, 0),
        Some(v) => (0, v.parse().unwrap_or(0)),
    }
}

#[allow(clippy::type_complexity)]
fn sort_key(row: &Citation) -> (String, (u8, i64), (u8, String), (u8, i64), (u8, String), (u8, i64, u8, String), String, u32) {
    (
        row.edition_id.clone(),
        none_last_num(&row.book_num),
        none_last(&row.book_label),
        none_last_num(&row.chapter_num),
        none_last(&row.chapter_label),
        page_label_sort_key(opt(&row.page_label)),
        row.citation_ref.clone(),
        row.source_row,
    )
}

/// Build the canonical citation list from every `*.tsv` under `revised_ed_dir`.
pub fn build_citations(revised_ed_dir: &Path) -> Result<Vec<Citation>> {
    if !revised_ed_dir.is_dir() {
        return Err(ConcordError::InputNotFound(revised_ed_dir.to_path_buf()));
    }
    let mut paths: Vec<std::path::PathBuf> = fs::read_dir(revised_ed_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "tsv").unwrap_or(false))
        .collect();
    paths.sort();

    // Unknown files still flow through, with everything landing in
    // extra_json under the file stem as edition id.
    const FALLBACK: SourceConfig = config("", HeaderMode::Normal, &[]);

    let mut rows: Vec<Citation> = Vec::new();
    for path in paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let config = SOURCE_CONFIGS
            .iter()
            .find(|(name, _)| *name == file_name)
            .map(|(_, c)| c)
            .unwrap_or(&FALLBACK);
        if config.skip {
            continue;
        }
        let edition_id = if config.edition_id.is_empty() { stem.as_str() } else { config.edition_id };
        let source_file = format!("revised_ed/{file_name}");
        for (raw_row, row_num) in read_tsv_rows(&path, config)? {
            rows.push(normalize_row(&raw_row, row_num, &source_file, edition_id, config)?);
        }
    }

    resolve_citation_ref_collisions(&mut rows)?;
    rows.sort_by_key(sort_key);
    info!(rows = rows.len(), "built citations");
    Ok(rows)
}

pub fn write_citations(path: &Path, rows: &[Citation]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CITATIONS_HEADER)?;
    for row in rows {
        writer.write_record([
            row.edition_id.as_str(),
            row.citation_ref.as_str(),
            row.source_file.as_str(),
            &row.source_row.to_string(),
            opt(&row.book_label),
            opt(&row.book_num),
            opt(&row.chapter_label),
            opt(&row.chapter_num),
            opt(&row.page_label),
            opt(&row.scan_id),
            opt(&row.iiif_key),
            opt(&row.headword),
            opt(&row.headword_greek),
            opt(&row.headword_latin),
            opt(&row.headword_english),
            opt(&row.notes),
            opt(&row.extra_json),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Build `citations.csv` under `out_dir` from the revised edition TSVs.
pub fn run(revised_ed_dir: &Path, out_dir: &Path) -> Result<()> {
    let rows = build_citations(revised_ed_dir)?;
    write_citations(&out_dir.join("citations.csv"), &rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_int_strict_digits() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int(" 7 "), Some(7));
        assert_eq!(parse_int("4.2"), None);
        assert_eq!(parse_int("-3"), None);
        assert_eq!(parse_int(""), None);
    }

    #[test]
    fn test_parse_roman() {
        assert_eq!(parse_roman("IV"), Some(4));
        assert_eq!(parse_roman("IIII"), Some(4));
        assert_eq!(parse_roman("xiv"), Some(14));
        assert_eq!(parse_roman("CAP. XII"), Some(12));
        assert_eq!(parse_roman("LIB. III"), Some(3));
        assert_eq!(parse_roman("not a numeral 12"), None);
        assert_eq!(parse_roman(""), None);
    }

    #[test]
    fn test_page_label_sort_order() {
        let mut labels = vec!["12v", "3", "12r", "12", "appendix"];
        labels.sort_by_key(|l| page_label_sort_key(l));
        assert_eq!(labels, vec!["3", "12", "12r", "12v", "appendix"]);
    }

    #[test]
    fn test_citation_ref_components() {
        let row = Citation {
            book_num: Some("1".to_string()),
            chapter_label: Some("Cap 12".to_string()),
            page_label: Some("33".to_string()),
            source_row: 9,
            ..Default::default()
        };
        assert_eq!(build_citation_ref(&row), "b1|cCap_12|p33");
        let bare = Citation { source_row: 9, ..Default::default() };
        assert_eq!(build_citation_ref(&bare), "row9");
        let head_only = Citation {
            headword: Some("Iris | illyrica".to_string()),
            source_row: 2,
            ..Default::default()
        };
        assert_eq!(build_citation_ref(&head_only), "hIris_/_illyrica");
    }

    #[test]
    fn test_space_header_and_no_header_modes() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("beck.tsv"),
            "beck_id   beck_greek_name   beck_english_name\nDMM1001\t\u{1f36}\u{3c1}\u{3b9}\u{3c2}\tiris\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("wellmann.tsv"), "1\t1\t\u{1f36}\u{3c1}\u{3b9}\u{3c2}\n").unwrap();
        let rows = build_citations(dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        let beck = rows.iter().find(|r| r.edition_id == "beck").unwrap();
        assert_eq!(beck.citation_ref, "DMM1001");
        assert_eq!(beck.source_row, 2);
        assert_eq!(beck.headword_english.as_deref(), Some("iris"));
        let well = rows.iter().find(|r| r.edition_id == "wellmann").unwrap();
        assert_eq!(well.source_row, 1);
        assert_eq!(well.book_num.as_deref(), Some("1"));
        assert_eq!(well.citation_ref, "b1|c1");
    }

    #[test]
    fn test_unmapped_columns_go_to_extra_json() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("laguna.tsv"),
            "laguna_scan_id\tlaguna_book\tlaguna_page\tlaguna_chapter\tlaguna_title\tlaguna_iiif\tlaguna_comment\n\
             55\tII\t13\t1\tIris\t\tsmudged\n",
        )
        .unwrap();
        let rows = build_citations(dir.path()).unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.book_label.as_deref(), Some("II"));
        // Roman book label is parsed into book_num.
        assert_eq!(r.book_num.as_deref(), Some("2"));
        assert_eq!(r.extra_json.as_deref(), Some(r#"{"laguna_comment":"smudged"}"#));
    }

    #[test]
    fn test_collision_resolution_appends_source_row() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("gunther.tsv"),
            "book\tchapter\tchapter_title\tchapter_description\n\
             5\t104\tCHRUSOKOLLA\tMalachite\n\
             5\t104\tCHRUSOKOLLA BIS\tDuplicate\n",
        )
        .unwrap();
        let rows = build_citations(dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].citation_ref, "b5|c104-r2");
        assert_eq!(rows[1].citation_ref, "b5|c104-r3");
        let extra = rows[0].extra_json.as_deref().unwrap();
        assert!(extra.contains(r#""citation_ref_collision":{"base":"b5|c104","resolved":"b5|c104-r2"}"#));
    }

    #[test]
    fn test_berendes_ref_populates_numbers() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("berendes.tsv"),
            "berendes_book.chapter\tberendes_name\n1.10\tIris\n",
        )
        .unwrap();
        let rows = build_citations(dir.path()).unwrap();
        assert_eq!(rows[0].citation_ref, "1.10");
        assert_eq!(rows[0].book_num.as_deref(), Some("1"));
        assert_eq!(rows[0].chapter_num.as_deref(), Some("10"));
    }

    #[test]
    fn test_editions_table_is_skipped_and_unknown_files_fall_back() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("editions_table.tsv"), "a\tb\nx\ty\n").unwrap();
        std::fs::write(dir.path().join("mystery.tsv"), "colx\tcoly\nfoo\tbar\n").unwrap();
        let rows = build_citations(dir.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].edition_id, "mystery");
        assert_eq!(rows[0].citation_ref, "row2");
        assert_eq!(rows[0].extra_json.as_deref(), Some(r#"{"colx":"foo","coly":"bar"}"#));
    }
}
