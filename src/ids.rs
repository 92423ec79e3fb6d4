//! Stable master-ID assignment over the wide concordance, plus semantic
//! QA flags for rows whose Greek lemmas disagree across editions.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::Result;
use crate::norm::chapter_sort_key;
use crate::tabular::{read_csv, write_csv, RowMap};

static RE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s·.;,()\[\]{}\-_/\\]+").expect("punct regex"));

fn strip_diacritics(s: &str) -> String {
    s.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

fn norm_token(s: &str) -> String {
    let s = strip_diacritics(s).to_lowercase();
    RE_PUNCT.replace_all(&s, "").into_owned()
}

/// Similarity of two lemmas after diacritics/casing/punctuation are removed.
///
/// An empty side compares as 1.0: absence of a lemma is not evidence of a
/// misalignment.
pub fn lemma_ratio(a: &str, b: &str) -> f64 {
    let na = norm_token(a);
    let nb = norm_token(b);
    if na.is_empty() || nb.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(&na, &nb)
}

pub struct IdOptions {
    pub prefix: String,
    pub start: usize,
    pub flag_threshold: f64,
}

impl Default for IdOptions {
    fn default() -> Self {
        Self {
            prefix: "MMK".to_string(),
            start: 1,
            flag_threshold: 0.80,
        }
    }
}

fn row_field(r: &RowMap, key: &str) -> String {
    r.get(key).cloned().unwrap_or_default()
}

/// Assign `mm_id`s to concordance rows and write the three outputs under
/// `out_dir`.
pub fn run(in_path: &Path, out_dir: &Path, opts: &IdOptions) -> Result<()> {
    let (headers, all_rows) = read_csv(in_path)?;
    let mut rows: Vec<RowMap> = all_rows
        .into_iter()
        .filter(|r| !row_field(r, "chapter_key").trim().is_empty())
        .collect();
    rows.sort_by_key(|r| chapter_sort_key(&row_field(r, "chapter_key")));

    // mm_id width leaves headroom beyond the current row count.
    let width = (opts.start + rows.len() + 10).to_string().len();

    let mut out_rows: Vec<RowMap> = Vec::new();
    let mut index_rows: Vec<RowMap> = Vec::new();
    let mut flags: Vec<RowMap> = Vec::new();

    for (offset, r) in rows.iter().enumerate() {
        let i = opts.start + offset;
        let mm_id = format!("{}{:0width$}", opts.prefix, i, width = width);

        let mut r2 = r.clone();
        r2.insert("mm_id".to_string(), mm_id.clone());
        out_rows.push(r2);

        let mut idx = RowMap::new();
        idx.insert("mm_id".to_string(), mm_id.clone());
        for f in ["chapter_key", "berendes_term", "beck_greek_lemma", "beck_latin_lemma"] {
            idx.insert(f.to_string(), row_field(r, f));
        }
        index_rows.push(idx);

        let r_bw = lemma_ratio(&row_field(r, "beck_greek_lemma"), &row_field(r, "wellmann_greek_lemma"));
        let r_bm = lemma_ratio(&row_field(r, "beck_greek_lemma"), &row_field(r, "matthiolo_greek"));
        if r_bw < opts.flag_threshold || r_bm < opts.flag_threshold {
            let mut flag = RowMap::new();
            flag.insert("mm_id".to_string(), mm_id);
            for f in [
                "chapter_key",
                "berendes_term",
                "beck_greek_lemma",
                "wellmann_greek_lemma",
                "matthiolo_greek",
            ] {
                flag.insert(f.to_string(), row_field(r, f));
            }
            flag.insert("ratio_beck_wellmann".to_string(), format!("{r_bw:.3}"));
            flag.insert("ratio_beck_matthiolo".to_string(), format!("{r_bm:.3}"));
            flags.push(flag);
        }
    }

    let mut fieldnames: Vec<&str> = vec!["mm_id"];
    fieldnames.extend(headers.iter().map(String::as_str).filter(|h| *h != "mm_id"));
    write_csv(&out_dir.join("master_concordance_mm.csv"), &fieldnames, &out_rows)?;

    write_csv(
        &out_dir.join("master_key_index.csv"),
        &["mm_id", "chapter_key", "berendes_term", "beck_greek_lemma", "beck_latin_lemma"],
        &index_rows,
    )?;

    write_csv(
        &out_dir.join("semantic_alignment_flags.csv"),
        &[
            "mm_id",
            "chapter_key",
            "berendes_term",
            "beck_greek_lemma",
            "wellmann_greek_lemma",
            "matthiolo_greek",
            "ratio_beck_wellmann",
            "ratio_beck_matthiolo",
        ],
        &flags,
    )?;

    info!(
        rows = out_rows.len(),
        flagged = flags.len(),
        threshold = opts.flag_threshold,
        "assigned master ids"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_norm_token_strips_diacritics_and_punct() {
        assert_eq!(norm_token("ἶρις"), "ιρις");
        assert_eq!(norm_token("Iris; (illyrica)"), "irisillyrica");
        assert_eq!(norm_token("  "), "");
    }

    #[test]
    fn test_lemma_ratio_empty_sides() {
        assert_eq!(lemma_ratio("", "anything"), 1.0);
        assert_eq!(lemma_ratio("·;,", "x"), 1.0);
        assert!(lemma_ratio("ἶρις", "ιρις") > 0.99);
        assert!(lemma_ratio("iris", "calamus") < 0.5);
    }

    #[test]
    fn test_run_assigns_sorted_padded_ids() {
        let dir = tempdir().unwrap();
        let in_path = dir.path().join("master_concordance.csv");
        std::fs::write(
            &in_path,
            "chapter_key,berendes_term,beck_greek_lemma,wellmann_greek_lemma,matthiolo_greek\n\
             1.10,Ten,,,\n\
             1.2,Two,ἶρις,ἶρις,\n\
             ,Empty,,,\n\
             1.2.b,TwoB,κάλαμος,σχοῖνος,\n",
        )
        .unwrap();
        run(&in_path, dir.path(), &IdOptions::default()).unwrap();

        let (headers, rows) = read_csv(&dir.path().join("master_concordance_mm.csv")).unwrap();
        assert_eq!(headers[0], "mm_id");
        // Rows with an empty chapter_key are dropped, the rest sorted
        // numerically: 1.2 < 1.2.b < 1.10.
        let keys: Vec<&str> = rows.iter().map(|r| r["chapter_key"].as_str()).collect();
        assert_eq!(keys, vec!["1.2", "1.2.b", "1.10"]);
        assert_eq!(rows[0]["mm_id"], "MMK01");
        assert_eq!(rows[2]["mm_id"], "MMK03");

        let (_, flags) = read_csv(&dir.path().join("semantic_alignment_flags.csv")).unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0]["chapter_key"], "1.2.b");
    }
}
