//! Cross-checks over the citation and IIIF artifacts.
//!
//! Re-derives the needs-review queues from the written CSVs instead of
//! trusting the builder's in-memory state, then writes a coverage report.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::iiif::{
    AMBIGUOUS_FIELDS, BAD_ROWS_FIELDS, MISSING_IIIF_FIELDS, MISSING_MANIFEST_FIELDS,
    NON_TEI_IN_SCOPE,
};
use crate::tabular::{read_csv, write_csv, write_text, RowMap};

const CITATIONS_REQUIRED: &[&str] = &["edition_id", "citation_ref", "source_file", "source_row"];
const CITATION_IIIF_REQUIRED: &[&str] = &["edition_id", "citation_ref", "status"];
const IIIF_MANIFEST_REQUIRED: &[&str] = &["edition_id", "status"];

fn get(row: &RowMap, key: &str) -> String {
    row.get(key).cloned().unwrap_or_default()
}

fn row(pairs: &[(&str, &str)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn pair_key(r: &RowMap) -> (String, String) {
    (get(r, "edition_id"), get(r, "citation_ref"))
}

fn missing_columns(headers: &[String], required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .map(|c| (*c).to_string())
        .collect()
}

pub fn validate(
    citations_csv: &Path,
    manifests_csv: &Path,
    iiif_map_csv: &Path,
    out_dir: &Path,
) -> Result<()> {
    let (citation_headers, citations) = read_csv(citations_csv)?;
    let (manifest_headers, manifests) = read_csv(manifests_csv)?;
    let (map_headers, iiif_map) = read_csv(iiif_map_csv)?;

    let mut bad_rows: Vec<RowMap> = Vec::new();
    let mut missing_iiif: Vec<RowMap> = Vec::new();
    let mut missing_manifest: Vec<RowMap> = Vec::new();
    let mut ambiguous: Vec<RowMap> = Vec::new();

    let mut check_columns = |name: &str, headers: &[String], required: &[&str], empty: bool| {
        if empty {
            return;
        }
        let missing = missing_columns(headers, required);
        if !missing.is_empty() {
            bad_rows.push(row(&[
                ("edition_id", ""),
                ("citation_ref", ""),
                ("reason", &format!("{name}_missing_columns:{}", missing.join(","))),
                ("source_file", ""),
                ("source_row", ""),
            ]));
        }
    };
    check_columns("citations", &citation_headers, CITATIONS_REQUIRED, citations.is_empty());
    check_columns("iiif_map", &map_headers, CITATION_IIIF_REQUIRED, iiif_map.is_empty());
    check_columns(
        "iiif_manifests",
        &manifest_headers,
        IIIF_MANIFEST_REQUIRED,
        manifests.is_empty(),
    );

    let mut citations_by_edition: BTreeMap<String, Vec<&RowMap>> = BTreeMap::new();
    for r in &citations {
        citations_by_edition.entry(get(r, "edition_id")).or_default().push(r);
    }
    let mut iiif_keys: BTreeMap<(String, String), Vec<&RowMap>> = BTreeMap::new();
    for r in &iiif_map {
        iiif_keys.entry(pair_key(r)).or_default().push(r);
    }
    let citation_keys: BTreeSet<(String, String)> = citations.iter().map(pair_key).collect();

    for ((edition_id, citation_ref), rows) in &iiif_keys {
        if rows.len() > 1 {
            let mut targets: Vec<String> = rows
                .iter()
                .map(|r| {
                    let canvas = get(r, "canvas_id");
                    if canvas.is_empty() { get(r, "target_url") } else { canvas }
                })
                .collect();
            targets.sort();
            targets.dedup();
            ambiguous.push(row(&[
                ("edition_id", edition_id),
                ("citation_ref", citation_ref),
                ("reason", "multiple_targets"),
                ("targets", &targets.join(";")),
            ]));
        }
    }

    for edition_id in NON_TEI_IN_SCOPE {
        let Some(edition_citations) = citations_by_edition.get(*edition_id) else {
            continue;
        };
        for r in edition_citations {
            let citation_ref = get(r, "citation_ref");
            if !iiif_keys.contains_key(&((*edition_id).to_string(), citation_ref.clone())) {
                missing_iiif.push(row(&[
                    ("edition_id", edition_id),
                    ("citation_ref", &citation_ref),
                    ("reason", "missing_iiif_target"),
                    ("citation_key_field", ""),
                    ("citation_key_value", ""),
                    ("source_file", &get(r, "source_file")),
                    ("source_row", &get(r, "source_row")),
                ]));
            }
        }
    }

    for r in &manifests {
        let status = get(r, "status");
        if status == "provisional" {
            missing_manifest.push(row(&[
                ("edition_id", &get(r, "edition_id")),
                ("reason", &get(r, "why_provisional")),
                ("manifest_url", &get(r, "manifest_url")),
                ("status", &status),
            ]));
            if get(r, "why_provisional").is_empty() {
                bad_rows.push(row(&[
                    ("edition_id", &get(r, "edition_id")),
                    ("citation_ref", ""),
                    ("reason", "provisional_missing_why_provisional"),
                    ("source_file", "iiif_manifests.csv"),
                    ("source_row", ""),
                ]));
            }
        }
        if status == "manifest_backed" && get(r, "manifest_url").is_empty() {
            bad_rows.push(row(&[
                ("edition_id", &get(r, "edition_id")),
                ("citation_ref", ""),
                ("reason", "manifest_backed_missing_manifest_url"),
                ("source_file", "iiif_manifests.csv"),
                ("source_row", ""),
            ]));
        }
    }

    for r in &iiif_map {
        if !citation_keys.contains(&pair_key(r)) {
            bad_rows.push(row(&[
                ("edition_id", &get(r, "edition_id")),
                ("citation_ref", &get(r, "citation_ref")),
                ("reason", "iiif_map_missing_citation"),
                ("source_file", "citation_iiif_map.csv"),
                ("source_row", ""),
            ]));
        }
        if get(r, "status") == "manifest_backed" && get(r, "manifest_url").is_empty() {
            bad_rows.push(row(&[
                ("edition_id", &get(r, "edition_id")),
                ("citation_ref", &get(r, "citation_ref")),
                ("reason", "iiif_map_manifest_backed_missing_manifest_url"),
                ("source_file", "citation_iiif_map.csv"),
                ("source_row", ""),
            ]));
        }
    }

    missing_iiif.sort_by_key(pair_key);
    missing_manifest.sort_by_key(|r| get(r, "edition_id"));
    ambiguous.sort_by_key(pair_key);
    bad_rows.sort_by_key(pair_key);

    write_csv(&out_dir.join("needs_review_missing_iiif.csv"), MISSING_IIIF_FIELDS, &missing_iiif)?;
    write_csv(
        &out_dir.join("needs_review_missing_manifest.csv"),
        MISSING_MANIFEST_FIELDS,
        &missing_manifest,
    )?;
    write_csv(&out_dir.join("needs_review_ambiguous_iiif.csv"), AMBIGUOUS_FIELDS, &ambiguous)?;
    write_csv(&out_dir.join("needs_review_bad_rows.csv"), BAD_ROWS_FIELDS, &bad_rows)?;

    let mut lines: Vec<String> = Vec::new();
    lines.push("# Phase 1 Validation Report".to_string());
    lines.push(String::new());
    lines.push("Inputs:".to_string());
    lines.push(format!("- citations.csv: {} rows", citations.len()));
    lines.push(format!("- citation_iiif_map.csv: {} rows", iiif_map.len()));
    lines.push(format!("- iiif_manifests.csv: {} rows", manifests.len()));
    lines.push(String::new());
    lines.push("Coverage (non-TEI editions in scope):".to_string());
    for edition_id in NON_TEI_IN_SCOPE {
        let Some(edition_citations) = citations_by_edition.get(*edition_id) else {
            continue;
        };
        let total = edition_citations.len();
        let mapped = edition_citations
            .iter()
            .filter(|r| {
                iiif_keys.contains_key(&((*edition_id).to_string(), get(r, "citation_ref")))
            })
            .count();
        let pct = if total == 0 {
            0
        } else {
            ((mapped * 100) as f64 / total as f64).round_ties_even() as i64
        };
        let status = manifests
            .iter()
            .find(|m| get(m, "edition_id") == *edition_id)
            .map(|m| get(m, "status"))
            .unwrap_or_default();
        lines.push(format!("- {edition_id}: {mapped}/{total} ({pct}%) status={status}"));
    }
    lines.push(String::new());
    lines.push("Provisional manifests:".to_string());
    if missing_manifest.is_empty() {
        lines.push("- none".to_string());
    } else {
        for r in &missing_manifest {
            lines.push(format!("- {}: {}", get(r, "edition_id"), get(r, "reason")));
        }
    }
    lines.push(String::new());
    lines.push("Needs review counts:".to_string());
    lines.push(format!("- needs_review_missing_manifest.csv: {}", missing_manifest.len()));
    lines.push(format!("- needs_review_missing_iiif.csv: {}", missing_iiif.len()));
    lines.push(format!("- needs_review_ambiguous_iiif.csv: {}", ambiguous.len()));
    lines.push(format!("- needs_review_bad_rows.csv: {}", bad_rows.len()));

    write_text(&out_dir.join("validation_report.md"), &(lines.join("\n") + "\n"))?;
    info!(
        bad_rows = bad_rows.len(),
        missing_iiif = missing_iiif.len(),
        "validation complete"
    );
    Ok(())
}

/// Validate `citations.csv`, `iiif_manifests.csv` and `citation_iiif_map.csv`
/// under `in_dir`, rewriting the review queues and report under `out_dir`.
pub fn run(in_dir: &Path, out_dir: &Path) -> Result<()> {
    validate(
        &in_dir.join("citations.csv"),
        &in_dir.join("iiif_manifests.csv"),
        &in_dir.join("citation_iiif_map.csv"),
        out_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_coverage_and_queues() {
        let dir = tempdir().unwrap();
        let p = dir.path();
        write(
            p,
            "citations.csv",
            "edition_id,citation_ref,source_file,source_row\n\
             wechel,b1|c1,revised_ed/wechel.tsv,2\n\
             wechel,b1|c2,revised_ed/wechel.tsv,3\n\
             gunther,b1|c1,revised_ed/gunther.tsv,2\n",
        );
        write(
            p,
            "iiif_manifests.csv",
            "edition_id,manifest_url,status,why_provisional\n\
             wechel,,provisional,awaiting stable host\n\
             laguna,,manifest_backed,\n",
        );
        write(
            p,
            "citation_iiif_map.csv",
            "edition_id,citation_ref,manifest_url,canvas_id,target_url,status\n\
             wechel,b1|c1,,,https://img.example/005.jpg,provisional\n\
             stray,b9|c9,,,https://img.example/x.jpg,provisional\n",
        );
        run(p, p).unwrap();

        let report = std::fs::read_to_string(p.join("validation_report.md")).unwrap();
        assert!(report.contains("- wechel: 1/2 (50%) status=provisional"));
        assert!(report.contains("- citations.csv: 3 rows"));
        assert!(report.contains("- wechel: awaiting stable host"));

        let missing = std::fs::read_to_string(p.join("needs_review_missing_iiif.csv")).unwrap();
        assert!(missing.contains("wechel,b1|c2,missing_iiif_target"));
        // TEI editions are out of scope for the coverage queue.
        assert!(!missing.contains("gunther"));

        let bad = std::fs::read_to_string(p.join("needs_review_bad_rows.csv")).unwrap();
        assert!(bad.contains("stray,b9|c9,iiif_map_missing_citation"));
        assert!(bad.contains("laguna,,manifest_backed_missing_manifest_url"));
    }

    #[test]
    fn test_citations_to_validation_chain() {
        let dir = tempdir().unwrap();
        let p = dir.path();
        let revised = p.join("revised_ed");
        std::fs::create_dir_all(&revised).unwrap();
        std::fs::write(
            revised.join("wechel.tsv"),
            "wechel_scan_id\twechel_book\twechel_page\twechel_title\twechel_chapter\n\
             5\tI\t12\tIris\t1\n\
             6\tI\t13\tAkoron\t2\n",
        )
        .unwrap();
        crate::citations::run(&revised, p).unwrap();
        let first = std::fs::read_to_string(p.join("citations.csv")).unwrap();
        crate::citations::run(&revised, p).unwrap();
        let second = std::fs::read_to_string(p.join("citations.csv")).unwrap();
        assert_eq!(first, second);

        write(
            p,
            "iiif_manifests.csv",
            "edition_id,manifest_url,status,why_provisional\nwechel,https://m.example/w,manifest_backed,\n",
        );
        write(
            p,
            "iiif_source_rules.csv",
            "edition_id,iiif_kind,manifest_url,image_base_url,citation_key_field,target_rule,target_template,canvas_index_base,notes\n\
             wechel,image_api,,,scan_id,image_api_template,https://img.example/{{3%0%scan_id}}.jpg,,\n",
        );
        crate::iiif::run(p, p, &p.join("manifests")).unwrap();
        run(p, p).unwrap();

        let report = std::fs::read_to_string(p.join("validation_report.md")).unwrap();
        assert!(report.contains("- wechel: 2/2 (100%) status=manifest_backed"));
        assert!(report.contains("- needs_review_bad_rows.csv: 0"));
        let map = std::fs::read_to_string(p.join("citation_iiif_map.csv")).unwrap();
        assert!(map.contains("https://img.example/005.jpg"));
        assert!(map.contains("https://img.example/006.jpg"));
    }

    #[test]
    fn test_missing_required_columns_flagged() {
        let dir = tempdir().unwrap();
        let p = dir.path();
        write(p, "citations.csv", "edition_id,citation_ref\nwechel,b1|c1\n");
        write(p, "iiif_manifests.csv", "edition_id,status\n");
        write(p, "citation_iiif_map.csv", "edition_id,citation_ref,status\n");
        run(p, p).unwrap();
        let bad = std::fs::read_to_string(p.join("needs_review_bad_rows.csv")).unwrap();
        assert!(bad.contains("citations_missing_columns:source_file,source_row"));
    }
}
