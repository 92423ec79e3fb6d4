//! Comparison of the hand-curated rough Beck/Berendes mapping against the
//! generated edge and span exports.
//!
//! The rough TSV is ragged: short rows are padded and anything past the
//! seventh column is folded back into the Greek gloss column.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{ConcordError, Result};
use crate::tabular::{read_csv, write_csv, write_text, RowMap};

#[derive(Debug, Clone)]
pub struct RoughRow {
    pub beck_dmm_id: String,
    pub berendes_teitok_id: String,
}

pub fn read_rough(path: &Path) -> Result<Vec<RoughRow>> {
    if !path.exists() {
        return Err(ConcordError::InputNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for line in content.lines() {
        let mut cells: Vec<&str> = line.split('\t').collect();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        // Columns past the seventh belong to the final gloss field, which is
        // free text and may itself contain tabs. Only the first four columns
        // matter for pair comparison.
        cells.truncate(7);
        rows.push(RoughRow {
            beck_dmm_id: cells.first().map(|c| c.trim()).unwrap_or("").to_string(),
            berendes_teitok_id: cells.get(3).map(|c| c.trim()).unwrap_or("").to_string(),
        });
    }
    Ok(rows)
}

type Pair = (String, String);

fn pair_set(rows: &[RowMap]) -> BTreeSet<Pair> {
    rows.iter()
        .filter_map(|r| {
            let dmm = r.get("beck_dmm_id").map(|v| v.trim()).unwrap_or("");
            let teitok = r.get("berendes_teitok_id").map(|v| v.trim()).unwrap_or("");
            (!dmm.is_empty() && !teitok.is_empty())
                .then(|| (dmm.to_string(), teitok.to_string()))
        })
        .collect()
}

fn pair_reason(
    dmm: &str,
    rough_only: bool,
    blank_berendes_dmms: &BTreeSet<String>,
    edge_counts: &BTreeMap<String, usize>,
) -> &'static str {
    if rough_only {
        if blank_berendes_dmms.contains(dmm) {
            return "Beck+Berendes row exists but Berendes target is blank; rough attaches it to a Berendes teitok.";
        }
        if edge_counts.get(dmm).copied().unwrap_or(0) > 1 {
            return "DMM id is reused (same DMM appears multiple times with different lemmas/targets); span anchors by earliest occurrence.";
        }
        return "Not present in generated span; likely manually curated/imputed.";
    }
    "Generated span assigns this Berendes entry to this Beck DMM due to missing intermediate anchors."
}

pub fn run(
    rough_path: &Path,
    edges_path: &Path,
    span_path: &Path,
    beck_index_path: &Path,
    out_dir: &Path,
) -> Result<()> {
    let rough_rows = read_rough(rough_path)?;
    let (_, edges_rows) = read_csv(edges_path)?;
    let (_, span_rows) = read_csv(span_path)?;

    let rough_pairs: BTreeSet<Pair> = rough_rows
        .iter()
        .filter(|r| !r.beck_dmm_id.is_empty() && !r.berendes_teitok_id.is_empty())
        .map(|r| (r.beck_dmm_id.clone(), r.berendes_teitok_id.clone()))
        .collect();
    let edge_pairs = pair_set(&edges_rows);
    let span_pairs = pair_set(&span_rows);

    let mut edge_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut blank_berendes_dmms: BTreeSet<String> = BTreeSet::new();
    for r in &edges_rows {
        let dmm = r.get("beck_dmm_id").map(|v| v.trim()).unwrap_or("");
        if dmm.is_empty() {
            continue;
        }
        *edge_counts.entry(dmm.to_string()).or_insert(0) += 1;
        let teitok = r.get("berendes_teitok_id").map(|v| v.trim()).unwrap_or("");
        if teitok.is_empty() {
            blank_berendes_dmms.insert(dmm.to_string());
        }
    }

    // DMM reuse in the Beck index: the same id carrying several lemma pairs.
    let mut beck_index_lemmas: BTreeMap<String, BTreeSet<Pair>> = BTreeMap::new();
    if beck_index_path.exists() {
        let (_, beck_index) = read_csv(beck_index_path)?;
        for r in &beck_index {
            let dmm = r.get("dmm_id").map(|v| v.trim()).unwrap_or("");
            if dmm.is_empty() {
                continue;
            }
            beck_index_lemmas.entry(dmm.to_string()).or_default().insert((
                r.get("greek_lemma").map(|v| v.trim()).unwrap_or("").to_string(),
                r.get("latin_lemma").map(|v| v.trim()).unwrap_or("").to_string(),
            ));
        }
    }
    let reused_dmm: Vec<&String> = beck_index_lemmas
        .iter()
        .filter(|(_, lemmas)| lemmas.len() > 1)
        .map(|(dmm, _)| dmm)
        .collect();

    // One Berendes entry claimed by several Beck ids in the rough mapping.
    let mut rough_by_teitok: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for r in &rough_rows {
        if !r.berendes_teitok_id.is_empty() && !r.beck_dmm_id.is_empty() {
            rough_by_teitok
                .entry(r.berendes_teitok_id.clone())
                .or_default()
                .insert(r.beck_dmm_id.clone());
        }
    }
    let mut rough_teitok_multi: Vec<(&String, Vec<&String>)> = rough_by_teitok
        .iter()
        .filter(|(_, dmms)| dmms.len() > 1)
        .map(|(t, dmms)| (t, dmms.iter().collect()))
        .collect();
    rough_teitok_multi.sort_by_key(|(t, dmms)| (usize::MAX - dmms.len(), t.as_str()));

    let only_rough: Vec<&Pair> = rough_pairs.difference(&span_pairs).collect();
    let only_span: Vec<&Pair> = span_pairs.difference(&rough_pairs).collect();

    fs::create_dir_all(out_dir)?;

    let mut pair_rows: Vec<RowMap> = Vec::new();
    let mut push_pair = |kind: &str, dmm: &str, teitok: &str, rough_only: bool| {
        let mut row = RowMap::new();
        row.insert("kind".to_string(), kind.to_string());
        row.insert("beck_dmm_id".to_string(), dmm.to_string());
        row.insert("berendes_teitok_id".to_string(), teitok.to_string());
        row.insert(
            "reason".to_string(),
            pair_reason(dmm, rough_only, &blank_berendes_dmms, &edge_counts).to_string(),
        );
        pair_rows.push(row);
    };
    for (dmm, teitok) in &only_rough {
        push_pair("rough_only", dmm, teitok, true);
    }
    for (dmm, teitok) in &only_span {
        push_pair("span_only", dmm, teitok, false);
    }
    write_csv(
        &out_dir.join("beck_berendes_rough_compare_pairs.csv"),
        &["kind", "beck_dmm_id", "berendes_teitok_id", "reason"],
        &pair_rows,
    )?;

    let mut md: Vec<String> = Vec::new();
    md.push("# Beck ↔ Berendes rough comparison".to_string());
    md.push(format!("- Rough rows: {} (pairs: {})", rough_rows.len(), rough_pairs.len()));
    md.push(format!("- Generated edges pairs (explicit): {}", edge_pairs.len()));
    md.push(format!("- Generated span pairs (inferred): {}", span_pairs.len()));
    md.push(String::new());
    md.push("## Pair diffs (rough vs inferred span)".to_string());
    md.push(format!("- Rough-only pairs: {}", only_rough.len()));
    md.push(format!("- Span-only pairs: {}", only_span.len()));
    md.push(String::new());
    md.push("### Rough-only pairs".to_string());
    for (dmm, teitok) in &only_rough {
        md.push(format!(
            "- {dmm} -> {teitok} ({})",
            pair_reason(dmm, true, &blank_berendes_dmms, &edge_counts)
        ));
    }
    md.push(String::new());
    md.push("### Span-only pairs".to_string());
    for (dmm, teitok) in &only_span {
        md.push(format!(
            "- {dmm} -> {teitok} ({})",
            pair_reason(dmm, false, &blank_berendes_dmms, &edge_counts)
        ));
    }
    md.push(String::new());
    md.push(
        "## Berendes N→1 cases in rough (same teitok mapped to multiple Beck DMM ids)"
            .to_string(),
    );
    md.push(format!("- Count: {}", rough_teitok_multi.len()));
    for (teitok, dmms) in &rough_teitok_multi {
        let joined: Vec<&str> = dmms.iter().map(|d| d.as_str()).collect();
        md.push(format!("- {teitok}: {}", joined.join(", ")));
    }
    md.push(String::new());
    md.push("## Beck DMM id reuse in beck_index.csv".to_string());
    if reused_dmm.is_empty() {
        md.push("- None detected".to_string());
    } else {
        let joined: Vec<&str> = reused_dmm.iter().map(|d| d.as_str()).collect();
        md.push(format!("- Reused DMM ids: {}", joined.join(", ")));
    }

    write_text(&out_dir.join("beck_berendes_rough_compare.md"), &(md.join("\n") + "\n"))?;
    info!(
        rough_only = only_rough.len(),
        span_only = only_span.len(),
        "rough comparison written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_rough_pads_and_folds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rough.tsv");
        std::fs::write(
            &path,
            "DMM1001\t\u{1f36}\u{3c1}\u{3b9}\u{3c2}\tiris\tdmm-0001-iris\n\
             \t\t\n\
             DMM1002\takoron\tacorum\tdmm-0002-akoron\t1.2\tAkoron\tgloss\twith tab\n",
        )
        .unwrap();
        let rows = read_rough(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].beck_dmm_id, "DMM1001");
        assert_eq!(rows[0].berendes_teitok_id, "dmm-0001-iris");
        assert_eq!(rows[1].berendes_teitok_id, "dmm-0002-akoron");
    }

    #[test]
    fn test_pair_diffs_with_reasons() {
        let dir = tempdir().unwrap();
        let p = dir.path();
        std::fs::write(
            p.join("rough.tsv"),
            "DMM1001\tg\tl\tdmm-0001-iris\n\
             DMM1002\tg\tl\tdmm-0002-akoron\n\
             DMM1003\tg\tl\tdmm-0002-akoron\n",
        )
        .unwrap();
        std::fs::write(
            p.join("edges.csv"),
            "beck_dmm_id,berendes_teitok_id\nDMM1001,dmm-0001-iris\nDMM1002,\n",
        )
        .unwrap();
        std::fs::write(
            p.join("span.csv"),
            "beck_dmm_id,berendes_teitok_id\nDMM1001,dmm-0001-iris\nDMM1001,dmm-0003-kalamos\n",
        )
        .unwrap();
        std::fs::write(
            p.join("beck_index.csv"),
            "dmm_id,greek_lemma,latin_lemma\nDMM1001,a,b\nDMM1001,c,d\n",
        )
        .unwrap();
        run(
            &p.join("rough.tsv"),
            &p.join("edges.csv"),
            &p.join("span.csv"),
            &p.join("beck_index.csv"),
            p,
        )
        .unwrap();

        let md = std::fs::read_to_string(p.join("beck_berendes_rough_compare.md")).unwrap();
        assert!(md.contains("- Rough rows: 3 (pairs: 3)"));
        assert!(md.contains("- Rough-only pairs: 2"));
        assert!(md.contains("- Span-only pairs: 1"));
        assert!(md.contains(
            "- DMM1002 -> dmm-0002-akoron (Beck+Berendes row exists but Berendes target is blank"
        ));
        assert!(md.contains("- dmm-0002-akoron: DMM1002, DMM1003"));
        assert!(md.contains("- Reused DMM ids: DMM1001"));

        let pairs =
            std::fs::read_to_string(p.join("beck_berendes_rough_compare_pairs.csv")).unwrap();
        assert!(pairs.contains("span_only,DMM1001,dmm-0003-kalamos"));
    }
}
