//! Master register (long) and master concordance (wide) built from the
//! cross-edition workbook.
//!
//! Every edition contributes register rows keyed by an expanded Berendes
//! chapter key; the concordance groups those rows per chapter key and
//! aggregates each edition's fields with an order-preserving unique join.
//! The `all` sheet of the workbook is intentionally ignored: it contains
//! Excel numeric-format collisions (`1.10` stored as `1.1`).

use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{ConcordError, Result};
use crate::norm::{expand_chapter_key, is_empty, normalize_scalar, unique_join};
use crate::tabular::{write_csv, write_text, RowMap};
use crate::xlsx::XlsxReader;

const REQUIRED_SHEETS: &[&str] = &[
    "berendes",
    "berendes + moulins",
    "NEW moulins laguna",
    "NEW moulins wechel",
    "NEW moulins matthiolus",
    "berendes + ruel",
    "berendes + lusitanus",
    "berendes + barbaro",
    "gunther beck combined",
    "wellmann beck combined",
    "beck+berendes",
];

/// One register row: a single edition entry attached to one chapter key.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RegisterRecord {
    pub chapter_key: String,
    pub chapter_key_raw: String,
    pub chapter_key_source: String,
    pub berendes_teitok_id: String,
    pub dmm_id: String,
    pub source_id: String,
    pub edition: String,
    pub book: String,
    pub chapter: String,
    pub page: String,
    pub scan_id: String,
    pub folio: String,
    pub division: String,
    pub term: String,
    pub title: String,
    pub greek: String,
    pub latin: String,
    pub greek_text: String,
    pub notes: String,
    pub source_sheet: String,
    pub source_row: String,
}

pub const CONCORDANCE_FIELDS: &[&str] = &[
    "chapter_key",
    "berendes_teitok_id",
    "berendes_term",
    "dmm_id",
    "source_id",
    "desmoulins_page",
    "desmoulins_chapter",
    "desmoulins_term",
    "laguna_page",
    "laguna_chapter",
    "laguna_title",
    "laguna_scan_id",
    "laguna_book",
    "wechel_page",
    "wechel_chapter",
    "wechel_title",
    "wechel_scan_id",
    "wechel_book",
    "ruel_page_scan",
    "ruel_folio",
    "ruel_chapter",
    "ruel_title_latin",
    "ruel_title_vernacular",
    "ruel_book",
    "lusitanus_page",
    "lusitanus_chapter",
    "lusitanus_title",
    "barbaro_page",
    "barbaro_chapter",
    "barbaro_term",
    "barbaro_book",
    "matthiolo_book",
    "matthiolo_chapter",
    "matthiolo_greek",
    "matthiolo_latin",
    "gunther_chapter",
    "gunther_division",
    "gunther_term",
    "wellmann_id",
    "wellmann_book",
    "wellmann_chapter",
    "wellmann_greek_lemma",
    "beck_greek_lemma",
    "beck_latin_lemma",
];

pub struct MasterBuild {
    pub register: Vec<RegisterRecord>,
    pub concordance: Vec<RowMap>,
    pub qa_md: String,
}

fn field(rec: &BTreeMap<String, String>, key: &str) -> String {
    normalize_scalar(rec.get(key).map(String::as_str).unwrap_or(""))
}

#[derive(Debug, Default, Clone)]
struct DmmMapping {
    berendes_teitok_id: String,
    berendes_chapter: String,
}

/// Guess a single teitok id for a chapter key; ambiguous chapters guess nothing.
fn single_teitok(teitoks_by_chapter: &BTreeMap<String, Vec<String>>, key: &str) -> String {
    match teitoks_by_chapter.get(key).map(Vec::as_slice) {
        Some([only]) => only.clone(),
        _ => String::new(),
    }
}

fn first_nonempty<'a, I: IntoIterator<Item = &'a str>>(vals: I) -> String {
    for v in vals {
        let nv = normalize_scalar(v);
        if !is_empty(&nv) {
            return nv;
        }
    }
    String::new()
}

/// Build the register and concordance from an open workbook.
pub fn build_master<R: Read + Seek>(
    reader: &mut XlsxReader<R>,
    source_name: &str,
) -> Result<MasterBuild> {
    let missing: Vec<&str> = REQUIRED_SHEETS
        .iter()
        .copied()
        .filter(|s| !reader.sheet_exists(s))
        .collect();
    if !missing.is_empty() {
        return Err(ConcordError::Workbook(format!(
            "missing expected sheets: {}",
            missing.join(", ")
        )));
    }

    // Base: berendes (no header).
    let (_, ber_raw) = reader.read_table("berendes", Some(false))?;
    // teitok id -> canonical berendes chapter, plus the reverse index used
    // for single-candidate teitok guessing.
    let mut chapter_by_teitok: BTreeMap<String, String> = BTreeMap::new();
    let mut teitoks_by_chapter: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (_, rec) in &ber_raw {
        let teitok = field(rec, "1");
        let chapter = field(rec, "2");
        if !teitok.is_empty() {
            chapter_by_teitok.insert(teitok.clone(), chapter.clone());
        }
        if !chapter.is_empty() && !teitok.is_empty() {
            teitoks_by_chapter.entry(chapter).or_default().push(teitok);
        }
    }

    // Mapping: beck+berendes (header), dmm_id -> canonical berendes identifiers.
    // The canonical chapter comes from the berendes base sheet when available,
    // sidestepping Excel numeric-format collisions in the join sheets.
    let (_, beck_map_raw) = reader.read_table("beck+berendes", None)?;
    let mut dmm_to_berendes: BTreeMap<String, DmmMapping> = BTreeMap::new();
    for (_, rec) in &beck_map_raw {
        let dmm = field(rec, "dmm_id");
        if is_empty(&dmm) {
            continue;
        }
        let teitok = field(rec, "berendes_teitok_id");
        let canonical_chapter = chapter_by_teitok.get(&teitok).cloned().unwrap_or_default();
        let chapter = if canonical_chapter.is_empty() {
            field(rec, "berendes_chapter")
        } else {
            canonical_chapter
        };
        dmm_to_berendes.insert(
            dmm,
            DmmMapping { berendes_teitok_id: teitok, berendes_chapter: chapter },
        );
    }

    let mut register: Vec<RegisterRecord> = Vec::new();

    // Edition: berendes (canonical list).
    for (row_idx, rec) in &ber_raw {
        let teitok = field(rec, "1");
        let chapter_raw = field(rec, "2");
        let term = field(rec, "3");
        for k in expand_chapter_key(&chapter_raw) {
            register.push(RegisterRecord {
                chapter_key: k.clone(),
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_chapter".to_string(),
                berendes_teitok_id: teitok.clone(),
                edition: "berendes".to_string(),
                chapter: k,
                term: term.clone(),
                source_sheet: "berendes".to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            });
        }
    }

    // Edition: desmoulins (from "berendes + moulins").
    let (_, bm) = reader.read_table("berendes + moulins", None)?;
    for (row_idx, rec) in &bm {
        let chapter_raw = field(rec, "berendes_chapter");
        for k in expand_chapter_key(&chapter_raw) {
            register.push(RegisterRecord {
                chapter_key: k,
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_chapter".to_string(),
                berendes_teitok_id: field(rec, "berendes_teitok_id"),
                edition: "desmoulins".to_string(),
                chapter: field(rec, "desmoulins_chapter"),
                page: field(rec, "desmoulins_page"),
                term: field(rec, "desmoulins_term"),
                source_sheet: "berendes + moulins".to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            });
        }
    }

    // Edition: matthiolo (aligns via berendes_id; teitok is guessed when the
    // chapter maps to exactly one berendes entry).
    let (_, nmat) = reader.read_table("NEW moulins matthiolus", None)?;
    for (row_idx, rec) in &nmat {
        let chapter_raw = field(rec, "berendes_id");
        let ber_greek = field(rec, "berendes_greek");
        let greek = field(rec, "mattioli_greek");
        for k in expand_chapter_key(&chapter_raw) {
            register.push(RegisterRecord {
                chapter_key: k.clone(),
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_id".to_string(),
                berendes_teitok_id: single_teitok(&teitoks_by_chapter, &k),
                source_id: field(rec, "dmm_id"),
                edition: "matthiolo".to_string(),
                book: field(rec, "mattioli_book"),
                chapter: field(rec, "mattioli_chapter_decimal"),
                division: field(rec, "mattioli_chapter_roman"),
                greek: if greek.is_empty() { ber_greek.clone() } else { greek.clone() },
                latin: field(rec, "mattioli_latin"),
                source_sheet: "NEW moulins matthiolus".to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            });
        }
    }

    // Editions: laguna and wechel share the "NEW moulins" layout.
    for (sheet, edition, prefix) in [
        ("NEW moulins laguna", "laguna", "laguna"),
        ("NEW moulins wechel", "wechel", "wechel"),
    ] {
        let (_, recs) = reader.read_table(sheet, None)?;
        for (row_idx, rec) in &recs {
            let source_id = field(rec, "dmm_id");
            let dmm = if source_id.starts_with("DMM") { source_id.clone() } else { String::new() };
            let chapter_raw = field(rec, "berendes_id");
            let base = RegisterRecord {
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_id".to_string(),
                dmm_id: dmm.clone(),
                source_id: if dmm.is_empty() { source_id.clone() } else { String::new() },
                edition: edition.to_string(),
                book: field(rec, &format!("{prefix}_book")),
                chapter: field(rec, &format!("{prefix}_chapter")),
                page: field(rec, &format!("{prefix}_page")),
                scan_id: field(rec, &format!("{prefix}_scan_id")),
                title: field(rec, &format!("{prefix}_title")),
                greek: field(rec, "berendes_greek"),
                source_sheet: sheet.to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            };
            let keys = expand_chapter_key(&chapter_raw);
            if keys.is_empty() {
                // Unalignable rows with an id are kept in the register anyway.
                if !dmm.is_empty() || !source_id.is_empty() {
                    register.push(RegisterRecord {
                        notes: "missing chapter_key".to_string(),
                        ..base
                    });
                }
                continue;
            }
            for k in keys {
                register.push(RegisterRecord {
                    chapter_key: k.clone(),
                    berendes_teitok_id: single_teitok(&teitoks_by_chapter, &k),
                    ..base.clone()
                });
            }
        }
    }

    // Edition: ruel (from "berendes + ruel").
    let (_, bruel) = reader.read_table("berendes + ruel", None)?;
    for (row_idx, rec) in &bruel {
        let chapter_raw = field(rec, "berendes_chapter");
        for k in expand_chapter_key(&chapter_raw) {
            register.push(RegisterRecord {
                chapter_key: k,
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_chapter".to_string(),
                berendes_teitok_id: field(rec, "berendes_teitok_id"),
                edition: "ruel".to_string(),
                book: field(rec, "ruel_book"),
                chapter: field(rec, "ruel_chapter"),
                page: field(rec, "ruel_page_scan"),
                folio: field(rec, "ruel_folio"),
                title: field(rec, "ruel_title_latin"),
                term: field(rec, "ruel_title_vernacular"),
                source_sheet: "berendes + ruel".to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            });
        }
    }

    // Edition: lusitanus (from "berendes + lusitanus").
    let (_, blus) = reader.read_table("berendes + lusitanus", None)?;
    for (row_idx, rec) in &blus {
        let chapter_raw = field(rec, "berendes_chapter");
        for k in expand_chapter_key(&chapter_raw) {
            register.push(RegisterRecord {
                chapter_key: k,
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_chapter".to_string(),
                berendes_teitok_id: field(rec, "berendes_teitok_id"),
                edition: "lusitanus".to_string(),
                chapter: field(rec, "lusitanus_chapter"),
                page: field(rec, "lusitanus_page"),
                title: field(rec, "lusitanus_title"),
                source_sheet: "berendes + lusitanus".to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            });
        }
    }

    // Edition: barbaro (from "berendes + barbaro").
    let (_, bbar) = reader.read_table("berendes + barbaro", None)?;
    for (row_idx, rec) in &bbar {
        let chapter_raw = field(rec, "berendes_chapter");
        for k in expand_chapter_key(&chapter_raw) {
            register.push(RegisterRecord {
                chapter_key: k,
                chapter_key_raw: chapter_raw.clone(),
                chapter_key_source: "berendes_chapter".to_string(),
                berendes_teitok_id: field(rec, "berendes_teitok_id"),
                edition: "barbaro".to_string(),
                book: field(rec, "barbaro_book"),
                chapter: field(rec, "barbaro_chapter"),
                page: field(rec, "barbaro_page"),
                term: field(rec, "barbaro_term"),
                source_sheet: "berendes + barbaro".to_string(),
                source_row: row_idx.to_string(),
                ..Default::default()
            });
        }
    }

    // Edition: gunther; rows without a chapter fall back to the dmm mapping.
    let (_, gcb) = reader.read_table("gunther beck combined", None)?;
    for (row_idx, rec) in &gcb {
        let dmm = field(rec, "dmm_id");
        let mut teitok = field(rec, "berendes_teitok_id");
        let mut chapter_raw = field(rec, "berendes_chapter");
        let mut keys = expand_chapter_key(&chapter_raw);
        if keys.is_empty() && !dmm.is_empty() {
            if let Some(mapped) = dmm_to_berendes.get(&dmm) {
                chapter_raw = mapped.berendes_chapter.clone();
                keys = expand_chapter_key(&chapter_raw);
                if !mapped.berendes_teitok_id.is_empty() && is_empty(&teitok) {
                    teitok = mapped.berendes_teitok_id.clone();
                }
            }
        }
        let base = RegisterRecord {
            chapter_key_raw: chapter_raw.clone(),
            chapter_key_source: "berendes_chapter".to_string(),
            berendes_teitok_id: teitok,
            dmm_id: dmm,
            edition: "gunther".to_string(),
            chapter: field(rec, "gunther_chapter"),
            division: field(rec, "gunther_division"),
            term: field(rec, "gunther_term"),
            source_sheet: "gunther beck combined".to_string(),
            source_row: row_idx.to_string(),
            ..Default::default()
        };
        if keys.is_empty() {
            register.push(RegisterRecord {
                notes: "missing chapter_key".to_string(),
                ..base
            });
            continue;
        }
        for k in keys {
            register.push(RegisterRecord { chapter_key: k, ..base.clone() });
        }
    }

    // Edition: wellmann, aligned purely through the dmm mapping.
    let (_, wbc) = reader.read_table("wellmann beck combined", None)?;
    for (row_idx, rec) in &wbc {
        let dmm = field(rec, "dmm_id");
        let mapped = dmm_to_berendes.get(&dmm).cloned().unwrap_or_default();
        let chapter_raw = mapped.berendes_chapter;
        let base = RegisterRecord {
            chapter_key_raw: chapter_raw.clone(),
            chapter_key_source: "dmm_id->berendes_chapter".to_string(),
            berendes_teitok_id: mapped.berendes_teitok_id,
            dmm_id: dmm,
            edition: "wellmann".to_string(),
            book: field(rec, "wellmann_book"),
            chapter: field(rec, "wellmann_chapter"),
            term: field(rec, "wellmann_id"),
            greek: field(rec, "term_greek_lemma"),
            greek_text: field(rec, "wellmann_greek_text"),
            source_sheet: "wellmann beck combined".to_string(),
            source_row: row_idx.to_string(),
            ..Default::default()
        };
        let keys = expand_chapter_key(&chapter_raw);
        if keys.is_empty() {
            register.push(RegisterRecord {
                notes: "missing chapter_key".to_string(),
                ..base
            });
            continue;
        }
        for k in keys {
            register.push(RegisterRecord { chapter_key: k, ..base.clone() });
        }
    }

    // Edition: beck (the dmm index itself), preferring canonical chapters.
    for (row_idx, rec) in &beck_map_raw {
        let teitok = field(rec, "berendes_teitok_id");
        let canonical_chapter = chapter_by_teitok.get(&teitok).cloned().unwrap_or_default();
        let bchap = if canonical_chapter.is_empty() {
            field(rec, "berendes_chapter")
        } else {
            canonical_chapter
        };
        let base = RegisterRecord {
            chapter_key_raw: bchap.clone(),
            chapter_key_source: "berendes_chapter".to_string(),
            berendes_teitok_id: teitok,
            dmm_id: field(rec, "dmm_id"),
            edition: "beck".to_string(),
            greek: field(rec, "beck_greek_lemma"),
            latin: field(rec, "beck_latin_lemma"),
            source_sheet: "beck+berendes".to_string(),
            source_row: row_idx.to_string(),
            ..Default::default()
        };
        let keys = expand_chapter_key(&bchap);
        if keys.is_empty() {
            register.push(RegisterRecord {
                notes: "missing chapter_key".to_string(),
                ..base
            });
            continue;
        }
        for k in keys {
            register.push(RegisterRecord { chapter_key: k, ..base.clone() });
        }
    }

    let concordance = build_concordance(&register);
    let qa_md = build_qa(&register, &concordance, source_name);
    info!(
        register_rows = register.len(),
        concordance_rows = concordance.len(),
        "built master tables"
    );
    Ok(MasterBuild { register, concordance, qa_md })
}

fn build_concordance(register: &[RegisterRecord]) -> Vec<RowMap> {
    let mut by_chapter: BTreeMap<String, Vec<&RegisterRecord>> = BTreeMap::new();
    for r in register {
        if !r.chapter_key.is_empty() {
            by_chapter.entry(r.chapter_key.clone()).or_default().push(r);
        }
    }

    let mut keys: Vec<&String> = by_chapter.keys().collect();
    keys.sort_by_key(|k| (k.len(), k.as_str()));

    let mut concordance: Vec<RowMap> = Vec::new();
    for chapter_key in keys {
        let rows = &by_chapter[chapter_key];
        let ed = |edition: &str, get: fn(&RegisterRecord) -> &str| -> String {
            unique_join(rows.iter().filter(|r| r.edition == edition).map(|r| get(r)))
        };

        let mut out = RowMap::new();
        let mut put = |k: &str, v: String| {
            out.insert(k.to_string(), v);
        };
        put("chapter_key", chapter_key.clone());
        put(
            "berendes_teitok_id",
            unique_join(
                rows.iter()
                    .filter(|r| r.edition == "berendes")
                    .map(|r| r.berendes_teitok_id.as_str()),
            ),
        );
        put(
            "berendes_term",
            first_nonempty(
                rows.iter()
                    .filter(|r| r.edition == "berendes")
                    .map(|r| r.term.as_str()),
            ),
        );
        put(
            "dmm_id",
            unique_join(rows.iter().map(|r| r.dmm_id.as_str()).filter(|v| !v.is_empty())),
        );
        put(
            "source_id",
            unique_join(rows.iter().map(|r| r.source_id.as_str()).filter(|v| !v.is_empty())),
        );
        put("desmoulins_page", ed("desmoulins", |r| &r.page));
        put("desmoulins_chapter", ed("desmoulins", |r| &r.chapter));
        put("desmoulins_term", ed("desmoulins", |r| &r.term));
        put("laguna_page", ed("laguna", |r| &r.page));
        put("laguna_chapter", ed("laguna", |r| &r.chapter));
        put("laguna_title", ed("laguna", |r| &r.title));
        put("laguna_scan_id", ed("laguna", |r| &r.scan_id));
        put("laguna_book", ed("laguna", |r| &r.book));
        put("wechel_page", ed("wechel", |r| &r.page));
        put("wechel_chapter", ed("wechel", |r| &r.chapter));
        put("wechel_title", ed("wechel", |r| &r.title));
        put("wechel_scan_id", ed("wechel", |r| &r.scan_id));
        put("wechel_book", ed("wechel", |r| &r.book));
        put("ruel_page_scan", ed("ruel", |r| &r.page));
        put("ruel_folio", ed("ruel", |r| &r.folio));
        put("ruel_chapter", ed("ruel", |r| &r.chapter));
        put("ruel_title_latin", ed("ruel", |r| &r.title));
        put("ruel_title_vernacular", ed("ruel", |r| &r.term));
        put("ruel_book", ed("ruel", |r| &r.book));
        put("lusitanus_page", ed("lusitanus", |r| &r.page));
        put("lusitanus_chapter", ed("lusitanus", |r| &r.chapter));
        put("lusitanus_title", ed("lusitanus", |r| &r.title));
        put("barbaro_page", ed("barbaro", |r| &r.page));
        put("barbaro_chapter", ed("barbaro", |r| &r.chapter));
        put("barbaro_term", ed("barbaro", |r| &r.term));
        put("barbaro_book", ed("barbaro", |r| &r.book));
        put("matthiolo_book", ed("matthiolo", |r| &r.book));
        put("matthiolo_chapter", ed("matthiolo", |r| &r.chapter));
        put("matthiolo_greek", ed("matthiolo", |r| &r.greek));
        put("matthiolo_latin", ed("matthiolo", |r| &r.latin));
        put("gunther_chapter", ed("gunther", |r| &r.chapter));
        put("gunther_division", ed("gunther", |r| &r.division));
        put("gunther_term", ed("gunther", |r| &r.term));
        put("wellmann_id", ed("wellmann", |r| &r.term));
        put("wellmann_book", ed("wellmann", |r| &r.book));
        put("wellmann_chapter", ed("wellmann", |r| &r.chapter));
        put("wellmann_greek_lemma", ed("wellmann", |r| &r.greek));
        put("beck_greek_lemma", ed("beck", |r| &r.greek));
        put("beck_latin_lemma", ed("beck", |r| &r.latin));
        concordance.push(out);
    }
    concordance
}

fn build_qa(register: &[RegisterRecord], concordance: &[RowMap], source_name: &str) -> String {
    let mut edition_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut missing_key_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in register {
        if r.edition.is_empty() {
            continue;
        }
        *edition_counts.entry(&r.edition).or_default() += 1;
        if is_empty(&r.chapter_key) {
            *missing_key_counts.entry(&r.edition).or_default() += 1;
        }
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push("# Master build QA\n".to_string());
    lines.push(format!("- Source: `{source_name}`"));
    lines.push(format!("- Register rows: {}", register.len()));
    lines.push(format!("- Concordance rows (chapter_key): {}\n", concordance.len()));
    lines.push("## Rows by edition".to_string());
    for (edition, count) in &edition_counts {
        let miss = missing_key_counts.get(edition).copied().unwrap_or(0);
        lines.push(format!("- {edition}: {count} rows (missing chapter_key: {miss})"));
    }
    lines.push("\n## Notes".to_string());
    lines.push(
        "- `chapter_key_raw` preserves composite keys (e.g. `3.29;3.30`) while `chapter_key` is expanded."
            .to_string(),
    );
    lines.push(
        "- `all` sheet is intentionally not used because it contains Excel numeric-format collisions (e.g., `1.10` -> `1.1`)."
            .to_string(),
    );
    lines.join("\n") + "\n"
}

/// Build and write `master_register.csv`, `master_concordance.csv` and
/// `master_qa.md` under `out_dir`.
pub fn run(xlsx_path: &Path, out_dir: &Path) -> Result<()> {
    let mut reader = XlsxReader::open(xlsx_path)?;
    let source_name = xlsx_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let build = build_master(&mut reader, &source_name)?;

    let register_path = out_dir.join("master_register.csv");
    if let Some(parent) = register_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&register_path)?;
    for record in &build.register {
        writer.serialize(record)?;
    }
    writer.flush()?;

    write_csv(&out_dir.join("master_concordance.csv"), CONCORDANCE_FIELDS, &build.concordance)?;
    write_text(&out_dir.join("master_qa.md"), &build.qa_md)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::workbook;
    use std::io::Cursor;

    fn fixture() -> XlsxReader<Cursor<Vec<u8>>> {
        workbook(&[
            ("berendes", &[
                &["dmm-0001-iris", "1.1", "Iris"],
                &["dmm-0002-akoron", "1.2;1.3", "Akoron"],
            ]),
            ("berendes + moulins", &[
                &["berendes_teitok_id", "berendes_chapter", "desmoulins_page", "desmoulins_term", "desmoulins_chapter"],
                &["dmm-0001-iris", "1.1", "12", "Iris", "I"],
            ]),
            ("NEW moulins laguna", &[
                &["dmm_id", "berendes_id", "berendes_greek", "laguna_scan_id", "laguna_book", "laguna_page", "laguna_chapter", "laguna_title"],
                &["DMM1001", "1.1", "ἶρις", "55", "1", "13", "1", "Iris"],
                &["x-unaligned", "", "", "", "", "", "", "Lost"],
            ]),
            ("NEW moulins wechel", &[
                &["dmm_id", "berendes_id", "wechel_scan_id", "wechel_book", "wechel_page", "wechel_title", "wechel_chapter"],
                &["DMM1001", "1.1", "9", "1", "5", "Iris", "1"],
            ]),
            ("NEW moulins matthiolus", &[
                &["dmm_id", "berendes_id", "berendes_greek", "mattioli_book", "mattioli_chapter_roman", "mattioli_chapter_decimal", "mattioli_greek", "mattioli_latin"],
                &["DMM1001", "1.1", "ἶρις", "1", "I", "1", "", "Iris"],
            ]),
            ("berendes + ruel", &[
                &["berendes_teitok_id", "berendes_chapter", "ruel_page_scan", "ruel_book", "ruel_chapter", "ruel_title_latin", "ruel_folio", "ruel_title_vernacular"],
                &["dmm-0002-akoron", "1.2;1.3", "20", "1", "2", "Acorum", "4r", "Acoro"],
            ]),
            ("berendes + lusitanus", &[
                &["berendes_teitok_id", "berendes_chapter", "lusitanus_page", "lusitanus_title", "lusitanus_chapter"],
                &["dmm-0001-iris", "1.1", "33", "Iris", "1"],
            ]),
            ("berendes + barbaro", &[
                &["berendes_teitok_id", "berendes_chapter", "barbaro_page", "barbaro_chapter", "barbaro_term", "barbaro_book"],
                &["dmm-0001-iris", "1.1", "7", "1", "Iris", "1"],
            ]),
            ("gunther beck combined", &[
                &["dmm_id", "berendes_teitok_id", "berendes_chapter", "gunther_chapter", "gunther_division", "gunther_term"],
                &["DMM1001", "", "", "1", "i", "IRIS"],
                &["DMM9999", "", "", "99", "x", "LOST"],
            ]),
            ("wellmann beck combined", &[
                &["dmm_id", "term_greek_lemma", "wellmann_id", "wellmann_book", "wellmann_chapter", "wellmann_greek_text"],
                &["DMM1001", "ἶρις", "W1", "1", "1", "ἶρις..."],
            ]),
            ("beck+berendes", &[
                &["dmm_id", "beck_greek_lemma", "beck_latin_lemma", "berendes_teitok_id", "berendes_chapter", "berendes_term"],
                &["DMM1001", "ἶρις", "iris", "dmm-0001-iris", "1.10", "Iris"],
            ]),
        ])
    }

    #[test]
    fn test_missing_sheets_rejected() {
        let mut reader = workbook(&[("berendes", &[&["a", "1.1", "x"]])]);
        let err = build_master(&mut reader, "t.xlsx");
        assert!(err.is_err());
    }

    #[test]
    fn test_composite_keys_expand_into_register_rows() {
        let mut reader = fixture();
        let build = build_master(&mut reader, "t.xlsx").unwrap();
        let akoron: Vec<_> = build
            .register
            .iter()
            .filter(|r| r.edition == "berendes" && r.berendes_teitok_id == "dmm-0002-akoron")
            .collect();
        assert_eq!(akoron.len(), 2);
        assert_eq!(akoron[0].chapter_key, "1.2");
        assert_eq!(akoron[1].chapter_key, "1.3");
        assert_eq!(akoron[0].chapter_key_raw, "1.2;1.3");
    }

    #[test]
    fn test_dmm_mapping_prefers_canonical_chapter() {
        let mut reader = fixture();
        let build = build_master(&mut reader, "t.xlsx").unwrap();
        // beck+berendes says 1.10, but the berendes base sheet pins the
        // teitok id to chapter 1.1; wellmann follows the canonical value.
        let wellmann: Vec<_> = build
            .register
            .iter()
            .filter(|r| r.edition == "wellmann")
            .collect();
        assert_eq!(wellmann.len(), 1);
        assert_eq!(wellmann[0].chapter_key, "1.1");
        assert_eq!(wellmann[0].chapter_key_source, "dmm_id->berendes_chapter");
        assert_eq!(wellmann[0].berendes_teitok_id, "dmm-0001-iris");
    }

    #[test]
    fn test_gunther_fallback_and_missing_key_note() {
        let mut reader = fixture();
        let build = build_master(&mut reader, "t.xlsx").unwrap();
        let gunther: Vec<_> = build
            .register
            .iter()
            .filter(|r| r.edition == "gunther")
            .collect();
        assert_eq!(gunther.len(), 2);
        let aligned = gunther.iter().find(|r| r.dmm_id == "DMM1001").unwrap();
        assert_eq!(aligned.chapter_key, "1.1");
        assert_eq!(aligned.berendes_teitok_id, "dmm-0001-iris");
        let lost = gunther.iter().find(|r| r.dmm_id == "DMM9999").unwrap();
        assert_eq!(lost.chapter_key, "");
        assert_eq!(lost.notes, "missing chapter_key");
    }

    #[test]
    fn test_concordance_groups_and_sorts() {
        let mut reader = fixture();
        let build = build_master(&mut reader, "t.xlsx").unwrap();
        let keys: Vec<&str> = build
            .concordance
            .iter()
            .filter_map(|row| row.get("chapter_key").map(String::as_str))
            .collect();
        assert_eq!(keys, vec!["1.1", "1.2", "1.3"]);
        let first = &build.concordance[0];
        assert_eq!(first.get("berendes_term").map(String::as_str), Some("Iris"));
        assert_eq!(first.get("laguna_page").map(String::as_str), Some("13"));
        assert_eq!(first.get("wellmann_id").map(String::as_str), Some("W1"));
        // Matthiolo greek falls back to the berendes greek column.
        assert_eq!(first.get("matthiolo_greek").map(String::as_str), Some("ἶρις"));
    }

    #[test]
    fn test_qa_counts() {
        let mut reader = fixture();
        let build = build_master(&mut reader, "t.xlsx").unwrap();
        assert!(build.qa_md.contains("# Master build QA"));
        assert!(build.qa_md.contains("- gunther: 2 rows (missing chapter_key: 1)"));
    }
}
