//! Beck <-> Berendes alignment export, including 1->N span inference.
//!
//! The `beck+berendes` sheet provides the curated Beck-to-Berendes relations;
//! every relation becomes an edge row enriched with context from the other
//! edition sheets. On top of the explicit edges, a span inference pass treats
//! each Beck entry's earliest Berendes position as an anchor and assigns the
//! contiguous run of Berendes entries up to the next anchor to that Beck id.

use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::error::{ConcordError, Result};
use crate::norm::{berendes_book_num, expand_chapter_key, unique_join};
use crate::tabular::{write_csv, write_text, RowMap};
use crate::xlsx::{Record, XlsxReader};

const NEEDED_SHEETS: &[&str] = &[
    "berendes",
    "beck+berendes",
    "berendes + moulins",
    "NEW moulins laguna",
    "NEW moulins wechel",
    "NEW moulins matthiolus",
    "berendes + ruel",
    "berendes + lusitanus",
    "berendes + barbaro",
    "gunther beck combined",
    "wellmann beck combined",
];

pub const EDGE_FIELDS: &[&str] = &[
    "beck_berendes_row",
    "beck_dmm_id",
    "beck_greek_lemma",
    "beck_latin_lemma",
    "beck_degree",
    "cardinality",
    "berendes_teitok_id",
    "berendes_teitok_candidates",
    "berendes_degree",
    "berendes_book_num",
    "berendes_chapter_raw",
    "berendes_chapter_keys",
    "berendes_term",
    "desmoulins_page",
    "desmoulins_chapter",
    "desmoulins_term",
    "laguna_book",
    "laguna_page",
    "laguna_chapter",
    "laguna_title",
    "laguna_scan_id",
    "wechel_book",
    "wechel_page",
    "wechel_chapter",
    "wechel_title",
    "wechel_scan_id",
    "mattioli_book",
    "mattioli_chapter_decimal",
    "mattioli_chapter_roman",
    "mattioli_greek",
    "mattioli_latin",
    "ruel_book",
    "ruel_page_scan",
    "ruel_folio",
    "ruel_chapter",
    "ruel_title_latin",
    "ruel_title_vernacular",
    "lusitanus_page",
    "lusitanus_chapter",
    "lusitanus_title",
    "barbaro_book",
    "barbaro_page",
    "barbaro_chapter",
    "barbaro_term",
    "gunther_chapter",
    "gunther_division",
    "gunther_term",
    "wellmann_id",
    "wellmann_book",
    "wellmann_chapter",
    "wellmann_greek_lemma",
    "wellmann_greek_text",
];

const GROUP_FIELDS: &[&str] = &[
    "beck_dmm_id",
    "beck_greek_lemma",
    "beck_latin_lemma",
    "beck_degree",
    "berendes_teitok_ids",
    "berendes_chapter_keys",
    "berendes_terms",
    "desmoulins_pages",
    "laguna_pages",
    "wechel_pages",
    "mattioli_chapters",
];

/// `span_anchor_*` columns first, then the edge columns minus the source row.
fn span_fields() -> Vec<&'static str> {
    let mut fields = vec!["span_anchor_teitok_id", "span_anchor_chapter", "span_offset"];
    fields.extend(EDGE_FIELDS.iter().copied().filter(|f| *f != "beck_berendes_row"));
    fields
}

/// Deterministic RNG from a free-form seed string (FNV-1a folded to u64).
fn seed_rng(seed: &str) -> StdRng {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in seed.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    StdRng::seed_from_u64(h)
}

#[derive(Debug, Default, Clone)]
struct BerEntry {
    chapter_raw: String,
    term: String,
}

/// The canonical Berendes list: per-teitok metadata plus document order.
#[derive(Debug, Default)]
struct BerendesBase {
    by_teitok: BTreeMap<String, BerEntry>,
    chapter_to_teitoks: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
    pos: BTreeMap<String, usize>,
}

impl BerendesBase {
    fn from_records(records: &[Record]) -> Self {
        let mut base = Self::default();
        for (_, rec) in records {
            let teitok = get(rec, "1");
            let ch_raw = get(rec, "2");
            let term = get(rec, "3");
            if !teitok.is_empty() {
                base.by_teitok.insert(
                    teitok.clone(),
                    BerEntry { chapter_raw: ch_raw.clone(), term },
                );
                base.pos.insert(teitok.clone(), base.order.len());
                base.order.push(teitok.clone());
            }
            for k in expand_chapter_key(&ch_raw) {
                if !teitok.is_empty() {
                    base.chapter_to_teitoks.entry(k).or_default().push(teitok.clone());
                }
            }
        }
        base
    }
}

type Index = BTreeMap<String, Vec<RowMap>>;

/// Context rows from the other edition sheets, indexed by whichever
/// identifier that sheet can be joined on.
struct ContextIndex {
    des_by_teitok: Index,
    lag_by_chapter: Index,
    wec_by_chapter: Index,
    mat_by_chapter: Index,
    ruel_by_teitok: Index,
    lus_by_teitok: Index,
    bar_by_teitok: Index,
    gun_by_dmm: Index,
    well_by_dmm: Index,
}

fn get(rec: &BTreeMap<String, String>, key: &str) -> String {
    rec.get(key).cloned().unwrap_or_default()
}

fn index_by_key(records: &[Record], key_field: &str, fields: &[&str]) -> Index {
    let mut index = Index::new();
    for (_, rec) in records {
        let key = get(rec, key_field);
        if key.is_empty() {
            continue;
        }
        let mut row = RowMap::new();
        for f in fields {
            row.insert((*f).to_string(), get(rec, f));
        }
        index.entry(key).or_default().push(row);
    }
    index
}

fn index_by_chapter(records: &[Record], fields: &[&str]) -> Index {
    let mut index = Index::new();
    for (_, rec) in records {
        let ch_raw = get(rec, "berendes_id");
        for k in expand_chapter_key(&ch_raw) {
            let mut row = RowMap::new();
            for f in fields {
                row.insert((*f).to_string(), get(rec, f));
            }
            index.entry(k).or_default().push(row);
        }
    }
    index
}

impl ContextIndex {
    fn load<R: Read + Seek>(reader: &mut XlsxReader<R>) -> Result<Self> {
        let (_, des) = reader.read_table("berendes + moulins", None)?;
        let (_, lag) = reader.read_table("NEW moulins laguna", None)?;
        let (_, wec) = reader.read_table("NEW moulins wechel", None)?;
        let (_, mat) = reader.read_table("NEW moulins matthiolus", None)?;
        let (_, ruel) = reader.read_table("berendes + ruel", None)?;
        let (_, lus) = reader.read_table("berendes + lusitanus", None)?;
        let (_, bar) = reader.read_table("berendes + barbaro", None)?;
        let (_, gun) = reader.read_table("gunther beck combined", None)?;
        let (_, well) = reader.read_table("wellmann beck combined", None)?;
        Ok(Self {
            des_by_teitok: index_by_key(
                &des,
                "berendes_teitok_id",
                &["desmoulins_page", "desmoulins_chapter", "desmoulins_term"],
            ),
            lag_by_chapter: index_by_chapter(
                &lag,
                &["laguna_book", "laguna_page", "laguna_chapter", "laguna_title", "laguna_scan_id"],
            ),
            wec_by_chapter: index_by_chapter(
                &wec,
                &["wechel_book", "wechel_page", "wechel_chapter", "wechel_title", "wechel_scan_id"],
            ),
            mat_by_chapter: index_by_chapter(
                &mat,
                &[
                    "mattioli_book",
                    "mattioli_chapter_roman",
                    "mattioli_chapter_decimal",
                    "mattioli_greek",
                    "mattioli_latin",
                ],
            ),
            ruel_by_teitok: index_by_key(
                &ruel,
                "berendes_teitok_id",
                &[
                    "ruel_book",
                    "ruel_page_scan",
                    "ruel_folio",
                    "ruel_chapter",
                    "ruel_title_latin",
                    "ruel_title_vernacular",
                ],
            ),
            lus_by_teitok: index_by_key(
                &lus,
                "berendes_teitok_id",
                &["lusitanus_page", "lusitanus_chapter", "lusitanus_title"],
            ),
            bar_by_teitok: index_by_key(
                &bar,
                "berendes_teitok_id",
                &["barbaro_book", "barbaro_page", "barbaro_chapter", "barbaro_term"],
            ),
            gun_by_dmm: index_by_key(
                &gun,
                "dmm_id",
                &["gunther_chapter", "gunther_division", "gunther_term"],
            ),
            well_by_dmm: index_by_key(
                &well,
                "dmm_id",
                &[
                    "wellmann_id",
                    "wellmann_book",
                    "wellmann_chapter",
                    "term_greek_lemma",
                    "wellmann_greek_text",
                ],
            ),
        })
    }
}

fn joined(index: &Index, key: &str, field: &str) -> String {
    unique_join(
        index
            .get(key)
            .into_iter()
            .flatten()
            .map(|r| r.get(field).map(String::as_str).unwrap_or("")),
    )
}

fn joined_over_keys(index: &Index, keys: &[String], field: &str) -> String {
    unique_join(
        keys.iter()
            .filter_map(|k| index.get(k))
            .flatten()
            .map(|r| r.get(field).map(String::as_str).unwrap_or("")),
    )
}

fn enrich_edge(
    base: &BerendesBase,
    ctx: &ContextIndex,
    dmm: &str,
    beck_gr: &str,
    beck_lat: &str,
    teitok: &str,
    source_row: &str,
) -> RowMap {
    let canonical = base.by_teitok.get(teitok).cloned().unwrap_or_default();
    let chapter_keys = expand_chapter_key(&canonical.chapter_raw);

    let mut row = RowMap::new();
    let mut put = |k: &str, v: String| {
        row.insert(k.to_string(), v);
    };
    put("beck_berendes_row", source_row.to_string());
    put("beck_dmm_id", dmm.to_string());
    put("beck_greek_lemma", beck_gr.to_string());
    put("beck_latin_lemma", beck_lat.to_string());
    put("berendes_teitok_id", teitok.to_string());
    put("berendes_chapter_raw", canonical.chapter_raw.clone());
    put(
        "berendes_book_num",
        unique_join(chapter_keys.iter().map(|k| berendes_book_num(k))),
    );
    put("berendes_chapter_keys", unique_join(chapter_keys.iter().map(String::as_str)));
    put("berendes_term", canonical.term);
    for f in ["desmoulins_page", "desmoulins_chapter", "desmoulins_term"] {
        put(f, joined(&ctx.des_by_teitok, teitok, f));
    }
    for f in ["laguna_book", "laguna_page", "laguna_chapter", "laguna_title", "laguna_scan_id"] {
        put(f, joined_over_keys(&ctx.lag_by_chapter, &chapter_keys, f));
    }
    for f in ["wechel_book", "wechel_page", "wechel_chapter", "wechel_title", "wechel_scan_id"] {
        put(f, joined_over_keys(&ctx.wec_by_chapter, &chapter_keys, f));
    }
    for f in [
        "mattioli_book",
        "mattioli_chapter_decimal",
        "mattioli_chapter_roman",
        "mattioli_greek",
        "mattioli_latin",
    ] {
        put(f, joined_over_keys(&ctx.mat_by_chapter, &chapter_keys, f));
    }
    for f in [
        "ruel_book",
        "ruel_page_scan",
        "ruel_folio",
        "ruel_chapter",
        "ruel_title_latin",
        "ruel_title_vernacular",
    ] {
        put(f, joined(&ctx.ruel_by_teitok, teitok, f));
    }
    for f in ["lusitanus_page", "lusitanus_chapter", "lusitanus_title"] {
        put(f, joined(&ctx.lus_by_teitok, teitok, f));
    }
    for f in ["barbaro_book", "barbaro_page", "barbaro_chapter", "barbaro_term"] {
        put(f, joined(&ctx.bar_by_teitok, teitok, f));
    }
    for f in ["gunther_chapter", "gunther_division", "gunther_term"] {
        put(f, joined(&ctx.gun_by_dmm, dmm, f));
    }
    for f in ["wellmann_id", "wellmann_book", "wellmann_chapter"] {
        put(f, joined(&ctx.well_by_dmm, dmm, f));
    }
    put("wellmann_greek_lemma", joined(&ctx.well_by_dmm, dmm, "term_greek_lemma"));
    put("wellmann_greek_text", joined(&ctx.well_by_dmm, dmm, "wellmann_greek_text"));
    row
}

/// An edge row without enrichment, for rows whose teitok id is unknown.
fn bare_edge(
    dmm: &str,
    beck_gr: &str,
    beck_lat: &str,
    teitok: &str,
    bchap_sheet: &str,
    bterm_sheet: &str,
    source_row: &str,
) -> RowMap {
    let mut row = RowMap::new();
    for f in EDGE_FIELDS {
        row.insert((*f).to_string(), String::new());
    }
    let keys = expand_chapter_key(bchap_sheet);
    row.insert("beck_berendes_row".to_string(), source_row.to_string());
    row.insert("beck_dmm_id".to_string(), dmm.to_string());
    row.insert("beck_greek_lemma".to_string(), beck_gr.to_string());
    row.insert("beck_latin_lemma".to_string(), beck_lat.to_string());
    row.insert("berendes_teitok_id".to_string(), teitok.to_string());
    row.insert("berendes_chapter_raw".to_string(), bchap_sheet.to_string());
    row.insert(
        "berendes_book_num".to_string(),
        unique_join(keys.iter().map(|k| berendes_book_num(k))),
    );
    row.insert(
        "berendes_chapter_keys".to_string(),
        unique_join(keys.iter().map(String::as_str)),
    );
    row.insert("berendes_term".to_string(), bterm_sheet.to_string());
    row
}

pub struct AlignmentBuild {
    pub edges: Vec<RowMap>,
    pub groups: Vec<RowMap>,
    pub qa_md: String,
    pub sample_txt: String,
    pub span_edges: Vec<RowMap>,
    pub span_qa_md: String,
    pub span_sample_txt: String,
}

pub fn build<R: Read + Seek>(
    reader: &mut XlsxReader<R>,
    source_name: &str,
    seed: &str,
) -> Result<AlignmentBuild> {
    let missing: Vec<&str> = NEEDED_SHEETS
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

    let (_, ber_raw) = reader.read_table("berendes", Some(false))?;
    let base = BerendesBase::from_records(&ber_raw);
    let ctx = ContextIndex::load(reader)?;

    // Edges from beck+berendes.
    let (_, beck_raw) = reader.read_table("beck+berendes", None)?;
    let mut edges: Vec<RowMap> = Vec::new();
    let mut per_dmm: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut beck_meta: BTreeMap<String, (String, String)> = BTreeMap::new();
    for (row_idx, rec) in &beck_raw {
        let dmm = get(rec, "dmm_id");
        let beck_gr = get(rec, "beck_greek_lemma");
        let beck_lat = get(rec, "beck_latin_lemma");
        let teitok = get(rec, "berendes_teitok_id");

        let mut record = if !teitok.is_empty() && base.by_teitok.contains_key(&teitok) {
            enrich_edge(&base, &ctx, &dmm, &beck_gr, &beck_lat, &teitok, &row_idx.to_string())
        } else {
            bare_edge(
                &dmm,
                &beck_gr,
                &beck_lat,
                &teitok,
                &get(rec, "berendes_chapter"),
                &get(rec, "berendes_term"),
                &row_idx.to_string(),
            )
        };

        // Without a teitok id, offer every berendes entry on the same
        // chapter keys as candidates for curation.
        let candidate_keys = expand_chapter_key(&get(&record, "berendes_chapter_raw"));
        let candidates = if teitok.is_empty() && !candidate_keys.is_empty() {
            unique_join(
                candidate_keys
                    .iter()
                    .filter_map(|k| base.chapter_to_teitoks.get(k))
                    .flatten()
                    .map(String::as_str),
            )
        } else {
            String::new()
        };
        record.insert("berendes_teitok_candidates".to_string(), candidates);

        if !dmm.is_empty() {
            per_dmm.entry(dmm.clone()).or_default().push(edges.len());
            if !beck_meta.contains_key(&dmm) && (!beck_gr.is_empty() || !beck_lat.is_empty()) {
                beck_meta.insert(dmm, (beck_gr, beck_lat));
            }
        }
        edges.push(record);
    }

    // Degrees and cardinality, per Beck dmm_id within this sheet only.
    let mut dmm_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut teitok_counts: BTreeMap<String, usize> = BTreeMap::new();
    for e in &edges {
        let dmm = get(e, "beck_dmm_id");
        if !dmm.is_empty() {
            *dmm_counts.entry(dmm).or_default() += 1;
        }
        let teitok = get(e, "berendes_teitok_id");
        if !teitok.is_empty() {
            *teitok_counts.entry(teitok).or_default() += 1;
        }
    }
    for e in &mut edges {
        let dmm = get(e, "beck_dmm_id");
        let teitok = get(e, "berendes_teitok_id");
        let dmm_deg = dmm_counts.get(&dmm).copied().unwrap_or(0);
        e.insert("beck_degree".to_string(), dmm_deg.to_string());
        e.insert(
            "berendes_degree".to_string(),
            teitok_counts.get(&teitok).copied().unwrap_or(0).to_string(),
        );
        let cardinality = if dmm.is_empty() {
            ""
        } else if dmm_deg > 1 {
            "1->N"
        } else {
            "1->1"
        };
        e.insert("cardinality".to_string(), cardinality.to_string());
    }

    // Groups view, one row per Beck dmm_id.
    let mut groups: Vec<RowMap> = Vec::new();
    for (dmm, idxs) in &per_dmm {
        let items: Vec<&RowMap> = idxs.iter().map(|&i| &edges[i]).collect();
        let agg = |field: &str| -> String {
            unique_join(items.iter().map(|it| it.get(field).map(String::as_str).unwrap_or("")))
        };
        let mut g = RowMap::new();
        g.insert("beck_dmm_id".to_string(), dmm.clone());
        g.insert("beck_greek_lemma".to_string(), get(items[0], "beck_greek_lemma"));
        g.insert("beck_latin_lemma".to_string(), get(items[0], "beck_latin_lemma"));
        g.insert("beck_degree".to_string(), items.len().to_string());
        g.insert("berendes_teitok_ids".to_string(), agg("berendes_teitok_id"));
        g.insert("berendes_chapter_keys".to_string(), agg("berendes_chapter_keys"));
        g.insert("berendes_terms".to_string(), agg("berendes_term"));
        g.insert("desmoulins_pages".to_string(), agg("desmoulins_page"));
        g.insert("laguna_pages".to_string(), agg("laguna_page"));
        g.insert("wechel_pages".to_string(), agg("wechel_page"));
        g.insert("mattioli_chapters".to_string(), agg("mattioli_chapter_decimal"));
        groups.push(g);
    }

    let with_dmm = edges.iter().filter(|e| !get(e, "beck_dmm_id").is_empty()).count();
    let one_to_many = dmm_counts.values().filter(|&&c| c > 1).count();
    let many_to_one = teitok_counts.values().filter(|&&c| c > 1).count();
    let qa_md = [
        "# Beck ↔ Berendes alignment QA".to_string(),
        format!("- Source: `{source_name}`"),
        format!("- Edge rows: {} (with beck_dmm_id: {with_dmm})", edges.len()),
        format!("- Unique Beck dmm_id: {}", dmm_counts.len()),
        format!("- Beck 1→N cases (degree>1): {one_to_many}"),
        format!("- Berendes N→1 cases (degree>1): {many_to_one}"),
        String::new(),
        "## Notes".to_string(),
        "- Uses `berendes_teitok_id` as the Berendes stable id.".to_string(),
        "- Adds context from Desmoulins/Laguna/Wechel/Mattioli/Ruel/Lusitanus/Barbaro/Gunther/Wellmann where available.".to_string(),
        "- `berendes_chapter_raw` may be composite (e.g. `3.29;3.30`); `berendes_chapter_keys` is expanded.".to_string(),
        "- `cardinality` is computed per Beck dmm_id within this alignment sheet only.".to_string(),
    ]
    .join("\n")
        + "\n";

    let sample_txt = sample_report(
        &edges,
        seed,
        "Sample: 50 random beck_berendes_edges rows",
        |e| {
            format!(
                "{} ({}) -> {} {} {} | des_pg={} lag_pg={} wec_pg={} mat={}",
                get(e, "beck_dmm_id"),
                get(e, "beck_greek_lemma"),
                get(e, "berendes_teitok_id"),
                get(e, "berendes_chapter_keys"),
                get(e, "berendes_term"),
                get(e, "desmoulins_page"),
                get(e, "laguna_page"),
                get(e, "wechel_page"),
                get(e, "mattioli_chapter_decimal"),
            )
        },
    );

    // Span inference: earliest anchor position per dmm, contiguous coverage
    // up to the next anchor (or the end of the Berendes list).
    let mut anchors: BTreeMap<String, usize> = BTreeMap::new();
    for e in &edges {
        let dmm = get(e, "beck_dmm_id");
        let teitok = get(e, "berendes_teitok_id");
        if dmm.is_empty() || teitok.is_empty() {
            continue;
        }
        let Some(&pos) = base.pos.get(&teitok) else {
            continue;
        };
        anchors
            .entry(dmm)
            .and_modify(|p| *p = (*p).min(pos))
            .or_insert(pos);
    }
    let mut anchor_list: Vec<(usize, String)> =
        anchors.into_iter().map(|(dmm, pos)| (pos, dmm)).collect();
    anchor_list.sort();

    let mut span_edges: Vec<RowMap> = Vec::new();
    let mut span_sizes: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, (start_pos, dmm)) in anchor_list.iter().enumerate() {
        let end_pos = match anchor_list.get(idx + 1) {
            Some((next_pos, _)) => next_pos.saturating_sub(1),
            None => base.order.len().saturating_sub(1),
        };
        if base.order.is_empty() || end_pos < *start_pos {
            continue;
        }
        span_sizes.insert(dmm.clone(), end_pos - start_pos + 1);
        let (beck_gr, beck_lat) = beck_meta.get(dmm).cloned().unwrap_or_default();
        let anchor_teitok = base.order[*start_pos].clone();
        let anchor_ch = base
            .by_teitok
            .get(&anchor_teitok)
            .map(|b| b.chapter_raw.clone())
            .unwrap_or_default();
        for pos in *start_pos..=end_pos {
            let teitok = &base.order[pos];
            let mut row = enrich_edge(&base, &ctx, dmm, &beck_gr, &beck_lat, teitok, "");
            row.insert("span_anchor_teitok_id".to_string(), anchor_teitok.clone());
            row.insert("span_anchor_chapter".to_string(), anchor_ch.clone());
            row.insert("span_offset".to_string(), (pos - start_pos).to_string());
            span_edges.push(row);
        }
    }

    let mut span_qa: Vec<String> = Vec::new();
    span_qa.push("# Beck ↔ Berendes span inference QA".to_string());
    span_qa.push(format!(
        "- Spanned Berendes entries: {} (should equal {})",
        span_edges.len(),
        base.order.len()
    ));
    span_qa.push(format!("- Anchors (unique dmm_id with anchor): {}", anchor_list.len()));
    let mut size_counts: BTreeMap<usize, usize> = BTreeMap::new();
    for size in span_sizes.values() {
        *size_counts.entry(*size).or_default() += 1;
    }
    let dist: Vec<String> = size_counts
        .iter()
        .take(12)
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();
    span_qa.push(format!("- Span size distribution (size:count): {}", dist.join(", ")));
    span_qa.push(String::new());
    span_qa.push("## Largest spans (top 10)".to_string());
    let mut biggest: Vec<(&String, &usize)> = span_sizes.iter().collect();
    biggest.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (dmm, size) in biggest.into_iter().take(10) {
        let greek = beck_meta.get(dmm).map(|(gr, _)| gr.clone()).unwrap_or_default();
        span_qa.push(format!("- {dmm} ({greek}) size={size}"));
    }
    let span_qa_md = span_qa.join("\n") + "\n";

    let span_sample_txt = sample_report(
        &span_edges,
        &format!("{seed}:span"),
        "Sample: 50 random beck_berendes_span_edges rows",
        |e| {
            format!(
                "{} ({}) -> {} {} {} | offset={} anchor={} {}",
                get(e, "beck_dmm_id"),
                get(e, "beck_greek_lemma"),
                get(e, "berendes_teitok_id"),
                get(e, "berendes_chapter_keys"),
                get(e, "berendes_term"),
                get(e, "span_offset"),
                get(e, "span_anchor_teitok_id"),
                get(e, "span_anchor_chapter"),
            )
        },
    );

    info!(
        edges = edges.len(),
        groups = groups.len(),
        span_edges = span_edges.len(),
        "built beck/berendes alignment"
    );
    Ok(AlignmentBuild {
        edges,
        groups,
        qa_md,
        sample_txt,
        span_edges,
        span_qa_md,
        span_sample_txt,
    })
}

fn sample_report<F: Fn(&RowMap) -> String>(
    rows: &[RowMap],
    seed: &str,
    title: &str,
    describe: F,
) -> String {
    let mut rng = seed_rng(seed);
    let sample: Vec<&RowMap> = if rows.len() >= 50 {
        rows.choose_multiple(&mut rng, 50).collect()
    } else {
        rows.iter().collect()
    };
    let mut lines = vec![title.to_string()];
    for (i, e) in sample.iter().enumerate() {
        lines.push(format!("{:02} {}", i + 1, describe(e)));
    }
    lines.join("\n") + "\n"
}

/// Build and write the alignment exports under `out_dir`.
pub fn run(xlsx_path: &Path, out_dir: &Path, seed: &str) -> Result<()> {
    let mut reader = XlsxReader::open(xlsx_path)?;
    let source_name = xlsx_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let build = build(&mut reader, &source_name, seed)?;

    write_csv(&out_dir.join("beck_berendes_edges.csv"), EDGE_FIELDS, &build.edges)?;
    write_csv(&out_dir.join("beck_berendes_groups.csv"), GROUP_FIELDS, &build.groups)?;
    write_text(&out_dir.join("beck_berendes_qa.md"), &build.qa_md)?;
    write_text(&out_dir.join("beck_berendes_sample50.txt"), &build.sample_txt)?;
    write_csv(
        &out_dir.join("beck_berendes_span_edges.csv"),
        &span_fields(),
        &build.span_edges,
    )?;
    write_text(&out_dir.join("beck_berendes_span_qa.md"), &build.span_qa_md)?;
    write_text(
        &out_dir.join("beck_berendes_span_sample50.txt"),
        &build.span_sample_txt,
    )?;
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
                &["dmm-0002-akoron", "1.2", "Akoron"],
                &["dmm-0003-kalamos", "1.3", "Kalamos"],
            ]),
            ("beck+berendes", &[
                &["dmm_id", "beck_greek_lemma", "beck_latin_lemma", "berendes_teitok_id", "berendes_chapter", "berendes_term"],
                &["DMM1001", "ἶρις", "iris", "dmm-0001-iris", "1.1", "Iris"],
                &["DMM1001", "ἶρις", "iris", "dmm-0002-akoron", "1.2", "Akoron"],
                &["DMM1003", "κάλαμος", "calamus", "", "1.3", "Kalamos"],
            ]),
            ("berendes + moulins", &[
                &["berendes_teitok_id", "berendes_chapter", "desmoulins_page", "desmoulins_term", "desmoulins_chapter"],
                &["dmm-0001-iris", "1.1", "12", "Iris", "I"],
            ]),
            ("NEW moulins laguna", &[
                &["dmm_id", "berendes_id", "laguna_book", "laguna_page", "laguna_chapter", "laguna_title", "laguna_scan_id"],
                &["DMM1001", "1.1", "1", "13", "1", "Iris", "55"],
            ]),
            ("NEW moulins wechel", &[
                &["dmm_id", "berendes_id", "wechel_book", "wechel_page", "wechel_chapter", "wechel_title", "wechel_scan_id"],
            ]),
            ("NEW moulins matthiolus", &[
                &["dmm_id", "berendes_id", "mattioli_book", "mattioli_chapter_roman", "mattioli_chapter_decimal", "mattioli_greek", "mattioli_latin"],
            ]),
            ("berendes + ruel", &[
                &["berendes_teitok_id", "berendes_chapter", "ruel_book", "ruel_page_scan", "ruel_folio", "ruel_chapter", "ruel_title_latin", "ruel_title_vernacular"],
            ]),
            ("berendes + lusitanus", &[
                &["berendes_teitok_id", "berendes_chapter", "lusitanus_page", "lusitanus_chapter", "lusitanus_title"],
            ]),
            ("berendes + barbaro", &[
                &["berendes_teitok_id", "berendes_chapter", "barbaro_book", "barbaro_page", "barbaro_chapter", "barbaro_term"],
            ]),
            ("gunther beck combined", &[
                &["dmm_id", "berendes_teitok_id", "berendes_chapter", "gunther_chapter", "gunther_division", "gunther_term"],
                &["DMM1001", "", "1.1", "1", "i", "IRIS"],
            ]),
            ("wellmann beck combined", &[
                &["dmm_id", "term_greek_lemma", "wellmann_id", "wellmann_book", "wellmann_chapter", "wellmann_greek_text"],
            ]),
        ])
    }

    #[test]
    fn test_edge_degrees_and_cardinality() {
        let mut reader = fixture();
        let out = build(&mut reader, "t.xlsx", "seed").unwrap();
        assert_eq!(out.edges.len(), 3);
        let first = &out.edges[0];
        assert_eq!(first.get("beck_degree").map(String::as_str), Some("2"));
        assert_eq!(first.get("cardinality").map(String::as_str), Some("1->N"));
        assert_eq!(first.get("laguna_page").map(String::as_str), Some("13"));
        assert_eq!(first.get("gunther_term").map(String::as_str), Some("IRIS"));
        let third = &out.edges[2];
        assert_eq!(third.get("cardinality").map(String::as_str), Some("1->1"));
    }

    #[test]
    fn test_missing_teitok_gets_candidates() {
        let mut reader = fixture();
        let out = build(&mut reader, "t.xlsx", "seed").unwrap();
        let third = &out.edges[2];
        assert_eq!(third.get("berendes_teitok_id").map(String::as_str), Some(""));
        assert_eq!(
            third.get("berendes_teitok_candidates").map(String::as_str),
            Some("dmm-0003-kalamos")
        );
        // Chapter context still comes from the sheet itself.
        assert_eq!(third.get("berendes_chapter_keys").map(String::as_str), Some("1.3"));
    }

    #[test]
    fn test_groups_aggregate_per_dmm() {
        let mut reader = fixture();
        let out = build(&mut reader, "t.xlsx", "seed").unwrap();
        assert_eq!(out.groups.len(), 2);
        let g = &out.groups[0];
        assert_eq!(g.get("beck_dmm_id").map(String::as_str), Some("DMM1001"));
        assert_eq!(g.get("beck_degree").map(String::as_str), Some("2"));
        assert_eq!(
            g.get("berendes_teitok_ids").map(String::as_str),
            Some("dmm-0001-iris; dmm-0002-akoron")
        );
    }

    #[test]
    fn test_span_inference_contiguous_ranges() {
        let mut reader = fixture();
        let out = build(&mut reader, "t.xlsx", "seed").unwrap();
        // Only DMM1001 has an anchored teitok; its span covers the whole
        // berendes list from position 0.
        assert_eq!(out.span_edges.len(), 3);
        let offsets: Vec<&str> = out
            .span_edges
            .iter()
            .filter_map(|e| e.get("span_offset").map(String::as_str))
            .collect();
        assert_eq!(offsets, vec!["0", "1", "2"]);
        for e in &out.span_edges {
            assert_eq!(e.get("beck_dmm_id").map(String::as_str), Some("DMM1001"));
            assert_eq!(
                e.get("span_anchor_teitok_id").map(String::as_str),
                Some("dmm-0001-iris")
            );
            assert_eq!(e.get("span_anchor_chapter").map(String::as_str), Some("1.1"));
        }
        assert!(out.span_qa_md.contains("- Anchors (unique dmm_id with anchor): 1"));
    }

    #[test]
    fn test_samples_are_deterministic() {
        let mut r1 = fixture();
        let mut r2 = fixture();
        let a = build(&mut r1, "t.xlsx", "seed").unwrap();
        let b = build(&mut r2, "t.xlsx", "seed").unwrap();
        assert_eq!(a.sample_txt, b.sample_txt);
        assert_eq!(a.span_sample_txt, b.span_sample_txt);
        assert!(a.sample_txt.starts_with("Sample: 50 random beck_berendes_edges rows"));
    }
}
