//! Migration of the legacy flat XML database into the normalized CSV set.
//!
//! Each `<item>` row carries one chapter across all editions as prefixed
//! attributes (`wm_id`, `br_name`, ...). The migration fans those out into
//! per-edition entries, aligns entries that share a row, and mines the
//! `_spec` attributes for botanical identifications.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::BufReader;
use std::path::Path;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::info;

use crate::error::{ConcordError, Result};
use crate::tabular::{write_csv, RowMap};

/// Attribute prefix to edition id, in output order.
pub const EDITION_PREFIXES: &[(&str, &str)] = &[
    ("wm", "wellmann"),
    ("sp", "sprengel"),
    ("br", "berendes"),
    ("bk", "beck"),
    ("gn", "gunther"),
    ("sl", "laguna"),
    ("ba", "barbaro"),
    ("lu", "lusitanus"),
    ("mo", "monardes"),
    ("ma", "matthioli"),
    ("mh", "desmoulins"),
];

pub const ENTRY_FIELDS: &[&str] = &[
    "id",
    "edition_id",
    "ref",
    "segment",
    "term",
    "term_greek",
    "term_latin",
    "page",
    "div_id",
    "seg_id",
    "url",
    "notes",
];

pub const ALIGNMENT_FIELDS: &[&str] =
    &["entry_a", "entry_b", "alignment_type", "confidence", "notes"];

pub const IDENTIFICATION_FIELDS: &[&str] = &["entry_id", "entity_id", "confidence", "notes"];

pub const ENTITY_FIELDS: &[&str] =
    &["id", "type", "modern_name", "wikidata_id", "wikipedia_url", "notes"];

// === Text cleanup ===

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x?[0-9A-Fa-f]+|[A-Za-z]+);").expect("entity regex"));
static SPECIES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Z][a-z]+\s+[a-z]+(?:\s+[A-Z][a-z]*\.?)?)").expect("species regex")
});
static GENUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:aceae|ales)?)\b").expect("genus regex"));

fn decode_entity(name: &str) -> Option<String> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse().ok()?
            } else {
                return None;
            };
            char::from_u32(code)?
        }
    };
    Some(ch.to_string())
}

/// Decode residual entities, strip markup and collapse whitespace. The
/// legacy attributes carry fragments of HTML inside XML attribute values.
pub fn clean_html(text: &str) -> String {
    let decoded = ENTITY_RE.replace_all(text, |caps: &regex::Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    let stripped = TAG_RE.replace_all(&decoded, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Species names from a free-text identification note: binomials first,
/// falling back to bare genus or family names.
pub fn extract_species_names(spec_text: &str) -> Vec<String> {
    let text = clean_html(spec_text);
    if text.is_empty() {
        return Vec::new();
    }
    let mut names: BTreeSet<String> = SPECIES_RE
        .captures_iter(&text)
        .map(|c| c[1].to_string())
        .collect();
    if names.is_empty() {
        names = GENUS_RE.captures_iter(&text).map(|c| c[1].to_string()).collect();
    }
    names.into_iter().collect()
}

fn entity_slug(species_name: &str) -> String {
    species_name.to_lowercase().replace(' ', "_").replace('.', "")
}

// === XML parsing ===

pub type Item = BTreeMap<String, String>;

pub fn parse_items(xml_path: &Path) -> Result<Vec<Item>> {
    if !xml_path.exists() {
        return Err(ConcordError::InputNotFound(xml_path.to_path_buf()));
    }
    let file = fs::File::open(xml_path)?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(quick_xml::Error::from)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"item" => {
                let mut attrs = Item::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(quick_xml::Error::from)?
                        .into_owned();
                    attrs.insert(key, value);
                }
                items.push(attrs);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(items)
}

// === Extraction ===

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: String,
    pub edition_id: String,
    pub ref_: String,
    pub term: String,
    pub term_greek: String,
    pub term_latin: String,
    pub page: String,
    pub div_id: String,
    pub url: String,
    item_id: String,
}

fn get(item: &Item, key: &str) -> String {
    item.get(key).cloned().unwrap_or_default()
}

pub fn extract_entries(items: &[Item]) -> Vec<Entry> {
    let mut entries = Vec::new();
    for item in items {
        let item_id = get(item, "id");
        for (prefix, edition_id) in EDITION_PREFIXES {
            let ref_ = get(item, &format!("{prefix}_id"));
            if ref_.is_empty() {
                continue;
            }
            let term_latin = if *prefix == "sp" { get(item, "sp_lat") } else { String::new() };
            entries.push(Entry {
                id: format!("{edition_id}:{ref_}"),
                edition_id: (*edition_id).to_string(),
                ref_: ref_.clone(),
                term: clean_html(&get(item, &format!("{prefix}_name"))),
                term_greek: get(item, &format!("{prefix}_grk")),
                term_latin,
                page: get(item, &format!("{prefix}_pag")),
                div_id: get(item, &format!("{prefix}_tt")),
                url: get(item, &format!("{prefix}_url")),
                item_id: item_id.clone(),
            });
        }
    }
    entries
}

/// Entries that share an XML row are equivalents of the same chapter.
pub fn extract_alignments(entries: &[Entry]) -> Vec<RowMap> {
    let mut by_item: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
    for entry in entries {
        by_item.entry(&entry.item_id).or_default().push(entry);
    }
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut alignments = Vec::new();
    for group in by_item.values_mut() {
        group.sort_by_key(|e| e.edition_id.clone());
        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                let pair = if a.id <= b.id {
                    (a.id.clone(), b.id.clone())
                } else {
                    (b.id.clone(), a.id.clone())
                };
                if !seen.insert(pair) {
                    continue;
                }
                let mut row = RowMap::new();
                row.insert("entry_a".to_string(), a.id.clone());
                row.insert("entry_b".to_string(), b.id.clone());
                row.insert("alignment_type".to_string(), "equivalent".to_string());
                row.insert("confidence".to_string(), "certain".to_string());
                row.insert("notes".to_string(), String::new());
                alignments.push(row);
            }
        }
    }
    alignments
}

pub fn extract_identifications(items: &[Item], entries: &[Entry]) -> (Vec<RowMap>, Vec<RowMap>) {
    let entry_lookup: BTreeMap<(String, String), &str> = entries
        .iter()
        .map(|e| ((e.edition_id.clone(), e.ref_.clone()), e.id.as_str()))
        .collect();

    let mut identifications: Vec<RowMap> = Vec::new();
    let mut entities: BTreeMap<String, String> = BTreeMap::new();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

    for item in items {
        for (prefix, edition_id) in EDITION_PREFIXES {
            let spec_text = get(item, &format!("{prefix}_spec"));
            if spec_text.is_empty() {
                continue;
            }
            let ref_ = get(item, &format!("{prefix}_id"));
            if ref_.is_empty() {
                continue;
            }
            let Some(entry_id) = entry_lookup.get(&((*edition_id).to_string(), ref_)) else {
                continue;
            };
            for species_name in extract_species_names(&spec_text) {
                let entity_id = entity_slug(&species_name);
                entities.entry(entity_id.clone()).or_insert(species_name);
                if !seen.insert(((*entry_id).to_string(), entity_id.clone())) {
                    continue;
                }
                let mut row = RowMap::new();
                row.insert("entry_id".to_string(), (*entry_id).to_string());
                row.insert("entity_id".to_string(), entity_id);
                row.insert("confidence".to_string(), "certain".to_string());
                row.insert("notes".to_string(), format!("Extracted from {edition_id}"));
                identifications.push(row);
            }
        }
    }

    let entity_rows = entities
        .into_iter()
        .map(|(id, modern_name)| {
            let mut row = RowMap::new();
            row.insert("id".to_string(), id);
            row.insert("type".to_string(), "plant".to_string());
            row.insert("modern_name".to_string(), modern_name);
            row.insert("wikidata_id".to_string(), String::new());
            row.insert("wikipedia_url".to_string(), String::new());
            row.insert("notes".to_string(), String::new());
            row
        })
        .collect();
    (identifications, entity_rows)
}

// === Seed templates ===

const MANUSCRIPT_FIELDS: &[&str] = &[
    "id",
    "name",
    "siglum",
    "repository",
    "shelfmark",
    "date_century",
    "iiif_manifest",
    "digitization_url",
    "notes",
];

const WITNESS_FIELDS: &[&str] = &[
    "entry_id",
    "manuscript_id",
    "folio",
    "line",
    "reading",
    "iiif_canvas",
    "iiif_region",
    "apparatus_note",
];

fn seed_row(pairs: &[(&str, &str)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn write_seed_templates(data_dir: &Path) -> Result<()> {
    let manuscripts = vec![seed_row(&[
        ("id", "vindob_gr_1"),
        ("name", "Codex Vindobonensis med. gr. 1"),
        ("siglum", "V"),
        ("repository", "\u{d6}sterreichische Nationalbibliothek"),
        ("shelfmark", "Cod. med. gr. 1"),
        ("date_century", "6"),
        ("notes", "Vienna Dioscorides"),
    ])];
    write_csv(&data_dir.join("manuscripts.csv"), MANUSCRIPT_FIELDS, &manuscripts)?;

    let witnesses = vec![seed_row(&[
        ("entry_id", "wellmann:1.1"),
        ("manuscript_id", "vindob_gr_1"),
    ])];
    write_csv(&data_dir.join("witnesses.csv"), WITNESS_FIELDS, &witnesses)?;
    Ok(())
}

// === Pipeline ===

fn entry_row(entry: &Entry) -> RowMap {
    let mut row = RowMap::new();
    row.insert("id".to_string(), entry.id.clone());
    row.insert("edition_id".to_string(), entry.edition_id.clone());
    row.insert("ref".to_string(), entry.ref_.clone());
    row.insert("segment".to_string(), String::new());
    row.insert("term".to_string(), entry.term.clone());
    row.insert("term_greek".to_string(), entry.term_greek.clone());
    row.insert("term_latin".to_string(), entry.term_latin.clone());
    row.insert("page".to_string(), entry.page.clone());
    row.insert("div_id".to_string(), entry.div_id.clone());
    row.insert("seg_id".to_string(), String::new());
    row.insert("url".to_string(), entry.url.clone());
    row.insert("notes".to_string(), String::new());
    row
}

/// Migrate the flat XML database at `xml_path` into normalized CSVs under
/// `data_dir`.
pub fn run(xml_path: &Path, data_dir: &Path) -> Result<()> {
    let items = parse_items(xml_path)?;
    info!(items = items.len(), "parsed legacy database");

    let entries = extract_entries(&items);
    let alignments = extract_alignments(&entries);
    let (identifications, entities) = extract_identifications(&items, &entries);
    info!(
        entries = entries.len(),
        alignments = alignments.len(),
        identifications = identifications.len(),
        entities = entities.len(),
        "extracted normalized tables"
    );

    fs::create_dir_all(data_dir)?;
    let entry_rows: Vec<RowMap> = entries.iter().map(entry_row).collect();
    write_csv(&data_dir.join("entries.csv"), ENTRY_FIELDS, &entry_rows)?;
    write_csv(&data_dir.join("alignments.csv"), ALIGNMENT_FIELDS, &alignments)?;
    write_csv(
        &data_dir.join("identifications.csv"),
        IDENTIFICATION_FIELDS,
        &identifications,
    )?;
    write_csv(&data_dir.join("entities.csv"), ENTITY_FIELDS, &entities)?;
    write_seed_templates(data_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::norm::unique_join;
    use tempfile::tempdir;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root>
  <item id="1" book="1" wm_id="1.1" wm_name="&lt;b&gt;iris&lt;/b&gt;"
        br_id="1.1" br_name="Iris" br_spec="Iris germanica L. oder Iris pallida"
        sp_id="1.1" sp_name="iris" sp_lat="Iris"/>
  <item id="2" book="1" wm_id="1.2" wm_name="akoron" bk_id="1.2" bk_name="sweet flag"/>
  <item id="3" book="1" mo_id="IV" mo_name="empty row otherwise"/>
</root>"#;

    #[test]
    fn test_clean_html() {
        assert_eq!(clean_html("<b>Iris</b>&nbsp;germanica"), "Iris germanica");
        assert_eq!(clean_html("a &amp; b\n  c"), "a & b c");
        assert_eq!(clean_html("&#214;sterreich"), "\u{d6}sterreich");
        assert_eq!(clean_html(""), "");
    }

    #[test]
    fn test_extract_species_names() {
        let names = extract_species_names("Iris germanica L. oder Iris pallida");
        assert_eq!(names, vec!["Iris germanica L.", "Iris pallida"]);
        // No binomial: falls back to genus-shaped names.
        let names = extract_species_names("wohl Iridaceae");
        assert_eq!(names, vec!["Iridaceae"]);
        assert!(extract_species_names("").is_empty());
    }

    #[test]
    fn test_entries_and_alignments() {
        let dir = tempdir().unwrap();
        let xml_path = dir.path().join("db.xml");
        std::fs::write(&xml_path, XML).unwrap();
        let items = parse_items(&xml_path).unwrap();
        assert_eq!(items.len(), 3);

        let entries = extract_entries(&items);
        // Item 1 fans out to wellmann, sprengel, berendes; item 2 to
        // wellmann, beck; item 3 to monardes.
        assert_eq!(entries.len(), 6);
        let wm = entries.iter().find(|e| e.id == "wellmann:1.1").unwrap();
        assert_eq!(wm.term, "iris");
        let sp = entries.iter().find(|e| e.id == "sprengel:1.1").unwrap();
        assert_eq!(sp.term_latin, "Iris");

        let alignments = extract_alignments(&entries);
        // Three pairwise links for item 1, one for item 2, none for item 3.
        assert_eq!(alignments.len(), 4);
        let joined = unique_join(
            alignments
                .iter()
                .map(|a| format!("{}={}", a["entry_a"], a["entry_b"])),
        );
        assert!(joined.contains("berendes:1.1=sprengel:1.1"));
        assert!(joined.contains("beck:1.2=wellmann:1.2"));
    }

    #[test]
    fn test_identifications_deduped_with_entities() {
        let dir = tempdir().unwrap();
        let xml_path = dir.path().join("db.xml");
        std::fs::write(&xml_path, XML).unwrap();
        let items = parse_items(&xml_path).unwrap();
        let entries = extract_entries(&items);
        let (idents, entities) = extract_identifications(&items, &entries);
        assert_eq!(idents.len(), 2);
        assert!(idents
            .iter()
            .all(|i| i["entry_id"] == "berendes:1.1" && i["confidence"] == "certain"));
        let slugs: Vec<&str> = entities.iter().map(|e| e["id"].as_str()).collect();
        assert_eq!(slugs, vec!["iris_germanica_l", "iris_pallida"]);
        assert_eq!(entities[0]["modern_name"], "Iris germanica L.");
    }

    #[test]
    fn test_run_writes_all_tables() {
        let dir = tempdir().unwrap();
        let xml_path = dir.path().join("db.xml");
        std::fs::write(&xml_path, XML).unwrap();
        let data_dir = dir.path().join("data");
        run(&xml_path, &data_dir).unwrap();
        for name in [
            "entries.csv",
            "alignments.csv",
            "identifications.csv",
            "entities.csv",
            "manuscripts.csv",
            "witnesses.csv",
        ] {
            assert!(data_dir.join(name).exists(), "{name} missing");
        }
        let manuscripts = std::fs::read_to_string(data_dir.join("manuscripts.csv")).unwrap();
        assert!(manuscripts.contains("Vienna Dioscorides"));
    }
}
