//! SQLite import/export for the curated concordance tables.
//!
//! The database is rebuilt from CSVs on every import; CSV stays the editing
//! surface and the database is the queryable artifact. Export reverses the
//! trip with a fixed column order per table.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{ConcordError, Result};

pub const SCHEMA: &str = r#"
-- Editions table (static reference)
CREATE TABLE IF NOT EXISTS editions (
    id TEXT PRIMARY KEY,        -- wellmann, laguna, beck...
    name TEXT,                  -- "Wellmann (1907-1914)"
    language TEXT,              -- grc, lat, deu, eng, spa, fra
    type TEXT,                  -- critical, translation, ms, commentary
    tei_file TEXT,              -- path to TEI XML if available
    base_url TEXT               -- for external links
);

-- Entries table (textual references in editions)
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,        -- edition_id:ref[:segment]
    edition_id TEXT REFERENCES editions(id),
    ref TEXT,                   -- chapter/section ref (1.1, 1.59, 1.72...)
    segment TEXT,               -- NULL for whole chapter, or "seg1", "seg2"
    term TEXT,                  -- the word/phrase as it appears
    term_greek TEXT,            -- Greek form if applicable
    term_latin TEXT,            -- Latin form if applicable
    page TEXT,                  -- page number in edition
    div_id TEXT,                -- div-13 etc. for TEI anchor
    seg_id TEXT,                -- seg-1 etc. for TEI segment anchor
    url TEXT,                   -- external link
    notes TEXT
);

-- Alignments table (many-to-many between entries)
CREATE TABLE IF NOT EXISTS alignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_a TEXT REFERENCES entries(id),
    entry_b TEXT REFERENCES entries(id),
    alignment_type TEXT,        -- "equivalent", "contains", "part_of", "related"
    confidence TEXT,            -- "certain", "probable", "uncertain"
    notes TEXT,
    UNIQUE(entry_a, entry_b)
);

-- Entities table (botanical/natural things)
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,        -- auto-generated or Wikidata Q-number
    type TEXT,                  -- plant, animal, mineral, preparation
    modern_name TEXT,           -- "Iris germanica L."
    wikidata_id TEXT,           -- Q12345
    wikipedia_url TEXT,
    notes TEXT
);

-- Identifications table (scholarly attributions)
CREATE TABLE IF NOT EXISTS identifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT REFERENCES entries(id),
    entity_id TEXT REFERENCES entities(id),
    confidence TEXT,            -- certain, probable, uncertain
    notes TEXT,
    UNIQUE(entry_id, entity_id)
);

-- Manuscripts table (physical witnesses)
CREATE TABLE IF NOT EXISTS manuscripts (
    id TEXT PRIMARY KEY,        -- vindob_gr_1, paris_gr_2179...
    name TEXT,                  -- "Codex Vindobonensis med. gr. 1"
    siglum TEXT,                -- V, P, N (critical apparatus sigla)
    repository TEXT,
    shelfmark TEXT,             -- "Cod. med. gr. 1"
    date_century INTEGER,       -- 6 (for 6th century)
    iiif_manifest TEXT,         -- IIIF manifest URL
    digitization_url TEXT,      -- Link to digital facsimile
    notes TEXT
);

-- Witnesses table (manuscript readings linked to entries)
CREATE TABLE IF NOT EXISTS witnesses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT REFERENCES entries(id),
    manuscript_id TEXT REFERENCES manuscripts(id),
    folio TEXT,                 -- "113r", "f.45v"
    line TEXT,                  -- line number if applicable
    reading TEXT,               -- the text as it appears in this ms
    iiif_canvas TEXT,           -- direct link to IIIF canvas
    iiif_region TEXT,           -- xywh coordinates for the passage
    apparatus_note TEXT,        -- critical apparatus info
    UNIQUE(entry_id, manuscript_id)
);

CREATE INDEX IF NOT EXISTS idx_entries_edition ON entries(edition_id);
CREATE INDEX IF NOT EXISTS idx_entries_ref ON entries(ref);
CREATE INDEX IF NOT EXISTS idx_alignments_entry_a ON alignments(entry_a);
CREATE INDEX IF NOT EXISTS idx_alignments_entry_b ON alignments(entry_b);
CREATE INDEX IF NOT EXISTS idx_identifications_entry ON identifications(entry_id);
CREATE INDEX IF NOT EXISTS idx_identifications_entity ON identifications(entity_id);
CREATE INDEX IF NOT EXISTS idx_witnesses_entry ON witnesses(entry_id);
CREATE INDEX IF NOT EXISTS idx_witnesses_manuscript ON witnesses(manuscript_id);

-- All entries aligned with a given entry, in both directions
CREATE VIEW IF NOT EXISTS v_aligned_entries AS
SELECT
    a.entry_a as source_entry,
    a.entry_b as aligned_entry,
    a.alignment_type,
    a.confidence
FROM alignments a
UNION ALL
SELECT
    a.entry_b as source_entry,
    a.entry_a as aligned_entry,
    a.alignment_type,
    a.confidence
FROM alignments a;

-- Entry info joined with its edition
CREATE VIEW IF NOT EXISTS v_entries_full AS
SELECT
    e.*,
    ed.name as edition_name,
    ed.language as edition_language,
    ed.type as edition_type
FROM entries e
LEFT JOIN editions ed ON e.edition_id = ed.id;

-- Identifications joined with entry and entity details
CREATE VIEW IF NOT EXISTS v_identifications_full AS
SELECT
    i.*,
    e.term,
    e.ref,
    e.edition_id,
    ent.modern_name,
    ent.type as entity_type,
    ent.wikidata_id
FROM identifications i
JOIN entries e ON i.entry_id = e.id
JOIN entities ent ON i.entity_id = ent.id;
"#;

/// Tables in dependency order, with their export column order.
pub const TABLES: &[(&str, &[&str])] = &[
    ("editions", &["id", "name", "language", "type", "tei_file", "base_url"]),
    (
        "entries",
        &[
            "id", "edition_id", "ref", "segment", "term", "term_greek", "term_latin", "page",
            "div_id", "seg_id", "url", "notes",
        ],
    ),
    ("alignments", &["entry_a", "entry_b", "alignment_type", "confidence", "notes"]),
    ("entities", &["id", "type", "modern_name", "wikidata_id", "wikipedia_url", "notes"]),
    ("identifications", &["entry_id", "entity_id", "confidence", "notes"]),
    (
        "manuscripts",
        &[
            "id", "name", "siglum", "repository", "shelfmark", "date_century", "iiif_manifest",
            "digitization_url", "notes",
        ],
    ),
    (
        "witnesses",
        &[
            "entry_id", "manuscript_id", "folio", "line", "reading", "iiif_canvas",
            "iiif_region", "apparatus_note",
        ],
    ),
];

fn import_csv_to_table(conn: &Connection, csv_path: &Path, table: &str) -> Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut count = 0usize;
    for record in reader.records() {
        let record = record?;
        // Empty cells become NULL so sparse columns stay NULL-queryable.
        let values: Vec<Option<String>> = (0..columns.len())
            .map(|i| {
                record
                    .get(i)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .collect();
        match stmt.execute(rusqlite::params_from_iter(values.iter())) {
            Ok(_) => count += 1,
            Err(e) => warn!(table, error = %e, "row insert failed"),
        }
    }
    Ok(count)
}

/// Referential problems across the imported tables, as human-readable notes.
pub fn validate_foreign_keys(conn: &Connection) -> Result<Vec<String>> {
    let mut notes = Vec::new();
    let checks: &[(&str, &str)] = &[
        (
            "entries have invalid edition_id",
            "SELECT COUNT(*) FROM entries WHERE edition_id NOT IN (SELECT id FROM editions)",
        ),
        (
            "alignments have invalid entry references",
            "SELECT COUNT(*) FROM alignments
             WHERE entry_a NOT IN (SELECT id FROM entries)
                OR entry_b NOT IN (SELECT id FROM entries)",
        ),
        (
            "identifications have invalid entry_id",
            "SELECT COUNT(*) FROM identifications WHERE entry_id NOT IN (SELECT id FROM entries)",
        ),
    ];
    for (label, sql) in checks {
        let orphaned: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        if orphaned > 0 {
            notes.push(format!("{orphaned} {label}"));
        }
    }
    Ok(notes)
}

/// Rebuild the database from the CSVs under `data_dir`.
pub fn import(data_dir: &Path, db_path: &Path) -> Result<()> {
    if db_path.exists() {
        std::fs::remove_file(db_path)?;
        info!(path = %db_path.display(), "removed existing database");
    }
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA)?;

    for (table, _) in TABLES {
        let csv_path = data_dir.join(format!("{table}.csv"));
        if !csv_path.is_file() {
            info!(table, "skipping (csv not found)");
            continue;
        }
        let count = import_csv_to_table(&conn, &csv_path, table)?;
        info!(table, rows = count, "imported");
    }

    for note in validate_foreign_keys(&conn)? {
        warn!("{note}");
    }

    for (table, _) in TABLES {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        info!(table, rows = count, "table size");
    }
    Ok(())
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}

fn export_table(conn: &Connection, table: &str, columns: &[&str], out_path: &Path) -> Result<usize> {
    let sql = format!("SELECT {} FROM {table}", columns.join(", "));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut writer = csv::Writer::from_path(out_path)?;
    writer.write_record(columns)?;
    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let mut record: Vec<String> = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            record.push(value_to_string(row.get::<_, Value>(i)?));
        }
        writer.write_record(&record)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Export tables to CSVs under `out_dir`; `table` of `None` exports all.
pub fn export(db_path: &Path, out_dir: &Path, table: Option<&str>) -> Result<()> {
    if !db_path.is_file() {
        return Err(ConcordError::InputNotFound(db_path.to_path_buf()));
    }
    let conn = Connection::open(db_path)?;
    std::fs::create_dir_all(out_dir)?;

    let selected: Vec<&(&str, &[&str])> = match table {
        Some(name) => {
            let Some(entry) = TABLES.iter().find(|(t, _)| *t == name) else {
                let available: Vec<&str> = TABLES.iter().map(|(t, _)| *t).collect();
                return Err(ConcordError::Validation(format!(
                    "unknown table: {name} (available: {})",
                    available.join(", ")
                )));
            };
            vec![entry]
        }
        None => TABLES.iter().collect(),
    };

    for (name, columns) in selected {
        let out_path = out_dir.join(format!("{name}.csv"));
        let count = export_table(&conn, name, columns, &out_path)?;
        info!(table = name, rows = count, "exported");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_csvs(dir: &Path) {
        std::fs::write(
            dir.join("editions.csv"),
            "id,name,language,type,tei_file,base_url\n\
             wellmann,\"Wellmann (1907-1914)\",grc,critical,,\n\
             beck,Beck (2005),eng,translation,,\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("entries.csv"),
            "id,edition_id,ref,term,page\n\
             wellmann:1.1,wellmann,1.1,ἶρις,12\n\
             beck:1.1,beck,1.1,iris,\n\
             ghost:1.1,ghost,1.1,orphan,\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("alignments.csv"),
            "entry_a,entry_b,alignment_type,confidence,notes\n\
             wellmann:1.1,beck:1.1,equivalent,certain,\n",
        )
        .unwrap();
    }

    #[test]
    fn test_import_creates_tables_and_nulls_empty_cells() {
        let dir = tempdir().unwrap();
        seed_csvs(dir.path());
        let db_path = dir.path().join("dmm.db");
        import(dir.path(), &db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 3);
        let nulls: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries WHERE page IS NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(nulls, 2);
        // Unlisted columns stay NULL rather than empty strings.
        let segs: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries WHERE segment IS NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(segs, 3);
    }

    #[test]
    fn test_foreign_key_validation_reports_orphans() {
        let dir = tempdir().unwrap();
        seed_csvs(dir.path());
        let db_path = dir.path().join("dmm.db");
        import(dir.path(), &db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let notes = validate_foreign_keys(&conn).unwrap();
        assert_eq!(notes, vec!["1 entries have invalid edition_id".to_string()]);
    }

    #[test]
    fn test_aligned_entries_view_is_bidirectional() {
        let dir = tempdir().unwrap();
        seed_csvs(dir.path());
        let db_path = dir.path().join("dmm.db");
        import(dir.path(), &db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM v_aligned_entries WHERE source_entry = 'beck:1.1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_export_round_trip() {
        let dir = tempdir().unwrap();
        seed_csvs(dir.path());
        let db_path = dir.path().join("dmm.db");
        import(dir.path(), &db_path).unwrap();

        let out = tempdir().unwrap();
        export(&db_path, out.path(), Some("editions")).unwrap();
        let content = std::fs::read_to_string(out.path().join("editions.csv")).unwrap();
        assert!(content.starts_with("id,name,language,type,tei_file,base_url\n"));
        assert!(content.contains("Wellmann (1907-1914)"));
        assert!(export(&db_path, out.path(), Some("bogus")).is_err());
    }
}
