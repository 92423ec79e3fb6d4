//! Edition-native extraction of the workbook sheets into per-edition CSVs.
//!
//! Deliberately performs no cross-edition alignment: each sheet is written
//! out with its own column vocabulary, plus a stable `edition_entry_id`
//! derived from the source row number.

use std::io::{Read, Seek};
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::norm::normalize_scalar;
use crate::tabular::{write_csv, RowMap};
use crate::xlsx::XlsxReader;

/// Positional extraction rule for one sheet.
struct SheetSpec {
    sheet: &'static str,
    edition: &'static str,
    /// Sheets that carry a header row skip their first data row.
    skip_header: bool,
    /// 1-based source column -> output field.
    cols: &'static [(u32, &'static str)],
    /// Output column order (may differ from source column order).
    fields: &'static [&'static str],
    out_files: &'static [&'static str],
}

const SHEET_SPECS: &[SheetSpec] = &[
    SheetSpec {
        sheet: "berendes",
        edition: "berendes",
        skip_header: false,
        cols: &[
            (1, "berendes_teitok_id"),
            (2, "berendes_chapter"),
            (3, "berendes_term"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "berendes_teitok_id",
            "berendes_chapter",
            "berendes_term",
        ],
        out_files: &["berendes.csv"],
    },
    // The raw Desmoulins list is written twice: once under the edition name
    // and once under the sheet name, for downstream tools that expect either.
    SheetSpec {
        sheet: "moulins",
        edition: "desmoulins",
        skip_header: true,
        cols: &[
            (1, "desmoulins_page"),
            (2, "desmoulins_term"),
            (3, "desmoulins_chapter"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "desmoulins_page",
            "desmoulins_chapter",
            "desmoulins_term",
        ],
        out_files: &["desmoulins.csv", "moulins.csv"],
    },
    SheetSpec {
        sheet: "laguna",
        edition: "laguna",
        skip_header: true,
        cols: &[
            (1, "laguna_scan_id"),
            (2, "laguna_book"),
            (3, "laguna_page"),
            (4, "laguna_chapter"),
            (5, "laguna_title"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "laguna_scan_id",
            "laguna_book",
            "laguna_page",
            "laguna_chapter",
            "laguna_title",
        ],
        out_files: &["laguna.csv"],
    },
    SheetSpec {
        sheet: "wechel",
        edition: "wechel",
        skip_header: true,
        cols: &[
            (1, "wechel_scan_id"),
            (2, "wechel_book"),
            (3, "wechel_page"),
            (4, "wechel_title"),
            (5, "wechel_chapter"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "wechel_scan_id",
            "wechel_book",
            "wechel_page",
            "wechel_chapter",
            "wechel_title",
        ],
        out_files: &["wechel.csv"],
    },
    SheetSpec {
        sheet: "ruel",
        edition: "ruel",
        skip_header: false,
        cols: &[
            (1, "ruel_page_scan"),
            (2, "ruel_book"),
            (3, "ruel_unknown_val"),
            (4, "ruel_chapter"),
            (5, "ruel_title_latin"),
            (6, "ruel_folio"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "ruel_page_scan",
            "ruel_book",
            "ruel_unknown_val",
            "ruel_chapter",
            "ruel_title_latin",
            "ruel_folio",
        ],
        out_files: &["ruel.csv"],
    },
    SheetSpec {
        sheet: "lusitanus",
        edition: "lusitanus",
        skip_header: false,
        cols: &[
            (1, "lusitanus_page"),
            (2, "lusitanus_title"),
            (3, "lusitanus_note"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "lusitanus_page",
            "lusitanus_title",
            "lusitanus_note",
        ],
        out_files: &["lusitanus.csv"],
    },
    SheetSpec {
        sheet: "barbaro",
        edition: "barbaro",
        skip_header: false,
        cols: &[
            (1, "barbaro_page"),
            (2, "barbaro_chapter"),
            (3, "barbaro_term"),
            (4, "barbaro_book"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "barbaro_page",
            "barbaro_book",
            "barbaro_chapter",
            "barbaro_term",
        ],
        out_files: &["barbaro.csv"],
    },
    SheetSpec {
        sheet: "gunther",
        edition: "gunther",
        skip_header: false,
        cols: &[
            (1, "gunther_chapter"),
            (2, "gunther_division"),
            (3, "gunther_term"),
            (4, "gunther_description"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "gunther_chapter",
            "gunther_division",
            "gunther_term",
            "gunther_description",
        ],
        out_files: &["gunther.csv"],
    },
    SheetSpec {
        sheet: "matthiolo",
        edition: "matthiolo",
        skip_header: false,
        cols: &[
            (1, "matthiolo_book"),
            (2, "matthiolo_chapter"),
            (3, "matthiolo_greek"),
            (4, "matthiolo_latin"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "matthiolo_book",
            "matthiolo_chapter",
            "matthiolo_greek",
            "matthiolo_latin",
        ],
        out_files: &["matthiolo.csv"],
    },
    SheetSpec {
        sheet: "wellmann",
        edition: "wellmann",
        skip_header: false,
        cols: &[
            (1, "wellmann_id"),
            (2, "wellmann_book"),
            (3, "wellmann_chapter"),
            (4, "wellmann_greek_text"),
        ],
        fields: &[
            "edition",
            "edition_entry_id",
            "wellmann_id",
            "wellmann_book",
            "wellmann_chapter",
            "wellmann_greek_text",
        ],
        out_files: &["wellmann.csv"],
    },
    SheetSpec {
        sheet: "beck-index",
        edition: "beck",
        skip_header: false,
        cols: &[(1, "dmm_id"), (2, "greek_lemma"), (3, "latin_lemma")],
        fields: &["edition", "edition_entry_id", "dmm_id", "greek_lemma", "latin_lemma"],
        out_files: &["beck_index.csv"],
    },
];

fn extract_sheet<R: Read + Seek>(reader: &mut XlsxReader<R>, spec: &SheetSpec) -> Result<Vec<RowMap>> {
    let raw_rows = reader.rows(spec.sheet)?;
    let skip = usize::from(spec.skip_header);
    let mut rows: Vec<RowMap> = Vec::new();
    for (row_idx, cells) in raw_rows.iter().skip(skip) {
        let mut row = RowMap::new();
        row.insert("edition".to_string(), spec.edition.to_string());
        row.insert("edition_entry_id".to_string(), format!("row{row_idx}"));
        for &(col, field) in spec.cols {
            let value = cells.get(&col).map(String::as_str).unwrap_or("");
            row.insert(field.to_string(), normalize_scalar(value));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Extract all edition sheets from the workbook into `out_dir`.
pub fn extract_editions(xlsx_path: &Path, out_dir: &Path) -> Result<()> {
    let mut reader = XlsxReader::open(xlsx_path)?;
    for spec in SHEET_SPECS {
        let rows = extract_sheet(&mut reader, spec)?;
        info!(sheet = spec.sheet, rows = rows.len(), "extracted edition sheet");
        for out_file in spec.out_files {
            write_csv(&out_dir.join(out_file), spec.fields, &rows)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::XlsxReader;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn workbook_with(sheet: &str, sheet_xml: &str) -> XlsxReader<Cursor<Vec<u8>>> {
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zw.start_file("xl/workbook.xml", opts).unwrap();
        zw.write_all(
            format!(
                r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
                     xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
                     <sheets><sheet name="{sheet}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
            )
            .as_bytes(),
        )
        .unwrap();
        zw.start_file("xl/_rels/workbook.xml.rels", opts).unwrap();
        zw.write_all(
            br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
                 <Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
        )
        .unwrap();
        zw.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
        zw.write_all(sheet_xml.as_bytes()).unwrap();
        XlsxReader::from_reader(zw.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_extract_berendes_positional() {
        let mut reader = workbook_with(
            "berendes",
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>dmm-1</t></is></c><c r="B1"><v>1.1</v></c>
                <c r="C1" t="inlineStr"><is><t>Iris</t></is></c></row>
            <row r="3"><c r="A3" t="inlineStr"><is><t>dmm-2</t></is></c><c r="B3"><v>1.2</v></c></row>
            </sheetData></worksheet>"#,
        );
        let spec = &SHEET_SPECS[0];
        let rows = extract_sheet(&mut reader, spec).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("edition").map(String::as_str), Some("berendes"));
        assert_eq!(rows[0].get("edition_entry_id").map(String::as_str), Some("row1"));
        assert_eq!(rows[0].get("berendes_term").map(String::as_str), Some("Iris"));
        // Row indexes track the source sheet even across gaps.
        assert_eq!(rows[1].get("edition_entry_id").map(String::as_str), Some("row3"));
        assert_eq!(rows[1].get("berendes_term").map(String::as_str), Some(""));
    }

    #[test]
    fn test_header_sheets_skip_first_row() {
        let mut reader = workbook_with(
            "laguna",
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>scan</t></is></c></row>
            <row r="2"><c r="A2"><v>55</v></c><c r="B2"><v>2</v></c><c r="D2"><v>2.9</v></c></row>
            </sheetData></worksheet>"#,
        );
        let spec = SHEET_SPECS
            .iter()
            .find(|s| s.sheet == "laguna")
            .expect("laguna spec");
        let rows = extract_sheet(&mut reader, spec).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("laguna_scan_id").map(String::as_str), Some("55"));
        assert_eq!(rows[0].get("laguna_chapter").map(String::as_str), Some("2.9"));
    }
}
