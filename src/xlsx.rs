//! Minimal workbook reader for the concordance spreadsheet.
//!
//! Reads `.xlsx` as a ZIP of SpreadsheetML parts: shared strings, the sheet
//! list from `xl/workbook.xml` plus its relationships, and per-sheet cell
//! data. Only what the concordance sheets use is supported (shared strings,
//! inline strings, plain values).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::{ConcordError, OptionExt, Result};
use crate::norm::{is_empty, looks_like_header, normalize_scalar};

// === Cell references ===

fn col_to_int(col: &str) -> u32 {
    let mut n = 0u32;
    for c in col.chars() {
        n = n * 26 + (c as u32 - 64);
    }
    n
}

/// Split a cell reference like `BC12` into (column, row), both 1-based.
fn split_ref(cell_ref: &str) -> Result<(u32, u32)> {
    let col: String = cell_ref.chars().filter(char::is_ascii_alphabetic).collect();
    let row: String = cell_ref.chars().filter(char::is_ascii_digit).collect();
    let row: u32 = row
        .parse()
        .map_err(|_| ConcordError::Workbook(format!("bad cell reference: {cell_ref}")))?;
    Ok((col_to_int(&col), row))
}

// === Reader ===

#[derive(Debug, Clone)]
struct SheetRef {
    name: String,
    target: String,
}

/// A sheet row: 1-based row index and 1-based column -> normalized value.
pub type SheetRow = (u32, BTreeMap<u32, String>);

/// A table record: source row index and header -> value map.
pub type Record = (u32, BTreeMap<String, String>);

pub struct XlsxReader<R: Read + Seek> {
    archive: ZipArchive<R>,
    shared_strings: Vec<String>,
    sheets: Vec<SheetRef>,
}

impl XlsxReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ConcordError::InputNotFound(path.to_path_buf()));
        }
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> XlsxReader<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let shared_strings = load_shared_strings(&mut archive)?;
        let sheets = load_sheets(&mut archive)?;
        Ok(Self { archive, shared_strings, sheets })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheet_exists(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }

    fn sheet_target(&self, name: &str) -> Result<String> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.target.clone())
            .ok_or_workbook(&format!("sheet not found: {name}"))
    }

    /// Rows of a sheet that contain at least one non-empty cell, in row order.
    pub fn rows(&mut self, name: &str) -> Result<Vec<SheetRow>> {
        let target = self.sheet_target(name)?;
        let xml_path = format!("xl/{}", target.trim_start_matches('/'));
        let xml = read_entry(&mut self.archive, &xml_path)?;
        parse_sheet_rows(&xml, &self.shared_strings)
    }

    /// Read a sheet as a table of header -> value records.
    ///
    /// When `header` is `None` the first row is inspected for the well-known
    /// column tokens. Without a header, column numbers (`"1"`, `"2"`, ...)
    /// serve as keys.
    pub fn read_table(
        &mut self,
        name: &str,
        header: Option<bool>,
    ) -> Result<(Vec<String>, Vec<Record>)> {
        let raw_rows = self.rows(name)?;
        let Some((_, first_cells)) = raw_rows.first() else {
            return Ok((Vec::new(), Vec::new()));
        };

        let max_col = first_cells.keys().max().copied().unwrap_or(0);
        let header_row: Vec<String> = (1..=max_col)
            .map(|i| first_cells.get(&i).cloned().unwrap_or_default())
            .collect();

        let has_header = header.unwrap_or_else(|| looks_like_header(&header_row));
        let (headers, data_rows): (Vec<String>, &[SheetRow]) = if has_header {
            let headers = header_row.iter().map(|h| normalize_scalar(h)).collect();
            (headers, &raw_rows[1..])
        } else {
            (Vec::new(), &raw_rows[..])
        };

        let mut records: Vec<Record> = Vec::new();
        for (row_idx, cells) in data_rows {
            let mut rec: BTreeMap<String, String> = BTreeMap::new();
            for (&col_idx, value) in cells {
                if has_header {
                    let Some(key) = headers.get(col_idx as usize - 1) else {
                        continue;
                    };
                    if !key.is_empty() {
                        rec.insert(key.clone(), value.clone());
                    }
                } else {
                    rec.insert(col_idx.to_string(), value.clone());
                }
            }
            if !rec.is_empty() {
                records.push((*row_idx, rec));
            }
        }
        Ok((headers, records))
    }
}

// === Part parsing ===

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name)?;
    let mut buf = String::new();
    entry.read_to_string(&mut buf)?;
    Ok(buf)
}

fn load_shared_strings<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_entry(archive, "xl/sharedStrings.xml")?;
    let mut reader = Reader::from_str(&xml);
    let mut shared: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event().map_err(quick_xml::Error::from)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Event::Text(e) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&e.unescape().map_err(quick_xml::Error::from)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => shared.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(shared)
}

fn load_sheets<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<SheetRef>> {
    let rels_xml = read_entry(archive, "xl/_rels/workbook.xml.rels")?;
    let mut reader = Reader::from_str(&rels_xml);
    let mut rid_to_target: BTreeMap<String, String> = BTreeMap::new();
    loop {
        match reader.read_event().map_err(quick_xml::Error::from)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = String::new();
                let mut target = String::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
                    match attr.key.as_ref() {
                        b"Id" => id = value.into_owned(),
                        b"Target" => target = value.into_owned(),
                        _ => {}
                    }
                }
                rid_to_target.insert(id, target);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let wb_xml = read_entry(archive, "xl/workbook.xml")?;
    let mut reader = Reader::from_str(&wb_xml);
    let mut sheets: Vec<SheetRef> = Vec::new();
    loop {
        match reader.read_event().map_err(quick_xml::Error::from)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = String::new();
                let mut rid = String::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
                    match attr.key.as_ref() {
                        b"name" => name = value.into_owned(),
                        b"r:id" => rid = value.into_owned(),
                        _ => {}
                    }
                }
                let target = rid_to_target.get(&rid).cloned().unwrap_or_default();
                sheets.push(SheetRef { name, target });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_sheet_rows(xml: &str, shared_strings: &[String]) -> Result<Vec<SheetRow>> {
    let mut reader = Reader::from_str(xml);
    let mut rows: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();

    // State for the cell currently being read.
    let mut cell_ref: Option<(u32, u32)> = None;
    let mut cell_type = String::new();
    let mut cell_value: Option<String> = None;
    let mut in_v = false;
    let mut in_inline_t = false;

    loop {
        match reader.read_event().map_err(quick_xml::Error::from)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                cell_ref = None;
                cell_type.clear();
                cell_value = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
                    match attr.key.as_ref() {
                        b"r" => cell_ref = Some(split_ref(&value)?),
                        b"t" => cell_type = value.into_owned(),
                        _ => {}
                    }
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"v" => in_v = true,
            Event::Start(e) if e.local_name().as_ref() == b"t" && cell_type == "inlineStr" => {
                in_inline_t = true;
            }
            Event::Text(e) if in_v || in_inline_t => {
                let text = e.unescape().map_err(quick_xml::Error::from)?;
                cell_value.get_or_insert_with(String::new).push_str(&text);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    let Some((col, row)) = cell_ref.take() else {
                        continue;
                    };
                    let Some(raw) = cell_value.take() else {
                        continue;
                    };
                    let resolved = if cell_type == "s" {
                        raw.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or(raw)
                    } else {
                        raw
                    };
                    let value = normalize_scalar(&resolved);
                    if !is_empty(&value) {
                        rows.entry(row).or_default().insert(col, value);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_workbook(sheet_xml: &str) -> XlsxReader<Cursor<Vec<u8>>> {
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zw.start_file("xl/workbook.xml", opts).unwrap();
        zw.write_all(
            br#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
                 xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
                 <sheets><sheet name="berendes" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        )
        .unwrap();
        zw.start_file("xl/_rels/workbook.xml.rels", opts).unwrap();
        zw.write_all(
            br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
                 <Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
        )
        .unwrap();
        zw.start_file("xl/sharedStrings.xml", opts).unwrap();
        zw.write_all(
            br#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
                 <si><t>teitok_id</t></si><si><r><t>Iris </t></r><r><t>illyrica</t></r></si></sst>"#,
        )
        .unwrap();
        zw.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
        zw.write_all(sheet_xml.as_bytes()).unwrap();
        let cursor = zw.finish().unwrap();
        XlsxReader::from_reader(cursor).unwrap()
    }

    const SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
        <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>chapter</t></is></c></row>
        <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>1.1</v></c><c r="C2"><v>17.0</v></c></row>
        <row r="3"><c r="A3"/><c r="B3"><v>  </v></c></row>
        </sheetData></worksheet>"#;

    #[test]
    fn test_cell_refs() {
        assert_eq!(split_ref("A1").unwrap(), (1, 1));
        assert_eq!(split_ref("BC12").unwrap(), (55, 12));
        assert!(split_ref("ABC").is_err());
    }

    #[test]
    fn test_rows_skip_empty_cells() {
        let mut reader = build_workbook(SHEET);
        assert!(reader.sheet_exists("berendes"));
        let rows = reader.rows("berendes").unwrap();
        // Row 3 had only empty cells and is dropped entirely.
        assert_eq!(rows.len(), 2);
        let (idx, cells) = &rows[1];
        assert_eq!(*idx, 2);
        assert_eq!(cells.get(&1).map(String::as_str), Some("Iris illyrica"));
        assert_eq!(cells.get(&3).map(String::as_str), Some("17"));
    }

    #[test]
    fn test_read_table_guesses_header() {
        let mut reader = build_workbook(SHEET);
        let (headers, records) = reader.read_table("berendes", None).unwrap();
        assert_eq!(headers, vec!["teitok_id", "chapter"]);
        assert_eq!(records.len(), 1);
        let (_, rec) = &records[0];
        assert_eq!(rec.get("teitok_id").map(String::as_str), Some("Iris illyrica"));
        assert_eq!(rec.get("chapter").map(String::as_str), Some("1.1"));
    }

    #[test]
    fn test_read_table_no_header_uses_column_numbers() {
        let mut reader = build_workbook(SHEET);
        let (headers, records) = reader.read_table("berendes", Some(false)).unwrap();
        assert!(headers.is_empty());
        assert_eq!(records.len(), 2);
        let (_, rec) = &records[1];
        assert_eq!(rec.get("2").map(String::as_str), Some("1.1"));
    }

    #[test]
    fn test_missing_sheet_errors() {
        let mut reader = build_workbook(SHEET);
        assert!(reader.rows("wellmann").is_err());
    }
}
