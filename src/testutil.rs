//! In-memory workbook construction for tests.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::xlsx::XlsxReader;

fn sheet_xml(rows: &[&[&str]]) -> String {
    let mut out = String::from(
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (ri, cells) in rows.iter().enumerate() {
        let r = ri + 1;
        out.push_str(&format!(r#"<row r="{r}">"#));
        for (ci, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let col = (b'A' + ci as u8) as char;
            out.push_str(&format!(
                r#"<c r="{col}{r}" t="inlineStr"><is><t>{value}</t></is></c>"#
            ));
        }
        out.push_str("</row>");
    }
    out.push_str("</sheetData></worksheet>");
    out
}

/// Build a workbook with inline-string sheets; each sheet is (name, rows).
pub fn workbook(sheets: &[(&str, &[&[&str]])]) -> XlsxReader<Cursor<Vec<u8>>> {
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default();

    let mut wb = String::from(
        r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
             xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut rels = String::from(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (i, (name, _)) in sheets.iter().enumerate() {
        let n = i + 1;
        wb.push_str(&format!(r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{n}" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    wb.push_str("</sheets></workbook>");
    rels.push_str("</Relationships>");

    zw.start_file("xl/workbook.xml", opts).unwrap();
    zw.write_all(wb.as_bytes()).unwrap();
    zw.start_file("xl/_rels/workbook.xml.rels", opts).unwrap();
    zw.write_all(rels.as_bytes()).unwrap();
    for (i, (_, rows)) in sheets.iter().enumerate() {
        zw.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)
            .unwrap();
        zw.write_all(sheet_xml(rows).as_bytes()).unwrap();
    }
    XlsxReader::from_reader(zw.finish().unwrap()).unwrap()
}
