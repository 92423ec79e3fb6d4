//! Gunther chapter metadata scraped from the TEI-ish XML transcription.
//!
//! Chapter `<div>`s are unreliable in the source, but the heading paragraph
//! survives, e.g. `<p><hi rend="bold">104.</hi>CHRUSOKOLLA.<note/> Malachite</p>`.
//! The scraper keys off the bold numeric `<hi>` and reassembles title and
//! description around it, falling back to a short following paragraph for the
//! English gloss.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{ConcordError, Result};

static CHAPTER_NUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\.\s*$").expect("chapter number regex"));

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_alnum(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphanumeric())
}

/// Gunther chapter titles (Greek terms) are overwhelmingly ALL CAPS; this
/// filters out numbered lists inside chapter prose.
fn is_probable_chapter_title(title: &str) -> bool {
    let title = normalize_ws(title);
    if title.is_empty() {
        return false;
    }
    if title.chars().any(|c| c.is_ascii_lowercase()) {
        return false;
    }
    title.chars().any(|c| c.is_ascii_uppercase())
}

// === Element tree ===

/// Minimal document tree over the TEI source, ElementTree-style: each node
/// keeps the text before its first child and the tail after its close tag.
#[derive(Debug, Default, Clone)]
struct XmlNode {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    tail: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn attr(&self, name: &str) -> &str {
        self.attrs.get(name).map(String::as_str).unwrap_or("")
    }

    /// All text content in document order, including child tails.
    fn itertext(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.text);
        for child in &self.children {
            out.push_str(&child.itertext());
            out.push_str(&child.tail);
        }
        out
    }

    fn descendants<'a>(&'a self, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            out.push(child);
            child.descendants(out);
        }
    }
}

fn parse_xml_tree(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = vec![XmlNode { tag: "#root".to_string(), ..Default::default() }];

    fn append_text(stack: &mut [XmlNode], text: &str) {
        if let Some(top) = stack.last_mut() {
            match top.children.last_mut() {
                Some(last) => last.tail.push_str(text),
                None => top.text.push_str(text),
            }
        }
    }

    loop {
        match reader.read_event().map_err(quick_xml::Error::from)? {
            Event::Start(e) => {
                let mut node = XmlNode {
                    tag: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(quick_xml::Error::from)?
                        .into_owned();
                    node.attrs.insert(key, value);
                }
                stack.push(node);
            }
            Event::Empty(e) => {
                let mut node = XmlNode {
                    tag: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(quick_xml::Error::from)?
                        .into_owned();
                    node.attrs.insert(key, value);
                }
                if let Some(top) = stack.last_mut() {
                    top.children.push(node);
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ConcordError::Validation("unbalanced XML".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(ConcordError::Validation("unbalanced XML".to_string())),
                }
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(quick_xml::Error::from)?;
                append_text(&mut stack, &text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                append_text(&mut stack, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    stack
        .pop()
        .ok_or_else(|| ConcordError::Validation("empty XML document".to_string()))
}

// === Heading detection ===

/// Return (chapter number, index of the bold `<hi>`) if this `<p>` looks like
/// a chapter heading. A leading symbol such as a degree sign may precede the
/// `<hi>`, so it need not be the first content node; substantive text before
/// it disqualifies the paragraph.
fn find_chapter_number_hi(p: &XmlNode) -> Option<(u32, usize)> {
    if has_alnum(&p.text) {
        return None;
    }
    for (i, child) in p.children.iter().enumerate() {
        if child.tag == "hi" && child.attr("rend") == "bold" {
            if let Some(caps) = CHAPTER_NUM_RE.captures(child.text.trim()) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    return Some((n, i));
                }
            }
        }
        if has_alnum(&child.itertext()) {
            return None;
        }
    }
    None
}

/// Text following the chapter number, skipping `<note>` elements.
fn text_after_chapter_number(p: &XmlNode, hi_idx: usize) -> String {
    let mut parts = String::new();
    if let Some(hi) = p.children.get(hi_idx) {
        parts.push_str(&hi.tail);
    }
    for child in p.children.iter().skip(hi_idx + 1) {
        if child.tag == "note" {
            parts.push_str(&child.tail);
            continue;
        }
        parts.push_str(&child.itertext());
        parts.push_str(&child.tail);
    }
    normalize_ws(&parts)
}

/// Split `"TITLE. Desc..."` into title and description at the first period.
fn split_title_desc(after_text: &str) -> (String, String) {
    let after_text = normalize_ws(after_text);
    if after_text.is_empty() {
        return (String::new(), String::new());
    }
    match after_text.split_once('.') {
        Some((title, rest)) => (title.trim().to_string(), rest.trim().to_string()),
        None => (after_text, String::new()),
    }
}

/// Accept the next `<p>` as an English gloss when it is short, non-empty and
/// not itself a chapter heading.
fn description_paragraph_candidate(p: &XmlNode) -> Option<String> {
    if find_chapter_number_hi(p).is_some() {
        return None;
    }
    let text = normalize_ws(&p.itertext());
    if text.is_empty() || text.chars().count() > 120 || !has_alnum(&text) {
        return None;
    }
    Some(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRow {
    pub book: u32,
    pub chapter: u32,
    pub title: String,
    pub description: String,
}

impl ChapterRow {
    pub fn chapter_ref(&self) -> String {
        format!("{}.{}", self.book, self.chapter)
    }
}

/// Paragraphs of a book div with their parent, in document order.
fn paragraphs<'a>(node: &'a XmlNode, out: &mut Vec<(&'a XmlNode, usize)>) {
    for (i, child) in node.children.iter().enumerate() {
        if child.tag == "p" {
            out.push((node, i));
        }
        paragraphs(child, out);
    }
}

pub fn scrape_chapters(xml: &str) -> Result<Vec<ChapterRow>> {
    let root = parse_xml_tree(xml)?;
    let mut all_nodes: Vec<&XmlNode> = Vec::new();
    root.descendants(&mut all_nodes);

    let mut rows: Vec<ChapterRow> = Vec::new();
    for book_div in all_nodes
        .iter()
        .copied()
        .filter(|n| n.tag == "div" && n.attr("type") == "book")
    {
        let book_raw = book_div.attr("n").trim();
        let Ok(book) = book_raw.parse::<u32>() else {
            continue;
        };

        let mut book_paragraphs: Vec<(&XmlNode, usize)> = Vec::new();
        paragraphs(book_div, &mut book_paragraphs);

        let mut seen_in_book: HashSet<u32> = HashSet::new();
        for &(parent, idx) in &book_paragraphs {
            let p = &parent.children[idx];
            let Some((chapter_num, hi_idx)) = find_chapter_number_hi(p) else {
                continue;
            };
            if !seen_in_book.insert(chapter_num) {
                continue;
            }

            let after = text_after_chapter_number(p, hi_idx);
            let (title, mut desc) = split_title_desc(&after);

            if desc.is_empty() {
                // Non-paragraph elements may sit between heading and gloss.
                for sib in parent.children.iter().skip(idx + 1) {
                    if sib.tag != "p" {
                        continue;
                    }
                    if let Some(candidate) = description_paragraph_candidate(sib) {
                        desc = candidate;
                    }
                    break;
                }
            }

            rows.push(ChapterRow { book, chapter: chapter_num, title, description: desc });
        }
    }
    Ok(rows)
}

fn load_csv_chapter_refs(csv_path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let Some(col) = headers.iter().position(|h| h == "gunther_chapter") else {
        return Err(ConcordError::Validation(format!(
            "expected \"gunther_chapter\" column in {}, found {headers:?}",
            csv_path.display()
        )));
    };
    let mut refs = HashSet::new();
    for record in reader.records() {
        let record = record?;
        let value = record.get(col).unwrap_or("").trim();
        if !value.is_empty() {
            refs.insert(value.to_string());
        }
    }
    Ok(refs)
}

fn load_chapter_overrides(tsv_path: &Path) -> Result<BTreeMap<(u32, u32), (String, String)>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(tsv_path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    for needed in ["book", "chapter", "chapter_title", "chapter_description"] {
        if !headers.iter().any(|h| h == needed) {
            return Err(ConcordError::Validation(format!(
                "expected TSV column {needed} in {}, found {headers:?}",
                tsv_path.display()
            )));
        }
    }
    let col = |name: &str| headers.iter().position(|h| h == name);
    let (bi, ci, ti, di) = (
        col("book"),
        col("chapter"),
        col("chapter_title"),
        col("chapter_description"),
    );

    let mut overrides = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i)).unwrap_or("").trim().to_string()
        };
        let (Ok(book), Ok(chapter)) = (cell(bi).parse::<u32>(), cell(ci).parse::<u32>()) else {
            continue;
        };
        overrides.insert((book, chapter), (cell(ti), cell(di)));
    }
    Ok(overrides)
}

#[derive(Debug, Default)]
pub struct GuntherOptions {
    pub missing_from: Option<std::path::PathBuf>,
    pub overrides_tsv: Option<std::path::PathBuf>,
    pub no_title_filter: bool,
}

fn write_tsv<W: Write>(rows: &[ChapterRow], out: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(out);
    writer.write_record(["book", "chapter", "chapter_title", "chapter_description"])?;
    for row in rows {
        writer.write_record([
            row.book.to_string(),
            row.chapter.to_string(),
            row.title.clone(),
            row.description.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Scrape chapters and write the TSV; `out` of `None` writes to stdout.
pub fn run(xml_path: &Path, out: Option<&Path>, opts: &GuntherOptions) -> Result<()> {
    if !xml_path.is_file() {
        return Err(ConcordError::InputNotFound(xml_path.to_path_buf()));
    }
    let xml = fs::read_to_string(xml_path)?;
    let mut rows = scrape_chapters(&xml)?;

    if let Some(overrides_path) = &opts.overrides_tsv {
        if !overrides_path.is_file() {
            return Err(ConcordError::InputNotFound(overrides_path.clone()));
        }
        let overrides = load_chapter_overrides(overrides_path)?;
        let mut applied = 0usize;
        for row in &mut rows {
            if let Some((title, desc)) = overrides.get(&(row.book, row.chapter)) {
                if !title.is_empty() {
                    row.title = title.clone();
                }
                if !desc.is_empty() {
                    row.description = desc.clone();
                }
                applied += 1;
            }
        }
        info!(applied, "applied chapter overrides");
    }

    if !opts.no_title_filter {
        let before = rows.len();
        rows.retain(|row| is_probable_chapter_title(&row.title));
        if rows.len() < before {
            warn!(dropped = before - rows.len(), "dropped headings failing the title filter");
        }
    }

    if let Some(missing_from) = &opts.missing_from {
        if !missing_from.is_file() {
            return Err(ConcordError::InputNotFound(missing_from.clone()));
        }
        let existing = load_csv_chapter_refs(missing_from)?;
        rows.retain(|row| !existing.contains(&row.chapter_ref()));
    }

    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_tsv(&rows, fs::File::create(path)?)?;
        }
        None => write_tsv(&rows, std::io::stdout().lock())?,
    }
    info!(rows = rows.len(), "wrote gunther chapter tsv");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<TEI>
      <text><body>
        <div type="book" n="5">
          <p>Intro prose, not a heading.</p>
          <p><hi rend="bold">104.</hi>CHRUSOKOLLA.<note place="foot">ref</note> Malachite</p>
          <p><hi rend="bold">88.</hi> STEAR</p>
          <p>Mutton Suet, &amp;c.</p>
          <p><hi rend="bold">88.</hi> STEAR repeated</p>
          <p>° <hi rend="bold">90.</hi> LIBANOS. Frankincense</p>
          <p><hi rend="bold">91.</hi> 3 things follow. lowercase prose title</p>
        </div>
        <div type="book" n="appendix">
          <p><hi rend="bold">1.</hi> IGNORED</p>
        </div>
      </body></text>
    </TEI>"#;

    #[test]
    fn test_heading_detection_and_split() {
        let rows = scrape_chapters(XML).unwrap();
        let c104 = rows.iter().find(|r| r.chapter == 104).unwrap();
        assert_eq!(c104.book, 5);
        assert_eq!(c104.title, "CHRUSOKOLLA");
        // The footnote between title and gloss is skipped.
        assert_eq!(c104.description, "Malachite");
    }

    #[test]
    fn test_gloss_from_following_paragraph() {
        let rows = scrape_chapters(XML).unwrap();
        let c88 = rows.iter().find(|r| r.chapter == 88).unwrap();
        assert_eq!(c88.title, "STEAR");
        assert_eq!(c88.description, "Mutton Suet, &c.");
    }

    #[test]
    fn test_duplicate_headings_and_nondigit_books_skipped() {
        let rows = scrape_chapters(XML).unwrap();
        assert_eq!(rows.iter().filter(|r| r.chapter == 88).count(), 1);
        assert!(rows.iter().all(|r| r.book == 5));
    }

    #[test]
    fn test_leading_symbol_before_hi_is_allowed() {
        let rows = scrape_chapters(XML).unwrap();
        let c90 = rows.iter().find(|r| r.chapter == 90).unwrap();
        assert_eq!(c90.title, "LIBANOS");
        assert_eq!(c90.description, "Frankincense");
    }

    #[test]
    fn test_title_filter() {
        assert!(is_probable_chapter_title("CHRUSOKOLLA"));
        assert!(is_probable_chapter_title("STEAR OIS"));
        assert!(!is_probable_chapter_title("3 things follow"));
        assert!(!is_probable_chapter_title(""));
        let rows = scrape_chapters(XML).unwrap();
        let c91 = rows.iter().find(|r| r.chapter == 91).unwrap();
        assert!(!is_probable_chapter_title(&c91.title));
    }

    #[test]
    fn test_chapter_ref() {
        let row = ChapterRow { book: 5, chapter: 104, title: String::new(), description: String::new() };
        assert_eq!(row.chapter_ref(), "5.104");
    }
}
