//! Format-specific text extractors (PDF, DOCX, XLSX).
//!
//! Each extractor takes the raw payload and returns plain UTF-8 text or an
//! [`ExtractError`]. Turning errors into user-visible diagnostics is the
//! dispatcher's job; nothing here formats messages for the LLM except the
//! spreadsheet layout, which is part of the extracted text itself.
//!
//! Parsing is CPU-bound and runs on the blocking pool.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::debug;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Image types accepted from folders and sent to OCR.
pub const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
];

/// Media types kept when a folder is added.
pub fn is_supported_type(media_type: &str) -> bool {
    matches!(
        media_type,
        MIME_PDF | MIME_DOCX | MIME_XLSX | MIME_XLS | MIME_TEXT | MIME_MARKDOWN
    ) || IMAGE_TYPES.contains(&media_type)
}

pub fn is_image(media_type: &str) -> bool {
    media_type.starts_with("image/")
}

pub fn is_spreadsheet(media_type: &str) -> bool {
    media_type == MIME_XLSX || media_type == MIME_XLS
}

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Columns past `XFD`, the last one Excel allows, are ignored.
const XLSX_MAX_COLUMNS: usize = 16_384;
const XLSX_MAX_SHEET_BYTES: usize = 4 * 1024 * 1024;
/// Per-entry decompression cap (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("{0}")]
    Pdf(String),

    #[error("{0}")]
    Ooxml(String),

    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Extracts one text body from a document payload.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, bytes: Vec<u8>) -> Result<String, ExtractError>;
}

/// Extracts text page by page, for formats with a page model.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// One entry per page, in page order.
    async fn pages(&self, bytes: Vec<u8>) -> Result<Vec<String>, ExtractError>;
}

async fn run_blocking<T, F>(f: F) -> Result<T, ExtractError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractError::Task(e.to_string()))?
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

#[async_trait]
impl PageExtractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    async fn pages(&self, bytes: Vec<u8>) -> Result<Vec<String>, ExtractError> {
        let pages = run_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
                .map_err(|e| ExtractError::Pdf(e.to_string()))
        })
        .await?;
        debug!(pages = pages.len(), "pdf text extracted");
        Ok(pages
            .into_iter()
            .map(|page| page.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect())
    }
}

/// Lays pages out as `"Page N: <text>\n\n"`, numbering from 1.
pub fn format_pages(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, text)| format!("Page {}: {}\n\n", i + 1, text))
        .collect()
}

/// Non-whitespace characters across all pages.
pub fn visible_chars(pages: &[String]) -> usize {
    pages
        .iter()
        .flat_map(|p| p.chars())
        .filter(|c| !c.is_whitespace())
        .count()
}

// ═══════════════════════════════════════════════════════════════════════
// OOXML shared helpers
// ═══════════════════════════════════════════════════════════════════════

type ZipReader<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_zip(bytes: &[u8]) -> Result<ZipReader<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry(archive: &mut ZipReader<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn has_entry(archive: &ZipReader<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key || a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn xml_error(e: quick_xml::Error) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// DOCX
// ═══════════════════════════════════════════════════════════════════════

/// Raw text of `word/document.xml`: runs concatenated, `w:tab` as a tab,
/// `w:br` as a newline, paragraphs separated by a blank line.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxExtractor;

#[async_trait]
impl TextExtractor for DocxExtractor {
    fn name(&self) -> &str {
        "docx"
    }

    async fn extract(&self, bytes: Vec<u8>) -> Result<String, ExtractError> {
        run_blocking(move || {
            let mut archive = open_zip(&bytes)?;
            if !has_entry(&archive, "word/document.xml") {
                return Err(ExtractError::Ooxml(
                    "word/document.xml not found".to_string(),
                ));
            }
            let xml = read_zip_entry(&mut archive, "word/document.xml")?;
            docx_text(&xml)
        })
        .await
    }
}

fn docx_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(xml_error)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n\n").trim_end().to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// XLSX
// ═══════════════════════════════════════════════════════════════════════

/// Serializes each worksheet as `"Sheet: <name>\n\n"`, tab-separated rows,
/// and a `"\n---\n\n"` delimiter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetExtractor;

#[async_trait]
impl TextExtractor for SpreadsheetExtractor {
    fn name(&self) -> &str {
        "spreadsheet"
    }

    async fn extract(&self, bytes: Vec<u8>) -> Result<String, ExtractError> {
        run_blocking(move || xlsx_text(&bytes)).await
    }
}

fn xlsx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let shared = if has_entry(&archive, "xl/sharedStrings.xml") {
        read_shared_strings(&read_zip_entry(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let sheets = match workbook_sheets(&mut archive)? {
        sheets if !sheets.is_empty() => sheets,
        _ => fallback_sheets(&archive),
    };

    let mut out = String::new();
    for (name, path) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        if !has_entry(&archive, &path) {
            debug!(sheet = %name, path = %path, "worksheet part missing");
            continue;
        }
        let xml = read_zip_entry(&mut archive, &path)?;
        out.push_str(&format!("Sheet: {}\n\n", name));
        out.push_str(&sheet_rows(&xml, &shared)?);
        out.push_str("\n---\n\n");
    }
    Ok(out)
}

/// `(sheet name, part path)` in workbook order.
fn workbook_sheets(archive: &mut ZipReader<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    const WORKBOOK: &str = "xl/workbook.xml";
    const RELS: &str = "xl/_rels/workbook.xml.rels";
    if !has_entry(archive, WORKBOOK) || !has_entry(archive, RELS) {
        return Ok(Vec::new());
    }

    let mut targets: HashMap<String, String> = HashMap::new();
    let rels = read_zip_entry(archive, RELS)?;
    let mut reader = quick_xml::Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id, path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut sheets = Vec::new();
    let workbook = read_zip_entry(archive, WORKBOOK)?;
    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name").unwrap_or_default();
                if let Some(path) = attr(&e, b"id").and_then(|id| targets.get(&id).cloned()) {
                    sheets.push((name, path));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Worksheet parts by number, named `SheetN`.
fn fallback_sheets(archive: &ZipReader<'_>) -> Vec<(String, String)> {
    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .filter_map(|n| {
            n.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|i| (i, n.to_string()))
        })
        .collect();
    numbered.sort();
    numbered
        .into_iter()
        .map(|(i, path)| (format!("Sheet{}", i), path))
        .collect()
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_t => current.push_str(&t.unescape().map_err(xml_error)?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from a cell reference like `"AB12"`.
///
/// Saturates on absurdly long references; callers drop anything at or
/// beyond [`XLSX_MAX_COLUMNS`].
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let n = letters.iter().fold(0usize, |acc, b| {
        acc.saturating_mul(26)
            .saturating_add((b.to_ascii_uppercase() - b'A') as usize + 1)
    });
    Some(n - 1)
}

#[derive(Default)]
struct CellState {
    /// `None` when the cell lies outside the supported column range.
    column: Option<usize>,
    kind: Option<String>,
    value: String,
    in_value: bool,
}

fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut row: Vec<(usize, String)> = Vec::new();
    let mut cell = CellState::default();
    let mut next_column = 0usize;
    let mut cell_count = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET || out.len() >= XLSX_MAX_SHEET_BYTES {
            debug!("sheet limit reached, truncating sheet");
            break;
        }
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    next_column = 0;
                }
                b"c" => {
                    let column = attr(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_column);
                    if column >= XLSX_MAX_COLUMNS {
                        debug!(column, "skipping cell past the last column");
                    }
                    cell = CellState {
                        column: (column < XLSX_MAX_COLUMNS).then_some(column),
                        kind: attr(&e, b"t"),
                        ..CellState::default()
                    };
                    next_column = column.saturating_add(1);
                }
                b"v" | b"t" => cell.in_value = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                next_column = attr(&e, b"r")
                    .and_then(|r| column_index(&r))
                    .unwrap_or(next_column)
                    .saturating_add(1);
            }
            Event::Text(t) if cell.in_value => cell.value.push_str(&t.unescape().map_err(xml_error)?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => cell.in_value = false,
                b"c" => {
                    let text = cell_text(&cell, shared);
                    if let Some(column) = cell.column.filter(|_| !text.is_empty()) {
                        row.push((column, text));
                        cell_count += 1;
                    }
                }
                b"row" => push_row(&mut out, &row),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn cell_text(cell: &CellState, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => cell.value.clone(),
    }
}

fn push_row(out: &mut String, cells: &[(usize, String)]) {
    let Some(width) = cells.iter().map(|(c, _)| c + 1).max() else {
        return;
    };
    let mut padded = vec![String::new(); width];
    for (column, text) in cells {
        padded[*column] = text.clone();
    }
    out.push_str(&padded.join("\t"));
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn invalid_pdf_returns_error() {
        let err = PdfExtractor.pages(b"not a pdf".to_vec()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[tokio::test]
    async fn invalid_zip_returns_error_for_docx() {
        let err = DocxExtractor.extract(b"not a zip".to_vec()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn pages_are_numbered_from_one() {
        let pages = vec!["alpha".to_string(), "beta".to_string()];
        assert_eq!(format_pages(&pages), "Page 1: alpha\n\nPage 2: beta\n\n");
        assert_eq!(visible_chars(&pages), 9);
    }

    #[tokio::test]
    async fn docx_keeps_tabs_breaks_and_paragraphs() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>Name</w:t><w:tab/><w:t xml:space="preserve">Value &amp; more</w:t></w:r></w:p>
<w:p><w:r><w:t>line one</w:t><w:br/><w:t>line two</w:t></w:r></w:p>
</w:body></w:document>"#;
        let bytes = zip_of(&[("word/document.xml", doc)]);
        let text = DocxExtractor.extract(bytes).await.unwrap();
        assert_eq!(text, "Name\tValue & more\n\nline one\nline two");
    }

    #[tokio::test]
    async fn docx_without_document_part_fails() {
        let bytes = zip_of(&[("word/other.xml", "<x/>")]);
        assert!(DocxExtractor.extract(bytes).await.is_err());
    }

    #[tokio::test]
    async fn xlsx_uses_workbook_names_and_pads_sparse_cells() {
        let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>
<sheet name="Budget" sheetId="1" r:id="rId2"/><sheet name="Notes" sheetId="2" r:id="rId1"/></sheets></workbook>"#;
        let rels = r#"<Relationships>
<Relationship Id="rId1" Target="worksheets/sheet2.xml"/>
<Relationship Id="rId2" Target="/xl/worksheets/sheet1.xml"/></Relationships>"#;
        let shared = r#"<sst><si><t>Item</t></si><si><r><t>Co</t></r><r><t>st</t></r></si></sst>"#;
        let sheet1 = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>Rent</t></is></c><c r="C2"><v>1200</v></c></row>
<row r="3"><c r="A3"/></row>
</sheetData></worksheet>"#;
        let sheet2 = r#"<worksheet><sheetData><row r="1"><c r="B1" t="b"><v>1</v></c></row></sheetData></worksheet>"#;
        let bytes = zip_of(&[
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet1),
            ("xl/worksheets/sheet2.xml", sheet2),
        ]);
        let text = SpreadsheetExtractor.extract(bytes).await.unwrap();
        assert_eq!(
            text,
            "Sheet: Budget\n\nItem\t\tCost\nRent\t\t1200\n\n---\n\nSheet: Notes\n\n\tTRUE\n\n---\n\n"
        );
    }

    #[tokio::test]
    async fn xlsx_without_workbook_falls_back_to_sheet_numbers() {
        let sheet = r#"<worksheet><sheetData><row><c><v>7</v></c><c><v>8</v></c></row></sheetData></worksheet>"#;
        let bytes = zip_of(&[("xl/worksheets/sheet1.xml", sheet)]);
        let text = SpreadsheetExtractor.extract(bytes).await.unwrap();
        assert_eq!(text, "Sheet: Sheet1\n\n7\t8\n\n---\n\n");
    }

    #[test]
    fn column_letters_map_to_indices() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AB12"), Some(27));
        assert_eq!(column_index("12"), None);
        assert_eq!(column_index("XFD1"), Some(XLSX_MAX_COLUMNS - 1));
        assert!(column_index(&"Z".repeat(40)).unwrap() >= XLSX_MAX_COLUMNS);
    }

    #[tokio::test]
    async fn xlsx_cells_past_last_column_are_dropped() {
        let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1"><v>1</v></c><c r="ZZZZZ1"><v>2</v></c><c><v>3</v></c></row>
<row r="2"><c r="ZZZZZZZZZZZZZZZZZZZZ2"><v>4</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_of(&[("xl/worksheets/sheet1.xml", sheet)]);
        let text = SpreadsheetExtractor.extract(bytes).await.unwrap();
        assert_eq!(text, "Sheet: Sheet1\n\n1\n\n---\n\n");
    }

    #[test]
    fn supported_types_cover_folder_picker() {
        assert!(is_supported_type("image/png"));
        assert!(is_supported_type(MIME_XLS));
        assert!(!is_supported_type("application/zip"));
    }
}
