//! Plain-text conversion for binary document formats.
//!
//! The file handler hands bytes and a MIME type to a [`DocumentConverter`]
//! and gets UTF-8 text back. [`BuiltinConverter`] covers PDF (through
//! `pdf-extract`) and the three OOXML formats (through `zip` and
//! `quick-xml`). Conversion never panics on malformed input; it returns a
//! [`ConvertError`] and the caller reports a conversion failure.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Binary formats handled by [`BuiltinConverter`].
pub const CONVERTIBLE_MIME_TYPES: [&str; 4] = [MIME_PDF, MIME_DOCX, MIME_PPTX, MIME_XLSX];

const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;
/// Cap on decompressed bytes read from one archive member.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("no converter for {0}")]
    Unsupported(String),
    #[error("pdf: {0}")]
    Pdf(String),
    #[error("archive: {0}")]
    Archive(String),
    #[error("xml: {0}")]
    Xml(String),
}

/// Turns document bytes into text. Implementations are synchronous and
/// may be CPU heavy; callers run them on a blocking thread.
pub trait DocumentConverter: Send + Sync {
    fn supports(&self, mime_type: &str) -> bool;

    fn convert(&self, bytes: &[u8], mime_type: &str) -> Result<String, ConvertError>;
}

/// Converter for PDF, DOCX, PPTX and XLSX.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinConverter;

impl DocumentConverter for BuiltinConverter {
    fn supports(&self, mime_type: &str) -> bool {
        CONVERTIBLE_MIME_TYPES.contains(&mime_type)
    }

    fn convert(&self, bytes: &[u8], mime_type: &str) -> Result<String, ConvertError> {
        match mime_type {
            MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ConvertError::Pdf(e.to_string())),
            MIME_DOCX => {
                let mut archive = open_archive(bytes)?;
                let xml = read_entry(&mut archive, "word/document.xml")?;
                text_elements(&xml, b"p")
            }
            MIME_PPTX => {
                let mut archive = open_archive(bytes)?;
                let slides = numbered_entries(&archive, "ppt/slides/slide");
                let mut parts = Vec::new();
                for name in slides {
                    let xml = read_entry(&mut archive, &name)?;
                    parts.push(text_elements(&xml, b"p")?);
                }
                Ok(join_nonempty(parts, "\n\n"))
            }
            MIME_XLSX => {
                let mut archive = open_archive(bytes)?;
                let shared = shared_strings(&mut archive)?;
                let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
                let mut parts = Vec::new();
                for name in sheets.into_iter().take(MAX_SHEETS) {
                    let xml = read_entry(&mut archive, &name)?;
                    parts.push(sheet_cells(&xml, &shared)?);
                }
                Ok(join_nonempty(parts, "\n\n"))
            }
            other => Err(ConvertError::Unsupported(other.to_string())),
        }
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ConvertError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ConvertError::Archive(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ConvertError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ConvertError::Archive(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ConvertError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(ConvertError::Archive(format!(
            "{} exceeds {} bytes",
            name, MAX_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Archive members named `<prefix><n>.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?;
            Some((n.parse().ok()?, name.to_string()))
        })
        .collect();
    names.sort();
    names.into_iter().map(|(_, name)| name).collect()
}

fn join_nonempty(parts: Vec<String>, sep: &str) -> String {
    parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Collect the text of every `<t>` element, ending a line at each
/// closing `paragraph` element.
fn text_elements(xml: &[u8], paragraph: &[u8]) -> Result<String, ConvertError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ConvertError::Xml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ConvertError> {
    // Workbooks with only numeric cells have no shared string table.
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_entry(archive, "xl/sharedStrings.xml")?;
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                if let Some(s) = current.as_mut() {
                    let text = t.unescape().map_err(|e| ConvertError::Xml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet, one row per line. Shared-string cells are
/// resolved; inline and numeric values are taken as written.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ConvertError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    let mut cells = 0usize;
    loop {
        if cells >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t.unescape().map_err(|e| ConvertError::Xml(e.to_string()))?;
                let raw = raw.trim();
                let value = if shared_cell {
                    raw.parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                } else {
                    Some(raw.to_string())
                };
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    row.push(v);
                    cells += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join(" ")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn unsupported_mime_type() {
        let err = BuiltinConverter.convert(b"x", "application/zip").unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported(_)));
        assert!(!BuiltinConverter.supports("text/plain"));
        assert!(BuiltinConverter.supports(MIME_PDF));
    }

    #[test]
    fn broken_pdf_is_an_error() {
        let err = BuiltinConverter.convert(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ConvertError::Pdf(_)));
    }

    #[test]
    fn broken_zip_is_an_error() {
        let err = BuiltinConverter.convert(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ConvertError::Archive(_)));
    }

    #[test]
    fn docx_paragraphs() {
        let doc = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = archive(&[("word/document.xml", doc)]);
        let text = BuiltinConverter.convert(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "Hello world\nSecond & last");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |s: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, s);
        let s2 = slide("two");
        let s10 = slide("ten");
        let s1 = slide("one");
        let bytes = archive(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let text = BuiltinConverter.convert(&bytes, MIME_PPTX).unwrap();
        assert_eq!(text, "one\n\ntwo\n\nten");
    }

    #[test]
    fn xlsx_shared_and_numeric_cells() {
        let shared = r#"<sst><si><t>Name</t></si><si><t>Acme</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row><c t="s"><v>0</v></c><c><v>42</v></c></row>
            <row><c t="s"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = archive(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = BuiltinConverter.convert(&bytes, MIME_XLSX).unwrap();
        assert_eq!(text, "Name 42\nAcme");
    }

    #[test]
    fn docx_without_document_part() {
        let bytes = archive(&[("other.xml", "<x/>")]);
        let err = BuiltinConverter.convert(&bytes, MIME_DOCX).unwrap_err();
        assert!(matches!(err, ConvertError::Archive(_)));
    }
}
