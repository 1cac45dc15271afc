//! Turning uploaded files into [`Document`]s.
//!
//! Plain text and Markdown are always available. PDF needs the `pdf`
//! feature; DOCX and XLSX need the `office` feature.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info};

use crate::document::Document;
use crate::error::{RagError, Result};

/// File formats [`extract_text`] understands, keyed by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `.txt`, `.md`, `.markdown`
    Text,
    /// `.pdf`
    Pdf,
    /// `.docx`
    Docx,
    /// `.xlsx`
    Xlsx,
}

impl FileFormat {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "txt" | "md" | "markdown" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

/// Extract plain text from a file's bytes, dispatching on its extension.
///
/// Text files are decoded as UTF-8, falling back to Latin-1 when the bytes
/// are not valid UTF-8. DOCX yields one line per paragraph; XLSX yields a
/// `--- Sheet: name ---` header per sheet followed by one ` | `-separated
/// line per row. Surrounding whitespace is trimmed.
///
/// This is CPU-bound for PDF and Office files; async callers should use
/// [`document_from_file`], which runs it on the blocking pool.
///
/// # Errors
///
/// [`RagError::UnsupportedFormat`] for unknown extensions or formats whose
/// feature is disabled, [`RagError::InvalidInput`] if the file cannot be
/// parsed or contains no text.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    let format = FileFormat::from_file_name(file_name).ok_or_else(|| unsupported(file_name))?;

    let text = match format {
        FileFormat::Text => decode_text(file_name, bytes),
        FileFormat::Pdf => pdf_text(file_name, bytes)?,
        FileFormat::Docx => docx_text(file_name, bytes)?,
        FileFormat::Xlsx => xlsx_text(file_name, bytes)?,
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(RagError::InvalidInput(format!("'{file_name}' contains no text")));
    }
    Ok(text.to_string())
}

fn unsupported(file_name: &str) -> RagError {
    RagError::UnsupportedFormat(format!("'{file_name}': supported formats are txt, md, pdf, docx and xlsx"))
}

fn decode_text(file_name: &str, bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!(file_name, "file is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

#[cfg(any(feature = "pdf", feature = "office"))]
fn unreadable(file_name: &str, format: &str, e: impl std::fmt::Display) -> RagError {
    RagError::InvalidInput(format!("'{file_name}' is not a readable {format} file: {e}"))
}

#[cfg(feature = "pdf")]
fn pdf_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| unreadable(file_name, "PDF", e))?;
    if text.trim().is_empty() {
        return Err(RagError::InvalidInput(format!(
            "'{file_name}' has no extractable text (image-only PDFs are not supported)"
        )));
    }
    Ok(text)
}

#[cfg(not(feature = "pdf"))]
fn pdf_text(file_name: &str, _bytes: &[u8]) -> Result<String> {
    Err(RagError::UnsupportedFormat(format!("'{file_name}': PDF support requires the `pdf` feature")))
}

#[cfg(feature = "office")]
fn docx_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    use std::io::Read;

    use regex::Regex;

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| unreadable(file_name, "DOCX", e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| unreadable(file_name, "DOCX", e))?
        .read_to_string(&mut xml)
        .map_err(|e| unreadable(file_name, "DOCX", e))?;

    // Text runs, tabs, line breaks and paragraph ends.
    let tokens = Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br/>|</w:p>")
        .map_err(|e| RagError::Configuration(format!("DOCX token pattern: {e}")))?;
    let mut text = String::new();
    for token in tokens.captures_iter(&xml) {
        match (token.get(1), &token[0]) {
            (Some(run), _) => text.push_str(&unescape_xml(run.as_str())),
            (None, "<w:tab/>") => text.push('\t'),
            (None, _) => text.push('\n'),
        }
    }
    Ok(text)
}

#[cfg(not(feature = "office"))]
fn docx_text(file_name: &str, _bytes: &[u8]) -> Result<String> {
    Err(RagError::UnsupportedFormat(format!("'{file_name}': DOCX support requires the `office` feature")))
}

/// Resolve the predefined XML entities and numeric character references.
#[cfg(feature = "office")]
fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let entity = &rest[start..];
        let Some(end) = entity.find(';') else {
            out.push_str(entity);
            return out;
        };
        let decoded = match &entity[1..end] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            code => code
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| code.strip_prefix('#').map(str::parse::<u32>))
                .and_then(|n| n.ok())
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&entity[..=end]),
        }
        rest = &entity[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(feature = "office")]
fn xlsx_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    use calamine::{Reader, Xlsx, open_workbook_from_rs};

    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(std::io::Cursor::new(bytes)).map_err(|e| unreadable(file_name, "XLSX", e))?;

    let mut text = String::new();
    for sheet in workbook.sheet_names() {
        let range = workbook.worksheet_range(&sheet).map_err(|e| unreadable(file_name, "XLSX", e))?;
        text.push_str(&format!("--- Sheet: {sheet} ---\n"));
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            text.push_str(&cells.join(" | "));
            text.push('\n');
        }
        text.push('\n');
    }
    Ok(text)
}

#[cfg(not(feature = "office"))]
fn xlsx_text(file_name: &str, _bytes: &[u8]) -> Result<String> {
    Err(RagError::UnsupportedFormat(format!("'{file_name}': XLSX support requires the `office` feature")))
}

/// Derive a document ID from a file name: the stem with every character
/// other than ASCII alphanumerics, `-` and `_` replaced by `_`.
pub fn document_id_for(file_name: &str) -> Result<String> {
    let stem = Path::new(file_name).file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let id: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if id.trim_matches('_').is_empty() {
        return Err(RagError::InvalidInput(format!("cannot derive a document id from '{file_name}'")));
    }
    Ok(id)
}

/// Read `path` and build a [`Document`] from it.
///
/// The ID comes from [`document_id_for`], the title is the file name, the
/// URI is the path and the timestamp is the time of reading. Extraction
/// runs on the blocking thread pool.
pub async fn document_from_file(path: &Path) -> Result<Document> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RagError::InvalidInput(format!("'{}' has no file name", path.display())))?
        .to_string();
    if FileFormat::from_file_name(&file_name).is_none() {
        return Err(unsupported(&file_name));
    }

    let bytes = tokio::fs::read(path).await?;
    let size = bytes.len();
    let name = file_name.clone();
    let text = tokio::task::spawn_blocking(move || extract_text(&name, &bytes))
        .await
        .map_err(|e| RagError::InvalidInput(format!("extraction of '{file_name}' did not complete: {e}")))??;
    info!(file_name, bytes = size, chars = text.chars().count(), "extracted file");

    Ok(Document::new(document_id_for(&file_name)?, text)
        .with_title(file_name.as_str())
        .with_uri(path.display().to_string())
        .with_timestamp(Utc::now()))
}
