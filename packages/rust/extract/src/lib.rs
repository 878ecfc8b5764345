//! Plain-text extraction from bill documents.
//!
//! Three source formats are supported, tried by callers in order of fidelity:
//! structured bill XML (`quick-xml`), HTML pages (`scraper`) and PDF
//! (`lopdf`, with strikethrough/underline detection). Every extractor returns an
//! [`ExtractedText`] whose raw text has been through the cleanup passes.

mod cleanup;
mod html;
mod pdf;
mod xml;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use legisync_shared::Result;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Document format of one version link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Xml,
    Html,
    Pdf,
}

impl SourceFormat {
    /// Preferred extraction order.
    pub const FALLBACK_ORDER: [SourceFormat; 3] =
        [SourceFormat::Xml, SourceFormat::Html, SourceFormat::Pdf];

    /// Classify a link by its `media_type` (`text/xml`, `application/pdf`, ...).
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let media_type = media_type.to_ascii_lowercase();
        if media_type.contains("xml") {
            Some(Self::Xml)
        } else if media_type.contains("html") {
            Some(Self::Html)
        } else if media_type.contains("pdf") {
            Some(Self::Pdf)
        } else {
            None
        }
    }

    /// File extension used when saving the source bytes.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amendment markers found while laying out a PDF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MarkerCounts {
    pub deletions: usize,
    pub insertions: usize,
}

/// Text pulled out of one source document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub title: String,
    pub official_title: String,
    /// Section bodies in document order.
    pub sections: Vec<String>,
    /// Full cleaned text.
    pub raw_text: String,
    pub markers: MarkerCounts,
}

/// Provenance printed at the top of an `_extracted.txt` file.
#[derive(Debug, Clone)]
pub struct FileHeader<'a> {
    /// The version note (e.g. "Introduced").
    pub source_note: &'a str,
    pub media_type: &'a str,
    pub method: SourceFormat,
    pub source_sha256: &'a str,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract text from `bytes` interpreted as `format`.
///
/// Fails with [`LegisyncError::Parsing`](legisync_shared::LegisyncError::Parsing)
/// when the document is malformed or carries no text.
#[instrument(skip_all, fields(format = %format, len = bytes.len()))]
pub fn extract(format: SourceFormat, bytes: &[u8]) -> Result<ExtractedText> {
    let mut text = match format {
        SourceFormat::Xml => xml::extract_xml(bytes)?,
        SourceFormat::Html => html::extract_html(bytes)?,
        SourceFormat::Pdf => pdf::extract_pdf(bytes)?,
    };
    text.raw_text = cleanup::run_pipeline(&text.raw_text);

    debug!(
        sections = text.sections.len(),
        chars = text.raw_text.len(),
        deletions = text.markers.deletions,
        insertions = text.markers.insertions,
        "extracted text"
    );
    Ok(text)
}

/// Render the `_extracted.txt` body: header, sections, then raw text.
pub fn render_text_file(text: &ExtractedText, header: &FileHeader<'_>) -> String {
    let rule = "=".repeat(80);
    let or_na = |s: &str| if s.is_empty() { "N/A".to_string() } else { s.to_string() };

    let mut out = String::new();
    out.push_str(&format!("Title: {}\n", or_na(&text.title)));
    out.push_str(&format!("Official Title: {}\n", or_na(&text.official_title)));
    out.push_str(&format!("Number of Sections: {}\n", text.sections.len()));
    out.push_str(&format!("Source: versions - {}\n", header.source_note));
    out.push_str(&format!("Media Type: {}\n", header.media_type));
    out.push_str(&format!("Extraction Method: {}\n", header.method));
    out.push_str(&format!("Source SHA-256: {}\n", header.source_sha256));
    if text.markers.deletions > 0 || text.markers.insertions > 0 {
        out.push_str(&format!(
            "Strikethrough Detection: {} deletions, {} insertions\n",
            text.markers.deletions, text.markers.insertions
        ));
    }
    out.push('\n');
    out.push_str(&rule);
    out.push_str("\n\n");

    for (i, section) in text.sections.iter().enumerate() {
        out.push_str(&format!("Section {}:\n{}\n\n", i + 1, section));
    }

    out.push_str(&rule);
    out.push_str("\nRaw Text:\n");
    out.push_str(&text.raw_text);
    out
}
