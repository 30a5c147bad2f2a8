//
// Copyright (c) 2025 rustmailer.com (https://rustmailer.com)
//
// This file is part of the Groundwork Mail Sync Project
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::indexer::document::DocumentMetadata;
use crate::modules::ingest::extension_of;
use crate::raise_error;

/// Extracted text is capped at this many characters.
pub const MAX_TEXT_CHARS: usize = 100_000;

const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "csv", "log", "json", "xml", "html", "htm"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub mime_type: String,
    pub text: String,
    pub truncated: bool,
    pub page_count: Option<u32>,
    pub metadata: DocumentMetadata,
}

/// SHA-256 over the raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(ring::digest::digest(&ring::digest::SHA256, bytes).as_ref())
}

/// Only PDFs and plain-text files are supported; everything else is
/// `UnsupportedType` and the caller skips the file.
pub fn extract(bytes: &[u8], file_name: &str) -> GroundworkResult<ExtractedContent> {
    let extension = extension_of(file_name);
    if extension == "pdf" || bytes.starts_with(b"%PDF") {
        return extract_pdf(bytes, file_name);
    }
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    if TEXT_EXTENSIONS.contains(&extension.as_str()) || mime.type_() == mime_guess::mime::TEXT {
        let (text, truncated) = cap_text(String::from_utf8_lossy(bytes).into_owned());
        return Ok(ExtractedContent {
            mime_type: mime.essence_str().to_string(),
            text,
            truncated,
            page_count: None,
            metadata: DocumentMetadata::default(),
        });
    }
    Err(raise_error!(
        format!("No text extractor for '{}' ({})", file_name, mime),
        ErrorCode::UnsupportedType
    ))
}

fn extract_pdf(bytes: &[u8], file_name: &str) -> GroundworkResult<ExtractedContent> {
    let document = Document::load_mem(bytes).map_err(|e| {
        raise_error!(
            format!("Failed to parse PDF '{}': {}", file_name, e),
            ErrorCode::ExtractionFailed
        )
    })?;
    let pages = document.get_pages();
    let mut text = String::new();
    for page_number in pages.keys() {
        match document.extract_text(&[*page_number]) {
            Ok(page_text) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(page_text.trim_end());
            }
            Err(e) => debug!(file_name, page_number, "Skipping unreadable PDF page: {}", e),
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            break;
        }
    }
    let (text, truncated) = cap_text(text);
    Ok(ExtractedContent {
        mime_type: "application/pdf".to_string(),
        text,
        truncated,
        page_count: Some(pages.len() as u32),
        metadata: pdf_metadata(&document),
    })
}

fn cap_text(text: String) -> (String, bool) {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text, false),
    }
}

fn pdf_metadata(document: &Document) -> DocumentMetadata {
    let Some(info) = info_dictionary(document) else {
        return DocumentMetadata::default();
    };
    let field = |key: &[u8]| info.get(key).ok().and_then(|o| decode_text(document, o));
    DocumentMetadata {
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        keywords: field(b"Keywords"),
        creator: field(b"Creator"),
        producer: field(b"Producer"),
        created: field(b"CreationDate").map(|d| normalize_pdf_date(&d)),
        modified: field(b"ModDate").map(|d| normalize_pdf_date(&d)),
    }
}

fn info_dictionary(document: &Document) -> Option<&Dictionary> {
    let info = document.trailer.get(b"Info").ok()?;
    resolve(document, info)?.as_dict().ok()
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn decode_text(document: &Document, object: &Object) -> Option<String> {
    let Object::String(bytes, _) = resolve(document, object)? else {
        return None;
    };
    let text = if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        // PDFDocEncoding agrees with Latin-1 for printable text.
        bytes.iter().map(|&b| b as char).collect()
    };
    let text = text.trim_matches(char::from(0)).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// `D:20240115093000Z` -> `2024-01-15T09:30:00`. Unparseable values pass through.
fn normalize_pdf_date(raw: &str) -> String {
    let digits: String = raw
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 8 {
        return raw.to_string();
    }
    let part = |from: usize, to: usize, default: &str| {
        digits
            .get(from..to)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    };
    let candidate = format!(
        "{}-{}-{}T{}:{}:{}",
        part(0, 4, "0000"),
        part(4, 6, "01"),
        part(6, 8, "01"),
        part(8, 10, "00"),
        part(10, 12, "00"),
        part(12, 14, "00"),
    );
    match chrono::NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S") {
        Ok(_) => candidate,
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream, StringFormat};

    /// Builds a small single-font PDF, one text line per page.
    pub fn sample_pdf(pages: &[&str], title: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids: Vec<Object> = Vec::new();
        for line in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::String(title.as_bytes().to_vec(), StringFormat::Literal),
            "CreationDate" => Object::String(b"D:20240115093000Z".to_vec(), StringFormat::Literal),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn hash_is_reproducible() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn extracts_plain_text() {
        let content = extract(b"RFI-7 response attached", "notes.txt").unwrap();
        assert_eq!(content.text, "RFI-7 response attached");
        assert_eq!(content.page_count, None);
        assert!(!content.truncated);
    }

    #[test]
    fn caps_long_text() {
        let long = "x".repeat(MAX_TEXT_CHARS + 10);
        let content = extract(long.as_bytes(), "big.txt").unwrap();
        assert_eq!(content.text.chars().count(), MAX_TEXT_CHARS);
        assert!(content.truncated);
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let err = extract(&[0x50, 0x4b, 0x03, 0x04], "drawings.zip").unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedType);
    }

    #[test]
    fn extracts_pdf_pages_and_metadata() {
        let bytes = sample_pdf(&["RFI-045 Door hardware", "Sheet A-101"], "Door RFI");
        let content = extract(&bytes, "rfi.pdf").unwrap();
        assert_eq!(content.page_count, Some(2));
        assert!(content.text.contains("RFI-045"));
        assert!(content.text.contains("A-101"));
        assert_eq!(content.metadata.title.as_deref(), Some("Door RFI"));
        assert_eq!(
            content.metadata.created.as_deref(),
            Some("2024-01-15T09:30:00")
        );
    }

    #[test]
    fn corrupt_pdf_is_extraction_failure() {
        let err = extract(b"%PDF-1.5 garbage", "broken.pdf").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExtractionFailed);
    }
}
