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

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

pub mod storage;

pub use storage::{AttachmentStore, StoredFile};

/// Attachments above this size are recorded but never downloaded.
pub const MAX_DOWNLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// Executable-like extensions, rejected whatever MIME type the sender claims.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "msi", "vbs", "vbe", "js", "jse", "jar", "ps1",
    "sh", "dll", "cpl", "hta", "reg", "msc", "wsf", "lnk", "app",
];

const CAD_EXTENSIONS: &[&str] = &["dwg", "dxf", "dwf", "dwfx", "rvt", "rfa", "ifc", "nwd", "skp"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "tif", "tiff", "bmp",
];
const SPREADSHEET_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm", "csv", "ods"];
const DOCUMENT_EXTENSIONS: &[&str] = &["doc", "docx", "odt", "rtf", "pages"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "log"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "tar", "gz"];
const EMAIL_EXTENSIONS: &[&str] = &["eml", "msg"];

static DRAWING_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\b[A-Z]{1,2}-?\d{3}(\.\d+)?\b|drawing|dwg|sheet|plan|elevation|section|detail|layout)")
        .expect("valid drawing name regex")
});

static SPEC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(spec|specification|submittal|\b\d{2}[ _-]?\d{2}[ _-]?\d{2}\b|product[ _-]?data)")
        .expect("valid spec name regex")
});

static PHOTO_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^img[_-]|^dsc|^pxl_|photo|site|progress|punch)")
        .expect("valid photo name regex")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadDecision {
    Allow,
    Reject(String),
}

/// Size and type gate applied before any attachment download.
pub fn download_decision(filename: &str, size: u64, _mime: Option<&str>) -> DownloadDecision {
    if size > MAX_DOWNLOAD_SIZE {
        return DownloadDecision::Reject(format!(
            "size {} exceeds the {} byte limit",
            size, MAX_DOWNLOAD_SIZE
        ));
    }
    let extension = extension_of(filename);
    if BLOCKED_EXTENSIONS.contains(&extension.as_str()) {
        return DownloadDecision::Reject(format!("blocked file type .{}", extension));
    }
    DownloadDecision::Allow
}

pub fn should_download(filename: &str, size: u64, mime: Option<&str>) -> bool {
    download_decision(filename, size, mime) == DownloadDecision::Allow
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileCategory {
    pub file_type: &'static str,
    pub is_potential_drawing: bool,
    pub is_potential_spec: bool,
    pub is_potential_photo: bool,
}

pub fn extension_of(filename: &str) -> String {
    Path::new(filename.trim())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Pure filename/MIME heuristics; no file content is read.
pub fn categorize(filename: &str, mime: Option<&str>) -> FileCategory {
    let extension = extension_of(filename);
    let mime = mime.unwrap_or_default().to_ascii_lowercase();
    let ext = extension.as_str();
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let file_type = if ext == "pdf" || mime == "application/pdf" {
        "pdf"
    } else if CAD_EXTENSIONS.contains(&ext) {
        "cad"
    } else if IMAGE_EXTENSIONS.contains(&ext) || mime.starts_with("image/") {
        "image"
    } else if SPREADSHEET_EXTENSIONS.contains(&ext) {
        "spreadsheet"
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        "document"
    } else if TEXT_EXTENSIONS.contains(&ext) || mime.starts_with("text/") {
        "text"
    } else if ARCHIVE_EXTENSIONS.contains(&ext) {
        "archive"
    } else if EMAIL_EXTENSIONS.contains(&ext) || mime == "message/rfc822" {
        "email"
    } else {
        "other"
    };

    let is_potential_drawing = file_type == "cad"
        || (matches!(file_type, "pdf" | "image") && DRAWING_NAME.is_match(stem));
    let is_potential_spec =
        matches!(file_type, "pdf" | "document" | "text") && SPEC_NAME.is_match(stem);
    let is_potential_photo = file_type == "image"
        && (matches!(ext, "jpg" | "jpeg" | "heic" | "heif") || PHOTO_NAME.is_match(stem))
        && !is_potential_drawing;

    FileCategory {
        file_type,
        is_potential_drawing,
        is_potential_spec,
        is_potential_photo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_gate_is_inclusive_of_the_limit() {
        assert!(should_download("plans.pdf", MAX_DOWNLOAD_SIZE, Some("application/pdf")));
        assert!(!should_download(
            "plans.pdf",
            MAX_DOWNLOAD_SIZE + 1,
            Some("application/pdf")
        ));
    }

    #[test]
    fn blocked_extensions_ignore_mime() {
        assert!(!should_download("invoice.exe", 10, Some("application/pdf")));
        assert!(!should_download("RUN.BAT", 10, Some("text/plain")));
        assert!(!should_download("setup.msi", 10, None));
        assert!(should_download("spec.docx", 10, Some("application/octet-stream")));
        assert!(should_download("no_extension", 10, None));
    }

    #[test]
    fn categorizes_construction_files() {
        let drawing = categorize("A-101 Floor Plan.pdf", Some("application/pdf"));
        assert_eq!(drawing.file_type, "pdf");
        assert!(drawing.is_potential_drawing);

        let cad = categorize("site.dwg", None);
        assert_eq!(cad.file_type, "cad");
        assert!(cad.is_potential_drawing);

        let spec = categorize("08 71 00 Door Hardware Spec.pdf", None);
        assert!(spec.is_potential_spec);

        let photo = categorize("IMG_2041.JPG", Some("image/jpeg"));
        assert_eq!(photo.file_type, "image");
        assert!(photo.is_potential_photo);
        assert!(!photo.is_potential_drawing);

        let sheet = categorize("budget.xlsx", None);
        assert_eq!(sheet.file_type, "spreadsheet");
        assert!(!sheet.is_potential_spec);
    }
}
