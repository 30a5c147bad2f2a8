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

use crate::modules::indexer::document::{DocumentClassification, DocumentEntities};

static EXPLICIT_DIVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bDIV(?:ISION)?\.?\s*(\d{1,2})\b").expect("valid division regex")
});

static WORD_RFI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brfis?\b|request for information").expect("valid regex"));

static WORD_SUBMITTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsubmittals?\b|shop drawings?|product data").expect("valid regex")
});

static WORD_CHANGE_ORDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)change[ _-]?orders?|\bpco\b|change request").expect("valid regex")
});

static WORD_DRAWING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdrawings?\b|\bdwg\b|\bsheet\b|floor plan|elevations?\b").expect("valid regex")
});

static WORD_SAFETY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsafety\b|\bosha\b|incident report|near[ -]miss|toolbox talk|\bjha\b|hazard")
        .expect("valid regex")
});

static WORD_SPECIFICATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bspecifications?\b|\bsection \d{2} ?\d{2} ?\d{2}\b").expect("valid regex")
});

/// CSI MasterFormat divisions the table below can resolve to.
const DIVISION_NAMES: &[(&str, &str)] = &[
    ("01", "General Requirements"),
    ("02", "Existing Conditions"),
    ("03", "Concrete"),
    ("04", "Masonry"),
    ("05", "Metals"),
    ("06", "Wood, Plastics, and Composites"),
    ("07", "Thermal and Moisture Protection"),
    ("08", "Openings"),
    ("09", "Finishes"),
    ("10", "Specialties"),
    ("11", "Equipment"),
    ("12", "Furnishings"),
    ("13", "Special Construction"),
    ("14", "Conveying Equipment"),
    ("21", "Fire Suppression"),
    ("22", "Plumbing"),
    ("23", "Heating, Ventilating, and Air Conditioning"),
    ("25", "Integrated Automation"),
    ("26", "Electrical"),
    ("27", "Communications"),
    ("28", "Electronic Safety and Security"),
    ("31", "Earthwork"),
    ("32", "Exterior Improvements"),
    ("33", "Utilities"),
];

/// Keyword -> division. Evaluated in order; the first keyword found wins.
const DIVISION_KEYWORDS: &[(&str, &str)] = &[
    ("concrete", "03"),
    ("rebar", "03"),
    ("formwork", "03"),
    ("masonry", "04"),
    ("cmu", "04"),
    ("structural steel", "05"),
    ("metal deck", "05"),
    ("miscellaneous metals", "05"),
    ("millwork", "06"),
    ("carpentry", "06"),
    ("waterproofing", "07"),
    ("roofing", "07"),
    ("insulation", "07"),
    ("firestopping", "07"),
    ("door hardware", "08"),
    ("doors", "08"),
    ("windows", "08"),
    ("glazing", "08"),
    ("storefront", "08"),
    ("drywall", "09"),
    ("gypsum", "09"),
    ("flooring", "09"),
    ("ceiling", "09"),
    ("painting", "09"),
    ("signage", "10"),
    ("toilet accessories", "10"),
    ("appliances", "11"),
    ("casework", "12"),
    ("elevator", "14"),
    ("fire sprinkler", "21"),
    ("fire suppression", "21"),
    ("plumbing", "22"),
    ("hvac", "23"),
    ("ductwork", "23"),
    ("mechanical", "23"),
    ("electrical", "26"),
    ("lighting", "26"),
    ("switchgear", "26"),
    ("low voltage", "27"),
    ("fire alarm", "28"),
    ("access control", "28"),
    ("earthwork", "31"),
    ("excavation", "31"),
    ("paving", "32"),
    ("landscaping", "32"),
    ("storm drain", "33"),
    ("utilities", "33"),
];

/// Folder-name hints, checked against the file's parent directories.
const FOLDER_HINTS: &[(&str, &str)] = &[
    ("rfi", "rfis"),
    ("submittal", "submittals"),
    ("change order", "change_orders"),
    ("change_order", "change_orders"),
    ("drawing", "drawings"),
    ("plans", "drawings"),
    ("spec", "specifications"),
    ("photo", "photos"),
    ("safety", "safety"),
    ("correspondence", "correspondence"),
    ("attachments", "correspondence"),
];

pub fn division_name(division: &str) -> Option<&'static str> {
    DIVISION_NAMES
        .iter()
        .find(|(code, _)| *code == division)
        .map(|(_, name)| *name)
}

/// Primary document type. Priority is fixed: rfi, submittal, change_order,
/// drawing, safety; each gated by an entity hit or a keyword.
pub fn document_type(entities: &DocumentEntities, text: &str, file_name: &str) -> &'static str {
    let hit = |pattern: &Regex| pattern.is_match(file_name) || pattern.is_match(text);

    if !entities.rfi_numbers.is_empty() || hit(&WORD_RFI) {
        "rfi"
    } else if !entities.submittal_numbers.is_empty() || hit(&WORD_SUBMITTAL) {
        "submittal"
    } else if !entities.change_order_numbers.is_empty() || hit(&WORD_CHANGE_ORDER) {
        "change_order"
    } else if !entities.drawing_numbers.is_empty() || hit(&WORD_DRAWING) {
        "drawing"
    } else if hit(&WORD_SAFETY) {
        "safety"
    } else if hit(&WORD_SPECIFICATION) {
        "specification"
    } else {
        "general"
    }
}

/// Explicit `DIV NN` marker first, then the keyword table.
pub fn csi_division(text: &str, file_name: &str) -> Option<String> {
    for source in [file_name, text] {
        for capture in EXPLICIT_DIVISION.captures_iter(source) {
            if let Ok(number) = capture[1].parse::<u32>() {
                let code = format!("{:02}", number);
                if division_name(&code).is_some() {
                    return Some(code);
                }
            }
        }
    }
    let haystack = format!("{}\n{}", file_name, text).to_lowercase();
    DIVISION_KEYWORDS
        .iter()
        .find(|(keyword, _)| haystack.contains(keyword))
        .map(|(_, code)| code.to_string())
}

pub fn folder_type(path: &Path, document_type: &str) -> Option<String> {
    let from_path = path
        .parent()
        .into_iter()
        .flat_map(|p| p.components().rev())
        .filter_map(|c| c.as_os_str().to_str())
        .map(str::to_lowercase)
        .find_map(|component| {
            FOLDER_HINTS
                .iter()
                .find(|(hint, _)| component.contains(hint))
                .map(|(_, folder)| folder.to_string())
        });
    from_path.or_else(|| {
        match document_type {
            "rfi" => Some("rfis"),
            "submittal" => Some("submittals"),
            "change_order" => Some("change_orders"),
            "drawing" => Some("drawings"),
            "safety" => Some("safety"),
            "specification" => Some("specifications"),
            _ => None,
        }
        .map(str::to_string)
    })
}

pub fn classify(
    entities: &DocumentEntities,
    text: &str,
    file_name: &str,
    path: &Path,
) -> DocumentClassification {
    let document_type = document_type(entities, text, file_name);
    let csi_division = csi_division(text, file_name);
    DocumentClassification {
        document_type: document_type.to_string(),
        folder_type: folder_type(path, document_type),
        csi_division_name: csi_division
            .as_deref()
            .and_then(division_name)
            .map(str::to_string),
        csi_division,
    }
}
