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

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::modules::indexer::document::{DateMention, DocumentEntities, PartyMention};

/// Characters of surrounding text kept on each side of a date mention.
const DATE_CONTEXT_CHARS: usize = 40;

static RFI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bRFI\s*(?:[-#:]|no\.?)?\s*#?\s*(\d{1,5})\b").expect("valid RFI regex")
});

static SUBMITTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bSUB(?:MITTAL)?\s*(?:[-#:]|no\.?)?\s*#?\s*(\d{1,5})\b")
        .expect("valid submittal regex")
});

// Upper-case only; "co" in running text is too common.
static CHANGE_ORDER_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bCO\s*[-#:]?\s*#?\s*(\d{1,5})\b").expect("valid CO regex"));

static CHANGE_ORDER_LONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bchange\s+order\s*(?:[-#:]|no\.?)?\s*#?\s*(\d{1,5})\b")
        .expect("valid change order regex")
});

/// Discipline designator followed by a three-digit sheet number: A-101, S201, FP-001.
static DRAWING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(FP|ID|[ACEGILMPQST])-?(\d{3})(?:\.(\d{1,2}))?\b").expect("valid drawing regex")
});

static DATE_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[/.-](\d{1,2})[/.-](\d{4}|\d{2})\b").expect("valid date regex")
});

static DATE_ISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid ISO date regex"));

static DATE_WRITTEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
    .expect("valid written date regex")
});

/// Party roles, longest first so "structural engineer" wins over "engineer".
const PARTY_ROLES: &[&str] = &[
    "owner's representative",
    "construction manager",
    "general contractor",
    "structural engineer",
    "project manager",
    "superintendent",
    "subcontractor",
    "consultant",
    "architect",
    "inspector",
    "contractor",
    "engineer",
    "supplier",
    "vendor",
    "owner",
];

static PARTY: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = PARTY_ROLES
        .iter()
        .map(|r| regex::escape(r))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?i)\b({alternation})\b(?:\s*:\s*([A-Z][A-Za-z0-9&.,' -]{{1,60}}?)\s*(?:$|\n|;|\(|\s{{2,}}))?"
    ))
    .expect("valid party regex")
});

/// Runs every pattern family over `text` (plus the filename). Each family is
/// de-duplicated, keeping first-occurrence order.
pub fn extract_entities(text: &str, file_name: &str) -> DocumentEntities {
    let haystack = if file_name.is_empty() {
        text.to_string()
    } else {
        format!("{}\n{}", file_name, text)
    };
    let mut change_orders = numbered(&CHANGE_ORDER_SHORT, &haystack, "CO");
    change_orders.extend(numbered(&CHANGE_ORDER_LONG, &haystack, "CO"));

    DocumentEntities {
        rfi_numbers: numbered(&RFI, &haystack, "RFI"),
        submittal_numbers: numbered(&SUBMITTAL, &haystack, "SUB"),
        change_order_numbers: dedup(change_orders),
        drawing_numbers: drawing_numbers(&haystack),
        dates: date_mentions(text),
        parties: party_mentions(text),
    }
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

/// `RFI #45` and `rfi-045` both normalize to `RFI-045`.
fn numbered(pattern: &Regex, text: &str, prefix: &str) -> Vec<String> {
    dedup(
        pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .map(|n| format!("{}-{:03}", prefix, n))
            .collect(),
    )
}

fn drawing_numbers(text: &str) -> Vec<String> {
    dedup(
        DRAWING
            .captures_iter(text)
            .map(|c| {
                let mut number = format!("{}-{}", &c[1], &c[2]);
                if let Some(sub) = c.get(3) {
                    number.push('.');
                    number.push_str(sub.as_str());
                }
                number
            })
            .collect(),
    )
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn expand_year(year: &str) -> Option<i32> {
    let value: i32 = year.parse().ok()?;
    Some(if year.len() == 2 { 2000 + value } else { value })
}

fn context_around(text: &str, start: usize, end: usize) -> String {
    let before: String = {
        let chars: Vec<char> = text[..start].chars().rev().take(DATE_CONTEXT_CHARS).collect();
        chars.into_iter().rev().collect()
    };
    let after: String = text[end..].chars().take(DATE_CONTEXT_CHARS).collect();
    let joined = format!("{}{}{}", before, &text[start..end], after);
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn date_mentions(text: &str) -> Vec<DateMention> {
    // (byte offset, mention) so mixed formats come back in text order
    let mut found: Vec<(usize, DateMention)> = Vec::new();
    let mut push = |m: regex::Match, date: Option<NaiveDate>| {
        if let Some(date) = date {
            found.push((
                m.start(),
                DateMention {
                    date: date.format("%Y-%m-%d").to_string(),
                    raw: m.as_str().to_string(),
                    context: context_around(text, m.start(), m.end()),
                },
            ));
        }
    };

    for c in DATE_ISO.captures_iter(text) {
        let date = (|| {
            NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
        })();
        if let Some(m) = c.get(0) {
            push(m, date);
        }
    }
    for c in DATE_NUMERIC.captures_iter(text) {
        // US ordering: month/day/year
        let date = (|| {
            NaiveDate::from_ymd_opt(expand_year(&c[3])?, c[1].parse().ok()?, c[2].parse().ok()?)
        })();
        if let Some(m) = c.get(0) {
            push(m, date);
        }
    }
    for c in DATE_WRITTEN.captures_iter(text) {
        let date = (|| {
            NaiveDate::from_ymd_opt(c[3].parse().ok()?, month_number(&c[1])?, c[2].parse().ok()?)
        })();
        if let Some(m) = c.get(0) {
            push(m, date);
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, mention)| mention)
        .filter(|m| seen.insert(m.date.clone()))
        .collect()
}

fn party_mentions(text: &str) -> Vec<PartyMention> {
    let mut seen = HashSet::new();
    PARTY
        .captures_iter(text)
        .filter_map(|c| {
            let role = c.get(1)?.as_str().to_lowercase();
            let name = c
                .get(2)
                .map(|n| n.as_str().trim().trim_end_matches([',', '.']).to_string())
                .filter(|n| !n.is_empty());
            Some(PartyMention { role, name })
        })
        .filter(|p| seen.insert((p.role.clone(), p.name.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_rfi_numbers() {
        let entities = extract_entities("See RFI-7 and the reply to RFI #045. Also rfi 7.", "");
        assert_eq!(entities.rfi_numbers, vec!["RFI-007", "RFI-045"]);
    }

    #[test]
    fn submittals_and_change_orders() {
        let entities = extract_entities(
            "Submittal #12 returned. SUB-012 resubmitted. CO-3 approved; Change Order No. 4 pending. The co 9 is ignored.",
            "",
        );
        assert_eq!(entities.submittal_numbers, vec!["SUB-012"]);
        assert_eq!(entities.change_order_numbers, vec!["CO-003", "CO-004"]);
    }

    #[test]
    fn drawing_numbers_from_text_and_filename() {
        let entities = extract_entities("Refer to A-101, S201 and M-401.2. Again A-101.", "E-001 Lighting.pdf");
        assert_eq!(
            entities.drawing_numbers,
            vec!["E-001", "A-101", "S-201", "M-401.2"]
        );
    }

    #[test]
    fn dates_with_context() {
        let text = "Pour scheduled for 03/14/2025 weather permitting. Inspection on 2025-02-30 is invalid. Meeting January 5, 2025 at site.";
        let entities = extract_entities(text, "");
        let dates: Vec<_> = entities.dates.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-14", "2025-01-05"]);
        assert!(entities.dates[0].context.contains("Pour scheduled"));
        assert!(entities.dates[0].context.contains("weather"));
        assert!(entities.dates[0].context.chars().count() <= 2 * DATE_CONTEXT_CHARS + 10);
    }

    #[test]
    fn party_roles_prefer_longest() {
        let entities = extract_entities(
            "Structural Engineer: Walsh & Partners\nThe architect approved. The owner and the architect met.",
            "",
        );
        let roles: Vec<_> = entities.parties.iter().map(|p| p.role.as_str()).collect();
        assert_eq!(roles, vec!["structural engineer", "architect", "owner"]);
        assert_eq!(entities.parties[0].name.as_deref(), Some("Walsh & Partners"));
    }
}
