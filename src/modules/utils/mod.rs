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

use rand::Rng;

pub mod encrypt;
pub mod shutdown;

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::GroundworkError::Generic {
            message: $msg,
            location: snafu::location!(),
            code: $code,
        }
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {
        chrono::Utc::now().timestamp_millis()
    };
}

/// Random numeric id with at most `bits` significant bits (capped at 53 so
/// JavaScript clients can round-trip it).
#[macro_export]
macro_rules! id {
    ($bits:expr) => {
        $crate::modules::utils::generate_id($bits)
    };
}

#[macro_export]
macro_rules! groundwork_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

pub fn generate_id(bits: u32) -> u64 {
    let bits = bits.clamp(16, 53);
    let max = 1u64 << bits;
    rand::rng().random_range(1..max)
}

/// Lowercased, trimmed mailbox address used for matching and identity keys.
pub fn normalize_address(address: &str) -> String {
    address.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase()
}

/// Pulls the bare address out of `"Name" <user@host>` style headers.
pub fn extract_address(raw: &str) -> String {
    match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => normalize_address(&raw[start + 1..end]),
        _ => normalize_address(raw),
    }
}

/// Splits an address header on commas that are not inside a quoted name,
/// returning normalized bare addresses.
pub fn split_address_list(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in raw.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' | ';' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .iter()
        .map(|p| extract_address(p))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Plain-text rendering of an HTML body; the raw markup on failure.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100).unwrap_or_else(|_| html.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_fit_in_53_bits() {
        for _ in 0..1000 {
            let id = generate_id(64);
            assert!(id > 0);
            assert!(id < (1u64 << 53));
        }
    }

    #[test]
    fn extracts_bare_address() {
        assert_eq!(
            extract_address("\"Site Office\" <Site.Office@Example.com>"),
            "site.office@example.com"
        );
        assert_eq!(extract_address(" pm@example.com "), "pm@example.com");
    }

    #[test]
    fn splits_address_lists_outside_quotes() {
        assert_eq!(
            split_address_list("\"Doe, Jane\" <jane@example.com>, bob@example.com; ,"),
            vec!["jane@example.com", "bob@example.com"]
        );
        assert!(split_address_list("").is_empty());
    }
}
