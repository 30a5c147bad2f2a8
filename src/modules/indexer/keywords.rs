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

use std::collections::HashMap;

use itertools::Itertools;

pub const MAX_KEYWORDS: usize = 20;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "all", "also", "and", "any", "are", "been", "before",
    "being", "below", "between", "both", "but", "can", "could", "did", "does", "doing", "down",
    "during", "each", "few", "for", "from", "further", "had", "has", "have", "having", "her",
    "here", "hers", "him", "his", "how", "into", "its", "itself", "just", "more", "most", "not",
    "now", "off", "once", "only", "other", "our", "ours", "out", "over", "own", "per", "same",
    "shall", "she", "should", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "then", "there", "these", "they", "this", "those", "through", "too", "under", "until", "upon",
    "very", "was", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your", "yours", "page", "please", "thanks", "thank", "regards",
];

/// Most frequent meaningful words, ties broken by first occurrence.
pub fn top_keywords(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .enumerate()
        .for_each(|(position, word)| {
            counts.entry(word).or_insert((0, position)).0 += 1;
        });

    counts
        .into_iter()
        .sorted_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_b.cmp(count_a).then(first_a.cmp(first_b))
        })
        .take(MAX_KEYWORDS)
        .map(|(word, _)| word)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_frequency_then_first_seen() {
        let keywords = top_keywords("Concrete pour. The concrete slab and the rebar; rebar, concrete, slab 2025");
        assert_eq!(keywords, vec!["concrete", "slab", "rebar", "pour"]);
    }

    #[test]
    fn caps_at_twenty() {
        let text = (0..40).map(|i| format!("word{i}")).join(" ");
        let keywords = top_keywords(&text);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "word0");
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(top_keywords("  the and of 12 ").is_empty());
    }
}
