//! Archive content scanning.
//!
//! Runs the [`PatternMatcher`] over the text-like entries of one decoded
//! archive and turns every hit into an [`Occurrence`].

use crate::matcher::PatternMatcher;
use crate::models::{ExtractedEntry, Occurrence};

/// How far into an entry to look for NUL bytes when sniffing binary content.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Suffix filter deciding which entries are searched.
#[derive(Debug, Clone)]
pub struct TextFilter {
    suffixes: Vec<String>,
}

impl TextFilter {
    pub fn new<S: AsRef<str>>(suffixes: &[S]) -> Self {
        Self {
            suffixes: suffixes
                .iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_text(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }
}

fn looks_binary(content: &str) -> bool {
    content.as_bytes().iter().take(BINARY_SNIFF_BYTES).any(|&b| b == 0)
}

/// Search every text-like entry and emit one [`Occurrence`] per
/// (entry, identifier) hit, in entry order then identifier order.
pub fn scan(
    entries: &[ExtractedEntry],
    matcher: &PatternMatcher,
    filter: &TextFilter,
    archive_key: &str,
    storage_path: &str,
) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    for entry in entries {
        if !filter.is_text(&entry.path) {
            continue;
        }
        if looks_binary(&entry.content) {
            tracing::debug!(archive = archive_key, entry = %entry.path, "skipping binary-looking entry");
            continue;
        }
        for identifier in matcher.matches(&entry.content) {
            tracing::debug!(archive = archive_key, entry = %entry.path, identifier, "identifier found");
            occurrences.push(Occurrence {
                identifier: identifier.to_string(),
                archive_key: archive_key.to_string(),
                entry_path: entry.path.clone(),
                storage_path: storage_path.to_string(),
            });
        }
    }
    occurrences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, content: &str) -> ExtractedEntry {
        ExtractedEntry {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn default_filter() -> TextFilter {
        TextFilter::new(&[".txt", ".csv", ".log", ".md", ".json", ".xml", ".html", ".htm"])
    }

    #[test]
    fn only_text_like_entries_are_searched() {
        let matcher = PatternMatcher::new(&["ID123"]);
        let entries = vec![
            entry("a.txt", "ID123"),
            entry("b.bin", "ID123"),
            entry("c.pdf", "ID123"),
            entry("dir/D.JSON", "{\"id\":\"ID123\"}"),
            entry("noext", "ID123"),
        ];
        let occ = scan(&entries, &matcher, &default_filter(), "x.zip", "s3://b/x.zip");
        let paths: Vec<_> = occ.iter().map(|o| o.entry_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "dir/D.JSON"]);
    }

    #[test]
    fn one_occurrence_per_identifier_per_entry() {
        let matcher = PatternMatcher::new(&["ABC123", "DEF456", "XYZ789"]);
        let entries = vec![
            entry("file1.txt", "identifier ABC123 and again ABC123"),
            entry("file2.txt", "contains XYZ789"),
            entry("file3.txt", "No identifiers here"),
            entry("file4.txt", "Multiple identifiers: ABC123 and DEF456"),
        ];
        let occ = scan(&entries, &matcher, &default_filter(), "t.zip", "s3://b/t.zip");
        let pairs: Vec<_> = occ
            .iter()
            .map(|o| (o.identifier.as_str(), o.entry_path.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("ABC123", "file1.txt"),
                ("XYZ789", "file2.txt"),
                ("ABC123", "file4.txt"),
                ("DEF456", "file4.txt"),
            ]
        );
        assert!(occ.iter().all(|o| o.storage_path == "s3://b/t.zip"));
        assert!(occ.iter().all(|o| o.archive_key == "t.zip"));
    }

    #[test]
    fn binary_content_is_skipped_without_blocking_others() {
        let matcher = PatternMatcher::new(&["ID1"]);
        let entries = vec![entry("a.log", "ID1\0\0\0"), entry("b.log", "ID1")];
        let occ = scan(&entries, &matcher, &default_filter(), "k.zip", "s3://b/k.zip");
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].entry_path, "b.log");
    }
}
