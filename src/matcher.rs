//! Whole-token identifier matching.
//!
//! Each identifier is compiled once per job into a case-insensitive regex of
//! the form `\b<escaped identifier>\b`, so `AB12` matches in `"ref AB12."` but
//! not inside `"AB123"`. Identifiers are independent: one text may match many.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

/// Compiled matcher for a fixed identifier list.
pub struct PatternMatcher {
    patterns: Vec<(String, Regex)>,
}

impl PatternMatcher {
    /// Compile one pattern per distinct identifier, keeping first-seen order.
    ///
    /// An identifier that cannot be compiled is logged and left out; the
    /// remaining identifiers still match.
    pub fn new<S: AsRef<str>>(identifiers: &[S]) -> Self {
        let mut seen = HashSet::new();
        let mut patterns = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let identifier = identifier.as_ref();
            if identifier.is_empty() || !seen.insert(identifier) {
                continue;
            }
            match RegexBuilder::new(&format!(r"\b{}\b", regex::escape(identifier)))
                .case_insensitive(true)
                .build()
            {
                Ok(re) => patterns.push((identifier.to_string(), re)),
                Err(e) => {
                    tracing::warn!(identifier, error = %e, "skipping identifier that failed to compile");
                }
            }
        }
        Self { patterns }
    }

    /// Identifiers present in `text`, in identifier-list order.
    pub fn matches<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(identifier, _)| identifier.as_str())
            .collect()
    }

    /// Number of usable identifiers.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One-shot match without keeping the compiled matcher around.
pub fn match_identifiers<S: AsRef<str>>(text: &str, identifiers: &[S]) -> Vec<String> {
    PatternMatcher::new(identifiers)
        .matches(text)
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_token_match() {
        assert_eq!(match_identifiers("ref AB12.", &["AB12"]), vec!["AB12"]);
    }

    #[test]
    fn no_partial_token_match() {
        assert!(match_identifiers("AB123", &["AB12"]).is_empty());
        assert!(match_identifiers("XAB12", &["AB12"]).is_empty());
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(match_identifiers("found id-7", &["ID-7"]), vec!["ID-7"]);
    }

    #[test]
    fn metacharacters_are_literal() {
        assert_eq!(match_identifiers("total a.b+1 due", &["a.b+1"]), vec!["a.b+1"]);
        assert!(match_identifiers("total axb+1 due", &["a.b+1"]).is_empty());
        assert!(match_identifiers("anything", &["(unclosed"]).is_empty());
    }

    #[test]
    fn many_identifiers_keep_input_order() {
        let ids = ["ZZ9", "ABC123", "DEF456", "missing"];
        let text = "Multiple identifiers: ABC123 and DEF456, then zz9";
        assert_eq!(match_identifiers(text, &ids), vec!["ZZ9", "ABC123", "DEF456"]);
    }

    #[test]
    fn duplicates_collapse() {
        let matcher = PatternMatcher::new(&["A1", "A1", "", "B2"]);
        assert_eq!(matcher.len(), 2);
        assert_eq!(matcher.matches("A1 B2"), vec!["A1", "B2"]);
    }

    #[test]
    fn deterministic() {
        let ids = ["x1", "y2", "z3"];
        let text = "z3 y2 x1";
        assert_eq!(match_identifiers(text, &ids), match_identifiers(text, &ids));
    }
}
