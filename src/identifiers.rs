//! Identifier list parsing.
//!
//! Turns raw user-supplied text into the ordered list of identifiers a job
//! searches for. Parsing never fails: blank or unusable lines are skipped and
//! an empty result is a valid (empty) list.

use serde::{Deserialize, Serialize};

/// Layout of the uploaded identifier text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierFormat {
    /// One identifier per line.
    #[default]
    Line,
    /// Identifier in the first comma-separated column.
    Csv,
}

impl std::str::FromStr for IdentifierFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(IdentifierFormat::Line),
            "csv" => Ok(IdentifierFormat::Csv),
            other => Err(format!(
                "unknown identifier format '{}': expected line or csv",
                other
            )),
        }
    }
}

/// Parse `content` into identifiers, preserving input order.
///
/// Duplicates are kept as given; the matcher collapses them.
pub fn load(content: &str, format: IdentifierFormat) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match format {
            IdentifierFormat::Line => Some(line.to_string()),
            IdentifierFormat::Csv => {
                let first = line.split(',').next().unwrap_or_default().trim();
                (!first.is_empty()).then(|| first.to_string())
            }
        })
        .collect()
}
