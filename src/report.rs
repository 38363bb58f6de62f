//! CSV export of search results.
//!
//! Columns: `Identifier,Zip File,File in Zip,S3 Path`, one row per
//! occurrence in result order. `Zip File` is the archive's file name
//! without its folder. Rows are separated by `\n` and the document has no
//! trailing newline.

use anyhow::{Context, Result};

use crate::models::SearchResult;
use crate::storage::file_name;

pub const CSV_HEADER: [&str; 4] = ["Identifier", "Zip File", "File in Zip", "S3 Path"];

/// Render results as CSV text.
pub fn to_csv(results: &[SearchResult]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for result in results {
        for occ in &result.occurrences {
            writer.write_record([
                result.identifier.as_str(),
                file_name(&occ.archive_key),
                occ.entry_path.as_str(),
                occ.storage_path.as_str(),
            ])?;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV writer: {}", e.error()))?;
    let mut text = String::from_utf8(bytes).context("CSV output is not valid UTF-8")?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Occurrence;

    fn occ(identifier: &str, key: &str, entry: &str) -> Occurrence {
        Occurrence {
            identifier: identifier.to_string(),
            archive_key: key.to_string(),
            entry_path: entry.to_string(),
            storage_path: format!("s3://b/{}", key),
        }
    }

    #[test]
    fn single_occurrence() {
        let results = vec![SearchResult {
            identifier: "ID1".into(),
            occurrences: vec![occ("ID1", "a.zip", "x.txt")],
        }];
        assert_eq!(
            to_csv(&results).unwrap(),
            "Identifier,Zip File,File in Zip,S3 Path\nID1,a.zip,x.txt,s3://b/a.zip"
        );
    }

    #[test]
    fn empty_results_is_header_only() {
        assert_eq!(
            to_csv(&[]).unwrap(),
            "Identifier,Zip File,File in Zip,S3 Path"
        );
    }

    #[test]
    fn rows_follow_result_order_and_use_file_name() {
        let results = vec![
            SearchResult {
                identifier: "B2".into(),
                occurrences: vec![
                    occ("B2", "2024/jan/one.zip", "docs/r.csv"),
                    occ("B2", "2024/feb/two.zip", "s.txt"),
                ],
            },
            SearchResult {
                identifier: "A1".into(),
                occurrences: vec![occ("A1", "one.zip", "notes, final.txt")],
            },
        ];
        let csv = to_csv(&results).unwrap();
        let lines: Vec<_> = csv.split('\n').collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "B2,one.zip,docs/r.csv,s3://b/2024/jan/one.zip");
        assert_eq!(lines[2], "B2,two.zip,s.txt,s3://b/2024/feb/two.zip");
        assert_eq!(lines[3], "A1,one.zip,\"notes, final.txt\",s3://b/one.zip");
    }
}
