//! Tabular ingest: turns an uploaded spreadsheet into a typed record set.
//!
//! # Rules
//! - Only the first sheet is read; row 0 is the header
//! - Headers are matched case-insensitively by substring, so "Input Text",
//!   "input_text" and "My input texts" all satisfy the input kind
//! - Rows whose required cell is blank are dropped, not rejected
//! - For two-column kinds a row is dropped when either cell is blank, which
//!   keeps the pairs aligned

pub mod sheet;

use thiserror::Error;

use crate::records::{
    Category, CategorySet, Example, ExampleSet, InputTextSet, RecordKind, RecordSet,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("The {kind} file could not be read as a spreadsheet: {reason}")]
    UnreadableFile { kind: RecordKind, reason: String },

    #[error("The {kind} file must contain a header row and at least one row of data")]
    EmptyFile { kind: RecordKind },

    #[error("The {kind} file must have a column named {}", quoted(.columns))]
    MissingColumn {
        kind: RecordKind,
        columns: Vec<&'static str>,
    },

    #[error("No {kind} data found in the file")]
    NoDataRows { kind: RecordKind },
}

fn quoted(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(" and ")
}

/// A validated upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub records: RecordSet,
    /// Number of usable data rows kept.
    pub rows: usize,
}

/// Parse and validate spreadsheet bytes of the given kind.
pub fn ingest(kind: RecordKind, bytes: &[u8]) -> Result<Ingested, IngestError> {
    let rows = sheet::read_first_sheet(bytes).map_err(|e| IngestError::UnreadableFile {
        kind,
        reason: e.to_string(),
    })?;
    validate_rows(kind, &rows)
}

/// Validate already-decoded rows (header first).
pub fn validate_rows(kind: RecordKind, rows: &[Vec<String>]) -> Result<Ingested, IngestError> {
    if rows.len() < 2 {
        return Err(IngestError::EmptyFile { kind });
    }

    let headers: Vec<String> = rows[0].iter().map(|h| h.to_lowercase()).collect();
    let data = &rows[1..];

    let records = match kind {
        RecordKind::Input => {
            let column = find_header(&headers, &["input", "text"], &[], None)
                .ok_or(IngestError::MissingColumn {
                    kind,
                    columns: vec!["input text"],
                })?;

            let texts: Vec<String> = data
                .iter()
                .filter_map(|row| cell(row, column))
                .map(str::to_string)
                .collect();

            RecordSet::Inputs(
                InputTextSet::new(texts).map_err(|_| IngestError::NoDataRows { kind })?,
            )
        }
        RecordKind::Category => {
            let name = find_header(&headers, &["category"], &["description"], None);
            let description = find_header(&headers, &["category", "description"], &[], None);
            let (name, description) = require_pair(
                kind,
                (name, "category"),
                (description, "category description"),
            )?;

            let entries: Vec<Category> = data
                .iter()
                .filter_map(|row| Some(Category::new(cell(row, name)?, cell(row, description)?)))
                .collect();

            RecordSet::Categories(
                CategorySet::new(entries).map_err(|_| IngestError::NoDataRows { kind })?,
            )
        }
        RecordKind::Example => {
            let text = find_header(&headers, &["example", "input", "text"], &[], None);
            let desired = find_header(&headers, &["desired", "category"], &[], text);
            let (text, desired) = require_pair(
                kind,
                (text, "example input text"),
                (desired, "desired category"),
            )?;

            let entries: Vec<Example> = data
                .iter()
                .filter_map(|row| Some(Example::new(cell(row, text)?, cell(row, desired)?)))
                .collect();

            RecordSet::Examples(
                ExampleSet::new(entries).map_err(|_| IngestError::NoDataRows { kind })?,
            )
        }
    };

    let dropped = data.len() - records.len();
    if dropped > 0 {
        tracing::debug!(
            "Dropped {} blank {} rows out of {}",
            dropped,
            kind,
            data.len()
        );
    }

    Ok(Ingested {
        rows: records.len(),
        records,
    })
}

/// Index of the first header (other than `skip`) containing every `required`
/// token and none of the `excluded` ones. Headers must already be lowercase.
fn find_header(
    headers: &[String],
    required: &[&str],
    excluded: &[&str],
    skip: Option<usize>,
) -> Option<usize> {
    headers
        .iter()
        .enumerate()
        .find(|(index, header)| {
            Some(*index) != skip
                && required.iter().all(|token| header.contains(token))
                && !excluded.iter().any(|token| header.contains(token))
        })
        .map(|(index, _)| index)
}

fn require_pair(
    kind: RecordKind,
    first: (Option<usize>, &'static str),
    second: (Option<usize>, &'static str),
) -> Result<(usize, usize), IngestError> {
    match (first.0, second.0) {
        (Some(a), Some(b)) => Ok((a, b)),
        (a, b) => {
            let mut columns = Vec::new();
            if a.is_none() {
                columns.push(first.1);
            }
            if b.is_none() {
                columns.push(second.1);
            }
            Err(IngestError::MissingColumn { kind, columns })
        }
    }
}

fn cell(row: &[String], index: usize) -> Option<&str> {
    row.get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::sheet::{build_workbook, write_labeled_result};
    use super::*;
    use crate::records::{LabeledItem, LabeledResult};

    fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_input_header_variants() {
        for header in ["Input Text", "input_text", "INPUT TEXTS", "my input text column"] {
            let bytes = build_workbook(&[&[header], &["one"], &["two"], &["three"]]);
            let ingested = ingest(RecordKind::Input, &bytes).unwrap();
            assert_eq!(ingested.rows, 3, "header {:?}", header);
        }
    }

    #[test]
    fn test_row_count_matches_non_empty_rows() {
        let data = rows(&[
            &["id", "Input Text"],
            &["1", "first"],
            &["2", ""],
            &["3", "   "],
            &["4", "second"],
            &["5"],
        ]);
        let ingested = validate_rows(RecordKind::Input, &data).unwrap();
        assert_eq!(ingested.rows, 2);
        match ingested.records {
            RecordSet::Inputs(set) => assert_eq!(set.texts(), ["first", "second"]),
            other => panic!("unexpected records: {:?}", other),
        }
    }

    #[test]
    fn test_empty_file() {
        let data = rows(&[&["input text"]]);
        assert_eq!(
            validate_rows(RecordKind::Input, &data),
            Err(IngestError::EmptyFile {
                kind: RecordKind::Input
            })
        );
        assert_eq!(
            validate_rows(RecordKind::Category, &[]),
            Err(IngestError::EmptyFile {
                kind: RecordKind::Category
            })
        );
    }

    #[test]
    fn test_no_data_rows() {
        let data = rows(&[&["input text"], &[""], &["  "]]);
        assert_eq!(
            validate_rows(RecordKind::Input, &data),
            Err(IngestError::NoDataRows {
                kind: RecordKind::Input
            })
        );
    }

    #[test]
    fn test_missing_input_column() {
        let data = rows(&[&["text"], &["hello"]]);
        let err = validate_rows(RecordKind::Input, &data).unwrap_err();
        assert_eq!(
            err,
            IngestError::MissingColumn {
                kind: RecordKind::Input,
                columns: vec!["input text"],
            }
        );
        assert!(err.to_string().contains("\"input text\""));
    }

    #[test]
    fn test_category_description_requires_category_token() {
        let bytes = build_workbook(&[&["Category", "desc"], &["Positive", "praise"]]);
        let err = ingest(RecordKind::Category, &bytes).unwrap_err();
        assert_eq!(
            err,
            IngestError::MissingColumn {
                kind: RecordKind::Category,
                columns: vec!["category description"],
            }
        );
        assert!(err.to_string().contains("category description"));
    }

    #[test]
    fn test_category_pairs_stay_aligned() {
        let data = rows(&[
            &["Category Description", "Category"],
            &["praise", "Positive"],
            &["", "Orphan"],
            &["asks for help", "Question"],
        ]);
        let ingested = validate_rows(RecordKind::Category, &data).unwrap();
        assert_eq!(ingested.rows, 2);
        match ingested.records {
            RecordSet::Categories(set) => {
                assert_eq!(set.entries()[0], Category::new("Positive", "praise"));
                assert_eq!(set.entries()[1], Category::new("Question", "asks for help"));
            }
            other => panic!("unexpected records: {:?}", other),
        }
    }

    #[test]
    fn test_example_columns() {
        let data = rows(&[
            &["Example Input Text", "Desired Category"],
            &["I love it", "Positive"],
        ]);
        let ingested = validate_rows(RecordKind::Example, &data).unwrap();
        assert_eq!(
            ingested.records,
            RecordSet::Examples(ExampleSet::new(vec![Example::new("I love it", "Positive")]).unwrap())
        );

        let data = rows(&[&["Example Text", "Desired Category"], &["I love it", "Positive"]]);
        assert_eq!(
            validate_rows(RecordKind::Example, &data).unwrap_err(),
            IngestError::MissingColumn {
                kind: RecordKind::Example,
                columns: vec!["example input text"],
            }
        );
    }

    #[test]
    fn test_example_columns_must_be_distinct() {
        let data = rows(&[
            &["example input text desired category"],
            &["I love it"],
        ]);
        assert_eq!(
            validate_rows(RecordKind::Example, &data).unwrap_err(),
            IngestError::MissingColumn {
                kind: RecordKind::Example,
                columns: vec!["desired category"],
            }
        );
    }

    #[test]
    fn test_unreadable_file() {
        let err = ingest(RecordKind::Input, b"plain text, not xlsx").unwrap_err();
        assert!(matches!(err, IngestError::UnreadableFile { .. }));
    }

    #[test]
    fn test_export_reingests_as_input() {
        let result = LabeledResult::new(vec![
            LabeledItem::new("Great service!", "Positive"),
            LabeledItem::new("Where is my order?", "Question"),
            LabeledItem::new("Meh", "Neutral"),
        ]);
        let bytes = write_labeled_result(&result).unwrap();

        let ingested = ingest(RecordKind::Input, &bytes).unwrap();
        match ingested.records {
            RecordSet::Inputs(set) => {
                assert_eq!(set.texts(), ["Great service!", "Where is my order?", "Meh"])
            }
            other => panic!("unexpected records: {:?}", other),
        }
    }
}
