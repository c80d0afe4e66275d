//! Workbook I/O: first-sheet reading and labeled-result export.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::records::LabeledResult;

/// Sheet name used for exported results.
pub const EXPORT_SHEET_NAME: &str = "Labeled Data";

/// Header row of an exported result. Re-ingestable as an input file.
pub const EXPORT_HEADERS: [&str; 2] = ["input text", "category"];

/// Read every row of the first worksheet as trimmed strings.
///
/// A workbook without worksheets yields no rows.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, calamine::Error> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Ok(Vec::new());
    };

    let range = workbook.worksheet_range(&sheet_name)?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        _ => cell.to_string().trim().to_string(),
    }
}

/// Render a labeled result as a two-column xlsx workbook.
pub fn write_labeled_result(result: &LabeledResult) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(EXPORT_SHEET_NAME)?;

    let header_format = Format::new().set_bold();
    for (col, header) in EXPORT_HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }

    for (index, item) in result.items().iter().enumerate() {
        let row = (index + 1) as u32;
        sheet.write_string(row, 0, item.text.as_str())?;
        sheet.write_string(row, 1, item.category.as_str())?;
    }

    workbook.save_to_buffer()
}

/// Build an xlsx workbook from string rows; empty strings become blank cells.
#[cfg(test)]
pub(crate) fn build_workbook(rows: &[&[&str]]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (row, values) in rows.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(row as u32, col as u16, *value).unwrap();
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::LabeledItem;

    #[test]
    fn test_read_first_sheet_only() {
        let mut workbook = Workbook::new();
        workbook
            .add_worksheet()
            .write_string(0, 0, "first")
            .unwrap();
        workbook
            .add_worksheet()
            .write_string(0, 0, "second")
            .unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = read_first_sheet(&bytes).unwrap();
        assert_eq!(rows, vec![vec!["first".to_string()]]);
    }

    #[test]
    fn test_cells_are_trimmed() {
        let bytes = build_workbook(&[&["  Input Text  "], &["  hello "]]);
        let rows = read_first_sheet(&bytes).unwrap();
        assert_eq!(rows[0][0], "Input Text");
        assert_eq!(rows[1][0], "hello");
    }

    #[test]
    fn test_export_layout() {
        let result = LabeledResult::new(vec![
            LabeledItem::new("Great service!", "Positive"),
            LabeledItem::new("Where is my order?", "Question"),
        ]);
        let bytes = write_labeled_result(&result).unwrap();
        let rows = read_first_sheet(&bytes).unwrap();

        assert_eq!(rows[0], vec!["input text", "category"]);
        assert_eq!(rows[1], vec!["Great service!", "Positive"]);
        assert_eq!(rows[2], vec!["Where is my order?", "Question"]);
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(read_first_sheet(b"definitely not a workbook").is_err());
    }
}
