//! Tabular parser for uploaded files.
//!
//! Delimited text is decoded as strict UTF-8, split with an auto-detected
//! delimiter and typed column by column. Workbooks go through the
//! strategy chain in [`workbook`].

pub mod workbook;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ParseError, ParseResult};
use crate::models::{unique_column_names, Table, Value};

/// Cell texts that read as missing values.
const NULL_MARKERS: &[&str] = &["", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A"];

/// Declared type of an uploaded file, taken from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
    Xls,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(FileKind::Csv),
            "xlsx" => Some(FileKind::Xlsx),
            "xls" => Some(FileKind::Xls),
            _ => None,
        }
    }

    /// Kind of a file name, or `None` when it has no allowed extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Parse one uploaded file of a declared kind.
///
/// Pure: no shared state is touched, so a failure here only concerns this file.
pub fn parse_bytes(bytes: &[u8], kind: FileKind) -> ParseResult<Table> {
    match kind {
        FileKind::Csv => parse_csv(bytes),
        FileKind::Xlsx | FileKind::Xls => workbook::parse_workbook(bytes, kind),
    }
}

/// Detect the encoding of raw bytes using chardet.
///
/// Only used to make decode errors actionable.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        "" => "unknown".to_string(),
        _ => charset,
    }
}

/// Decode bytes as strict UTF-8, dropping a UTF-8 byte order mark.
pub fn decode_utf8(bytes: &[u8]) -> ParseResult<String> {
    let body = match encoding_rs::Encoding::for_bom(bytes) {
        Some((enc, bom_len)) if enc == encoding_rs::UTF_8 => &bytes[bom_len..],
        Some((enc, _)) => {
            return Err(ParseError::Decode {
                detected: enc.name().to_string(),
            })
        }
        None => bytes,
    };

    encoding_rs::UTF_8
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|s| s.into_owned())
        .ok_or_else(|| ParseError::Decode {
            detected: detect_encoding(bytes),
        })
}

/// Detect the delimiter by counting occurrences in the first line.
///
/// Comma wins ties and lines without any candidate.
pub fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [b',', b';', b'\t', b'|'];
    let mut best_sep = b',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(char::from(sep)).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse delimited text into a typed table.
///
/// The first record is the header. Zero data rows is fine; an empty header is not.
pub fn parse_csv(bytes: &[u8]) -> ParseResult<Table> {
    let content = decode_utf8(bytes)?;
    let delimiter = detect_delimiter(&content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let header = reader
        .headers()
        .map_err(|e| ParseError::Csv(e.to_string()))?
        .clone();

    if header.iter().all(|h| h.is_empty()) {
        return Err(ParseError::EmptyTable);
    }

    let names = header
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if h.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                h.to_string()
            }
        })
        .collect();
    let columns = unique_column_names(names);
    let width = columns.len();

    let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Csv(e.to_string()))?;
        let mut row: Vec<Option<String>> = record
            .iter()
            .take(width)
            .map(|cell| {
                if NULL_MARKERS.contains(&cell) {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        row.resize(width, None);
        raw_rows.push(row);
    }

    let kinds: Vec<ColumnKind> = (0..width)
        .map(|idx| ColumnKind::infer(raw_rows.iter().filter_map(|r| r[idx].as_deref())))
        .collect();

    let rows = raw_rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(kinds.iter())
                .map(|(cell, kind)| cell.map_or(Value::Null, |c| kind.convert(c)))
                .collect()
        })
        .collect();

    Ok(Table::from_rows(columns, rows))
}

/// Type shared by every non-null cell of a delimited-text column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

impl ColumnKind {
    fn infer<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> Self {
        if cells.clone().all(|c| c.parse::<i64>().is_ok()) {
            ColumnKind::Int
        } else if cells
            .clone()
            .all(|c| c.parse::<f64>().map(f64::is_finite).unwrap_or(false))
        {
            ColumnKind::Float
        } else if cells.clone().all(|c| parse_bool(c).is_some()) {
            ColumnKind::Bool
        } else {
            ColumnKind::Text
        }
    }

    fn convert(self, cell: String) -> Value {
        match self {
            ColumnKind::Int => cell.parse().map(Value::Int).unwrap_or(Value::Str(cell)),
            ColumnKind::Float => cell.parse().map(Value::Float).unwrap_or(Value::Str(cell)),
            ColumnKind::Bool => parse_bool(&cell).map(Value::Bool).unwrap_or(Value::Str(cell)),
            ColumnKind::Text => Value::Str(cell),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_csv() {
        let csv = "item_id,name,price\n1,Apple,0.5\n2,Pear,0.75";
        let table = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(table.columns(), &["item_id", "name", "price"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get(0, "item_id"), Some(&Value::Int(1)));
        assert_eq!(table.get(1, "name"), Some(&Value::from("Pear")));
        assert_eq!(table.get(1, "price"), Some(&Value::Float(0.75)));
    }

    #[test]
    fn test_row_and_column_counts_follow_input() {
        let csv = "a;b;c;d\n1;2;3;4\n5;6;7;8\n9;10;11;12\n";
        let table = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(table.column_count(), 4);
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn test_header_only_is_accepted() {
        let table = parse_csv(b"a,b\n").unwrap();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_empty_input_is_empty_table_error() {
        let err = parse_csv(b"").unwrap_err();
        assert!(matches!(err, ParseError::EmptyTable));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[b'a', b'\n', 0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let err = parse_csv(bytes).unwrap_err();
        assert_eq!(err.kind(), "DecodeError");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"item_id\n1\n");
        let table = parse_csv(&bytes).unwrap();
        assert_eq!(table.columns(), &["item_id"]);
    }

    #[test]
    fn test_missing_values_become_null() {
        let csv = "a,b,c\n1,,3\n4,NA";
        let table = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(table.get(0, "b"), Some(&Value::Null));
        assert_eq!(table.get(1, "b"), Some(&Value::Null));
        assert_eq!(table.get(1, "c"), Some(&Value::Null));
        assert_eq!(table.get(0, "c"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_mixed_column_stays_text() {
        let csv = "code,flag\n10,true\nA7,FALSE";
        let table = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(table.get(0, "code"), Some(&Value::from("10")));
        assert_eq!(table.get(1, "flag"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_extra_columns_ignored() {
        let table = parse_csv(b"a,b\n1,2,3,4").unwrap();
        assert_eq!(table.rows()[0], vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_blank_and_duplicate_headers_are_named() {
        let table = parse_csv(b"a,,a\n1,2,3").unwrap();
        assert_eq!(table.columns(), &["a", "Unnamed: 1", "a.1"]);
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter("a|b|c"), b'|');
        assert_eq!(detect_delimiter("single"), b',');
    }

    #[test]
    fn test_file_kind_from_filename() {
        assert_eq!(FileKind::from_filename("FACT_SALES.CSV"), Some(FileKind::Csv));
        assert_eq!(FileKind::from_filename("dim.xlsx"), Some(FileKind::Xlsx));
        assert_eq!(FileKind::from_filename("old.xls"), Some(FileKind::Xls));
        assert_eq!(FileKind::from_filename("notes.txt"), None);
        assert_eq!(FileKind::from_filename("noext"), None);
    }
}
