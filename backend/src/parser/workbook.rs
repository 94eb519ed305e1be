//! Spreadsheet workbook parsing with engine and sheet fallbacks.
//!
//! Order of operations:
//!
//! 1. Structural check: open the container and list the declared sheets.
//! 2. Each engine of [`Engine::ordered_for`] reads the first sheet.
//! 3. If every engine failed, each declared sheet is tried by name with the
//!    first engine.
//!
//! The first attempt that yields a table wins. The attempt lists are fixed,
//! so a broken file costs at most `engines + sheets` reads.

use calamine::{open_workbook_auto_from_rs, Data, DataType, Range, Reader, Xls, Xlsx};
use chrono::NaiveDateTime;
use std::fmt;
use std::io::Cursor;

use super::FileKind;
use crate::api::logs::{log_info_indent, log_success_indent, log_warning_indent};
use crate::error::{ParseError, ParseResult};
use crate::models::{unique_column_names, Table, Value};

type Source<'a> = Cursor<&'a [u8]>;

/// A workbook decoding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Office Open XML reader (`.xlsx`, `.xlsm`).
    OpenXml,
    /// Legacy BIFF reader (`.xls`).
    LegacyBiff,
    /// Format sniffing reader that tries every supported format in turn.
    AutoDetect,
}

impl Engine {
    /// Engines to try, in order, for a declared file kind.
    pub fn ordered_for(kind: FileKind) -> &'static [Engine] {
        match kind {
            FileKind::Xls => &[Engine::LegacyBiff, Engine::AutoDetect, Engine::OpenXml],
            _ => &[Engine::OpenXml, Engine::AutoDetect, Engine::LegacyBiff],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Engine::OpenXml => "openxml",
            Engine::LegacyBiff => "biff",
            Engine::AutoDetect => "auto",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A successful workbook read and the strategy that produced it.
#[derive(Debug, Clone)]
pub struct WorkbookRead {
    pub table: Table,
    pub engine: Engine,
    /// Sheet read by name, `None` when the first sheet was read.
    pub sheet: Option<String>,
    /// Attempts made, the successful one included.
    pub attempts: usize,
}

/// Parse a workbook, trying every engine and then every sheet.
pub fn parse_workbook(bytes: &[u8], kind: FileKind) -> ParseResult<Table> {
    read_workbook(bytes, kind).map(|read| read.table)
}

/// Like [`parse_workbook`], but also reports which strategy won.
pub fn read_workbook(bytes: &[u8], kind: FileKind) -> ParseResult<WorkbookRead> {
    let sheet_names = inspect_workbook(bytes, kind)?;
    log_info_indent(format!("Sheets: {}", sheet_names.join(", ")), 1);

    let engines = Engine::ordered_for(kind);
    let mut attempts = 0;

    for &engine in engines {
        attempts += 1;
        match read_with(engine, bytes, None).and_then(|range| range_to_table(&range)) {
            Ok(table) => {
                log_success_indent(format!("Read with engine {}", engine), 1);
                return Ok(WorkbookRead {
                    table,
                    engine,
                    sheet: None,
                    attempts,
                });
            }
            Err(e) => log_warning_indent(format!("Engine {} failed: {}", engine, e), 1),
        }
    }

    let first = engines[0];
    for name in &sheet_names {
        attempts += 1;
        match read_with(first, bytes, Some(name)).and_then(|range| range_to_table(&range)) {
            Ok(table) => {
                log_success_indent(format!("Read sheet '{}' with engine {}", name, first), 1);
                return Ok(WorkbookRead {
                    table,
                    engine: first,
                    sheet: Some(name.clone()),
                    attempts,
                });
            }
            Err(e) => log_warning_indent(format!("Sheet '{}' failed: {}", name, e), 1),
        }
    }

    Err(ParseError::UnreadableWorkbook { attempts })
}

/// Structural validity check: open the container and enumerate its sheets.
///
/// A declared `.xls` is first opened as a legacy compound document; when that
/// fails the bytes are checked as an Open XML package, since workbooks saved
/// with the wrong extension are common.
pub fn inspect_workbook(bytes: &[u8], kind: FileKind) -> ParseResult<Vec<String>> {
    let sheet_names = match kind {
        FileKind::Xls => match Xls::new(Cursor::new(bytes)) {
            Ok(workbook) => workbook.sheet_names().to_vec(),
            Err(legacy) => open_xml_sheets(bytes).map_err(|_| {
                ParseError::CorruptArchive(format!("not a legacy workbook: {}", legacy))
            })?,
        },
        _ => open_xml_sheets(bytes)?,
    };

    if sheet_names.is_empty() {
        return Err(ParseError::NoSheets);
    }
    Ok(sheet_names)
}

fn open_xml_sheets(bytes: &[u8]) -> ParseResult<Vec<String>> {
    zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ParseError::CorruptArchive(e.to_string()))?;
    let workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| ParseError::CorruptArchive(format!("not a workbook: {}", e)))?;
    Ok(workbook.sheet_names().to_vec())
}

fn read_with(engine: Engine, bytes: &[u8], sheet: Option<&str>) -> Result<Range<Data>, String> {
    let source = Cursor::new(bytes);
    match engine {
        Engine::OpenXml => read_range(Xlsx::new(source), sheet),
        Engine::LegacyBiff => read_range(Xls::new(source), sheet),
        Engine::AutoDetect => read_range(open_workbook_auto_from_rs(source), sheet),
    }
}

fn read_range<'a, R>(opened: Result<R, R::Error>, sheet: Option<&str>) -> Result<Range<Data>, String>
where
    R: Reader<Source<'a>>,
    R::Error: fmt::Display,
{
    let mut workbook = opened.map_err(|e| e.to_string())?;
    match sheet {
        Some(name) => workbook.worksheet_range(name).map_err(|e| e.to_string()),
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| "workbook has no worksheet".to_string())?
            .map_err(|e| e.to_string()),
    }
}

/// Convert a sheet range into a table, first row as header.
fn range_to_table(range: &Range<Data>) -> Result<Table, String> {
    let mut rows = range.rows();
    let header = rows.next().ok_or_else(|| "sheet is empty".to_string())?;

    let names: Vec<String> = header.iter().map(header_text).collect();
    if names.iter().all(|n| n.is_empty()) {
        return Err("sheet has no header".to_string());
    }
    let names = names
        .into_iter()
        .enumerate()
        .map(|(i, n)| if n.is_empty() { format!("Unnamed: {}", i) } else { n })
        .collect();
    let columns = unique_column_names(names);

    let mut data: Vec<Vec<Value>> = rows
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|row| row.iter().map(cell_value).collect())
        .collect();

    integral_floats_to_ints(&mut data, columns.len());
    Ok(Table::from_rows(columns, data))
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Str(s.clone()),
        Data::DateTime(_) => cell.as_datetime().map(Value::DateTime).unwrap_or(Value::Null),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(Value::DateTime)
            .unwrap_or_else(|_| Value::Str(s.clone())),
        Data::DurationIso(s) => Value::Str(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

/// Workbooks store every number as a float; columns holding only whole
/// numbers are turned back into integers.
fn integral_floats_to_ints(rows: &mut [Vec<Value>], width: usize) {
    for idx in 0..width {
        let integral = rows.iter().all(|row| match row.get(idx) {
            Some(Value::Float(f)) => f.fract() == 0.0 && f.abs() < 9.0e15,
            Some(Value::Int(_)) | Some(Value::Null) | None => true,
            _ => false,
        });
        if !integral {
            continue;
        }
        for row in rows.iter_mut() {
            if let Some(cell) = row.get_mut(idx) {
                if let Value::Float(f) = *cell {
                    *cell = Value::Int(f as i64);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{build_xlsx, build_xlsx_without_sheets};
    use super::*;

    #[test]
    fn test_reads_first_sheet() {
        let bytes = build_xlsx(&[(
            "Products",
            vec![
                vec!["item_id", "description", "price"],
                vec!["1", "apple", "0.5"],
                vec!["2", "pear", "0.75"],
            ],
        )]);

        let table = parse_workbook(&bytes, FileKind::Xlsx).unwrap();

        assert_eq!(table.columns(), &["item_id", "description", "price"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get(0, "item_id"), Some(&Value::Int(1)));
        assert_eq!(table.get(1, "description"), Some(&Value::from("pear")));
        assert_eq!(table.get(1, "price"), Some(&Value::Float(0.75)));
    }

    #[test]
    fn test_falls_back_to_later_sheet() {
        // The first sheet has no header, so every engine fails on it and the
        // named-sheet pass picks up the second one.
        let bytes = build_xlsx(&[
            ("Cover", vec![]),
            ("Data", vec![vec!["week", "units"], vec!["1", "3"]]),
        ]);

        let table = parse_workbook(&bytes, FileKind::Xlsx).unwrap();
        assert_eq!(table.columns(), &["week", "units"]);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_not_a_zip_is_corrupt_archive() {
        let err = parse_workbook(b"definitely not a zip", FileKind::Xlsx).unwrap_err();
        assert!(matches!(err, ParseError::CorruptArchive(_)));
    }

    #[test]
    fn test_garbage_xls_is_corrupt_archive() {
        let err = parse_workbook(b"\x00\x01garbage", FileKind::Xls).unwrap_err();
        assert_eq!(err.kind(), "CorruptArchiveError");
    }

    #[test]
    fn test_workbook_without_sheets() {
        let err = parse_workbook(&build_xlsx_without_sheets(), FileKind::Xlsx).unwrap_err();
        assert!(matches!(err, ParseError::NoSheets));
    }

    #[test]
    fn test_all_sheets_empty_is_unreadable() {
        let bytes = build_xlsx(&[("A", vec![]), ("B", vec![])]);
        let err = parse_workbook(&bytes, FileKind::Xlsx).unwrap_err();
        // three engines plus two named sheets
        assert!(matches!(err, ParseError::UnreadableWorkbook { attempts: 5 }));
    }

    #[test]
    fn test_open_xml_saved_as_xls_uses_later_engine() {
        let bytes = build_xlsx(&[(
            "S",
            vec![vec!["item_id", "description"], vec!["1", "apple"]],
        )]);

        let read = read_workbook(&bytes, FileKind::Xls).unwrap();

        // the legacy reader rejects the package, auto-detection reads it
        assert_eq!(read.engine, Engine::AutoDetect);
        assert_eq!(read.attempts, 2);
        assert_eq!(read.sheet, None);
        assert_eq!(read.table.get(0, "description"), Some(&Value::from("apple")));
    }

    #[test]
    fn test_first_engine_wins_for_xlsx() {
        let bytes = build_xlsx(&[("S", vec![vec!["week"], vec!["1"]])]);
        let read = read_workbook(&bytes, FileKind::Xlsx).unwrap();
        assert_eq!(read.engine, Engine::OpenXml);
        assert_eq!(read.attempts, 1);
    }

    #[test]
    fn test_engine_order() {
        assert_eq!(Engine::ordered_for(FileKind::Xlsx)[0], Engine::OpenXml);
        assert_eq!(Engine::ordered_for(FileKind::Xls)[0], Engine::LegacyBiff);
        assert_eq!(Engine::ordered_for(FileKind::Xlsx)[1], Engine::AutoDetect);
    }
}
