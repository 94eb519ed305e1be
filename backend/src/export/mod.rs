//! Export packager: tables → bytes.
//!
//! - [`serialize`] - one table as delimited text or record lines
//! - [`bundle`] - a ZIP with the primary table in both encodings, the report
//!   notebook and every additional table as CSV
//!
//! Output is a function of the input only: column order is kept, archive
//! entries carry a fixed timestamp, and no map with unstable order is
//! involved.

pub mod notebook;

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::io::{Cursor, Write};
use std::str::FromStr;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::api::logs::log_success;
use crate::error::{ExportError, ExportResult};
use crate::models::{unique_column_names, SourceTable, Table, Value};
use crate::registry::RoleMap;
use crate::transform::StageOutput;

pub use notebook::report_notebook;

/// Output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Comma-delimited text with a header row.
    #[default]
    Csv,
    /// One JSON object per line, keys in column order.
    JsonLines,
}

impl Encoding {
    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Csv => "csv",
            Encoding::JsonLines => "jsonl",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Csv => "text/csv; charset=utf-8",
            Encoding::JsonLines => "application/x-ndjson",
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Encoding::Csv),
            "jsonl" | "ndjson" | "json" => Ok(Encoding::JsonLines),
            other => Err(format!("Unknown export format '{}' (expected csv or jsonl)", other)),
        }
    }
}

/// Serialize a table.
pub fn serialize(table: &Table, encoding: Encoding) -> ExportResult<Vec<u8>> {
    match encoding {
        Encoding::Csv => to_csv(table),
        Encoding::JsonLines => to_json_lines(table),
    }
}

fn to_csv(table: &Table) -> ExportResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

fn to_json_lines(table: &Table) -> ExportResult<Vec<u8>> {
    let mut out = Vec::new();
    for row in table.rows() {
        serde_json::to_writer(
            &mut out,
            &Record {
                columns: table.columns(),
                row,
            },
        )?;
        out.push(b'\n');
    }
    Ok(out)
}

/// One row as a JSON object with keys in column order.
struct Record<'a> {
    columns: &'a [String],
    row: &'a [Value],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.row) {
            map.serialize_entry(column, &value.to_json())?;
        }
        map.end()
    }
}

/// Build a ZIP bundle.
///
/// Entries, in order: `<name>.csv`, `<name>.jsonl`, `<name>_report.ipynb`,
/// then `dimensions/<stem>.csv` for each additional table.
pub fn bundle(
    name: &str,
    primary: &Table,
    report: &serde_json::Value,
    additional: &[&SourceTable],
) -> ExportResult<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file(format!("{}.csv", name), options)?;
    zip.write_all(&serialize(primary, Encoding::Csv)?)?;

    zip.start_file(format!("{}.jsonl", name), options)?;
    zip.write_all(&serialize(primary, Encoding::JsonLines)?)?;

    zip.start_file(format!("{}_report.ipynb", name), options)?;
    zip.write_all(&serde_json::to_vec_pretty(report)?)?;

    let stems = unique_column_names(additional.iter().map(|t| t.stem().to_string()).collect());
    for (source, stem) in additional.iter().zip(stems) {
        zip.start_file(format!("dimensions/{}.csv", stem), options)?;
        zip.write_all(&serialize(&source.table, Encoding::Csv)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Base name for a stage export, e.g. `FACT_SALES_derived`.
pub fn export_name(roles: &RoleMap, output: &StageOutput) -> String {
    let stem = roles.fact().map(|f| f.stem()).unwrap_or("sales");
    format!("{}_{}", stem, output.stage)
}

/// Bundle a computed stage with every non-fact table of the session.
pub fn bundle_stage(
    roles: &RoleMap,
    output: &StageOutput,
    generated_at: DateTime<Utc>,
) -> ExportResult<Vec<u8>> {
    let name = export_name(roles, output);
    let report = report_notebook(&name, output, generated_at);
    let additional: Vec<&SourceTable> = roles.non_fact().collect();
    let bytes = bundle(&name, &output.after, &report, &additional)?;
    log_success(format!(
        "📦 Bundled {} ({} additional table(s), {} bytes)",
        name,
        additional.len(),
        bytes.len()
    ));
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::NaiveDate;
    use std::io::Read;

    fn table() -> Table {
        let dt = NaiveDate::from_ymd_opt(2023, 11, 6)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        Table::from_rows(
            vec!["zeta".into(), "alpha".into(), "when".into(), "note".into()],
            vec![
                vec![Value::Int(1), Value::Float(2.5), Value::DateTime(dt), "a, \"quoted\"".into()],
                vec![Value::Null, Value::Float(f64::NAN), Value::Null, Value::Bool(true)],
            ],
        )
    }

    fn source(name: &str, role: Role) -> SourceTable {
        SourceTable {
            original_name: name.to_string(),
            stored_name: name.to_string(),
            role,
            table: Table::from_rows(vec!["k".into()], vec![vec![Value::Int(1)]]),
        }
    }

    #[test]
    fn test_csv() {
        let bytes = serialize(&table(), Encoding::Csv).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "zeta,alpha,when,note\n1,2.5,2023-11-06 00:00:00,\"a, \"\"quoted\"\"\"\n,,,true\n"
        );
    }

    #[test]
    fn test_json_lines_keep_column_order() {
        let bytes = serialize(&table(), Encoding::JsonLines).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"zeta":1,"alpha":2.5,"when":"2023-11-06 00:00:00","note":"a, \"quoted\""}"#
        );
        assert_eq!(lines[1], r#"{"zeta":null,"alpha":null,"when":null,"note":true}"#);
    }

    #[test]
    fn test_json_lines_match_preview_records() {
        let t = table();
        let bytes = serialize(&t, Encoding::JsonLines).unwrap();
        let parsed: Vec<serde_json::Value> = String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed, t.to_records());
    }

    #[test]
    fn test_empty_table() {
        let empty = Table::new(vec!["a".into(), "b".into()]);
        assert_eq!(serialize(&empty, Encoding::Csv).unwrap(), b"a,b\n");
        assert!(serialize(&empty, Encoding::JsonLines).unwrap().is_empty());
    }

    #[test]
    fn test_serialization_is_idempotent() {
        let t = table();
        assert_eq!(
            serialize(&t, Encoding::JsonLines).unwrap(),
            serialize(&t, Encoding::JsonLines).unwrap()
        );
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("CSV".parse::<Encoding>().unwrap(), Encoding::Csv);
        assert_eq!("jsonl".parse::<Encoding>().unwrap(), Encoding::JsonLines);
        assert!("xml".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_bundle_entries() {
        let product = source("DIM_PRODUCT.xlsx", Role::ProductDimension);
        let notes = source("notes.csv", Role::Unclassified);
        let report = serde_json::json!({ "cells": [] });

        let bytes = bundle("FACT_SALES_joined", &table(), &report, &[&product, &notes]).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "FACT_SALES_joined.csv",
                "FACT_SALES_joined.jsonl",
                "FACT_SALES_joined_report.ipynb",
                "dimensions/DIM_PRODUCT.csv",
                "dimensions/notes.csv",
            ]
        );

        let mut csv = String::new();
        archive
            .by_name("dimensions/DIM_PRODUCT.csv")
            .unwrap()
            .read_to_string(&mut csv)
            .unwrap();
        assert_eq!(csv, "k\n1\n");
    }

    #[test]
    fn test_bundle_is_deterministic() {
        let report = serde_json::json!({ "cells": [] });
        let a = bundle("x", &table(), &report, &[]).unwrap();
        let b = bundle("x", &table(), &report, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_colliding_stems_get_suffixes() {
        let a = source("DIM_PRODUCT.csv", Role::ProductDimension);
        let b = source("DIM_PRODUCT.xlsx", Role::Unclassified);
        let bytes = bundle("x", &table(), &serde_json::json!({}), &[&a, &b]).unwrap();

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"dimensions/DIM_PRODUCT.csv"));
        assert!(names.contains(&"dimensions/DIM_PRODUCT.1.csv"));
    }
}
