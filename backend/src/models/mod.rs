//! Domain models for the salesdiff pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`Value`] - A single typed cell (string, integer, float, boolean, date/time, null)
//! - [`Table`] - Ordered columns plus rows aligned to them
//! - [`Role`] - Semantic role of an uploaded file (fact or one of the dimensions)
//! - [`SourceTable`] - A parsed table with its provenance
//! - [`columns`] - The fixed retail column names the pipeline works with

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Format used whenever a date/time cell is rendered as text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Fixed retail schema
// =============================================================================

/// Column names the transform stages rely on.
pub mod columns {
    /// Item identifier, the fact table's join key.
    pub const ITEM_ID: &str = "item_id";
    pub const CATEGORY: &str = "category";
    /// Store format, paired with [`CATEGORY`] to key the segment dimension.
    pub const FORMAT: &str = "format";
    pub const WEEK: &str = "week";
    /// Optional week start date; preferred over [`WEEK`] when parsing dates.
    pub const WEEK_START: &str = "week_start";
    pub const DESCRIPTION: &str = "description";
    pub const SALES_AMOUNT: &str = "sales_amount";
    pub const UNITS: &str = "units";

    pub const WEEK_DATE: &str = "week_date";
    pub const DESCRIPTION_UPPER: &str = "description_upper";
    pub const REVENUE: &str = "revenue";
    pub const REVENUE_PER_UNIT: &str = "revenue_per_unit";
    pub const YEAR: &str = "year";
    pub const QUARTER: &str = "quarter";
    pub const QUARTER_REVENUE: &str = "quarter_revenue";
    pub const Q4_TREND: &str = "q4_trend";
}

// =============================================================================
// Cell values
// =============================================================================

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(NaiveDateTime),
}

/// Hashable identity of a cell, used for duplicate detection.
///
/// Floats compare by bit pattern, which is what exact-duplicate removal needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell. Strings are not coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Normalized key used to match rows across tables.
    ///
    /// Integers and integral floats normalize to the same text so that an
    /// `item_id` read as `7` from a CSV matches `7.0` read from a workbook.
    /// Null never yields a key, so null keys never match.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if !f.is_finite() => None,
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                Some((*f as i64).to_string())
            }
            Value::Float(f) => Some(f.to_string()),
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::DateTime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
        }
    }

    pub fn cell_key(&self) -> CellKey {
        match self {
            Value::Null => CellKey::Null,
            Value::Bool(b) => CellKey::Bool(*b),
            Value::Int(i) => CellKey::Int(*i),
            Value::Float(f) => CellKey::Float(f.to_bits()),
            Value::Str(s) => CellKey::Str(s.clone()),
            Value::DateTime(dt) => CellKey::DateTime(*dt),
        }
    }

    /// JSON rendering used by the record-lines export and API previews.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) if v.is_finite() => write!(f, "{}", v),
            Value::Float(_) => Ok(()),
            Value::Str(s) => f.write_str(s),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Table
// =============================================================================

/// Two-dimensional dataset with ordered, uniquely named columns.
///
/// Rows are positional and always exactly as wide as `columns`; every
/// constructor pads short rows with [`Value::Null`] and truncates long ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "TableRepr")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct TableRepr {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl From<TableRepr> for Table {
    fn from(repr: TableRepr) -> Self {
        Table::from_rows(repr.columns, repr.rows)
    }
}

impl Table {
    /// Empty table with the given header.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Cell lookup by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|r| r.get(idx)).collect())
    }

    /// Add a column, or overwrite it in place if it already exists.
    ///
    /// `values` shorter than the row count leave the remaining rows null.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        let mut values = values.into_iter();
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    if let Some(cell) = row.get_mut(idx) {
                        *cell = values.next().unwrap_or_default();
                    }
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(values.next().unwrap_or_default());
                }
            }
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    /// Null count per column, in column order.
    pub fn null_counts(&self) -> Vec<(String, usize)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let nulls = self
                    .rows
                    .iter()
                    .filter(|r| r.get(idx).map_or(true, Value::is_null))
                    .count();
                (name.clone(), nulls)
            })
            .collect()
    }

    /// First `n` rows as a new table.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(c, v)| (c.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

/// Make header names unique the way spreadsheet tools do: `a`, `a.1`, `a.2`.
pub fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        while seen.contains_key(&candidate) {
            let n = seen.entry(name.clone()).or_insert(0);
            *n += 1;
            candidate = format!("{}.{}", name, n);
        }
        seen.insert(candidate.clone(), 0);
        out.push(candidate);
    }
    out
}

// =============================================================================
// Roles
// =============================================================================

/// Semantic role of an uploaded file, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Fact,
    ProductDimension,
    CategoryDimension,
    SegmentDimension,
    CalendarDimension,
    Unclassified,
}

impl Role {
    /// Roles in classification priority order.
    pub const CLASSIFIED: [Role; 5] = [
        Role::Fact,
        Role::ProductDimension,
        Role::CategoryDimension,
        Role::SegmentDimension,
        Role::CalendarDimension,
    ];

    /// Filename keyword that selects this role (matched case-insensitively).
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Role::Fact => Some("FACT_SALES"),
            Role::ProductDimension => Some("DIM_PRODUCT"),
            Role::CategoryDimension => Some("DIM_CATEGORY"),
            Role::SegmentDimension => Some("DIM_SEGMENT"),
            Role::CalendarDimension => Some("DIM_CALENDAR"),
            Role::Unclassified => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Fact => "fact",
            Role::ProductDimension => "product-dimension",
            Role::CategoryDimension => "category-dimension",
            Role::SegmentDimension => "segment-dimension",
            Role::CalendarDimension => "calendar-dimension",
            Role::Unclassified => "unclassified",
        }
    }

    /// Short name, used to suffix colliding columns after a join.
    pub fn short_name(self) -> &'static str {
        match self {
            Role::Fact => "fact",
            Role::ProductDimension => "product",
            Role::CategoryDimension => "category",
            Role::SegmentDimension => "segment",
            Role::CalendarDimension => "calendar",
            Role::Unclassified => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Source tables
// =============================================================================

/// A successfully parsed upload with its provenance.
///
/// Files that failed to parse never become a `SourceTable`; their failure
/// lives in the ingestion report instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTable {
    /// Filename as submitted.
    pub original_name: String,
    /// Sanitized filename used for storage and duplicate detection.
    pub stored_name: String,
    pub role: Role,
    pub table: Table,
}

impl SourceTable {
    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        self.stored_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.stored_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rows_are_padded_and_truncated() {
        let table = Table::from_rows(
            cols(&["a", "b"]),
            vec![vec![Value::Int(1)], vec![Value::Int(1), Value::Int(2), Value::Int(3)]],
        );

        assert_eq!(table.rows()[0], vec![Value::Int(1), Value::Null]);
        assert_eq!(table.rows()[1].len(), 2);
    }

    #[test]
    fn test_set_column_overwrites_in_place() {
        let mut table = Table::from_rows(cols(&["a", "b"]), vec![vec![Value::Int(1), Value::Int(2)]]);
        table.set_column("a", vec![Value::from("x")]);
        table.set_column("c", vec![]);

        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(table.get(0, "a"), Some(&Value::from("x")));
        assert_eq!(table.get(0, "c"), Some(&Value::Null));
    }

    #[test]
    fn test_join_key_normalizes_integral_floats() {
        assert_eq!(Value::Int(7).join_key(), Value::Float(7.0).join_key());
        assert_eq!(Value::from("  A1 ").join_key().as_deref(), Some("A1"));
        assert_eq!(Value::Null.join_key(), None);
        assert_eq!(Value::from("").join_key(), None);
    }

    #[test]
    fn test_null_counts() {
        let table = Table::from_rows(
            cols(&["a", "b"]),
            vec![vec![Value::Null, Value::Int(1)], vec![Value::Null, Value::Null]],
        );

        assert_eq!(
            table.null_counts(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn test_unique_column_names() {
        let names = unique_column_names(cols(&["a", "b", "a", "a", "a.1"]));
        assert_eq!(names, vec!["a", "b", "a.1", "a.2", "a.1.1"]);
    }

    #[test]
    fn test_role_serializes_kebab_case() {
        let json = serde_json::to_string(&Role::ProductDimension).unwrap();
        assert_eq!(json, "\"product-dimension\"");
        assert_eq!(Role::Fact.keyword(), Some("FACT_SALES"));
        assert!(Role::Unclassified.keyword().is_none());
    }

    #[test]
    fn test_table_deserialization_restores_row_width() {
        let json = r#"{"columns":["a","b"],"rows":[[{"type":"int","value":1}]]}"#;
        let table: Table = serde_json::from_str(json).unwrap();
        assert_eq!(table.rows()[0], vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_stem() {
        let source = SourceTable {
            original_name: "DIM PRODUCT.xlsx".into(),
            stored_name: "DIM_PRODUCT.xlsx".into(),
            role: Role::ProductDimension,
            table: Table::default(),
        };
        assert_eq!(source.stem(), "DIM_PRODUCT");
    }
}
