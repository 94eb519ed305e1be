//! `cleaned` stage: drop rows without an item id, then exact duplicates.

use std::collections::HashSet;

use super::{StageWarning, Stage};
use crate::models::{columns, CellKey, Table};

/// Apply the cleaning rules to the raw fact table.
///
/// Row order is preserved; the first occurrence of a duplicate is kept.
pub fn clean(raw: &Table) -> (Table, Vec<StageWarning>) {
    let mut warnings = Vec::new();
    let mut table = raw.clone();

    match table.column_index(columns::ITEM_ID) {
        Some(idx) => table.retain_rows(|row| row.get(idx).map_or(false, |v| !v.is_null())),
        None => warnings.push(StageWarning::missing_column(
            Stage::Cleaned,
            format!(
                "Fact table has no '{}' column; null-key filter skipped",
                columns::ITEM_ID
            ),
        )),
    }

    let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(table.row_count());
    table.retain_rows(|row| seen.insert(row.iter().map(|v| v.cell_key()).collect()));

    (table, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    fn table(cols: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table::from_rows(cols.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_drops_null_keys_and_duplicates() {
        let raw = table(
            &["item_id", "units"],
            vec![
                vec![Value::Int(1), Value::Int(3)],
                vec![Value::Null, Value::Int(4)],
                vec![Value::Int(1), Value::Int(3)],
                vec![Value::Int(2), Value::Int(3)],
            ],
        );

        let (cleaned, warnings) = clean(&raw);

        assert!(warnings.is_empty());
        assert_eq!(
            cleaned.rows(),
            &[
                vec![Value::Int(1), Value::Int(3)],
                vec![Value::Int(2), Value::Int(3)],
            ]
        );
        assert!(cleaned.row_count() <= raw.row_count());
    }

    #[test]
    fn test_missing_key_column_only_deduplicates() {
        let raw = table(
            &["units"],
            vec![vec![Value::Int(1)], vec![Value::Int(1)], vec![Value::Null]],
        );

        let (cleaned, warnings) = clean(&raw);

        assert_eq!(cleaned.row_count(), 2);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_float_duplicates_compare_exactly() {
        let raw = table(
            &["item_id", "price"],
            vec![
                vec![Value::Int(1), Value::Float(0.1 + 0.2)],
                vec![Value::Int(1), Value::Float(0.3)],
            ],
        );

        let (cleaned, _) = clean(&raw);
        assert_eq!(cleaned.row_count(), 2);
    }
}
