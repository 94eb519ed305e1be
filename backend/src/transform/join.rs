//! `joined` stage: best-effort left joins against the dimension tables.
//!
//! The plan is fixed: product on `item_id`, category on `category`, segment
//! on `category` + `format`, calendar on `week`. A step whose dimension is
//! absent, or whose key columns are missing on either side, is skipped and
//! reported; the next step continues from the best table so far.

use serde::Serialize;
use std::collections::HashMap;

use super::{Stage, StageWarning};
use crate::api::logs::{log_success_indent, log_warning_indent};
use crate::models::{columns, unique_column_names, Role, Table, Value};
use crate::registry::RoleMap;

/// One planned join.
#[derive(Debug, Clone, Copy)]
pub struct JoinSpec {
    pub dimension: Role,
    pub keys: &'static [&'static str],
}

/// Join steps in execution order.
pub const JOIN_PLAN: [JoinSpec; 4] = [
    JoinSpec {
        dimension: Role::ProductDimension,
        keys: &[columns::ITEM_ID],
    },
    JoinSpec {
        dimension: Role::CategoryDimension,
        keys: &[columns::CATEGORY],
    },
    JoinSpec {
        dimension: Role::SegmentDimension,
        keys: &[columns::CATEGORY, columns::FORMAT],
    },
    JoinSpec {
        dimension: Role::CalendarDimension,
        keys: &[columns::WEEK],
    },
];

/// What happened to one join step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JoinOutcome {
    #[serde(rename_all = "camelCase")]
    Applied {
        source: String,
        matched_rows: usize,
        rows_after: usize,
    },
    Skipped {
        reason: String,
    },
}

/// Report for one join step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub dimension: Role,
    pub keys: Vec<String>,
    #[serde(flatten)]
    pub outcome: JoinOutcome,
}

impl JoinStep {
    pub fn applied(&self) -> bool {
        matches!(self.outcome, JoinOutcome::Applied { .. })
    }
}

/// Result of running the whole join plan.
#[derive(Debug, Clone)]
pub struct JoinOutput {
    pub table: Table,
    pub steps: Vec<JoinStep>,
    pub warnings: Vec<StageWarning>,
}

/// Run every step of [`JOIN_PLAN`] against `cleaned`.
pub fn join_dimensions(cleaned: &Table, roles: &RoleMap) -> JoinOutput {
    let mut current = cleaned.clone();
    let mut steps = Vec::with_capacity(JOIN_PLAN.len());
    let mut warnings = Vec::new();

    for spec in JOIN_PLAN {
        let keys: Vec<String> = spec.keys.iter().map(|k| k.to_string()).collect();
        let skip = |reason: String, warnings: &mut Vec<StageWarning>| {
            log_warning_indent(format!("Skipping {} join: {}", spec.dimension, reason), 1);
            warnings.push(StageWarning::missing_dimension(
                Stage::Joined,
                format!("{} join skipped: {}", spec.dimension, reason),
            ));
            JoinStep {
                dimension: spec.dimension,
                keys: keys.clone(),
                outcome: JoinOutcome::Skipped { reason },
            }
        };

        let Some(source) = roles.get(spec.dimension) else {
            steps.push(skip("no table classified for this role".to_string(), &mut warnings));
            continue;
        };

        let missing: Vec<String> = spec
            .keys
            .iter()
            .filter(|k| !current.has_column(k) || !source.table.has_column(k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            let reason = format!("key column(s) missing on one side: {}", missing.join(", "));
            steps.push(skip(reason, &mut warnings));
            continue;
        }

        let (joined, matched_rows) =
            left_join(&current, &source.table, spec.keys, spec.dimension.short_name());
        log_success_indent(
            format!(
                "Joined {} ({}): {} of {} rows matched",
                spec.dimension,
                source.stored_name,
                matched_rows,
                current.row_count()
            ),
            1,
        );
        steps.push(JoinStep {
            dimension: spec.dimension,
            keys,
            outcome: JoinOutcome::Applied {
                source: source.stored_name.clone(),
                matched_rows,
                rows_after: joined.row_count(),
            },
        });
        current = joined;
    }

    JoinOutput {
        table: current,
        steps,
        warnings,
    }
}

/// Relational left join on equal, non-null keys.
///
/// Every left row survives. A left row with several matches on the right is
/// repeated once per match. Right key columns are dropped; other right
/// columns that collide with a left column are suffixed with `_<suffix>`.
/// Returns the joined table and the number of left rows that matched.
pub fn left_join(left: &Table, right: &Table, keys: &[&str], suffix: &str) -> (Table, usize) {
    let left_keys: Vec<usize> = keys.iter().filter_map(|k| left.column_index(k)).collect();
    let right_keys: Vec<usize> = keys.iter().filter_map(|k| right.column_index(k)).collect();
    if left_keys.len() != keys.len() || right_keys.len() != keys.len() {
        return (left.clone(), 0);
    }

    let extra: Vec<usize> = (0..right.column_count())
        .filter(|i| !right_keys.contains(i))
        .collect();

    let mut names = left.columns().to_vec();
    for &i in &extra {
        let name = &right.columns()[i];
        if left.has_column(name) {
            names.push(format!("{}_{}", name, suffix));
        } else {
            names.push(name.clone());
        }
    }
    let names = unique_column_names(names);

    let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (row_idx, row) in right.rows().iter().enumerate() {
        if let Some(key) = row_key(row, &right_keys) {
            index.entry(key).or_default().push(row_idx);
        }
    }

    let mut rows = Vec::with_capacity(left.row_count());
    let mut matched_rows = 0;
    for row in left.rows() {
        let matches = row_key(row, &left_keys).and_then(|k| index.get(&k));
        match matches {
            Some(hits) => {
                matched_rows += 1;
                for &hit in hits {
                    let right_row = &right.rows()[hit];
                    let mut out = row.clone();
                    out.extend(extra.iter().map(|&i| right_row[i].clone()));
                    rows.push(out);
                }
            }
            None => {
                let mut out = row.clone();
                out.extend(std::iter::repeat(Value::Null).take(extra.len()));
                rows.push(out);
            }
        }
    }

    (Table::from_rows(names, rows), matched_rows)
}

fn row_key(row: &[Value], idx: &[usize]) -> Option<Vec<String>> {
    idx.iter()
        .map(|&i| row.get(i).and_then(Value::join_key))
        .collect()
}
