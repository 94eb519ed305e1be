//! Report notebook (`.ipynb`, nbformat 4) shipped inside bundles.
//!
//! The notebook summarizes one stage computation and loads the bundled CSV
//! for further analysis. Cell ids are positional so that only the
//! generation timestamp differs between two reports of the same data.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::models::columns;
use crate::transform::{JoinOutcome, StageOutput};

/// Build the report notebook for a stage output exported as `<name>.csv`.
pub fn report_notebook(name: &str, output: &StageOutput, generated_at: DateTime<Utc>) -> Value {
    let mut cells = vec![
        markdown(&[
            format!("# Sales report: {}", name),
            String::new(),
            format!(
                "Stage **{}** (compared against **{}**), generated {}.",
                output.stage,
                output.before_stage,
                generated_at.to_rfc3339()
            ),
        ]),
        markdown(&summary_lines(output)),
    ];

    if !output.join_steps.is_empty() {
        cells.push(markdown(&join_lines(output)));
    }
    if !output.warnings.is_empty() {
        let mut lines = vec!["## Warnings".to_string(), String::new()];
        lines.extend(
            output
                .warnings
                .iter()
                .map(|w| format!("- `{}` {}", w.kind, w.message)),
        );
        cells.push(markdown(&lines));
    }

    cells.push(code(&[
        "import pandas as pd".to_string(),
        String::new(),
        format!("df = pd.read_csv(\"{}.csv\")", name),
        "df.head()".to_string(),
    ]));

    let has = |c: &str| output.after.has_column(c);
    if has(columns::YEAR) && has(columns::QUARTER) && has(columns::REVENUE) {
        cells.push(code(&[format!(
            "df.groupby([\"{}\", \"{}\"])[\"{}\"].sum().unstack()",
            columns::YEAR,
            columns::QUARTER,
            columns::REVENUE
        )]));
    }

    for (i, cell) in cells.iter_mut().enumerate() {
        cell["id"] = json!(format!("cell-{}", i));
    }

    json!({
        "nbformat": 4,
        "nbformat_minor": 5,
        "metadata": {
            "kernelspec": {
                "name": "python3",
                "display_name": "Python 3",
                "language": "python"
            },
            "language_info": { "name": "python" }
        },
        "cells": cells
    })
}

fn summary_lines(output: &StageOutput) -> Vec<String> {
    let mut lines = vec![
        "## Summary".to_string(),
        String::new(),
        "| | |".to_string(),
        "|---|---|".to_string(),
        format!("| Rows before | {} |", output.before.row_count()),
        format!("| Rows after | {} |", output.after.row_count()),
        format!("| Columns | {} |", output.after.column_count()),
    ];
    if let Some(rate) = output.match_rate {
        lines.push(format!("| Match rate | {:.1}% |", rate));
    }
    lines
}

fn join_lines(output: &StageOutput) -> Vec<String> {
    let mut lines = vec!["## Joins".to_string(), String::new()];
    for step in &output.join_steps {
        let line = match &step.outcome {
            JoinOutcome::Applied {
                source,
                matched_rows,
                rows_after,
            } => format!(
                "- {} on `{}`: {} ({} rows matched, {} rows after)",
                step.dimension,
                step.keys.join("`, `"),
                source,
                matched_rows,
                rows_after
            ),
            JoinOutcome::Skipped { reason } => {
                format!("- {} skipped: {}", step.dimension, reason)
            }
        };
        lines.push(line);
    }
    lines
}

/// nbformat stores sources as lines, each but the last ending in `\n`.
fn source(lines: &[String]) -> Value {
    let last = lines.len().saturating_sub(1);
    let source: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| if i < last { format!("{}\n", l) } else { l.clone() })
        .collect();
    json!(source)
}

fn markdown(lines: &[String]) -> Value {
    json!({
        "cell_type": "markdown",
        "metadata": {},
        "source": source(lines)
    })
}

fn code(lines: &[String]) -> Value {
    json!({
        "cell_type": "code",
        "execution_count": null,
        "metadata": {},
        "outputs": [],
        "source": source(lines)
    })
}
