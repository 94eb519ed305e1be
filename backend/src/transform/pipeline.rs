//! High-level stage API.
//!
//! Every request recomputes from the fact table as parsed: nothing is cached
//! between stages or between requests, so the same inputs always produce the
//! same output.
//!
//! # Example
//!
//! ```rust,ignore
//! use salesdiff::transform::compute_named;
//!
//! let output = compute_named(&roles, "joined")?;
//! println!("{} rows, {:?}% matched", output.after.row_count(), output.match_rate);
//! ```

use super::{clean, derive, join_dimensions, JoinStep, Stage, StageWarning};
use crate::api::logs::{log_info, log_success, log_warning};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{columns, Table};
use crate::registry::RoleMap;

/// Result of computing one stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: Stage,
    pub before_stage: Stage,
    /// Output of the preceding stage (`raw` for `raw` itself).
    pub before: Table,
    pub after: Table,
    /// Row count of `cleaned`, the match-rate denominator.
    pub cleaned_rows: usize,
    /// Percentage of result rows with a non-null `item_id`; `joined` and
    /// `derived` only.
    pub match_rate: Option<f64>,
    pub warnings: Vec<StageWarning>,
    pub join_steps: Vec<JoinStep>,
}

/// Resolve a stage by name; unknown names fall back to `raw`.
pub fn resolve_stage(name: &str) -> Stage {
    match name.parse::<Stage>() {
        Ok(stage) => stage,
        Err(e) => {
            log_warning(e.to_string());
            Stage::Raw
        }
    }
}

/// [`compute`] for a stage given by name.
pub fn compute_named(roles: &RoleMap, name: &str) -> PipelineResult<StageOutput> {
    compute(roles, resolve_stage(name))
}

/// Compute `stage` from scratch for the session's classified tables.
pub fn compute(roles: &RoleMap, stage: Stage) -> PipelineResult<StageOutput> {
    let fact = roles.fact().ok_or(PipelineError::MissingFactTable)?;
    log_info(format!("Computing stage '{}' from {}", stage, fact.stored_name));

    let raw = fact.table.clone();
    let mut warnings = Vec::new();

    if stage == Stage::Raw {
        return Ok(finish(stage, raw.clone(), raw, 0, warnings, Vec::new()));
    }

    let (cleaned, clean_warnings) = clean(&raw);
    warnings.extend(clean_warnings);
    let cleaned_rows = cleaned.row_count();
    log_success(format!(
        "Cleaned: {} → {} rows",
        raw.row_count(),
        cleaned_rows
    ));

    if stage == Stage::Cleaned {
        return Ok(finish(stage, raw, cleaned, cleaned_rows, warnings, Vec::new()));
    }

    let joined = join_dimensions(&cleaned, roles);
    warnings.extend(joined.warnings);
    log_success(format!(
        "Joined: {} of {} dimension(s) applied, {} rows",
        joined.steps.iter().filter(|s| s.applied()).count(),
        joined.steps.len(),
        joined.table.row_count()
    ));

    if stage == Stage::Joined {
        return Ok(finish(
            stage,
            cleaned,
            joined.table,
            cleaned_rows,
            warnings,
            joined.steps,
        ));
    }

    let (derived, derive_warnings) = derive(&joined.table);
    warnings.extend(derive_warnings);
    log_success(format!("Derived: {} columns", derived.column_count()));

    Ok(finish(
        stage,
        joined.table,
        derived,
        cleaned_rows,
        warnings,
        joined.steps,
    ))
}

fn finish(
    stage: Stage,
    before: Table,
    after: Table,
    cleaned_rows: usize,
    warnings: Vec<StageWarning>,
    join_steps: Vec<JoinStep>,
) -> StageOutput {
    let match_rate = stage
        .reports_match_rate()
        .then(|| match_rate(&after, cleaned_rows));
    if !warnings.is_empty() {
        log_warning(format!("Stage '{}' finished with {} warning(s)", stage, warnings.len()));
    }
    StageOutput {
        stage,
        before_stage: stage.previous(),
        before,
        after,
        cleaned_rows,
        match_rate,
        warnings,
        join_steps,
    }
}

/// Rows with a non-null `item_id` as a percentage of `cleaned_rows`.
///
/// Zero when there is nothing to compare against. Fan-out can push the value
/// above 100.
pub fn match_rate(table: &Table, cleaned_rows: usize) -> f64 {
    if cleaned_rows == 0 {
        return 0.0;
    }
    let keyed = table
        .column_values(columns::ITEM_ID)
        .map(|values| values.into_iter().filter(|v| !v.is_null()).count())
        .unwrap_or(0);
    keyed as f64 / cleaned_rows as f64 * 100.0
}
