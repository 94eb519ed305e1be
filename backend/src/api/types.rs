//! REST API types.
//!
//! Tables in responses are JSON record arrays truncated to a preview size;
//! full tables are only available through the export endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::transform::{JoinStep, Stage, StageOutput, StageWarning};

/// Response for a stage query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResponse {
    pub stage: Stage,
    pub before_stage: Stage,
    pub before_table: Vec<Value>,
    pub after_table: Vec<Value>,
    pub columns_before: Vec<String>,
    pub columns_after: Vec<String>,
    pub match_rate_percent: Option<f64>,
    pub row_count_before: usize,
    pub row_count_after: usize,
    pub warnings: Vec<StageWarning>,
    pub join_steps: Vec<JoinStep>,
}

impl StageResponse {
    pub fn from_output(output: StageOutput, preview_rows: usize) -> Self {
        StageResponse {
            stage: output.stage,
            before_stage: output.before_stage,
            before_table: output.before.head(preview_rows).to_records(),
            after_table: output.after.head(preview_rows).to_records(),
            columns_before: output.before.columns().to_vec(),
            columns_after: output.after.columns().to_vec(),
            match_rate_percent: output.match_rate.map(|r| (r * 100.0).round() / 100.0),
            row_count_before: output.before.row_count(),
            row_count_after: output.after.row_count(),
            warnings: output.warnings,
            join_steps: output.join_steps,
        }
    }
}

/// `?rows=` on stage queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageQuery {
    pub rows: Option<usize>,
}

/// `?stage=&format=` on export queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    pub stage: Option<String>,
    pub format: Option<String>,
}

/// Create an error response
pub fn error_response(error: &str, kind: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
        "kind": kind
    })
}
