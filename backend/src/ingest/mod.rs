//! Batch ingestion: uploaded files → per-file reports + classified tables.
//!
//! A batch is a fold over the files in submission order. Each file is
//! sanitized, checked against earlier names, parsed on the blocking pool
//! under a timeout, and recorded as either a parse summary or an error. One
//! file's failure never aborts the others. Classification runs once, over
//! the files that parsed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::logs::{log_error_indent, log_info, log_info_indent, log_success, log_success_indent};
use crate::error::{IngestError, IngestResult, ParseError};
use crate::models::{Role, SourceTable, Table};
use crate::parser::{self, FileKind};
use crate::registry::{classify, DuplicateGuard, RoleMap};

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Shape summary of a parsed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseSummary {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub column_count: usize,
    pub null_counts: BTreeMap<String, usize>,
    /// Path of the stored table, relative to the session directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    pub role: Role,
}

impl ParseSummary {
    pub fn of(table: &Table, role: Role) -> Self {
        Self {
            columns: table.columns().to_vec(),
            row_count: table.row_count(),
            column_count: table.column_count(),
            null_counts: table.null_counts().into_iter().collect(),
            output_location: None,
            role,
        }
    }
}

/// Error as recorded against a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub kind: String,
    pub message: String,
}

impl From<&IngestError> for FileError {
    fn from(e: &IngestError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    Parsed(ParseSummary),
    Failed { error: FileError },
}

/// Outcome for one file of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub original_name: String,
    pub stored_name: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn failed(original_name: &str, stored_name: &str, error: &IngestError) -> Self {
        Self {
            original_name: original_name.to_string(),
            stored_name: stored_name.to_string(),
            outcome: FileOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn summary(&self) -> Option<&ParseSummary> {
        match &self.outcome {
            FileOutcome::Parsed(summary) => Some(summary),
            FileOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&FileError> {
        match &self.outcome {
            FileOutcome::Failed { error } => Some(error),
            FileOutcome::Parsed(_) => None,
        }
    }
}

/// Everything one batch produced, before persistence.
#[derive(Debug, Clone)]
pub struct Batch {
    /// One report per submitted file, in submission order.
    pub reports: Vec<FileReport>,
    pub roles: RoleMap,
}

impl Batch {
    pub fn parsed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.summary().is_some()).count()
    }
}

/// Reduce a client-supplied file name to a safe, flat ASCII name.
///
/// Path separators and whitespace become `_`, other characters outside
/// `[A-Za-z0-9_.-]` are dropped, and leading/trailing dots and underscores
/// are trimmed. An empty result becomes `unnamed`.
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether a batch contains at least one file with an accepted extension.
pub fn has_allowed_file(uploads: &[Upload]) -> bool {
    uploads
        .iter()
        .any(|u| FileKind::from_filename(&sanitize_filename(&u.filename)).is_some())
}

/// Parse one file on the blocking pool, bounded by `timeout`.
pub async fn parse_upload(bytes: Vec<u8>, kind: FileKind, timeout: Duration) -> IngestResult<Table> {
    let task = tokio::task::spawn_blocking(move || parser::parse_bytes(&bytes, kind));
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(IngestError::Timeout {
            millis: timeout.as_millis(),
        }),
        Ok(Err(join_error)) => Err(IngestError::Task(join_error.to_string())),
        Ok(Ok(parsed)) => Ok(parsed?),
    }
}

/// Parse and classify a batch.
pub async fn ingest(uploads: Vec<Upload>, timeout: Duration) -> Batch {
    log_info(format!("📥 Ingesting {} file(s)...", uploads.len()));

    let mut guard = DuplicateGuard::new();
    let mut reports: Vec<FileReport> = Vec::with_capacity(uploads.len());
    let mut tables: Vec<SourceTable> = Vec::new();

    for upload in uploads {
        let stored_name = sanitize_filename(&upload.filename);
        log_info_indent(format!("{} → {}", upload.filename, stored_name), 1);

        match ingest_one(&mut guard, &stored_name, upload.bytes, timeout).await {
            Ok(table) => {
                log_success_indent(
                    format!("{} rows × {} columns", table.row_count(), table.column_count()),
                    2,
                );
                reports.push(FileReport {
                    original_name: upload.filename.clone(),
                    stored_name: stored_name.clone(),
                    outcome: FileOutcome::Parsed(ParseSummary::of(&table, Role::Unclassified)),
                });
                tables.push(SourceTable {
                    original_name: upload.filename,
                    stored_name,
                    role: Role::Unclassified,
                    table,
                });
            }
            Err(e) => {
                log_error_indent(format!("{}: {}", e.kind(), e), 2);
                reports.push(FileReport::failed(&upload.filename, &stored_name, &e));
            }
        }
    }

    let roles = classify(tables);
    for source in roles.tables() {
        let report = reports
            .iter_mut()
            .find(|r| r.stored_name == source.stored_name && r.summary().is_some());
        if let Some(FileReport {
            outcome: FileOutcome::Parsed(summary),
            ..
        }) = report
        {
            summary.role = source.role;
        }
        log_info_indent(format!("{} is {}", source.stored_name, source.role), 1);
    }

    let batch = Batch { reports, roles };
    log_success(format!(
        "{} of {} file(s) parsed",
        batch.parsed_count(),
        batch.reports.len()
    ));
    batch
}

async fn ingest_one(
    guard: &mut DuplicateGuard,
    stored_name: &str,
    bytes: Vec<u8>,
    timeout: Duration,
) -> IngestResult<Table> {
    guard.admit(stored_name)?;
    let kind = FileKind::from_filename(stored_name)
        .ok_or_else(|| ParseError::UnsupportedExtension(stored_name.to_string()))?;
    parse_upload(bytes, kind, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::workbook::fixtures::build_xlsx;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn fact_csv() -> Vec<u8> {
        b"item_id,category,week,units\n1,fruit,1,3\n2,veg,1,4\n".to_vec()
    }

    fn product_xlsx() -> Vec<u8> {
        build_xlsx(&[(
            "Sheet1",
            vec![vec!["item_id", "description"], vec!["1", "apple"], vec!["2", "leek"]],
        )])
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("FACT_SALES.csv"), "FACT_SALES.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("my file (1).csv"), "my_file_1.csv");
        assert_eq!(sanitize_filename("résumé.xlsx"), "rsum.xlsx");
        assert_eq!(sanitize_filename("..."), "unnamed");
    }

    #[test]
    fn test_has_allowed_file() {
        assert!(has_allowed_file(&[Upload::new("a.txt", b"x".to_vec()), Upload::new("b.CSV", b"x".to_vec())]));
        assert!(!has_allowed_file(&[Upload::new("a.txt", b"x".to_vec())]));
    }

    #[tokio::test]
    async fn test_fact_product_category_batch() {
        let uploads = vec![
            Upload::new("FACT_SALES.csv", fact_csv()),
            Upload::new("DIM_PRODUCT.xlsx", product_xlsx()),
            Upload::new("DIM_CATEGORY.csv", b"category,department\nfruit,fresh\n".to_vec()),
        ];

        let batch = ingest(uploads, TIMEOUT).await;

        let roles: Vec<Role> = batch
            .reports
            .iter()
            .map(|r| r.summary().unwrap().role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::Fact, Role::ProductDimension, Role::CategoryDimension]
        );
        let fact = batch.reports[0].summary().unwrap();
        assert_eq!(fact.row_count, 2);
        assert_eq!(fact.column_count, 4);
        assert_eq!(fact.null_counts.get("units"), Some(&0));
    }

    #[tokio::test]
    async fn test_duplicate_file_is_rejected() {
        let uploads = vec![
            Upload::new("FACT_SALES.csv", fact_csv()),
            Upload::new("DIM_PRODUCT.xlsx", product_xlsx()),
            Upload::new("DIM_PRODUCT.xlsx", product_xlsx()),
        ];

        let batch = ingest(uploads, TIMEOUT).await;

        assert_eq!(batch.parsed_count(), 2);
        assert_eq!(batch.reports[2].error().unwrap().kind, "DuplicateFileError");
        assert_eq!(
            batch.roles.get(Role::ProductDimension).unwrap().original_name,
            "DIM_PRODUCT.xlsx"
        );
        assert_eq!(batch.roles.tables().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_workbook_only_fails_that_file() {
        let uploads = vec![
            Upload::new("FACT_SALES.csv", fact_csv()),
            Upload::new("DIM_PRODUCT.xlsx", b"this is not a zip archive".to_vec()),
            Upload::new("notes.txt", b"hello".to_vec()),
        ];

        let batch = ingest(uploads, TIMEOUT).await;

        assert!(batch.reports[0].summary().is_some());
        assert_eq!(batch.reports[1].error().unwrap().kind, "CorruptArchiveError");
        assert_eq!(batch.reports[2].error().unwrap().kind, "UnsupportedExtension");
        assert!(batch.roles.fact().is_some());
        assert!(batch.roles.get(Role::ProductDimension).is_none());
    }

    fn large_fact_csv(rows: usize) -> Vec<u8> {
        let mut csv = String::from("item_id,category,week,units\n");
        for i in 0..rows {
            csv.push_str(&format!("{},fruit,{},{}\n", i, i % 52, i % 7));
        }
        csv.into_bytes()
    }

    #[tokio::test]
    async fn test_parse_upload_times_out() {
        let err = parse_upload(large_fact_csv(200_000), FileKind::Csv, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ParseTimeout");
    }

    #[tokio::test]
    async fn test_timeout_only_fails_that_file() {
        let uploads = vec![
            Upload::new("FACT_SALES.csv", large_fact_csv(1_000_000)),
            Upload::new("DIM_CATEGORY.csv", b"category,department\nfruit,fresh\n".to_vec()),
        ];

        let batch = ingest(uploads, Duration::from_millis(250)).await;

        let error = batch.reports[0].error().unwrap();
        assert_eq!(error.kind, "ParseTimeout");
        assert_eq!(error.message, "Parsing timed out after 250 ms");
        let category = batch.reports[1].summary().unwrap();
        assert_eq!(category.row_count, 1);
        assert_eq!(category.role, Role::CategoryDimension);
        assert!(batch.roles.fact().is_none());
    }

    #[tokio::test]
    async fn test_open_xml_named_xls_is_parsed() {
        let uploads = vec![Upload::new("DIM_PRODUCT.xls", product_xlsx())];

        let batch = ingest(uploads, TIMEOUT).await;

        let summary = batch.reports[0].summary().unwrap();
        assert_eq!(summary.role, Role::ProductDimension);
        assert_eq!(summary.columns, vec!["item_id", "description"]);
        assert_eq!(summary.row_count, 2);
    }

    #[test]
    fn test_report_serialization() {
        let report = FileReport::failed(
            "a.csv",
            "a.csv",
            &IngestError::DuplicateFile("a.csv".to_string()),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "DuplicateFileError");
        assert_eq!(json["originalName"], "a.csv");

        let back: FileReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
