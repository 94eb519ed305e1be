//! Error types for the salesdiff pipeline.
//!
//! One enum per layer, converted upward with `From` so `?` works across
//! boundaries:
//!
//! - [`ParseError`] - Turning one uploaded byte stream into a table
//! - [`IngestError`] - Everything that can fail for one file of a batch
//! - [`PipelineError`] - Fatal stage computation errors
//! - [`StorageError`] - Session directory and manifest errors
//! - [`ExportError`] - Serialization and archive errors
//! - [`ServerError`] - HTTP layer errors
//!
//! Every error exposes a stable [`kind`](ParseError::kind) string used in
//! JSON responses and persisted manifests.

use thiserror::Error;

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors while parsing one uploaded file.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Delimited text is not valid UTF-8.
    #[error("File is not valid UTF-8 (detected charset: {detected})")]
    Decode { detected: String },

    /// The header row is missing or has no named column.
    #[error("Table has no header")]
    EmptyTable,

    /// Malformed delimited text.
    #[error("Invalid delimited text: {0}")]
    Csv(String),

    /// The workbook container could not be opened.
    #[error("Corrupted or invalid workbook: {0}")]
    CorruptArchive(String),

    /// The workbook declares no sheets.
    #[error("No sheets found in the workbook")]
    NoSheets,

    /// Every backend and sheet combination failed.
    #[error("All engines and sheets failed to read the workbook ({attempts} attempts)")]
    UnreadableWorkbook { attempts: usize },

    /// Extension outside of csv/xlsx/xls.
    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Decode { .. } => "DecodeError",
            ParseError::EmptyTable => "EmptyTableError",
            ParseError::Csv(_) => "DelimitedTextError",
            ParseError::CorruptArchive(_) => "CorruptArchiveError",
            ParseError::NoSheets => "NoSheetsError",
            ParseError::UnreadableWorkbook { .. } => "UnreadableWorkbookError",
            ParseError::UnsupportedExtension(_) => "UnsupportedExtension",
        }
    }
}

// =============================================================================
// Ingestion Errors (per file)
// =============================================================================

/// Errors recorded against a single file of an upload batch.
///
/// None of these abort the batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A file with the same sanitized name was already accepted.
    #[error("Duplicate file name: {0}")]
    DuplicateFile(String),

    /// Parsing did not finish within the configured bound.
    #[error("Parsing timed out after {millis} ms")]
    Timeout { millis: u128 },

    /// The parse task panicked or was cancelled.
    #[error("Failed to process: {0}")]
    Task(String),

    #[error("Failed to store parsed table: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Parse(e) => e.kind(),
            IngestError::DuplicateFile(_) => "DuplicateFileError",
            IngestError::Timeout { .. } => "ParseTimeout",
            IngestError::Task(_) => "ProcessingError",
            IngestError::Storage(e) => e.kind(),
        }
    }
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// Errors that make a stage request fail as a whole.
///
/// Skipped join steps are not errors; they are reported as warnings on the
/// stage output.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No uploaded file was classified as the fact table.
    #[error("No fact table found (expected a file name containing FACT_SALES)")]
    MissingFactTable,
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MissingFactTable => "MissingFactTableError",
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors from the on-disk session store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    /// Session identifiers are generated UUIDs; anything else is rejected.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Refusing to overwrite existing file: {0}")]
    AlreadyExists(String),

    #[error("Manifest schema version {found} is not supported (expected {expected})")]
    IncompatibleManifest { found: u64, expected: u64 },

    #[error("Manifest failed validation: {}", .0.join("; "))]
    InvalidManifest(Vec<String>),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::SessionNotFound(_) => "SessionNotFound",
            StorageError::InvalidSessionId(_) => "InvalidSessionId",
            StorageError::AlreadyExists(_) => "AlreadyExists",
            StorageError::IncompatibleManifest { .. } => "IncompatibleManifest",
            StorageError::InvalidManifest(_) => "InvalidManifest",
            StorageError::Io(_) => "StorageIoError",
            StorageError::Json(_) => "StorageJsonError",
        }
    }
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors from the export packager's underlying writers.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV writer error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Pipeline(e) => e.kind(),
            ServerError::Storage(e) => e.kind(),
            ServerError::Export(_) => "ExportError",
            ServerError::BadRequest(_) => "BadRequest",
            ServerError::Internal(_) => "InternalError",
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for per-file ingestion.
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for stage computation.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for session storage.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
