//! # salesdiff - staged preview of retail sales uploads
//!
//! salesdiff takes a batch of sales tables (CSV or spreadsheet workbooks),
//! classifies them by file name, and shows how the fact table changes through
//! a fixed clean → join → derive pipeline. Any stage can be exported as CSV,
//! record lines, or a ZIP bundle with a report notebook.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Uploads   │───▶│   Parser    │───▶│  Registry   │───▶│  Transform  │───▶│   Export    │
//! │ csv/xlsx/xls│    │ (fallbacks) │    │   (roles)   │    │  (stages)   │    │ (csv / zip) │
//! └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘
//!                                           │
//!                                           ▼
//!                                    ┌─────────────┐
//!                                    │   Storage   │
//!                                    │ (sessions)  │
//!                                    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use salesdiff::{compute, ingest, Stage, Upload};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let batch = ingest(vec![Upload::new("FACT_SALES.csv", bytes)], Duration::from_secs(30)).await;
//!     let output = compute(&batch.roles, Stage::Derived).unwrap();
//!     println!("{} rows", output.after.row_count());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Layered error types
//! - [`models`] - Cell values, tables, roles
//! - [`parser`] - CSV and workbook parsing
//! - [`registry`] - Role classification and duplicate rejection
//! - [`ingest`] - Batch ingestion with per-file outcomes
//! - [`transform`] - Clean, join, derive and stage selection
//! - [`export`] - Serialization and bundles
//! - [`storage`] - On-disk upload sessions
//! - [`validation`] - Manifest schema validation
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;
pub mod config;

// Parsing
pub mod parser;

// Classification and ingestion
pub mod registry;
pub mod ingest;

// Transformation
pub mod transform;

// Export
pub mod export;

// Storage
pub mod storage;

// Validation
pub mod validation;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ExportError,
    IngestError,
    ParseError,
    PipelineError,
    ServerError,
    StorageError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    Role,
    SourceTable,
    Table,
    Value,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    parse_bytes,
    parse_csv,
    workbook::parse_workbook,
    FileKind,
};

// =============================================================================
// Re-exports - Registry and ingestion
// =============================================================================

pub use registry::{classify, DuplicateGuard, RoleMap};

pub use ingest::{
    ingest,
    sanitize_filename,
    Batch,
    FileReport,
    ParseSummary,
    Upload,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::{
    compute,
    compute_named,
    JoinStep,
    Stage,
    StageOutput,
    StageWarning,
};

// =============================================================================
// Re-exports - Export
// =============================================================================

pub use export::{bundle, bundle_stage, serialize, Encoding};

// =============================================================================
// Re-exports - Storage and configuration
// =============================================================================

pub use storage::{SessionManifest, SessionStore};

pub use config::Config;

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
