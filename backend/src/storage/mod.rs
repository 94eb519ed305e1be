//! Session store - persist parsed uploads and read them back.
//!
//! Layout, one directory per upload session:
//!
//! ```text
//! <data dir>/<session id>/
//! ├── tables/<stored name>.json   typed table per parsed file
//! └── manifest.json               written last
//! ```
//!
//! Files are created once and never rewritten. A session without a manifest
//! is incomplete and reads as not found.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::api::logs::{log_info, log_success_indent, log_warning_indent};
use crate::error::{IngestError, StorageError, StorageResult};
use crate::ingest::{Batch, FileOutcome, FileReport};
use crate::models::{SourceTable, Table};
use crate::registry::RoleMap;
use crate::validation::validate_session_manifest;

/// Directory where sessions are stored (relative to current dir)
pub const DEFAULT_DATA_DIR: &str = ".salesdiff/sessions";

/// Manifest format written by this build.
pub const SCHEMA_VERSION: u64 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const TABLES_DIR: &str = "tables";

/// Persisted description of one upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionManifest {
    pub schema_version: u64,
    pub session_id: String,
    /// RFC 3339 creation time
    pub created_at: String,
    pub files: Vec<FileReport>,
}

/// Store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Write a batch as a new session and return its manifest.
    ///
    /// A table that cannot be written turns its file report into a failure;
    /// the other files are still stored.
    pub fn persist(&self, batch: &Batch) -> StorageResult<SessionManifest> {
        let session_id = Uuid::new_v4().to_string();
        let dir = self.root.join(&session_id);
        fs::create_dir_all(&self.root)?;
        fs::create_dir(&dir)?;
        fs::create_dir(dir.join(TABLES_DIR))?;
        log_info(format!("💾 Storing session {}", session_id));

        let mut files = Vec::with_capacity(batch.reports.len());
        for report in &batch.reports {
            let mut report = report.clone();
            if let FileOutcome::Parsed(summary) = &mut report.outcome {
                let source = batch
                    .roles
                    .tables()
                    .iter()
                    .find(|t| t.stored_name == report.stored_name);
                if let Some(source) = source {
                    let location = table_location(&source.stored_name);
                    match write_new(&dir.join(&location), &source.table) {
                        Ok(()) => {
                            log_success_indent(format!("Wrote {}", location), 1);
                            summary.output_location = Some(location);
                        }
                        Err(e) => {
                            log_warning_indent(format!("{}: {}", location, e), 1);
                            let error = IngestError::Storage(e);
                            report = FileReport::failed(&report.original_name, &report.stored_name, &error);
                        }
                    }
                }
            }
            files.push(report);
        }

        let manifest = SessionManifest {
            schema_version: SCHEMA_VERSION,
            session_id,
            created_at: Utc::now().to_rfc3339(),
            files,
        };
        write_new(&dir.join(MANIFEST_FILE), &manifest)?;
        log_success_indent(format!("Session {} complete", manifest.session_id), 1);
        Ok(manifest)
    }

    /// Read and validate a session manifest.
    pub fn load_manifest(&self, session_id: &str) -> StorageResult<SessionManifest> {
        let path = self.session_dir(session_id)?.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let raw: serde_json::Value = serde_json::from_str(&content)?;
        let found = raw
            .get("schemaVersion")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if found != SCHEMA_VERSION {
            return Err(StorageError::IncompatibleManifest {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        validate_session_manifest(&raw).map_err(StorageError::InvalidManifest)?;

        Ok(serde_json::from_value(raw)?)
    }

    /// Rebuild the role map of a stored session.
    pub fn load_roles(&self, session_id: &str) -> StorageResult<RoleMap> {
        let manifest = self.load_manifest(session_id)?;
        let dir = self.session_dir(session_id)?;

        let mut tables = Vec::new();
        for report in manifest.files {
            let FileOutcome::Parsed(summary) = report.outcome else {
                continue;
            };
            let Some(location) = summary.output_location else {
                continue;
            };
            let content = fs::read_to_string(dir.join(&location))?;
            let table: Table = serde_json::from_str(&content)?;
            tables.push(SourceTable {
                original_name: report.original_name,
                stored_name: report.stored_name,
                role: summary.role,
                table,
            });
        }

        Ok(RoleMap::from_classified(tables))
    }

    /// Delete a session and everything in it.
    pub fn purge(&self, session_id: &str) -> StorageResult<()> {
        let dir = self.session_dir(session_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                log_info(format!("🗑️  Purged session {}", session_id));
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn session_dir(&self, session_id: &str) -> StorageResult<PathBuf> {
        let id = Uuid::parse_str(session_id)
            .map_err(|_| StorageError::InvalidSessionId(session_id.to_string()))?;
        Ok(self.root.join(id.to_string()))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

fn table_location(stored_name: &str) -> String {
    format!("{}/{}.json", TABLES_DIR, stored_name)
}

/// Serialize `value` to a file that must not exist yet.
fn write_new<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StorageError::AlreadyExists(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(&content)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ingest, Upload};
    use crate::models::{Role, Value};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn batch() -> Batch {
        ingest(
            vec![
                Upload::new("FACT_SALES.csv", b"item_id,units\n1,3\n2,\n".to_vec()),
                Upload::new("DIM_PRODUCT.csv", b"item_id,description\n1,apple\n".to_vec()),
                Upload::new("broken.xlsx", b"nope".to_vec()),
            ],
            Duration::from_secs(30),
        )
        .await
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let manifest = store.persist(&batch().await).unwrap();
        assert_eq!(manifest.schema_version, SCHEMA_VERSION);
        assert_eq!(manifest.files.len(), 3);
        assert_eq!(
            manifest.files[0].summary().unwrap().output_location.as_deref(),
            Some("tables/FACT_SALES.csv.json")
        );
        assert!(manifest.files[2].error().is_some());

        let loaded = store.load_manifest(&manifest.session_id).unwrap();
        assert_eq!(loaded, manifest);

        let roles = store.load_roles(&manifest.session_id).unwrap();
        let fact = roles.fact().unwrap();
        assert_eq!(fact.table.row_count(), 2);
        assert_eq!(fact.table.get(1, "units"), Some(&Value::Null));
        assert!(roles.get(Role::ProductDimension).is_some());
    }

    #[tokio::test]
    async fn test_purge() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let manifest = store.persist(&batch().await).unwrap();

        store.purge(&manifest.session_id).unwrap();

        let err = store.load_manifest(&manifest.session_id).unwrap_err();
        assert_eq!(err.kind(), "SessionNotFound");
        assert!(store.purge(&manifest.session_id).is_err());
    }

    #[test]
    fn test_invalid_session_id() {
        let store = SessionStore::new(tempdir().unwrap().path());
        let err = store.load_manifest("../etc").unwrap_err();
        assert!(matches!(err, StorageError::InvalidSessionId(_)));
    }

    #[test]
    fn test_incompatible_manifest_version() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = Uuid::new_v4().to_string();
        fs::create_dir_all(dir.path().join(&id)).unwrap();
        fs::write(
            dir.path().join(&id).join(MANIFEST_FILE),
            r#"{"schemaVersion": 2, "sessionId": "x", "createdAt": "now", "files": []}"#,
        )
        .unwrap();

        let err = store.load_manifest(&id).unwrap_err();
        assert!(matches!(
            err,
            StorageError::IncompatibleManifest { found: 2, expected: 1 }
        ));
    }

    #[test]
    fn test_invalid_manifest_is_rejected() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = Uuid::new_v4().to_string();
        fs::create_dir_all(dir.path().join(&id)).unwrap();
        fs::write(
            dir.path().join(&id).join(MANIFEST_FILE),
            r#"{"schemaVersion": 1, "files": "none"}"#,
        )
        .unwrap();

        let err = store.load_manifest(&id).unwrap_err();
        assert_eq!(err.kind(), "InvalidManifest");
    }

    #[test]
    fn test_files_are_never_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.json");
        write_new(&path, &Table::default()).unwrap();
        let err = write_new(&path, &Table::default()).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }
}
