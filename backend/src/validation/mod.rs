//! JSON Schema validation for persisted session manifests.
//!
//! The manifest schema (Draft 7) is embedded at compile time from
//! `schemas/session-manifest.json`. A manifest that fails validation is never
//! turned into a session.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use salesdiff::validation::validate_session_manifest;
//!
//! let manifest = json!({
//!     "schemaVersion": 1,
//!     "sessionId": "5f0c...",
//!     "createdAt": "2024-01-01T00:00:00Z",
//!     "files": []
//! });
//! assert!(validate_session_manifest(&manifest).is_ok());
//! ```

use serde_json::Value;

const SESSION_MANIFEST_SCHEMA: &str = include_str!("../../schemas/session-manifest.json");

/// Validate a JSON document against a JSON schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with every violation otherwise
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick true/false check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

fn session_manifest_schema() -> Result<Value, Vec<String>> {
    serde_json::from_str(SESSION_MANIFEST_SCHEMA)
        .map_err(|e| vec![format!("Invalid embedded schema: {}", e)])
}

/// Validate a session manifest.
pub fn validate_session_manifest(data: &Value) -> Result<(), Vec<String>> {
    validate(&session_manifest_schema()?, data)
}

/// Quick check against the manifest schema.
pub fn is_valid_session_manifest(data: &Value) -> bool {
    session_manifest_schema()
        .map(|schema| is_valid(&schema, data))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(files: Value) -> Value {
        json!({
            "schemaVersion": 1,
            "sessionId": "0b5c4c36-6c1b-4f8e-9d43-7f4d2a1f9c10",
            "createdAt": "2024-03-01T10:00:00+00:00",
            "files": files
        })
    }

    #[test]
    fn test_valid_manifest() {
        let data = manifest(json!([
            {
                "originalName": "FACT_SALES.csv",
                "storedName": "FACT_SALES.csv",
                "status": "parsed",
                "columns": ["item_id", "units"],
                "rowCount": 2,
                "columnCount": 2,
                "nullCounts": { "item_id": 0, "units": 1 },
                "outputLocation": "tables/FACT_SALES.csv.json",
                "role": "fact"
            },
            {
                "originalName": "DIM_PRODUCT.xlsx",
                "storedName": "DIM_PRODUCT.xlsx",
                "status": "failed",
                "error": { "kind": "CorruptArchiveError", "message": "bad zip" }
            }
        ]));
        assert!(validate_session_manifest(&data).is_ok());
        assert!(is_valid_session_manifest(&data));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let data = manifest(json!([{
            "originalName": "a.csv",
            "storedName": "a.csv",
            "status": "parsed",
            "columns": [],
            "rowCount": 0,
            "columnCount": 0,
            "nullCounts": {},
            "outputLocation": "tables/a.csv.json",
            "role": "pivot"
        }]));
        assert!(!is_valid_session_manifest(&data));
    }

    #[test]
    fn test_missing_fields_report_errors() {
        let data = json!({ "schemaVersion": 1 });
        let errors = validate_session_manifest(&data).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_failed_file_requires_error() {
        let data = manifest(json!([{
            "originalName": "a.csv",
            "storedName": "a.csv",
            "status": "failed"
        }]));
        assert!(!is_valid_session_manifest(&data));
    }
}
