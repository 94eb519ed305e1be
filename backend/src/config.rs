//! Runtime configuration from the environment.
//!
//! `.env` is loaded first (if present), then each `SALESDIFF_*` variable is
//! read. Unset variables take their default; unparseable ones take their
//! default with a warning.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::logs::log_warning;
use crate::storage::DEFAULT_DATA_DIR;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 512;
pub const DEFAULT_PARSE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PREVIEW_ROWS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of the session store
    pub data_dir: PathBuf,
    /// Request body limit for uploads, in megabytes
    pub max_upload_mb: usize,
    /// Bound on a single file parse
    pub parse_timeout: Duration,
    /// Rows returned in stage previews when the request does not say
    pub preview_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            parse_timeout: Duration::from_secs(DEFAULT_PARSE_TIMEOUT_SECS),
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}

impl Config {
    /// Load `.env` and read the environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SALESDIFF_DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_upload_mb: number(&lookup, "SALESDIFF_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB),
            parse_timeout: Duration::from_secs(number(
                &lookup,
                "SALESDIFF_PARSE_TIMEOUT_SECS",
                DEFAULT_PARSE_TIMEOUT_SECS,
            )),
            preview_rows: number(&lookup, "SALESDIFF_PREVIEW_ROWS", DEFAULT_PREVIEW_ROWS),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn number<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log_warning(format!(
                    "{}='{}' is not a valid number, using {}",
                    key, raw, default
                ));
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.max_upload_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SALESDIFF_DATA_DIR", "/tmp/sessions"),
            ("SALESDIFF_PARSE_TIMEOUT_SECS", "5"),
            ("SALESDIFF_PREVIEW_ROWS", " 10 "),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.parse_timeout, Duration::from_secs(5));
        assert_eq!(config.preview_rows, 10);
        assert_eq!(config.max_upload_mb, DEFAULT_MAX_UPLOAD_MB);
    }

    #[test]
    fn test_invalid_number_falls_back() {
        let config = Config::from_lookup(lookup(&[("SALESDIFF_MAX_UPLOAD_MB", "lots")]));
        assert_eq!(config.max_upload_mb, DEFAULT_MAX_UPLOAD_MB);
    }
}
