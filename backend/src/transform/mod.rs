//! Transformation module.
//!
//! This module turns a session's classified tables into the four stages:
//! - Clean: null-key filter and exact-duplicate removal
//! - Join: left joins against the dimension tables
//! - Derive: computed date, revenue and trend columns
//! - Pipeline: stage selection, before/after tables and match rate

pub mod clean;
pub mod derive;
pub mod join;
pub mod pipeline;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub use clean::clean;
pub use derive::derive;
pub use join::{join_dimensions, left_join, JoinOutcome, JoinStep, JOIN_PLAN};
pub use pipeline::*;

/// The four pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Raw,
    Cleaned,
    Joined,
    Derived,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Raw, Stage::Cleaned, Stage::Joined, Stage::Derived];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Cleaned => "cleaned",
            Stage::Joined => "joined",
            Stage::Derived => "derived",
        }
    }

    /// Stage whose output is shown as "before". `raw` is its own predecessor.
    pub fn previous(self) -> Stage {
        match self {
            Stage::Raw | Stage::Cleaned => Stage::Raw,
            Stage::Joined => Stage::Cleaned,
            Stage::Derived => Stage::Joined,
        }
    }

    /// Whether the stage output carries a match rate.
    pub fn reports_match_rate(self) -> bool {
        matches!(self, Stage::Joined | Stage::Derived)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage name that matches none of [`Stage::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown stage '{0}', falling back to raw")]
pub struct UnknownStageError(pub String);

impl FromStr for Stage {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == name)
            .ok_or_else(|| UnknownStageError(s.to_string()))
    }
}

/// Kind of a non-fatal stage diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    #[serde(rename = "MissingDimensionWarning")]
    MissingDimension,
    #[serde(rename = "MissingColumnWarning")]
    MissingColumn,
}

impl WarningKind {
    /// Name used in API responses, manifests and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::MissingDimension => "MissingDimensionWarning",
            WarningKind::MissingColumn => "MissingColumnWarning",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal diagnostic raised while computing a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageWarning {
    pub kind: WarningKind,
    pub stage: Stage,
    pub message: String,
}

impl StageWarning {
    pub fn missing_dimension(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::MissingDimension,
            stage,
            message: message.into(),
        }
    }

    pub fn missing_column(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::MissingColumn,
            stage,
            message: message.into(),
        }
    }
}
