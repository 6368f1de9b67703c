// ABOUTME: Result envelopes returned across the backup boundary and per-entity restore reports.
// ABOUTME: Errors are carried as strings so no failure ever escapes as a panic or raw error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a restore replaces live data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreMode {
    /// Load into shadow collections, verify, then promote atomically.
    #[default]
    Staged,
    /// Wipe live collections, then bulk-insert. A failure leaves mixed state.
    InPlace,
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreMode::Staged => f.write_str("staged"),
            RestoreMode::InPlace => f.write_str("in-place"),
        }
    }
}

impl FromStr for RestoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" => Ok(RestoreMode::Staged),
            "in-place" | "inplace" | "in_place" => Ok(RestoreMode::InPlace),
            other => Err(format!("unknown restore mode: {}", other)),
        }
    }
}

/// What happened to one entity during a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReport {
    pub name: String,
    /// Snapshot key the records came from, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    pub expected: usize,
    pub inserted: usize,
    pub rejected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityReport {
    pub fn new(name: &str, expected: usize) -> Self {
        Self {
            name: name.to_string(),
            source_key: None,
            expected,
            inserted: 0,
            rejected: 0,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.rejected == 0
    }
}

/// Per-entity results of a whole restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub mode: RestoreMode,
    pub entities: Vec<EntityReport>,
}

impl RestoreReport {
    pub fn total_inserted(&self) -> usize {
        self.entities.iter().map(|e| e.inserted).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityReport> {
        self.entities.iter().filter(|e| !e.is_ok())
    }
}

/// Outcome of `restore_backup`. `error` is present only when `success` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RestoreMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityReport>,
}

impl RestoreOutcome {
    pub fn succeeded(report: RestoreReport) -> Self {
        Self {
            success: true,
            error: None,
            mode: Some(report.mode),
            entities: report.entities,
        }
    }

    pub fn failed(error: impl fmt::Display, report: Option<RestoreReport>) -> Self {
        let (mode, entities) = match report {
            Some(report) => (Some(report.mode), report.entities),
            None => (None, Vec::new()),
        };
        Self {
            success: false,
            error: Some(error.to_string()),
            mode,
            entities,
        }
    }
}

/// `{success, data|error}` envelope for the backup and export entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> BackupResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (_, _, Some(error)) => Err(error),
            _ => Err("response carried no data".to_string()),
        }
    }
}
