// ABOUTME: The authenticated caller on whose behalf a backup or restore runs.
// ABOUTME: Its name is stamped into snapshot metadata as createdBy.

use serde::{Deserialize, Serialize};

/// An authenticated caller. Absence of a Principal means "not authenticated".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The implicit caller for loopback-only servers and the local CLI.
    pub fn local() -> Self {
        Self::new("local")
    }
}
