// ABOUTME: Versioned snapshot of every entity collection, plus its derived metadata.
// ABOUTME: Handles lenient parsing of incoming payloads, including legacy 1.0 files.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::registry;

/// Format tag written by the current builder.
pub const CURRENT_VERSION: &str = "2.0";

/// Format tag assumed for payloads that predate versioning.
pub const LEGACY_VERSION: &str = "1.0";

/// An opaque, already-serialized entity document. Never validated here.
pub type Record = serde_json::Value;

/// Errors raised while turning an external payload into a Snapshot.
#[derive(Debug, Error)]
pub enum SnapshotFormatError {
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entity name to ordered records, kept in insertion order.
///
/// Serializes as a JSON object. Registry entities come first when built by
/// `Snapshot::assemble`; unknown keys from imported files are kept as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityData {
    entries: Vec<(String, Vec<Record>)>,
}

impl EntityData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the records for an entity.
    pub fn insert(&mut self, name: impl Into<String>, records: Vec<Record>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = records,
            None => self.entries.push((name, records)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[Record]> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, records)| records.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.entries
            .iter()
            .map(|(name, records)| (name.as_str(), records.as_slice()))
    }

    /// Number of entity keys present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total records across every entity.
    pub fn total_records(&self) -> usize {
        self.entries.iter().map(|(_, records)| records.len()).sum()
    }

    fn count(&self, name: &str) -> usize {
        self.get(name).map_or(0, <[Record]>::len)
    }

    /// Reorder so registered entities follow registry order; unknown keys keep
    /// their relative order and go last.
    fn sort_by_registry(&mut self) {
        self.entries
            .sort_by_key(|(name, _)| registry::position(name).unwrap_or(usize::MAX));
    }
}

impl FromIterator<(String, Vec<Record>)> for EntityData {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Record>)>>(iter: I) -> Self {
        let mut data = EntityData::new();
        for (name, records) in iter {
            data.insert(name, records);
        }
        data
    }
}

impl Serialize for EntityData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, records) in &self.entries {
            map.serialize_entry(name, records)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EntityData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntityDataVisitor;

        impl<'de> Visitor<'de> for EntityDataVisitor {
            type Value = EntityData;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping entity names to arrays of records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<EntityData, A::Error> {
                let mut data = EntityData::new();
                while let Some((name, records)) = access.next_entry::<String, Vec<Record>>()? {
                    data.insert(name, records);
                }
                Ok(data)
            }
        }

        deserializer.deserialize_map(EntityDataVisitor)
    }
}

/// Counts derived from `data` at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotMetadata {
    pub total_members: usize,
    pub total_groups: usize,
    pub total_territories: usize,
    pub total_records: usize,
    pub created_by: String,
}

impl SnapshotMetadata {
    fn derive(data: &EntityData, created_by: String) -> Self {
        Self {
            total_members: data.count(registry::MEMBERS),
            total_groups: data.count(registry::GROUPS),
            total_territories: data.count(registry::TERRITORIES),
            total_records: data.total_records(),
            created_by,
        }
    }

    fn same_counts(&self, other: &SnapshotMetadata) -> bool {
        self.total_members == other.total_members
            && self.total_groups == other.total_groups
            && self.total_territories == other.total_territories
            && self.total_records == other.total_records
    }
}

/// The full application state as one versioned document.
///
/// Immutable once constructed: `metadata` always agrees with `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct Snapshot {
    version: String,
    timestamp: DateTime<Utc>,
    data: EntityData,
    metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Build a current-version snapshot and derive its metadata.
    pub fn assemble(mut data: EntityData, created_by: &str, timestamp: DateTime<Utc>) -> Self {
        data.sort_by_registry();
        let metadata = SnapshotMetadata::derive(&data, created_by.to_string());
        Self {
            version: CURRENT_VERSION.to_string(),
            timestamp,
            data,
            metadata,
        }
    }

    /// Parse a snapshot from JSON text, accepting legacy layouts.
    pub fn from_json(text: &str) -> Result<Self, SnapshotFormatError> {
        let raw: RawSnapshot = serde_json::from_str(text)?;
        Self::try_from(raw)
    }

    /// Parse a snapshot from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SnapshotFormatError> {
        let raw: RawSnapshot = serde_json::from_value(value)?;
        Self::try_from(raw)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_legacy(&self) -> bool {
        self.version != CURRENT_VERSION
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    /// Records for an entity, empty when the key is absent.
    pub fn records(&self, name: &str) -> &[Record] {
        self.data.get(name).unwrap_or(&[])
    }
}

/// Wire shape accepted on input. Every field but `data` is optional so that
/// hand-edited and pre-2.0 files still load.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    data: EntityData,
    #[serde(default)]
    metadata: Option<SnapshotMetadata>,
}

impl TryFrom<RawSnapshot> for Snapshot {
    type Error = SnapshotFormatError;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        let version = match raw.version.as_deref() {
            None => LEGACY_VERSION.to_string(),
            Some(v) if v == CURRENT_VERSION || v == LEGACY_VERSION => v.to_string(),
            Some(other) => return Err(SnapshotFormatError::UnsupportedVersion(other.to_string())),
        };

        let timestamp = match raw.timestamp.as_deref() {
            Some(ts) => match DateTime::parse_from_rfc3339(ts) {
                Ok(parsed) => parsed.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!("snapshot timestamp {:?} is not RFC 3339 ({}), ignoring", ts, e);
                    DateTime::<Utc>::UNIX_EPOCH
                }
            },
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        let created_by = raw
            .metadata
            .as_ref()
            .map(|m| m.created_by.clone())
            .unwrap_or_default();
        let metadata = SnapshotMetadata::derive(&raw.data, created_by);

        if let Some(declared) = &raw.metadata
            && !declared.same_counts(&metadata)
        {
            tracing::warn!(
                "snapshot metadata declares {} records but data holds {}; using recomputed counts",
                declared.total_records,
                metadata.total_records
            );
        }

        Ok(Self {
            version,
            timestamp,
            data: raw.data,
            metadata,
        })
    }
}
