// ABOUTME: Compatibility mapping from pre-2.0 snapshot keys to their current entity names.
// ABOUTME: Covers exactly two renames: assignments and reports.

use crate::registry;
use crate::snapshot::{EntityData, Record};

/// An old snapshot key whose records now belong to a different entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyRename {
    pub legacy: &'static str,
    pub current: &'static str,
}

pub const LEGACY_RENAMES: [LegacyRename; 2] = [
    LegacyRename {
        legacy: registry::ASSIGNMENTS,
        current: registry::TERRITORY_ASSIGNMENTS,
    },
    LegacyRename {
        legacy: "reports",
        current: registry::FIELD_SERVICE_REPORTS,
    },
];

/// Where the records for one registered entity come from in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordSource<'a> {
    /// The `data` key the records were read from.
    pub key: &'a str,
    pub records: &'a [Record],
}

impl RecordSource<'_> {
    /// True when the records were found under a legacy key rather than `entity`.
    pub fn is_shimmed_for(&self, entity: &str) -> bool {
        self.key != entity
    }
}

/// Resolve the records to load into `entity`.
///
/// The entity's own key wins. When it is absent, a known legacy key is used
/// instead. Returns None when neither is present.
pub fn resolve<'a>(data: &'a EntityData, entity: &str) -> Option<RecordSource<'a>> {
    if let Some((key, records)) = data.iter().find(|(key, _)| *key == entity) {
        return Some(RecordSource { key, records });
    }

    LEGACY_RENAMES
        .iter()
        .filter(|rename| rename.current == entity)
        .find_map(|rename| {
            data.iter()
                .find(|(key, _)| *key == rename.legacy)
                .map(|(key, records)| RecordSource { key, records })
        })
}
