// ABOUTME: The fixed, ordered registry of entity collections covered by backups.
// ABOUTME: Builder, restorer, metadata, and the SQLite store all enumerate entities through here.

pub const MEMBERS: &str = "members";
pub const GROUPS: &str = "groups";
pub const TERRITORIES: &str = "territories";
pub const TERRITORY_ASSIGNMENTS: &str = "territoryAssignments";
pub const FIELD_SERVICE_REPORTS: &str = "fieldServiceReports";
pub const ASSIGNMENTS: &str = "assignments";

/// One entity collection known to the snapshot subsystem.
///
/// Store handles are bound per call site (see `flock_store::CollectionHandle`),
/// so an entry itself is plain static data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryEntry {
    pub name: &'static str,
}

impl RegistryEntry {
    const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

/// Registry order is part of the snapshot format: exports serialize `data`
/// in this order and restores walk it in this order.
static ENTRIES: [RegistryEntry; 42] = [
    RegistryEntry::new(MEMBERS),
    RegistryEntry::new(GROUPS),
    RegistryEntry::new(TERRITORIES),
    RegistryEntry::new(TERRITORY_ASSIGNMENTS),
    RegistryEntry::new(FIELD_SERVICE_REPORTS),
    RegistryEntry::new("activities"),
    RegistryEntry::new("assignmentHistories"),
    RegistryEntry::new(ASSIGNMENTS),
    RegistryEntry::new("attendances"),
    RegistryEntry::new("bibleStudies"),
    RegistryEntry::new("cleaningTasks"),
    RegistryEntry::new("coReports"),
    RegistryEntry::new("coVisits"),
    RegistryEntry::new("messages"),
    RegistryEntry::new("broadcasts"),
    RegistryEntry::new("documents"),
    RegistryEntry::new("duties"),
    RegistryEntry::new("events"),
    RegistryEntry::new("expenses"),
    RegistryEntry::new("families"),
    RegistryEntry::new("fieldServiceMeetings"),
    RegistryEntry::new("contributions"),
    RegistryEntry::new("budgets"),
    RegistryEntry::new("monthlyReports"),
    RegistryEntry::new("openingBalances"),
    RegistryEntry::new("groupSchedules"),
    RegistryEntry::new("histories"),
    RegistryEntry::new("literatures"),
    RegistryEntry::new("notifications"),
    RegistryEntry::new("overseerReports"),
    RegistryEntry::new("privileges"),
    RegistryEntry::new("publicWitnessings"),
    RegistryEntry::new("publisherGoals"),
    RegistryEntry::new("publisherRecords"),
    RegistryEntry::new("pushSubscriptions"),
    RegistryEntry::new("roles"),
    RegistryEntry::new("schoolStudents"),
    RegistryEntry::new("shepherdingCalls"),
    RegistryEntry::new("tashes"),
    RegistryEntry::new("transportConfigs"),
    RegistryEntry::new("transportFees"),
    RegistryEntry::new("memberFeePayments"),
];

/// All registered entities in their fixed order.
pub fn list() -> &'static [RegistryEntry] {
    &ENTRIES
}

/// Iterate over registered entity names in registry order.
pub fn names() -> impl Iterator<Item = &'static str> {
    ENTRIES.iter().map(|entry| entry.name)
}

/// Find a registry entry by its exact collection name.
pub fn lookup(name: &str) -> Option<&'static RegistryEntry> {
    ENTRIES.iter().find(|entry| entry.name == name)
}

/// Position of an entity in registry order, used to sort snapshot data.
pub fn position(name: &str) -> Option<usize> {
    ENTRIES.iter().position(|entry| entry.name == name)
}
