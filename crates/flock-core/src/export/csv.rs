// ABOUTME: Flattens one entity type of a Snapshot into a quoted CSV download.
// ABOUTME: Each supported type has a fixed column projection; other types yield a placeholder.

use chrono::NaiveDate;
use ::csv::{QuoteStyle, Terminator, WriterBuilder};
use serde_json::Value;

use super::{ExportError, ExportFile};
use crate::registry;
use crate::snapshot::{Record, Snapshot};

pub const CSV_MIME: &str = "text/csv";

/// Content returned when the requested type has no CSV projection.
pub const INVALID_DATA_TYPE: &str = "Invalid data type";

/// Content returned when a supported type has zero records.
pub const NO_DATA_AVAILABLE: &str = "No data available";

pub const SUPPORTED_CSV_TYPES: [&str; 4] = ["members", "groups", "territories", "reports"];

#[derive(Debug, Clone, Copy)]
enum Cell {
    /// The field rendered as text.
    Text,
    /// The length of an array field.
    Count,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    header: &'static str,
    field: &'static str,
    cell: Cell,
}

const fn text(header: &'static str, field: &'static str) -> Column {
    Column {
        header,
        field,
        cell: Cell::Text,
    }
}

const MEMBER_COLUMNS: [Column; 7] = [
    text("Full Name", "fullName"),
    text("Email", "email"),
    text("Phone", "phone"),
    text("Gender", "gender"),
    text("Baptized Date", "baptizedDate"),
    text("Pioneer Status", "pioneerStatus"),
    text("Address", "address"),
];

const GROUP_COLUMNS: [Column; 5] = [
    text("Name", "name"),
    text("Overseer", "overseer"),
    text("Assistant", "assistant"),
    text("Meeting Location", "meetingLocation"),
    Column {
        header: "Member Count",
        field: "members",
        cell: Cell::Count,
    },
];

const TERRITORY_COLUMNS: [Column; 6] = [
    text("Number", "number"),
    text("Name", "name"),
    text("Type", "type"),
    text("Status", "status"),
    text("Assigned To", "assignedTo"),
    text("Last Worked", "lastWorked"),
];

const REPORT_COLUMNS: [Column; 7] = [
    text("Publisher", "publisher"),
    text("Month", "month"),
    text("Hours", "hours"),
    text("Bible Studies", "bibleStudies"),
    text("Placements", "placements"),
    text("Return Visits", "returnVisits"),
    text("Remarks", "remarks"),
];

/// Column projection and backing records for a CSV type, or None if unsupported.
fn projection<'a>(snapshot: &'a Snapshot, data_type: &str) -> Option<(&'static [Column], &'a [Record])> {
    match data_type {
        "members" => Some((&MEMBER_COLUMNS, snapshot.records(registry::MEMBERS))),
        "groups" => Some((&GROUP_COLUMNS, snapshot.records(registry::GROUPS))),
        "territories" => Some((&TERRITORY_COLUMNS, snapshot.records(registry::TERRITORIES))),
        "reports" => {
            let records = match snapshot.data().get(registry::FIELD_SERVICE_REPORTS) {
                Some(records) => records,
                None => snapshot.records("reports"),
            };
            Some((&REPORT_COLUMNS, records))
        }
        _ => None,
    }
}

/// Render the records of `data_type` as CSV.
///
/// Unsupported types and empty supported types are not errors: they produce a
/// file whose content is `INVALID_DATA_TYPE` or `NO_DATA_AVAILABLE`.
pub fn to_csv(
    snapshot: &Snapshot,
    data_type: &str,
    date: NaiveDate,
) -> Result<ExportFile, ExportError> {
    let filename = format!(
        "congregation-{}-{}.csv",
        filename_token(data_type),
        date.format("%Y-%m-%d")
    );
    let file = |content: String| ExportFile {
        filename: filename.clone(),
        content,
        mime_type: CSV_MIME.to_string(),
    };

    let Some((columns, records)) = projection(snapshot, data_type) else {
        tracing::debug!("csv export requested for unsupported type {:?}", data_type);
        return Ok(file(INVALID_DATA_TYPE.to_string()));
    };

    if records.is_empty() {
        return Ok(file(NO_DATA_AVAILABLE.to_string()));
    }

    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(columns.iter().map(|c| c.header))?;
    for record in records {
        wtr.write_record(columns.iter().map(|c| render_cell(record, c)))?;
    }

    let bytes = wtr.into_inner().map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(file(String::from_utf8(bytes)?))
}

/// The requested type as it may appear in a filename; anything outside
/// `[A-Za-z0-9_-]` collapses to `invalid`.
fn filename_token(data_type: &str) -> &str {
    let safe = !data_type.is_empty()
        && data_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe { data_type } else { "invalid" }
}

fn render_cell(record: &Record, column: &Column) -> String {
    let value = record.get(column.field);
    match column.cell {
        Cell::Count => match value {
            Some(Value::Array(items)) => items.len().to_string(),
            Some(Value::Null) | None => "0".to_string(),
            Some(other) => render_value(other),
        },
        Cell::Text => value.map(render_value).unwrap_or_default(),
    }
}

/// Plain-text form of a JSON value for a single CSV field.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(map) => {
            // Populated references and extended-JSON wrappers
            for key in ["fullName", "name", "$date", "$oid", "_id"] {
                if let Some(inner) = map.get(key)
                    && !inner.is_object()
                {
                    return render_value(inner);
                }
            }
            value.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::EntityData;
    use chrono::Utc;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
    }

    fn snapshot_with(entity: &str, records: Vec<Record>) -> Snapshot {
        let mut data = EntityData::new();
        data.insert(entity, records);
        Snapshot::assemble(data, "admin", Utc::now())
    }

    #[test]
    fn members_csv_matches_expected_row() {
        let snap = snapshot_with(
            "members",
            vec![json!({
                "fullName": "Jane Doe",
                "email": "j@x.com",
                "phone": "555-1234",
                "gender": "female",
                "baptizedDate": null,
                "pioneerStatus": "regular",
                "address": "1 Main St"
            })],
        );

        let file = to_csv(&snap, "members", date()).unwrap();
        let lines: Vec<&str> = file.content.lines().collect();

        assert_eq!(file.filename, "congregation-members-2024-01-31.csv");
        assert_eq!(file.mime_type, "text/csv");
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#""Full Name","Email","Phone","Gender","Baptized Date","Pioneer Status","Address""#
        );
        assert_eq!(
            lines[1],
            r#""Jane Doe","j@x.com","555-1234","female","","regular","1 Main St""#
        );
    }

    #[test]
    fn empty_members_yield_placeholder() {
        let snap = snapshot_with("members", Vec::new());
        let file = to_csv(&snap, "members", date()).unwrap();
        assert_eq!(file.content, "No data available");
    }

    #[test]
    fn absent_members_yield_placeholder() {
        let snap = snapshot_with("groups", vec![json!({"name": "North"})]);
        let file = to_csv(&snap, "members", date()).unwrap();
        assert_eq!(file.content, NO_DATA_AVAILABLE);
    }

    #[test]
    fn unsupported_type_yields_invalid_marker() {
        let snap = snapshot_with("duties", vec![json!({"name": "Sound"})]);
        let file = to_csv(&snap, "duties", date()).unwrap();
        assert_eq!(file.content, "Invalid data type");
        assert_eq!(file.filename, "congregation-duties-2024-01-31.csv");
    }

    #[test]
    fn unsafe_type_never_reaches_the_filename() {
        let snap = snapshot_with("members", vec![json!({"fullName": "A"})]);

        for data_type in ["a\nb", "x\"y", "../members", "", "m\u{e9}mbers"] {
            let file = to_csv(&snap, data_type, date()).unwrap();
            assert_eq!(file.content, INVALID_DATA_TYPE);
            assert_eq!(file.filename, "congregation-invalid-2024-01-31.csv");
        }
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let snap = snapshot_with(
            "territories",
            vec![json!({"number": 12, "name": "The \"Heights\"", "status": "available"})],
        );

        let file = to_csv(&snap, "territories", date()).unwrap();
        let row = file.content.lines().nth(1).unwrap();
        assert_eq!(row, r#""12","The ""Heights""","","available","","""#);
    }

    #[test]
    fn groups_count_members_and_flatten_references() {
        let snap = snapshot_with(
            "groups",
            vec![json!({
                "name": "East",
                "overseer": {"_id": "m1", "fullName": "Ann Lee"},
                "members": ["m1", "m2", "m3"]
            })],
        );

        let file = to_csv(&snap, "groups", date()).unwrap();
        let row = file.content.lines().nth(1).unwrap();
        assert_eq!(row, r#""East","Ann Lee","","","3""#);
    }

    #[test]
    fn reports_read_legacy_key_when_current_absent() {
        let snap = Snapshot::from_value(json!({
            "version": "1.0",
            "data": { "reports": [{"publisher": "Ann", "month": "2023-09", "hours": 12}] }
        }))
        .unwrap();

        let file = to_csv(&snap, "reports", date()).unwrap();
        let row = file.content.lines().nth(1).unwrap();
        assert_eq!(row, r#""Ann","2023-09","12","","","","""#);
    }

    #[test]
    fn formatting_leaves_snapshot_untouched() {
        let snap = snapshot_with("members", vec![json!({"fullName": "A"})]);
        let before = snap.clone();
        let _ = to_csv(&snap, "members", date()).unwrap();
        assert_eq!(snap, before);
    }
}
