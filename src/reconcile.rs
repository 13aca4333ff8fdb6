use crate::error::TrackError;
use crate::sheets::SpreadsheetApi;
use tracing::debug;

/// A candidate record destined for the sheet. `key` is the natural
/// identifier: matching is whitespace-trimmed, case-sensitive, exact.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub key: String,
    pub url: String,
    pub status: String,
    pub remarks: String,
    pub starred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// An existing row (1-based index) had its status/remarks/starred
    /// columns rewritten.
    Updated(usize),
    Appended,
}

#[derive(Debug, PartialEq, Eq)]
enum RowPlan {
    Update { row: usize, values: [String; 3] },
    Append { values: [String; 6] },
}

/// Merges a scraped record into the destination sheet: one body read, then
/// either an update of the topmost matching row's D–F columns or a single
/// append. `stamp` labels any remarks added to an existing row. The
/// read-then-write pair is not atomic; a concurrent external editor can lose
/// an update or introduce a duplicate row. Accepted limitation for
/// single-client sequential use.
pub fn reconcile<S: SpreadsheetApi>(
    api: &S,
    spreadsheet_id: &str,
    record: &PageRecord,
    stamp: &str,
) -> Result<RowOutcome, TrackError> {
    let rows = api.read_rows(spreadsheet_id)?;
    match plan(&rows, record, stamp) {
        RowPlan::Update { row, values } => {
            debug!("updating existing row {row} for key {:?}", record.key.trim());
            api.update_row(spreadsheet_id, row, &values)?;
            Ok(RowOutcome::Updated(row))
        }
        RowPlan::Append { values } => {
            debug!("appending new row for key {:?}", record.key.trim());
            api.append_row(spreadsheet_id, &values)?;
            Ok(RowOutcome::Appended)
        }
    }
}

fn plan(rows: &[Vec<String>], record: &PageRecord, stamp: &str) -> RowPlan {
    let starred = if record.starred { "Yes" } else { "No" };
    match find_matching_row(rows, &record.key) {
        Some(found) => RowPlan::Update {
            row: found.row,
            values: [
                record.status.clone(),
                merge_remarks(&found.old_remarks, &record.remarks, stamp),
                starred.to_string(),
            ],
        },
        None => RowPlan::Append {
            values: [
                String::new(), // serial left blank for manual numbering or a formula
                record.key.trim().to_string(),
                record.url.clone(),
                record.status.clone(),
                record.remarks.clone(),
                starred.to_string(),
            ],
        },
    }
}

struct MatchedRow {
    /// 1-based sheet row index.
    row: usize,
    old_remarks: String,
}

/// Linear scan of the body. Row 1 is the header and is always skipped;
/// column B (trimmed) is compared to the trimmed key, exact and
/// case-sensitive. The topmost match wins.
fn find_matching_row(rows: &[Vec<String>], key: &str) -> Option<MatchedRow> {
    let key = key.trim();
    for (i, row) in rows.iter().enumerate().skip(1) {
        if let Some(cell) = row.get(1)
            && cell.trim() == key
        {
            return Some(MatchedRow {
                row: i + 1,
                old_remarks: row.get(4).cloned().unwrap_or_default(),
            });
        }
    }
    None
}

/// Remarks are append-only history: empty incoming remarks leave the old
/// text untouched, anything else is concatenated behind a timestamped
/// separator.
fn merge_remarks(old: &str, incoming: &str, stamp: &str) -> String {
    if incoming.is_empty() {
        old.to_string()
    } else {
        format!("{old}\n[{stamp}] {incoming}").trim().to_string()
    }
}
