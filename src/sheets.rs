use crate::error::TrackError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub const SHEET_TITLE: &str = "Page Info Tracker";
pub const HEADER: [&str; 6] = ["Sno", "Question Name", "Link", "Status", "Remarks", "Starred"];

/// The remote spreadsheet surface the reconciler and bootstrap run against.
/// `SheetsClient` is the real implementation; tests substitute an in-memory
/// fake.
pub trait SpreadsheetApi {
    fn verify(&self, spreadsheet_id: &str) -> Result<(), TrackError>;
    fn create(&self, title: &str) -> Result<String, TrackError>;
    fn write_header(&self, spreadsheet_id: &str) -> Result<(), TrackError>;
    fn format_header(&self, spreadsheet_id: &str) -> Result<(), TrackError>;
    fn read_rows(&self, spreadsheet_id: &str) -> Result<Vec<Vec<String>>, TrackError>;
    fn update_row(
        &self,
        spreadsheet_id: &str,
        row: usize,
        values: &[String; 3],
    ) -> Result<(), TrackError>;
    fn append_row(&self, spreadsheet_id: &str, values: &[String; 6]) -> Result<(), TrackError>;
}

pub struct SheetsClient<'a> {
    client: &'a Client,
    token: String,
}

#[derive(Serialize)]
struct CreateSpreadsheetRequest {
    properties: SpreadsheetProperties,
    sheets: Vec<SheetSpec>,
}

#[derive(Serialize)]
struct SpreadsheetProperties {
    title: String,
    locale: String,
    #[serde(rename = "timeZone")]
    time_zone: String,
}

#[derive(Serialize)]
struct SheetSpec {
    properties: SheetProperties,
}

#[derive(Serialize)]
struct SheetProperties {
    title: String,
    #[serde(rename = "gridProperties")]
    grid_properties: GridProperties,
}

#[derive(Serialize)]
struct GridProperties {
    #[serde(rename = "rowCount")]
    row_count: u32,
    #[serde(rename = "columnCount")]
    column_count: u32,
}

#[derive(Deserialize)]
struct CreateSpreadsheetResponse {
    #[serde(rename = "spreadsheetId")]
    spreadsheet_id: String,
}

#[derive(Serialize)]
struct ValueWrite {
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct ValueRead {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn create_request_body(title: &str) -> CreateSpreadsheetRequest {
    CreateSpreadsheetRequest {
        properties: SpreadsheetProperties {
            title: title.to_string(),
            locale: "en_US".to_string(),
            time_zone: "GMT".to_string(),
        },
        sheets: vec![SheetSpec {
            properties: SheetProperties {
                title: "Sheet1".to_string(),
                grid_properties: GridProperties {
                    row_count: 1000,
                    column_count: 10,
                },
            },
        }],
    }
}

fn update_range(row: usize) -> String {
    format!("Sheet1!D{row}:F{row}")
}

impl<'a> SheetsClient<'a> {
    pub fn new(client: &'a Client, token: String) -> Self {
        Self { client, token }
    }

    /// Non-2xx responses are parsed for `error.message`; if that fails the
    /// raw status line is surfaced instead.
    fn api_error(&self, context: &str, resp: reqwest::blocking::Response) -> TrackError {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {status}"));
        TrackError::Network(format!("{context}: {message}"))
    }
}

impl SpreadsheetApi for SheetsClient<'_> {
    fn verify(&self, spreadsheet_id: &str) -> Result<(), TrackError> {
        let resp = self
            .client
            .get(format!("{SHEETS_API}/{spreadsheet_id}"))
            .bearer_auth(&self.token)
            .send()?;
        if !resp.status().is_success() {
            return Err(TrackError::NotFound(
                "Sheet no longer exists or is not accessible".to_string(),
            ));
        }
        Ok(())
    }

    fn create(&self, title: &str) -> Result<String, TrackError> {
        debug!("creating spreadsheet titled {title:?}");
        let resp = self
            .client
            .post(SHEETS_API)
            .bearer_auth(&self.token)
            .json(&create_request_body(title))
            .send()?;
        if !resp.status().is_success() {
            return Err(self.api_error("Failed to create spreadsheet", resp));
        }
        let created: CreateSpreadsheetResponse =
            resp.json().map_err(|e| TrackError::Network(e.to_string()))?;
        info!("created spreadsheet {}", created.spreadsheet_id);
        Ok(created.spreadsheet_id)
    }

    fn write_header(&self, spreadsheet_id: &str) -> Result<(), TrackError> {
        let body = ValueWrite {
            values: vec![HEADER.iter().map(|s| s.to_string()).collect()],
        };
        let resp = self
            .client
            .put(format!(
                "{SHEETS_API}/{spreadsheet_id}/values/Sheet1!A1:F1?valueInputOption=USER_ENTERED"
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()?;
        if !resp.status().is_success() {
            return Err(self.api_error("Failed to setup headers", resp));
        }
        Ok(())
    }

    fn format_header(&self, spreadsheet_id: &str) -> Result<(), TrackError> {
        let body = json!({
            "requests": [{
                "repeatCell": {
                    "range": {
                        "sheetId": 0,
                        "startRowIndex": 0,
                        "endRowIndex": 1,
                        "startColumnIndex": 0,
                        "endColumnIndex": 6,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "textFormat": { "bold": true }
                        }
                    },
                    "fields": "userEnteredFormat.textFormat.bold",
                }
            }]
        });
        let resp = self
            .client
            .post(format!("{SHEETS_API}/{spreadsheet_id}:batchUpdate"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()?;
        if !resp.status().is_success() {
            return Err(self.api_error("Failed to format header row", resp));
        }
        Ok(())
    }

    fn read_rows(&self, spreadsheet_id: &str) -> Result<Vec<Vec<String>>, TrackError> {
        let resp = self
            .client
            .get(format!("{SHEETS_API}/{spreadsheet_id}/values/Sheet1!A:F"))
            .bearer_auth(&self.token)
            .send()?;
        if !resp.status().is_success() {
            return Err(self.api_error("Failed to fetch sheet data", resp));
        }
        let body: ValueRead = resp.json().map_err(|e| TrackError::Network(e.to_string()))?;
        Ok(body.values)
    }

    fn update_row(
        &self,
        spreadsheet_id: &str,
        row: usize,
        values: &[String; 3],
    ) -> Result<(), TrackError> {
        let body = ValueWrite {
            values: vec![values.to_vec()],
        };
        let range = update_range(row);
        let resp = self
            .client
            .put(format!(
                "{SHEETS_API}/{spreadsheet_id}/values/{range}?valueInputOption=USER_ENTERED"
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()?;
        if !resp.status().is_success() {
            return Err(self.api_error("Failed to update existing row", resp));
        }
        Ok(())
    }

    fn append_row(&self, spreadsheet_id: &str, values: &[String; 6]) -> Result<(), TrackError> {
        let body = ValueWrite {
            values: vec![values.to_vec()],
        };
        let resp = self
            .client
            .post(format!(
                "{SHEETS_API}/{spreadsheet_id}/values/Sheet1!A1:append\
                 ?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS"
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()?;
        if !resp.status().is_success() {
            return Err(self.api_error("Failed to append new row", resp));
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub spreadsheet_id: String,
    pub created: bool,
}

/// Verify-or-create: a stored identifier that fails verification is treated
/// as stale and discarded; a fresh spreadsheet then gets the fixed header
/// row. Bold formatting of the header is best-effort only.
pub fn ensure_spreadsheet<S: SpreadsheetApi>(
    api: &S,
    stored_id: Option<&str>,
    title: &str,
) -> Result<BootstrapOutcome, TrackError> {
    if let Some(id) = stored_id {
        match api.verify(id) {
            Ok(()) => {
                debug!("stored spreadsheet {id} verified");
                return Ok(BootstrapOutcome {
                    spreadsheet_id: id.to_string(),
                    created: false,
                });
            }
            Err(err) => {
                info!("stored spreadsheet {id} failed verification: {}", err.message());
            }
        }
    }

    let id = api.create(title)?;
    api.write_header(&id)?;
    if let Err(err) = api.format_header(&id) {
        warn!("failed to format header row: {}", err.message());
    }
    Ok(BootstrapOutcome {
        spreadsheet_id: id,
        created: true,
    })
}

pub fn sheet_url(spreadsheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}/edit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeDirectory {
        existing: Vec<String>,
        calls: RefCell<Vec<String>>,
        fail_format: bool,
    }

    impl SpreadsheetApi for FakeDirectory {
        fn verify(&self, spreadsheet_id: &str) -> Result<(), TrackError> {
            self.calls.borrow_mut().push(format!("verify {spreadsheet_id}"));
            if self.existing.iter().any(|id| id == spreadsheet_id) {
                Ok(())
            } else {
                Err(TrackError::NotFound(
                    "Sheet no longer exists or is not accessible".to_string(),
                ))
            }
        }

        fn create(&self, _title: &str) -> Result<String, TrackError> {
            self.calls.borrow_mut().push("create".to_string());
            Ok("fresh-id".to_string())
        }

        fn write_header(&self, spreadsheet_id: &str) -> Result<(), TrackError> {
            self.calls
                .borrow_mut()
                .push(format!("write_header {spreadsheet_id}"));
            Ok(())
        }

        fn format_header(&self, spreadsheet_id: &str) -> Result<(), TrackError> {
            self.calls
                .borrow_mut()
                .push(format!("format_header {spreadsheet_id}"));
            if self.fail_format {
                Err(TrackError::Network("formatting rejected".to_string()))
            } else {
                Ok(())
            }
        }

        fn read_rows(&self, _spreadsheet_id: &str) -> Result<Vec<Vec<String>>, TrackError> {
            unimplemented!("not exercised by bootstrap")
        }

        fn update_row(
            &self,
            _spreadsheet_id: &str,
            _row: usize,
            _values: &[String; 3],
        ) -> Result<(), TrackError> {
            unimplemented!("not exercised by bootstrap")
        }

        fn append_row(
            &self,
            _spreadsheet_id: &str,
            _values: &[String; 6],
        ) -> Result<(), TrackError> {
            unimplemented!("not exercised by bootstrap")
        }
    }

    #[test]
    fn verified_stored_id_is_reused_without_creation() {
        let api = FakeDirectory {
            existing: vec!["kept-id".to_string()],
            ..FakeDirectory::default()
        };
        let outcome = ensure_spreadsheet(&api, Some("kept-id"), SHEET_TITLE).expect("bootstrap");
        assert_eq!(outcome.spreadsheet_id, "kept-id");
        assert!(!outcome.created);
        assert_eq!(api.calls.borrow().as_slice(), ["verify kept-id"]);
    }

    #[test]
    fn stale_stored_id_is_discarded_and_a_new_sheet_created() {
        let api = FakeDirectory::default();
        let outcome = ensure_spreadsheet(&api, Some("stale-id"), SHEET_TITLE).expect("bootstrap");
        assert_eq!(outcome.spreadsheet_id, "fresh-id");
        assert!(outcome.created);
        assert_eq!(
            api.calls.borrow().as_slice(),
            [
                "verify stale-id",
                "create",
                "write_header fresh-id",
                "format_header fresh-id"
            ]
        );
    }

    #[test]
    fn no_stored_id_goes_straight_to_creation() {
        let api = FakeDirectory::default();
        let outcome = ensure_spreadsheet(&api, None, SHEET_TITLE).expect("bootstrap");
        assert!(outcome.created);
        assert_eq!(api.calls.borrow()[0], "create");
    }

    #[test]
    fn header_format_failure_does_not_fail_bootstrap() {
        let api = FakeDirectory {
            fail_format: true,
            ..FakeDirectory::default()
        };
        let outcome = ensure_spreadsheet(&api, None, SHEET_TITLE).expect("bootstrap");
        assert!(outcome.created);
        assert_eq!(outcome.spreadsheet_id, "fresh-id");
    }

    #[test]
    fn create_body_matches_the_wire_contract() {
        let body = serde_json::to_value(create_request_body(SHEET_TITLE)).expect("serialize");
        assert_eq!(body["properties"]["title"], "Page Info Tracker");
        assert_eq!(body["properties"]["locale"], "en_US");
        assert_eq!(body["properties"]["timeZone"], "GMT");
        assert_eq!(body["sheets"][0]["properties"]["title"], "Sheet1");
        assert_eq!(body["sheets"][0]["properties"]["gridProperties"]["rowCount"], 1000);
        assert_eq!(body["sheets"][0]["properties"]["gridProperties"]["columnCount"], 10);
    }

    #[test]
    fn update_range_targets_columns_d_through_f() {
        assert_eq!(update_range(2), "Sheet1!D2:F2");
        assert_eq!(update_range(41), "Sheet1!D41:F41");
    }

    #[test]
    fn sheet_url_points_at_the_editor() {
        assert_eq!(
            sheet_url("abc123"),
            "https://docs.google.com/spreadsheets/d/abc123/edit"
        );
    }
}
