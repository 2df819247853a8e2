//! Google Sheets v4 backing for the spreadsheet sink.

use std::path::PathBuf;

use drivecrawl_core::{RemoteError, SpreadsheetConnector, SpreadsheetInfo, SpreadsheetService};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::credential::{Credential, TokenStore};
use crate::drive::{FILES_ENDPOINT, authorized};
use crate::http::http_client;

pub const SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Every spreadsheet holds a single grid sheet with this id.
const SHEET_ID: u32 = 0;

fn create_body(title: &str, sheet_title: &str, header: &[String]) -> Value {
    let cells: Vec<Value> = header
        .iter()
        .map(|h| json!({"userEnteredValue": {"stringValue": h}}))
        .collect();
    json!({
        "properties": {"title": title},
        "sheets": [{
            "properties": {
                "sheetId": SHEET_ID,
                "title": sheet_title,
                "index": 0,
                "sheetType": "GRID",
                "gridProperties": {"rowCount": 1, "columnCount": header.len()},
            },
            "data": [{"rowData": [{"values": cells}]}],
        }],
    })
}

fn format_header_body() -> Value {
    json!({
        "requests": [
            {"updateSheetProperties": {
                "properties": {"sheetId": SHEET_ID, "gridProperties": {"frozenRowCount": 1}},
                "fields": "gridProperties.frozenRowCount",
            }},
            {"repeatCell": {
                "range": {"sheetId": SHEET_ID, "endRowIndex": 1},
                "cell": {"userEnteredFormat": {"textFormat": {"bold": true}}},
                "fields": "userEnteredFormat.textFormat.bold",
            }},
            {"setBasicFilter": {
                "filter": {"range": {"sheetId": SHEET_ID}},
            }},
        ],
    })
}

/// `values:append` URL; the range is the sheet title, escaped as a path segment.
fn append_url(spreadsheet_id: &str, sheet_title: &str) -> Result<reqwest::Url, RemoteError> {
    let mut url = reqwest::Url::parse(SHEETS_ENDPOINT)
        .map_err(|e| RemoteError::http(None, e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| RemoteError::http(None, "invalid sheets endpoint"))?
        .push(spreadsheet_id)
        .push("values")
        .push(&format!("{sheet_title}:append"));
    url.query_pairs_mut()
        .append_pair("valueInputOption", "RAW")
        .append_pair("insertDataOption", "INSERT_ROWS");
    Ok(url)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
    #[serde(default)]
    spreadsheet_url: Option<String>,
}

impl CreatedSpreadsheet {
    fn into_info(self, title: &str) -> SpreadsheetInfo {
        let url = self.spreadsheet_url.unwrap_or_else(|| {
            format!("https://docs.google.com/spreadsheets/d/{}", self.spreadsheet_id)
        });
        SpreadsheetInfo {
            id: self.spreadsheet_id,
            title: title.to_string(),
            url,
        }
    }
}

/// Sheets client used by the writer thread.
pub struct SheetsClient {
    credential: Credential,
}

impl SheetsClient {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

impl SpreadsheetService for SheetsClient {
    fn create(
        &mut self,
        title: &str,
        sheet_title: &str,
        header: &[String],
    ) -> Result<SpreadsheetInfo, RemoteError> {
        let body = create_body(title, sheet_title, header);
        let created: CreatedSpreadsheet = authorized(&mut self.credential, None, |token| {
            http_client()
                .post(SHEETS_ENDPOINT)
                .bearer_auth(token)
                .query(&[("fields", "spreadsheetId,spreadsheetUrl")])
                .json(&body)
        })?;
        log::debug!("Created spreadsheet {title} ({})", created.spreadsheet_id);
        Ok(created.into_info(title))
    }

    fn append_rows(
        &mut self,
        spreadsheet_id: &str,
        sheet_title: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = append_url(spreadsheet_id, sheet_title)?;
        let body = json!({ "values": rows });
        let _: Value = authorized(&mut self.credential, Some(spreadsheet_id), |token| {
            http_client().post(url.clone()).bearer_auth(token).json(&body)
        })?;
        Ok(())
    }

    fn rename(&mut self, spreadsheet_id: &str, title: &str) -> Result<(), RemoteError> {
        let url = format!("{FILES_ENDPOINT}/{spreadsheet_id}");
        let body = json!({ "name": title });
        let _: Value = authorized(&mut self.credential, Some(spreadsheet_id), |token| {
            http_client()
                .patch(&url)
                .bearer_auth(token)
                .query(&[("fields", "id"), ("supportsAllDrives", "true")])
                .json(&body)
        })?;
        Ok(())
    }

    fn format_header(&mut self, spreadsheet_id: &str) -> Result<(), RemoteError> {
        let url = format!("{SHEETS_ENDPOINT}/{spreadsheet_id}:batchUpdate");
        let body = format_header_body();
        let _: Value = authorized(&mut self.credential, Some(spreadsheet_id), |token| {
            http_client().post(&url).bearer_auth(token).json(&body)
        })?;
        Ok(())
    }
}

/// Opens a [`SheetsClient`] from a token file.
#[derive(Debug, Clone)]
pub struct SheetsConnector {
    token_file: PathBuf,
    identity: Option<String>,
}

impl SheetsConnector {
    pub fn new(token_file: impl Into<PathBuf>, identity: Option<String>) -> Self {
        Self {
            token_file: token_file.into(),
            identity,
        }
    }
}

impl SpreadsheetConnector for SheetsConnector {
    fn connect(&self) -> Result<Box<dyn SpreadsheetService>, RemoteError> {
        let (_, credential) =
            TokenStore::load(&self.token_file)?.get_credential(self.identity.as_deref())?;
        Ok(Box::new(SheetsClient::new(credential)))
    }
}
