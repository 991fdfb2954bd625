use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::TokenSource;
use crate::error::{Error, Result};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const SPREADSHEET_QUERY: &str = "mimeType='application/vnd.google-apps.spreadsheet'";
const MAX_PAGE_SIZE: usize = 1000;

/// A spreadsheet in the user's Drive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// A tab inside a spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksheetRef {
    pub title: String,
    pub sheet_id: i64,
    pub index: i64,
}

/// Remote operations the exporter needs.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn list_spreadsheets(&self, limit: usize) -> Result<Vec<SpreadsheetRef>>;

    async fn spreadsheet_title(&self, spreadsheet_id: &str) -> Result<String>;

    /// Worksheets in the order the API returns them.
    async fn worksheets(&self, spreadsheet_id: &str) -> Result<Vec<WorksheetRef>>;

    /// Rows of cell values for a whole worksheet.
    async fn values(&self, spreadsheet_id: &str, worksheet_title: &str) -> Result<Vec<Vec<String>>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<SpreadsheetRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    properties: Option<SpreadsheetProperties>,
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Default, Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Sheet {
    #[serde(default)]
    properties: SheetProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    index: i64,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
}

/// A1 range covering a whole worksheet: the title in single quotes with
/// embedded quotes doubled.
pub fn worksheet_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// [`SheetsApi`] over the Sheets v4 and Drive v3 REST APIs. The bearer
/// token is asked for on every request.
#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    sheets_base: String,
    drive_base: String,
}

impl GoogleClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_base_urls(tokens, SHEETS_API_BASE, DRIVE_API_BASE)
    }

    pub fn with_base_urls(
        tokens: Arc<dyn TokenSource>,
        sheets_base: impl Into<String>,
        drive_base: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            tokens,
            sheets_base: sheets_base.into().trim_end_matches('/').to_string(),
            drive_base: drive_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(base: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(base).map_err(|e| Error::ApiRequest {
            status: None,
            message: format!("invalid base URL '{}': {}", base, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| Error::ApiRequest {
                status: None,
                message: format!("base URL '{}' cannot have a path", base),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let token = self.tokens.bearer_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(api_error) => Error::ApiRequest {
                    status: Some(api_error.error.code),
                    message: api_error.error.message,
                },
                Err(_) => Error::ApiRequest {
                    status: Some(status.as_u16()),
                    message: body,
                },
            });
        }
        Ok(response.json().await?)
    }

    async fn spreadsheet(&self, spreadsheet_id: &str, fields: &str) -> Result<Spreadsheet> {
        let url = Self::url(&self.sheets_base, &["spreadsheets", spreadsheet_id])?;
        debug!("GET {}", url);
        self.send(self.http.get(url).query(&[("fields", fields)])).await
    }
}

#[async_trait]
impl SheetsApi for GoogleClient {
    async fn list_spreadsheets(&self, limit: usize) -> Result<Vec<SpreadsheetRef>> {
        let url = Self::url(&self.drive_base, &["files"])?;
        let mut spreadsheets = Vec::new();
        let mut page_token: Option<String> = None;

        while spreadsheets.len() < limit {
            let page_size = (limit - spreadsheets.len()).min(MAX_PAGE_SIZE).to_string();
            let mut request = self.http.get(url.clone()).query(&[
                ("q", SPREADSHEET_QUERY),
                ("pageSize", page_size.as_str()),
                ("fields", "nextPageToken, files(id, name, modifiedTime, webViewLink)"),
            ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: FileListResponse = self.send(request).await?;
            debug!("Drive returned {} spreadsheets", page.files.len());
            spreadsheets.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        spreadsheets.truncate(limit);
        Ok(spreadsheets)
    }

    async fn spreadsheet_title(&self, spreadsheet_id: &str) -> Result<String> {
        let spreadsheet = self.spreadsheet(spreadsheet_id, "properties.title").await?;
        spreadsheet
            .properties
            .and_then(|p| p.title)
            .ok_or_else(|| Error::ApiRequest {
                status: None,
                message: format!("spreadsheet {} has no title", spreadsheet_id),
            })
    }

    async fn worksheets(&self, spreadsheet_id: &str) -> Result<Vec<WorksheetRef>> {
        let spreadsheet = self
            .spreadsheet(spreadsheet_id, "sheets.properties(sheetId,title,index)")
            .await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|sheet| WorksheetRef {
                title: sheet
                    .properties
                    .title
                    .unwrap_or_else(|| "Untitled".to_string()),
                sheet_id: sheet.properties.sheet_id,
                index: sheet.properties.index,
            })
            .collect())
    }

    async fn values(&self, spreadsheet_id: &str, worksheet_title: &str) -> Result<Vec<Vec<String>>> {
        let range = worksheet_range(worksheet_title);
        let url = Self::url(
            &self.sheets_base,
            &["spreadsheets", spreadsheet_id, "values", range.as_str()],
        )?;
        debug!("GET {}", url);
        let value_range: ValueRange = self.send(self.http.get(url)).await?;
        Ok(value_range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_worksheet_range_quotes_title() {
        assert_eq!(worksheet_range("Jan"), "'Jan'");
        assert_eq!(worksheet_range("Bob's data"), "'Bob''s data'");
    }

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(json!("a")), "a");
        assert_eq!(cell_to_string(json!(1.5)), "1.5");
        assert_eq!(cell_to_string(json!(true)), "true");
        assert_eq!(cell_to_string(Value::Null), "");
    }

    #[test]
    fn test_spreadsheet_ref_deserialize() {
        let json = json!({
            "id": "abc",
            "name": "Budget",
            "modifiedTime": "2024-02-01T10:00:00.000Z",
            "webViewLink": "https://docs.google.com/spreadsheets/d/abc/edit"
        });
        let sheet: SpreadsheetRef = serde_json::from_value(json).unwrap();
        assert_eq!(sheet.name, "Budget");
        assert!(sheet.modified_time.is_some());

        let bare: SpreadsheetRef = serde_json::from_value(json!({"id": "x", "name": "y"})).unwrap();
        assert_eq!(bare.modified_time, None);
    }

    #[test]
    fn test_url_encodes_range_segment() {
        let url = GoogleClient::url(
            "https://sheets.googleapis.com/v4",
            &["spreadsheets", "id", "values", "'Q1 / Sales'"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/id/values/'Q1%20%2F%20Sales'"
        );
    }
}
