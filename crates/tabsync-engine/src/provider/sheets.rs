//! Google Sheets provider (Sheets API v4).
//!
//! Authentication uses `gcp_auth`: either an explicit service-account JSON
//! (the `GCP_SERVICE_ACCOUNT` secret of existing deployments) or the default
//! credential discovery chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tabsync_core::DocumentId;

use super::{ProviderError, ProviderErrorKind, ProviderResult, RowSpan, SpreadsheetProvider};
use crate::error::{Error, Result};
use crate::range::column_letters;

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];

/// Configuration for [`GoogleSheetsProvider`].
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// Service account key as JSON; `None` uses default credential discovery.
    pub service_account_json: Option<String>,
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            service_account_json: None,
            base_url: "https://sheets.googleapis.com".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`SpreadsheetProvider`] backed by the Google Sheets REST API.
pub struct GoogleSheetsProvider {
    config: SheetsConfig,
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

// Manual Debug implementation since TokenProvider doesn't implement Debug
impl std::fmt::Debug for GoogleSheetsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSheetsProvider")
            .field("base_url", &self.config.base_url)
            .field("token_provider", &"<TokenProvider>")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValuesBody<'a> {
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GoogleSheetsProvider {
    /// Creates a provider and initializes authentication.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if credentials cannot be loaded or the
    /// HTTP client cannot be built.
    pub async fn new(config: SheetsConfig) -> Result<Self> {
        let token_provider: Arc<dyn TokenProvider> = match &config.service_account_json {
            Some(json) => {
                let json = normalize_service_account(json)?;
                Arc::new(gcp_auth::CustomServiceAccount::from_json(&json).map_err(|e| {
                    Error::configuration(format!("invalid service account key: {e}"))
                })?)
            }
            None => gcp_auth::provider()
                .await
                .map_err(|e| Error::configuration(format!("failed to initialize GCP auth: {e}")))?,
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            token_provider,
            client,
        })
    }

    async fn access_token(&self) -> ProviderResult<String> {
        let token = self.token_provider.token(SCOPES).await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::PermissionDenied,
                format!("failed to get access token: {e}"),
            )
        })?;
        Ok(token.as_str().to_string())
    }

    fn url(&self, segments: &[&str]) -> ProviderResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.base_url).map_err(|e| {
            ProviderError::new(ProviderErrorKind::InvalidRequest, format!("base url: {e}"))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ProviderError::new(ProviderErrorKind::InvalidRequest, "base url cannot be a base")
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<Value> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Transient, e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|e| {
                ProviderError::new(ProviderErrorKind::Other, format!("decode response: {e}"))
            });
        }

        let (message, api_status) = serde_json::from_str::<ApiErrorResponse>(&body)
            .map_or_else(|_| (body.clone(), String::new()), |r| (r.error.message, r.error.status));
        Err(ProviderError::new(
            classify(status.as_u16(), &api_status, &message),
            format!("{status}: {message}"),
        ))
    }

    async fn metadata(&self, doc: &DocumentId) -> ProviderResult<SpreadsheetMeta> {
        let mut url = self.url(&["v4", "spreadsheets", doc.as_str()])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let value = self.send(self.client.get(url)).await?;
        serde_json::from_value(value).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Other, format!("decode metadata: {e}"))
        })
    }

    async fn sheet_id(&self, doc: &DocumentId, title: &str) -> ProviderResult<i64> {
        self.metadata(doc)
            .await?
            .sheets
            .into_iter()
            .find(|s| s.properties.title == title)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| ProviderError::not_found(format!("worksheet '{title}' not found")))
    }

    async fn batch_update(&self, doc: &DocumentId, requests: Vec<Value>) -> ProviderResult<()> {
        let segment = format!("{}:batchUpdate", doc.as_str());
        let url = self.url(&["v4", "spreadsheets", &segment])?;
        self.send(self.client.post(url).json(&json!({ "requests": requests })))
            .await?;
        Ok(())
    }

    async fn get_values(&self, doc: &DocumentId, range: &str) -> ProviderResult<Vec<Vec<String>>> {
        let mut url = self.url(&["v4", "spreadsheets", doc.as_str(), "values", range])?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");
        let value = self.send(self.client.get(url)).await?;
        let range: ValueRange = serde_json::from_value(value).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Other, format!("decode values: {e}"))
        })?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

/// Repairs keys whose private key had its newlines escaped twice.
fn normalize_service_account(json: &str) -> Result<String> {
    let mut value: Value = serde_json::from_str(json)
        .map_err(|e| Error::configuration(format!("service account JSON: {e}")))?;
    if let Some(Value::String(key)) = value.get_mut("private_key") {
        *key = key.replace("\\n", "\n");
    }
    Ok(value.to_string())
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Quotes a sheet title for A1 notation.
fn quoted(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn classify(status: u16, api_status: &str, message: &str) -> ProviderErrorKind {
    let lower = message.to_lowercase();
    match status {
        429 => ProviderErrorKind::RateLimited,
        403 if api_status == "RESOURCE_EXHAUSTED" || lower.contains("quota") => {
            ProviderErrorKind::RateLimited
        }
        401 | 403 => ProviderErrorKind::PermissionDenied,
        404 => ProviderErrorKind::NotFound,
        400 if lower.contains("unable to parse range") => ProviderErrorKind::NotFound,
        400 | 409 | 422 => ProviderErrorKind::InvalidRequest,
        500..=599 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Other,
    }
}

#[async_trait]
impl SpreadsheetProvider for GoogleSheetsProvider {
    async fn worksheet_titles(&self, doc: &DocumentId) -> ProviderResult<Vec<String>> {
        Ok(self
            .metadata(doc)
            .await?
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }

    async fn add_worksheet(
        &self,
        doc: &DocumentId,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> ProviderResult<()> {
        self.batch_update(
            doc,
            vec![json!({
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "rowCount": rows, "columnCount": cols }
                    }
                }
            })],
        )
        .await
    }

    async fn read_all(&self, doc: &DocumentId, sheet: &str) -> ProviderResult<Vec<Vec<String>>> {
        self.get_values(doc, &quoted(sheet)).await
    }

    async fn read_row(
        &self,
        doc: &DocumentId,
        sheet: &str,
        row: usize,
    ) -> ProviderResult<Vec<String>> {
        let range = format!("{}!{row}:{row}", quoted(sheet));
        Ok(self
            .get_values(doc, &range)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    async fn update_row(
        &self,
        doc: &DocumentId,
        sheet: &str,
        row: usize,
        start_col: usize,
        values: &[String],
    ) -> ProviderResult<()> {
        let range = format!("{}!{}{row}", quoted(sheet), column_letters(start_col));
        let mut url = self.url(&["v4", "spreadsheets", doc.as_str(), "values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let rows = [values.to_vec()];
        let body = ValuesBody {
            major_dimension: "ROWS",
            values: &rows,
        };
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn delete_rows(
        &self,
        doc: &DocumentId,
        sheet: &str,
        spans: &[RowSpan],
    ) -> ProviderResult<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let sheet_id = self.sheet_id(doc, sheet).await?;
        let requests = spans
            .iter()
            .map(|span| {
                json!({
                    "deleteDimension": {
                        "range": {
                            "sheetId": sheet_id,
                            "dimension": "ROWS",
                            "startIndex": span.start - 1,
                            "endIndex": span.end
                        }
                    }
                })
            })
            .collect();
        self.batch_update(doc, requests).await
    }

    async fn append_rows(
        &self,
        doc: &DocumentId,
        sheet: &str,
        rows: &[Vec<String>],
    ) -> ProviderResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let segment = format!("{}:append", quoted(sheet));
        let mut url = self.url(&["v4", "spreadsheets", doc.as_str(), "values", &segment])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = ValuesBody {
            major_dimension: "ROWS",
            values: rows,
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_statuses() {
        assert_eq!(classify(429, "", ""), ProviderErrorKind::RateLimited);
        assert_eq!(
            classify(403, "PERMISSION_DENIED", "The caller does not have permission"),
            ProviderErrorKind::PermissionDenied
        );
        assert_eq!(
            classify(403, "", "Quota exceeded for quota metric"),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(classify(404, "", ""), ProviderErrorKind::NotFound);
        assert_eq!(
            classify(400, "", "Unable to parse range: 'Missing'"),
            ProviderErrorKind::NotFound
        );
        assert_eq!(classify(503, "", ""), ProviderErrorKind::Transient);
        assert_eq!(classify(418, "", ""), ProviderErrorKind::Other);
    }

    #[test]
    fn titles_are_quoted() {
        assert_eq!(quoted("Data"), "'Data'");
        assert_eq!(quoted("Bob's"), "'Bob''s'");
    }

    #[test]
    fn escaped_private_key_is_repaired() {
        let fixed = normalize_service_account(r#"{"private_key":"a\\nb"}"#).expect("json");
        let value: Value = serde_json::from_str(&fixed).expect("parse");
        assert_eq!(value["private_key"], "a\nb");
    }

    #[test]
    fn cells_become_text() {
        assert_eq!(cell_text(json!("x")), "x");
        assert_eq!(cell_text(json!(12)), "12");
        assert_eq!(cell_text(Value::Null), "");
    }
}
