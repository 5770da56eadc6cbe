//! Client for the HBase REST gateway.

use super::query::ScanSpec;
use super::{ColumnClient, ColumnRow};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const SCANNER_BATCH: usize = 1000;
const JSON: &str = "application/json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CellSet {
    #[serde(rename = "Row", default)]
    rows: Vec<RestRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RestRow {
    key: String,
    #[serde(rename = "Cell", default)]
    cells: Vec<RestCell>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RestCell {
    column: String,
    #[serde(rename = "$")]
    value: String,
}

pub struct RestColumnClient {
    client: Client,
    base_url: String,
}

impl RestColumnClient {
    pub fn new(endpoint: &str) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, table: &str, rest: &str) -> String {
        format!("{}/{}/{}", self.base_url, urlencoding::encode(table), rest)
    }

    async fn table_exists(&self, table: &str) -> StorageResult<bool> {
        let response = self
            .client
            .get(self.url(table, "schema"))
            .header(ACCEPT, JSON)
            .send()
            .await
            .map_err(map_http_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    async fn drop_table(&self, table: &str) -> StorageResult<()> {
        let response = self
            .client
            .delete(self.url(table, "schema"))
            .send()
            .await
            .map_err(map_http_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await.map(drop)
    }

    async fn open_scanner(&self, table: &str, spec: &ScanSpec) -> StorageResult<String> {
        let response = self
            .client
            .put(self.url(table, "scanner"))
            .header(CONTENT_TYPE, JSON)
            .json(&scanner_body(spec))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check(response).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend("scanner created without a location".into()))
    }

    /// Next batch of rows, or `None` once the scanner is exhausted.
    async fn next_batch(&self, scanner: &str) -> StorageResult<Option<Vec<ColumnRow>>> {
        let response = self
            .client
            .get(scanner)
            .header(ACCEPT, JSON)
            .send()
            .await
            .map_err(map_http_error)?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let cells: CellSet = check(response)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        decode_cell_set(cells).map(Some)
    }

    async fn close_scanner(&self, scanner: &str) {
        if let Err(e) = self.client.delete(scanner).send().await {
            debug!(scanner, error = %e, "failed to release scanner");
        }
    }

    async fn drain_scanner(
        &self,
        scanner: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ColumnRow>> {
        let mut rows: Vec<ColumnRow> = Vec::new();
        while let Some(batch) = self.next_batch(scanner).await? {
            for row in batch {
                // Wide rows are split across batches.
                match rows.last_mut() {
                    Some(last) if last.key == row.key => last.cells.extend(row.cells),
                    _ => rows.push(row),
                }
            }
            // One extra row guards against the last row being split.
            if limit.is_some_and(|n| rows.len() > n) {
                break;
            }
        }
        if let Some(n) = limit {
            rows.truncate(n);
        }
        Ok(rows)
    }
}

#[async_trait]
impl ColumnClient for RestColumnClient {
    async fn create_table(&self, table: &str, family: &str) -> StorageResult<()> {
        if self.table_exists(table).await? {
            return Ok(());
        }
        let response = self
            .client
            .put(self.url(table, "schema"))
            .header(CONTENT_TYPE, JSON)
            .json(&json!({ "name": table, "ColumnSchema": [{ "name": family }] }))
            .send()
            .await
            .map_err(map_http_error)?;
        check(response).await.map(drop)
    }

    async fn truncate_table(&self, table: &str) -> StorageResult<()> {
        self.drop_table(table).await?;
        self.create_table(table, super::keys::FAMILY).await
    }

    async fn put(&self, table: &str, row: &ColumnRow) -> StorageResult<()> {
        let response = self
            .client
            .put(self.url(table, &urlencoding::encode(&row.key)))
            .header(CONTENT_TYPE, JSON)
            .json(&encode_row(row))
            .send()
            .await
            .map_err(map_http_error)?;
        check(response).await.map(drop)
    }

    async fn get(&self, table: &str, key: &str) -> StorageResult<Option<ColumnRow>> {
        let response = self
            .client
            .get(self.url(table, &urlencoding::encode(key)))
            .header(ACCEPT, JSON)
            .send()
            .await
            .map_err(map_http_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let cells: CellSet = check(response)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(decode_cell_set(cells)?.into_iter().next())
    }

    /// Gateway `checkAndPut`: the trailing cell is the expected value of
    /// `check_column`, and an empty value asks for the column to be absent.
    async fn check_and_put(
        &self,
        table: &str,
        row: &ColumnRow,
        check_column: &str,
    ) -> StorageResult<bool> {
        let path = format!("{}?check=put", urlencoding::encode(&row.key));
        let response = self
            .client
            .put(self.url(table, &path))
            .header(CONTENT_TYPE, JSON)
            .json(&check_and_put_body(row, check_column))
            .send()
            .await
            .map_err(map_http_error)?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(false);
        }
        check(response).await.map(|_| true)
    }

    async fn scan(
        &self,
        table: &str,
        spec: &ScanSpec,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ColumnRow>> {
        let scanner = self.open_scanner(table, spec).await?;
        let rows = self.drain_scanner(&scanner, limit).await;
        self.close_scanner(&scanner).await;
        rows
    }

    async fn delete_rows(&self, table: &str, keys: &[String]) -> StorageResult<u64> {
        let mut deleted = 0;
        for key in keys {
            let response = self
                .client
                .delete(self.url(table, &urlencoding::encode(key)))
                .send()
                .await
                .map_err(map_http_error)?;
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            check(response).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

fn scanner_body(spec: &ScanSpec) -> serde_json::Value {
    let mut body = json!({ "batch": SCANNER_BATCH });
    if let Some(start) = &spec.row_start {
        body["startRow"] = json!(STANDARD.encode(start));
    }
    if let Some(stop) = &spec.row_stop {
        body["endRow"] = json!(STANDARD.encode(stop));
    }
    if let Some(filter) = &spec.filter {
        // The gateway expects the filter as an embedded JSON string.
        body["filter"] = json!(filter.to_rest_json().to_string());
    }
    body
}

fn encode_row(row: &ColumnRow) -> CellSet {
    CellSet {
        rows: vec![RestRow {
            key: STANDARD.encode(&row.key),
            cells: row
                .cells
                .iter()
                .map(|(column, value)| RestCell {
                    column: STANDARD.encode(column),
                    value: STANDARD.encode(value),
                })
                .collect(),
        }],
    }
}

fn check_and_put_body(row: &ColumnRow, check_column: &str) -> CellSet {
    let mut body = encode_row(row);
    for written in &mut body.rows {
        written.cells.push(RestCell {
            column: STANDARD.encode(check_column),
            value: String::new(),
        });
    }
    body
}

fn decode_cell_set(set: CellSet) -> StorageResult<Vec<ColumnRow>> {
    let b64 = |s: &str| {
        STANDARD
            .decode(s)
            .map_err(|e| StorageError::Serialization(format!("bad base64 from gateway: {e}")))
    };
    let utf8 = |bytes: Vec<u8>| {
        String::from_utf8(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    };
    set.rows
        .into_iter()
        .map(|row| {
            let key = utf8(b64(&row.key)?)?;
            let cells = row
                .cells
                .into_iter()
                .map(|c| Ok((utf8(b64(&c.column)?)?, b64(&c.value)?)))
                .collect::<StorageResult<_>>()?;
            Ok(ColumnRow { key, cells })
        })
        .collect()
}

async fn check(response: Response) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    let detail = format!("gateway returned {status}: {message}");
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        Err(StorageError::Transient(detail))
    } else {
        Err(StorageError::Backend(detail))
    }
}

fn map_http_error(err: reqwest::Error) -> StorageError {
    if err.is_connect() || err.is_timeout() {
        StorageError::Transient(err.to_string())
    } else {
        StorageError::Backend(err.to_string())
    }
}
