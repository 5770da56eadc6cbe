//! Client for the Elasticsearch HTTP API.

use super::{BulkCreate, BulkItem, SearchClient};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

pub struct RestSearchClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, Option<String>)>,
}

impl RestSearchClient {
    pub fn new(endpoint: &str, credentials: Option<(String, Option<String>)>) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> StorageResult<Response> {
        self.authed(request).send().await.map_err(map_http_error)
    }
}

#[async_trait]
impl SearchClient for RestSearchClient {
    async fn put_index_template(&self, name: &str, template: &Value) -> StorageResult<()> {
        let url = self.url(&format!("_index_template/{}", urlencoding::encode(name)));
        let response = self.send(self.client.put(url).json(template)).await?;
        check(response).await.map(drop)
    }

    async fn create_index(&self, index: &str) -> StorageResult<()> {
        let url = self.url(&urlencoding::encode(index));
        let response = self.send(self.client.put(url)).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body: Value = response.json().await.unwrap_or_default();
            if body["error"]["type"] == "resource_already_exists_exception" {
                debug!(index, "index already exists");
                return Ok(());
            }
            return Err(StorageError::Backend(format!("index {index} not created: {body}")));
        }
        check(response).await.map(drop)
    }

    async fn delete_index(&self, index: &str) -> StorageResult<()> {
        let url = self.url(&urlencoding::encode(index));
        let response = self.send(self.client.delete(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await.map(drop)
    }

    async fn bulk_create(
        &self,
        index: &str,
        actions: &[BulkCreate],
        refresh: bool,
    ) -> StorageResult<Vec<BulkItem>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.url("_bulk");
        if refresh {
            url.push_str("?refresh=wait_for");
        }
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, NDJSON)
            .body(bulk_body(index, actions)?);
        let response = check(self.send(request).await?).await?;
        let parsed: BulkResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(parse_bulk_items(parsed))
    }

    async fn search(&self, index: &str, body: &Value) -> StorageResult<Value> {
        let url = self.url(&format!(
            "{}/_search?ignore_unavailable=true",
            urlencoding::encode(index)
        ));
        let response = check(self.send(self.client.post(url).json(body)).await?).await?;
        response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn delete_by_query(
        &self,
        index: &str,
        query: &Value,
        max_docs: Option<u64>,
    ) -> StorageResult<u64> {
        let url = self.url(&format!(
            "{}/_delete_by_query?conflicts=proceed&ignore_unavailable=true",
            urlencoding::encode(index)
        ));
        let mut body = json!({ "query": query });
        if let Some(max_docs) = max_docs {
            body["max_docs"] = json!(max_docs);
        }
        let response = self.send(self.client.post(url).json(&body)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let parsed: DeleteByQueryResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(parsed.deleted)
    }
}

/// Newline-delimited action and source pairs, with the trailing newline the
/// API requires.
fn bulk_body(index: &str, actions: &[BulkCreate]) -> StorageResult<String> {
    let mut body = String::new();
    for action in actions {
        let header = json!({ "create": { "_index": index, "_id": action.id } });
        for line in [&header, &action.source] {
            let encoded = serde_json::to_string(line)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            body.push_str(&encoded);
            body.push('\n');
        }
    }
    Ok(body)
}

fn parse_bulk_items(response: BulkResponse) -> Vec<BulkItem> {
    response
        .items
        .iter()
        .filter_map(|item| item.get("create"))
        .map(|outcome| BulkItem {
            id: outcome["_id"].as_str().unwrap_or_default().to_string(),
            status: outcome["status"]
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(500),
            error: match &outcome["error"] {
                Value::Null => None,
                Value::Object(e) => Some(
                    e.get("reason")
                        .and_then(Value::as_str)
                        .or_else(|| e.get("type").and_then(Value::as_str))
                        .unwrap_or_default()
                        .to_string(),
                ),
                other => Some(other.to_string()),
            },
        })
        .collect()
}

async fn check(response: Response) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    let detail = format!("search engine returned {status}: {message}");
    if matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_body_pairs_create_actions_with_sources() {
        let actions = [
            BulkCreate { id: "a".into(), source: json!({ "message_id": "a" }) },
            BulkCreate { id: "b/1".into(), source: json!({ "message_id": "b/1" }) },
        ];
        let body = bulk_body("events", &actions).unwrap();
        assert!(body.ends_with('\n'));
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!({ "create": { "_index": "events", "_id": "a" } }));
        assert_eq!(lines[3], json!({ "message_id": "b/1" }));
    }

    #[test]
    fn bulk_items_surface_conflicts() {
        let response: BulkResponse = serde_json::from_value(json!({
            "errors": true,
            "items": [
                { "create": { "_id": "a", "status": 201 } },
                { "create": { "_id": "b", "status": 409, "error": {
                    "type": "version_conflict_engine_exception",
                    "reason": "[b]: version conflict, document already exists",
                }}},
                { "create": { "_id": "c", "status": 400, "error": { "type": "mapper_parsing_exception" } } },
            ]
        }))
        .unwrap();
        let items = parse_bulk_items(response);
        assert!(items[0].is_success());
        assert!(items[1].is_conflict());
        assert!(items[1].error.as_deref().unwrap().contains("already exists"));
        assert_eq!(items[2].error.as_deref(), Some("mapper_parsing_exception"));
    }

    #[test]
    fn credentials_become_basic_auth() {
        let client =
            RestSearchClient::new("http://search:9200/", Some(("panko".into(), Some("s3cret".into()))))
                .unwrap();
        let request = client
            .authed(client.client.get(client.url("_cluster/health")))
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://search:9200/_cluster/health");
        assert!(request
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .is_some_and(|v| v.as_bytes().starts_with(b"Basic ")));
    }
}
