//! Elasticsearch-backed store

use super::{SearchStore, StoreError, StoreMessage};
use crate::config::StoreConfig;
use crate::error::StructuredReason;
use crate::query::QueryDocument;
use crate::response::SearchResult;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Marker of the store's result-window refusal
const WINDOW_TOO_LARGE: &str = "Result window is too large";

/// Sends search documents to `{url}/{index}/_search`
pub struct ElasticsearchStore {
    client: Client,
    search_url: Url,
    count_url: Url,
}

impl ElasticsearchStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        // A base without a trailing slash would lose its last path segment on join
        let base = Url::parse(&format!("{}/", config.url.trim_end_matches('/')))
            .map_err(|e| StoreError::Unavailable(format!("invalid store url {}: {e}", config.url)))?;
        let index_url = |endpoint: &str| {
            base.join(&format!("{}/{endpoint}", config.index))
                .map_err(|e| StoreError::Unavailable(format!("invalid index {}: {e}", config.index)))
        };
        let search_url = index_url("_search")?;
        let count_url = index_url("_count")?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            search_url,
            count_url,
        })
    }

    pub fn search_url(&self) -> &Url {
        &self.search_url
    }

    async fn post(&self, url: &Url, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| StoreError::UnexpectedResponse(e.to_string()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("reading {status} error body: {e}")))?;
        Err(classify_error(status, &body))
    }
}

#[async_trait]
impl SearchStore for ElasticsearchStore {
    async fn execute(&self, document: &QueryDocument) -> Result<SearchResult, StoreError> {
        let body = serde_json::to_value(document)
            .map_err(|e| StoreError::UnexpectedResponse(e.to_string()))?;
        let response = self.post(&self.search_url, &body).await?;
        serde_json::from_value(response).map_err(|e| StoreError::UnexpectedResponse(e.to_string()))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let response = self
            .post(&self.count_url, &serde_json::json!({"query": {"match_all": {}}}))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::UnexpectedResponse(format!("no count in {response}")))
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}

/// Classify an error answer from the store.
///
/// A refused result window is relayed as a flat message. An error object with
/// a root cause is relayed with its structured reason; a bare string error as
/// a flat message. Server-side failures mean the store is unavailable.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> StoreError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let root_cause = error
        .and_then(|e| e.get("root_cause"))
        .and_then(|causes| causes.get(0))
        .filter(|cause| cause.get("reason").is_some())
        .or(error.filter(|e| e.get("reason").is_some()));

    let reason_text = |cause: &Value| {
        cause
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    // The window refusal can arrive as a 500 wrapped in
    // search_phase_execution_exception, so it is matched before the status.
    if let Some(reason) = root_cause.map(reason_text).filter(|r| r.contains(WINDOW_TOO_LARGE)) {
        return StoreError::WindowTooLarge(reason);
    }
    if let Some(Value::String(message)) = error {
        if message.contains(WINDOW_TOO_LARGE) {
            return StoreError::WindowTooLarge(message.clone());
        }
    }

    if status.is_server_error() {
        return StoreError::Unavailable(format!("{status}: {body}"));
    }

    match (root_cause, error) {
        (Some(cause), _) => {
            let reason = StructuredReason {
                reason: reason_text(cause),
                error_type: cause.get("type").and_then(Value::as_str).map(str::to_string),
            };
            StoreError::MalformedQuery(StoreMessage::Structured(reason))
        }
        (None, Some(Value::String(message))) => {
            StoreError::MalformedQuery(StoreMessage::Flat(message.clone()))
        }
        _ if body.trim().is_empty() => StoreError::MalformedQuery(StoreMessage::Flat(
            status.canonical_reason().unwrap_or("Bad Request").to_string(),
        )),
        _ => StoreError::MalformedQuery(StoreMessage::Flat(body.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_config(url: &str, index: &str) -> StoreConfig {
        StoreConfig {
            url: url.to_string(),
            index: index.to_string(),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_search_url() {
        let store = ElasticsearchStore::new(&store_config("http://localhost:9200", "buildhub2")).unwrap();
        assert_eq!(store.search_url().as_str(), "http://localhost:9200/buildhub2/_search");
    }

    #[test]
    fn test_search_url_with_path_prefix() {
        for url in ["http://es.internal/proxy/", "http://es.internal/proxy"] {
            let store = ElasticsearchStore::new(&store_config(url, "builds")).unwrap();
            assert_eq!(store.search_url().as_str(), "http://es.internal/proxy/builds/_search");
        }
    }

    #[test]
    fn test_invalid_url() {
        assert!(ElasticsearchStore::new(&store_config("not a url", "builds")).is_err());
    }

    #[test]
    fn test_classify_structured_root_cause() {
        let body = json!({
            "error": {
                "root_cause": [{
                    "type": "query_shard_exception",
                    "reason": "field name is null or empty",
                    "index": "buildhub2"
                }],
                "type": "search_phase_execution_exception",
                "reason": "all shards failed"
            },
            "status": 400
        });
        let err = classify_error(StatusCode::BAD_REQUEST, &body.to_string());
        assert_eq!(
            err,
            StoreError::MalformedQuery(StoreMessage::Structured(StructuredReason::with_type(
                "field name is null or empty",
                "query_shard_exception"
            )))
        );
    }

    #[test]
    fn test_classify_window_too_large_even_on_500() {
        let reason = "Result window is too large, from + size must be less than or equal to: \
                      [10000] but was [11000].";
        let body = json!({
            "error": {
                "root_cause": [{"type": "query_phase_execution_exception", "reason": reason}],
                "type": "search_phase_execution_exception",
                "reason": "all shards failed"
            },
            "status": 500
        });
        let err = classify_error(StatusCode::INTERNAL_SERVER_ERROR, &body.to_string());
        assert_eq!(err, StoreError::WindowTooLarge(reason.to_string()));
    }

    #[test]
    fn test_classify_string_error() {
        let body = json!({"error": "Incorrect HTTP method for uri", "status": 405});
        let err = classify_error(StatusCode::METHOD_NOT_ALLOWED, &body.to_string());
        assert_eq!(
            err,
            StoreError::MalformedQuery(StoreMessage::Flat("Incorrect HTTP method for uri".into()))
        );
    }

    #[test]
    fn test_classify_reason_without_root_cause() {
        let body = json!({"error": {"type": "parsing_exception", "reason": "unknown key [foo]"}});
        let err = classify_error(StatusCode::BAD_REQUEST, &body.to_string());
        assert!(matches!(
            err,
            StoreError::MalformedQuery(StoreMessage::Structured(ref r)) if r.reason == "unknown key [foo]"
        ));
    }

    #[test]
    fn test_classify_server_error() {
        let err = classify_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn test_classify_non_json_body() {
        let err = classify_error(StatusCode::BAD_REQUEST, "bad request");
        assert_eq!(err, StoreError::MalformedQuery(StoreMessage::Flat("bad request".into())));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        let config = StoreConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_ms: 500,
            ..StoreConfig::default()
        };
        let store = ElasticsearchStore::new(&config).unwrap();
        let err = store.execute(&QueryDocument::match_all(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
