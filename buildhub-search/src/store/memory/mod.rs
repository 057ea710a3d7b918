//! In-process store for development and tests.
//!
//! Evaluates the Query DSL subset the endpoint accepts against documents held
//! in memory, and refuses what it cannot evaluate the way Elasticsearch
//! refuses malformed queries: with a structured reason.

mod aggregate;
mod matcher;

use super::{SearchStore, StoreError, StoreMessage};
use crate::error::StructuredReason;
use crate::query::QueryDocument;
use crate::response::{Hits, SearchResult};
use aggregate::Scope;
use async_trait::async_trait;
use matcher::{compare_values, field_values, Predicate};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

const DEFAULT_INDEX: &str = "buildhub2";
const DEFAULT_MAX_RESULT_WINDOW: u64 = 10_000;
const DEFAULT_FROM: u64 = 0;
const DEFAULT_SIZE: u64 = 10;

pub(super) fn parsing_error(reason: impl Into<String>) -> StoreError {
    StoreError::MalformedQuery(StoreMessage::Structured(StructuredReason::with_type(
        reason,
        "parsing_exception",
    )))
}

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    source: Value,
}

pub struct MemoryStore {
    index: String,
    max_result_window: u64,
    documents: RwLock<Vec<StoredDocument>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX)
    }
}

impl MemoryStore {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            max_result_window: DEFAULT_MAX_RESULT_WINDOW,
            documents: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_max_result_window(mut self, max_result_window: u64) -> Self {
        self.max_result_window = max_result_window;
        self
    }

    /// Store a document under a generated id and return the id
    pub fn insert(&self, source: Value) -> String {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed).to_string();
        self.insert_with_id(id.clone(), source);
        id
    }

    /// Store a document, replacing any document with the same id
    pub fn insert_with_id(&self, id: impl Into<String>, source: Value) {
        let id = id.into();
        let mut documents = self.documents.write();
        match documents.iter_mut().find(|doc| doc.id == id) {
            Some(existing) => existing.source = source,
            None => documents.push(StoredDocument { id, source }),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.documents.write().clear();
    }

    fn search(&self, body: &Map<String, Value>) -> Result<SearchResult, StoreError> {
        let from = paging(body, "from", DEFAULT_FROM)?;
        let size = paging(body, "size", DEFAULT_SIZE)?;
        let window = from.saturating_add(size);
        if window > self.max_result_window {
            return Err(StoreError::WindowTooLarge(format!(
                "Result window is too large, from + size must be less than or equal to: [{}] but was [{window}]. \
                 See the scroll api for a more efficient way to request large data sets. \
                 This limit can be set by changing the [index.max_result_window] index level setting.",
                self.max_result_window
            )));
        }

        let query = compile_optional(body.get("query"))?;
        let post_filter = compile_optional(body.get("post_filter"))?;
        let sort = SortKey::parse_all(body.get("sort"))?;

        let documents = self.documents.read();
        let matched: Vec<&StoredDocument> = documents.iter().filter(|d| query.matches(d)).collect();

        // Aggregations see the query results, before post_filter
        let aggregations = match body.get("aggs").or_else(|| body.get("aggregations")) {
            Some(aggs) => aggregate::aggregate(
                aggs,
                &Scope {
                    docs: matched.clone(),
                    all: &documents,
                },
            )?,
            None => Map::new(),
        };

        let mut hits: Vec<&StoredDocument> = matched.into_iter().filter(|d| post_filter.matches(d)).collect();
        if !sort.is_empty() {
            hits.sort_by(|a, b| SortKey::compare(&sort, a, b));
        }

        let total = hits.len() as u64;
        let page: Vec<Value> = hits
            .into_iter()
            .skip(from as usize)
            .take(size as usize)
            .map(|doc| {
                json!({
                    "_index": self.index,
                    "_id": doc.id,
                    "_score": 1.0,
                    "_source": doc.source,
                })
            })
            .collect();

        Ok(SearchResult {
            hits: Hits {
                total,
                max_score: (!page.is_empty()).then_some(1.0),
                hits: page,
            },
            aggregations,
        })
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn execute(&self, document: &QueryDocument) -> Result<SearchResult, StoreError> {
        self.search(document.as_map())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn compile_optional(clause: Option<&Value>) -> Result<Predicate, StoreError> {
    clause.map(Predicate::compile).transpose().map(|p| p.unwrap_or(Predicate::All))
}

fn paging(body: &Map<String, Value>, key: &str, default: u64) -> Result<u64, StoreError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| parsing_error(format!("[{key}] must be a non-negative integer, found {value}"))),
    }
}

/// One `sort` criterion: a field and its direction
#[derive(Debug)]
struct SortKey {
    field: String,
    descending: bool,
}

impl SortKey {
    /// `"field"`, `{"field": "desc"}`, `{"field": {"order": "desc"}}`, or a
    /// list of those. `_score` is constant here and is skipped.
    fn parse_all(sort: Option<&Value>) -> Result<Vec<Self>, StoreError> {
        let criteria: Vec<&Value> = match sort {
            None => return Ok(Vec::new()),
            Some(Value::Array(list)) => list.iter().collect(),
            Some(single) => vec![single],
        };

        let mut keys = Vec::new();
        for criterion in criteria {
            let (field, direction) = match criterion {
                Value::String(field) => (field.as_str(), None),
                Value::Object(map) if map.len() == 1 => match map.iter().next() {
                    Some((field, spec)) => {
                        let direction = spec.as_str().or_else(|| spec.get("order").and_then(Value::as_str));
                        (field.as_str(), direction)
                    }
                    None => continue,
                },
                other => return Err(parsing_error(format!("malformed sort criterion {other}"))),
            };
            if field == "_score" {
                continue;
            }
            let descending = match direction {
                None => false,
                Some(d) if d.eq_ignore_ascii_case("asc") => false,
                Some(d) if d.eq_ignore_ascii_case("desc") => true,
                Some(d) => return Err(parsing_error(format!("Unknown sort order [{d}]"))),
            };
            keys.push(Self {
                field: field.to_string(),
                descending,
            });
        }
        Ok(keys)
    }

    /// Documents without the field sort last in either direction
    fn compare(keys: &[Self], a: &StoredDocument, b: &StoredDocument) -> Ordering {
        for key in keys {
            let left = field_values(&a.source, &key.field).into_iter().next();
            let right = field_values(&b.source, &key.field).into_iter().next();
            let ordering = match (left, right) {
                (Some(l), Some(r)) => {
                    let natural = compare_values(l, r).unwrap_or(Ordering::Equal);
                    if key.descending {
                        natural.reverse()
                    } else {
                        natural
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(body: Value) -> QueryDocument {
        match body {
            Value::Object(map) => QueryDocument::from_map(map),
            _ => unreachable!(),
        }
    }

    fn store_with_versions() -> MemoryStore {
        let store = MemoryStore::default();
        for (version, platform, date) in [
            ("60.0.1", "linux", "2018-05-01"),
            ("60.0.2", "linux", "2018-05-02"),
            ("60.1", "win64", "2018-05-03"),
        ] {
            store.insert(json!({
                "build": {"date": date},
                "source": {"product": "firefox"},
                "target": {"version": version, "platform": platform}
            }));
        }
        store
    }

    #[tokio::test]
    async fn test_match_all_defaults() {
        let store = store_with_versions();
        let result = store.execute(&document(json!({}))).await.unwrap();
        assert_eq!(result.hits.total, 3);
        assert_eq!(result.hits.hits.len(), 3);
        assert_eq!(result.hits.max_score, Some(1.0));
        assert_eq!(result.hits.hits[0]["_index"], "buildhub2");
        assert_eq!(result.hits.hits[0]["_id"], "1");
        assert_eq!(result.hits.hits[0]["_source"]["target"]["version"], "60.0.1");
    }

    #[tokio::test]
    async fn test_paging() {
        let store = store_with_versions();
        let result = store
            .execute(&document(json!({"query": {"match_all": {}}, "from": 1, "size": 1})))
            .await
            .unwrap();
        assert_eq!(result.hits.total, 3);
        assert_eq!(result.hits.hits.len(), 1);
        assert_eq!(result.hits.hits[0]["_id"], "2");

        let empty = store.execute(&QueryDocument::match_all(0)).await.unwrap();
        assert_eq!(empty.hits.total, 3);
        assert!(empty.hits.hits.is_empty());
        assert_eq!(empty.hits.max_score, None);
    }

    #[tokio::test]
    async fn test_window_too_large() {
        let store = MemoryStore::default();
        let err = store
            .execute(&document(json!({"from": 10000, "size": 1000})))
            .await
            .unwrap_err();
        let message = match err {
            StoreError::WindowTooLarge(message) => message,
            other => panic!("expected window error, got {other:?}"),
        };
        assert!(message.starts_with(
            "Result window is too large, from + size must be less than or equal to: [10000] but was [11000]."
        ));
    }

    #[tokio::test]
    async fn test_custom_window() {
        let store = MemoryStore::default().with_max_result_window(5);
        assert!(store.execute(&document(json!({"size": 5}))).await.is_ok());
        assert!(matches!(
            store.execute(&document(json!({"size": 6}))).await,
            Err(StoreError::WindowTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_aggregations_ignore_post_filter() {
        let store = store_with_versions();
        let body = json!({
            "query": {"term": {"source.product": "firefox"}},
            "post_filter": {"term": {"target.platform": "win64"}},
            "aggs": {"platforms": {"terms": {"field": "target.platform"}}}
        });
        let result = store.execute(&document(body)).await.unwrap();
        assert_eq!(result.hits.total, 1);
        assert_eq!(
            result.aggregations["platforms"]["buckets"],
            json!([{"key": "linux", "doc_count": 2}, {"key": "win64", "doc_count": 1}])
        );
    }

    #[tokio::test]
    async fn test_sort() {
        let store = store_with_versions();
        let body = json!({"sort": [{"build.date": {"order": "desc"}}, "_score"]});
        let result = store.execute(&document(body)).await.unwrap();
        let dates: Vec<&Value> = result.hits.hits.iter().map(|h| &h["_source"]["build"]["date"]).collect();
        assert_eq!(dates, [&json!("2018-05-03"), &json!("2018-05-02"), &json!("2018-05-01")]);

        let err = store
            .execute(&document(json!({"sort": {"build.date": "sideways"}})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown sort order"));
    }

    #[tokio::test]
    async fn test_empty_term_field() {
        let store = store_with_versions();
        let err = store
            .execute(&document(json!({"query": {"term": {"": "x"}}})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::MalformedQuery(StoreMessage::Structured(StructuredReason::with_type(
                "field name is null or empty",
                "query_shard_exception"
            )))
        );
    }

    #[tokio::test]
    async fn test_count_and_replace() {
        let store = MemoryStore::default();
        assert!(store.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);

        store.insert_with_id("a", json!({"n": 1}));
        store.insert_with_id("a", json!({"n": 2}));
        assert_eq!(store.count().await.unwrap(), 1);

        let result = store.execute(&document(json!({"query": {"ids": {"values": ["a"]}}}))).await.unwrap();
        assert_eq!(result.hits.hits[0]["_source"], json!({"n": 2}));

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_string_paging_accepted() {
        let store = store_with_versions();
        let result = store.execute(&document(json!({"size": "2"}))).await.unwrap();
        assert_eq!(result.hits.hits.len(), 2);

        let err = store.execute(&document(json!({"size": -3}))).await.unwrap_err();
        assert!(matches!(err, StoreError::MalformedQuery(_)));
    }
}
