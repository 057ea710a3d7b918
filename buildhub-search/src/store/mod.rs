//! Search store contract and implementations

mod elasticsearch;
mod memory;

pub use elasticsearch::ElasticsearchStore;
pub use memory::MemoryStore;

use crate::error::StructuredReason;
use crate::query::QueryDocument;
use crate::response::SearchResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// What the store said about a query it refused.
///
/// Decided once, where the store's own error representation is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMessage {
    Flat(String),
    Structured(StructuredReason),
}

impl std::fmt::Display for StoreMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat(message) => f.write_str(message),
            Self::Structured(reason) => f.write_str(&reason.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store refused the query itself
    #[error("malformed query: {0}")]
    MalformedQuery(StoreMessage),

    /// `from + size` exceeded the store's result window
    #[error("{0}")]
    WindowTooLarge(String),

    /// The store could not be reached or failed server-side
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something that is not a search response
    #[error("unexpected store response: {0}")]
    UnexpectedResponse(String),
}

/// A document store able to run search documents
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Run one search document. A single attempt; never retried.
    async fn execute(&self, document: &QueryDocument) -> Result<SearchResult, StoreError>;

    /// Number of stored records
    async fn count(&self) -> Result<u64, StoreError> {
        let result = self.execute(&QueryDocument::match_all(0)).await?;
        Ok(result.hits.total)
    }

    /// Human-readable store name
    fn name(&self) -> &str;
}

/// Runs validated documents against the configured store
#[derive(Clone)]
pub struct SearchExecutor {
    store: Arc<dyn SearchStore>,
}

impl SearchExecutor {
    pub fn new(store: Arc<dyn SearchStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, document: &QueryDocument) -> Result<SearchResult, StoreError> {
        let start = Instant::now();
        let outcome = self.store.execute(document).await;
        let took_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => tracing::debug!(
                store = self.store.name(),
                took_ms,
                total = result.hits.total,
                "search executed"
            ),
            Err(err) => tracing::debug!(store = self.store.name(), took_ms, error = %err, "search failed"),
        }

        outcome
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.store.count().await
    }
}
