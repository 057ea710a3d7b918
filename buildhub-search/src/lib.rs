//! Validated search front-end for the build-record store
//!
//! Clients POST a JSON query document written in a subset of the
//! Elasticsearch Query DSL. Before anything reaches the store the document is
//! parsed, structurally validated and checked against resource limits; store
//! failures are translated into a stable JSON error envelope.
//!
//! # Endpoints
//!
//! - `POST /api/search` - validated search with Query DSL
//! - `GET /api/search` - match-all listing
//! - `GET /api/records` - total number of stored build records
//! - `GET /health` - liveness probe
//!
//! # Query DSL Support
//!
//! Query clauses: `bool`, `constant_score`, `match_all`, `match_none`,
//! `match` / `match_phrase` / `match_phrase_prefix` / `multi_match`,
//! `term` / `terms`, `range`, `exists`, `prefix`, `wildcard`, `regexp`,
//! `fuzzy`, `ids`, `query_string`, `simple_query_string`.
//!
//! Aggregations: `terms`, `significant_terms`, `cardinality`, `filter`,
//! `filters`, `global`, `missing`, `histogram`, `date_histogram`, `range`,
//! `date_range`, `value_count`, `avg`, `sum`, `min`, `max`, `stats`,
//! `extended_stats`, `percentiles`, `top_hits`.

pub mod config;
pub mod error;
pub mod query;
pub mod response;
pub mod router;
pub mod store;

mod endpoints;

pub use endpoints::SearchState;
pub use error::SearchError;
pub use router::search_router;

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;
