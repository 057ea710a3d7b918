//! `/api/search`

use super::SearchState;
use crate::error::SearchError;
use crate::query::{parse_body, QueryDocument, Validator};
use crate::response::SearchResult;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::Json;

/// POST /api/search - validated Query DSL search
///
/// The body is taken raw so decoding errors are reported in the query
/// model's own wording rather than the extractor's.
pub async fn search_handler(
    State(state): State<SearchState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SearchResult>, SearchError> {
    let body = body.map_err(|rejection| SearchError::RequestBody {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;

    let document = Validator::validate(parse_body(&body)?)?;
    let document = state.guard.enforce(document)?;

    tracing::debug!(
        size = ?document.size(),
        from = ?document.offset(),
        aggs = document.aggs().is_some(),
        "accepted search"
    );

    let result = state.executor.execute(&document).await?;
    Ok(Json(result))
}

/// GET /api/search - match-all listing
pub async fn list_handler(State(state): State<SearchState>) -> Result<Json<SearchResult>, SearchError> {
    let document = QueryDocument::match_all(state.guard.limits().default_size);
    let result = state.executor.execute(&document).await?;
    Ok(Json(result))
}
