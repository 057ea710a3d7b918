use super::SearchState;
use crate::error::SearchError;
use crate::response::RecordsResponse;
use axum::extract::State;
use axum::Json;

/// GET /api/records - number of stored build records
pub async fn records_handler(State(state): State<SearchState>) -> Result<Json<RecordsResponse>, SearchError> {
    let total = state.executor.count().await?;
    Ok(Json(RecordsResponse::new(total)))
}
