//! Error taxonomy and translation into the public error envelope

use crate::query::{LimitError, ParseError, ValidationError};
use crate::store::{StoreError, StoreMessage};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every failure a search request can end in
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Limit(#[from] LimitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HTTP layer refused the body (too large, unreadable)
    #[error("{message}")]
    RequestBody { status: StatusCode, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reason object forwarded when the failure carries one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredReason {
    pub reason: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl StructuredReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            error_type: None,
        }
    }

    pub fn with_type(reason: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            error_type: Some(error_type.into()),
        }
    }
}

/// `{"error": "..."}` or `{"error": {"reason": "..."}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(String),
    Reason(StructuredReason),
}

impl ErrorEnvelope {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody::Message(message.into()),
        }
    }

    pub fn reason(reason: StructuredReason) -> Self {
        Self {
            error: ErrorBody::Reason(reason),
        }
    }
}

impl From<&StoreMessage> for ErrorEnvelope {
    fn from(message: &StoreMessage) -> Self {
        match message {
            StoreMessage::Flat(text) => Self::message(text.clone()),
            StoreMessage::Structured(reason) => Self::reason(reason.clone()),
        }
    }
}

impl SearchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Parse(_) | Self::Validation(_) | Self::Limit(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::MalformedQuery(_) | StoreError::WindowTooLarge(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(StoreError::UnexpectedResponse(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::RequestBody { status, .. } => *status,
        }
    }

    /// Map the failure onto its status code and client-facing envelope.
    ///
    /// Server-side failures are logged here with full detail; the client only
    /// sees an opaque message carrying the incident id.
    pub fn translate(&self) -> (StatusCode, ErrorEnvelope) {
        let status = self.status_code();
        let envelope = match self {
            Self::Parse(err) => {
                tracing::info!(error = %err, "rejected unparsable search body");
                ErrorEnvelope::message(err.to_string())
            }
            Self::Validation(ValidationError::EmptyFieldName) => {
                tracing::info!("rejected term clause without a field name");
                // Clients already read this one from `error.reason`, the shape
                // the store itself answers with.
                ErrorEnvelope::reason(StructuredReason::new(
                    ValidationError::EmptyFieldName.to_string(),
                ))
            }
            Self::Validation(err) => {
                tracing::info!(error = %err, "rejected invalid search document");
                ErrorEnvelope::message(err.to_string())
            }
            Self::Limit(err) => {
                tracing::info!(error = %err, "rejected search over resource limits");
                ErrorEnvelope::message(err.to_string())
            }
            Self::Store(StoreError::MalformedQuery(message)) => {
                tracing::warn!(error = %self, "store rejected search");
                ErrorEnvelope::from(message)
            }
            Self::Store(StoreError::WindowTooLarge(message)) => {
                tracing::warn!(error = %message, "store rejected result window");
                ErrorEnvelope::message(message.clone())
            }
            Self::Store(StoreError::Unavailable(detail)) => {
                let incident = Uuid::new_v4();
                tracing::error!(%incident, error = %detail, "search store unavailable");
                ErrorEnvelope::message(format!(
                    "Search backend unavailable (incident {incident})"
                ))
            }
            Self::Store(StoreError::UnexpectedResponse(_)) | Self::Internal(_) => {
                let incident = Uuid::new_v4();
                tracing::error!(%incident, error = ?self, "internal error while searching");
                ErrorEnvelope::message(format!("Internal server error (incident {incident})"))
            }
            Self::RequestBody { message, .. } => {
                tracing::info!(%status, error = %message, "rejected request body");
                ErrorEnvelope::message(message.clone())
            }
        };
        (status, envelope)
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let (status, envelope) = self.translate();
        (status, axum::Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_json(err: SearchError) -> (u16, serde_json::Value) {
        let (status, envelope) = err.translate();
        (status.as_u16(), serde_json::to_value(envelope).unwrap())
    }

    #[test]
    fn test_validation_error_is_flat() {
        let err = SearchError::from(ValidationError::UnknownAggregationKind("date".into()));
        let (status, body) = envelope_json(err);
        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "DSL class `date` does not exist in agg."}));
    }

    #[test]
    fn test_empty_field_name_is_nested_under_reason() {
        let (status, body) = envelope_json(ValidationError::EmptyFieldName.into());
        assert_eq!(status, 400);
        assert_eq!(body["error"]["reason"], "field name is null or empty");
    }

    #[test]
    fn test_limit_error_is_flat() {
        let (status, body) = envelope_json(LimitError::SizeTooLarge(1001).into());
        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "Search size too large (1001)"}));
    }

    #[test]
    fn test_store_structured_reason_is_nested() {
        let err = StoreError::MalformedQuery(StoreMessage::Structured(
            StructuredReason::with_type("no [query] registered for [foo]", "parsing_exception"),
        ));
        let (status, body) = envelope_json(err.into());
        assert_eq!(status, 400);
        assert_eq!(
            body,
            json!({"error": {"reason": "no [query] registered for [foo]", "type": "parsing_exception"}})
        );
    }

    #[test]
    fn test_store_flat_message_is_flat() {
        let err = StoreError::MalformedQuery(StoreMessage::Flat("bad request".into()));
        let (_, body) = envelope_json(err.into());
        assert_eq!(body, json!({"error": "bad request"}));
    }

    #[test]
    fn test_window_too_large_is_flat() {
        let err = StoreError::WindowTooLarge("Result window is too large".into());
        let (status, body) = envelope_json(err.into());
        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "Result window is too large"}));
    }

    #[test]
    fn test_internal_error_is_opaque() {
        let err = SearchError::Internal("pool exhausted at 0x7f3a".into());
        let (status, body) = envelope_json(err);
        assert_eq!(status, 500);
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("Internal server error (incident "));
        assert!(!message.contains("0x7f3a"));
    }

    #[test]
    fn test_unavailable_is_503_and_opaque() {
        let err = StoreError::Unavailable("connection refused (os error 111)".into());
        let (status, body) = envelope_json(err.into());
        assert_eq!(status, 503);
        assert!(!body["error"].as_str().unwrap().contains("os error"));
    }

    #[test]
    fn test_unexpected_store_response_is_internal() {
        let err = StoreError::UnexpectedResponse("missing field `hits`".into());
        let (status, body) = envelope_json(err.into());
        assert_eq!(status, 500);
        assert!(!body["error"].as_str().unwrap().contains("hits"));
    }
}
