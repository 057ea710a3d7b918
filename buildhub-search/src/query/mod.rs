//! Query document model, validation and resource limits

mod limits;
mod parse;
pub mod types;
mod validator;

pub use limits::{LimitError, LimitGuard, SearchLimits};
pub use parse::{parse_body, ParseError};
pub use types::{AggregationKind, AggregationNode, QueryClause, QueryClauseKind, QueryDocument};
pub use validator::{ValidationError, Validator};

/// Compact JSON rendering used inside rejection messages
pub(crate) fn render(value: &serde_json::Value) -> String {
    value.to_string()
}
