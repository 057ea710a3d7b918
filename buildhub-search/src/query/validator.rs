//! Structural validation of search documents
//!
//! The walk is depth-first and follows document key order, so the first
//! violation found is always the same one for the same document. Nesting depth
//! is bounded by the JSON decoder's recursion limit.

use super::render;
use super::types::{AggregationKind, AggregationNode, QueryClause, QueryClauseKind, QueryDocument};
use serde_json::Value;

/// Bool occurrence lists holding nested clauses
const BOOL_OCCURRENCES: [&str; 4] = ["must", "filter", "should", "must_not"];

/// Top-level keys holding a single query clause
const CLAUSE_KEYS: [&str; 2] = ["query", "post_filter"];

/// Top-level keys holding an aggregation map
const AGGREGATION_KEYS: [&str; 2] = ["aggs", "aggregations"];

/// Why a search document was rejected before reaching the store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Search body must be a JSON object")]
    NotAnObject,

    #[error("Q() can only accept dict with a single query ({{\"match\": {{...}}}}). Instead it got ({0})")]
    QueryShape(String),

    #[error("DSL class `{0}` does not exist in query.")]
    UnknownQueryKind(String),

    #[error("A() can only accept dict with an aggregation ({{\"terms\": {{...}}}}). Instead it got ({0})")]
    AggregationShape(String),

    #[error("DSL class `{0}` does not exist in agg.")]
    UnknownAggregationKind(String),

    #[error("field name is null or empty")]
    EmptyFieldName,
}

/// Validates client search documents against the supported DSL subset
pub struct Validator;

impl Validator {
    /// Accept a decoded body as a query document, or return the first
    /// violation found.
    pub fn validate(body: Value) -> Result<QueryDocument, ValidationError> {
        let Value::Object(map) = body else {
            return Err(ValidationError::NotAnObject);
        };

        for (key, value) in &map {
            if CLAUSE_KEYS.contains(&key.as_str()) {
                Self::validate_clause(value)?;
            } else if AGGREGATION_KEYS.contains(&key.as_str()) {
                Self::validate_aggregations(value)?;
            }
        }

        Ok(QueryDocument::from_map(map))
    }

    fn validate_clause(value: &Value) -> Result<(), ValidationError> {
        let clause = QueryClause::parse(value)?;

        match clause.kind {
            QueryClauseKind::Term => Self::validate_term(clause.body),
            QueryClauseKind::Bool => {
                let Some(occurrences) = clause.body.as_object() else {
                    return Ok(());
                };
                for (occurrence, clauses) in occurrences {
                    if BOOL_OCCURRENCES.contains(&occurrence.as_str()) {
                        Self::validate_clause_list(clauses)?;
                    }
                }
                Ok(())
            }
            QueryClauseKind::ConstantScore => match clause.body.get("filter") {
                Some(filter) => Self::validate_clause(filter),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// A bool occurrence holds either one clause or a list of them
    fn validate_clause_list(value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Array(clauses) => clauses.iter().try_for_each(Self::validate_clause),
            Value::Object(_) => Self::validate_clause(value),
            other => Err(ValidationError::QueryShape(render(other))),
        }
    }

    fn validate_term(body: &Value) -> Result<(), ValidationError> {
        match body {
            Value::Null => Err(ValidationError::EmptyFieldName),
            Value::Object(fields) if fields.is_empty() || fields.contains_key("") => {
                Err(ValidationError::EmptyFieldName)
            }
            _ => Ok(()),
        }
    }

    fn validate_aggregations(value: &Value) -> Result<(), ValidationError> {
        let Some(aggregations) = value.as_object() else {
            return Err(ValidationError::AggregationShape(render(value)));
        };

        for body in aggregations.values() {
            let node = AggregationNode::parse(body)?;

            match node.kind {
                AggregationKind::Filter => Self::validate_clause(node.params)?,
                AggregationKind::Filters => Self::validate_filters(node.params)?,
                _ => {}
            }

            if let Some(sub_aggs) = node.sub_aggs {
                Self::validate_aggregations(sub_aggs)?;
            }
        }

        Ok(())
    }

    /// `filters` takes named clauses (object) or anonymous ones (list)
    fn validate_filters(params: &Value) -> Result<(), ValidationError> {
        match params.get("filters") {
            Some(Value::Object(named)) => named.values().try_for_each(Self::validate_clause),
            Some(Value::Array(anonymous)) => anonymous.iter().try_for_each(Self::validate_clause),
            Some(other) => Err(ValidationError::QueryShape(render(other))),
            None => Ok(()),
        }
    }
}
