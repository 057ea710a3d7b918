//! Resource limits applied to accepted documents
//!
//! Only the result count is capped here. The `from + size` window and
//! aggregation bucket sizes are store configuration and are left for the
//! store to refuse.

use super::render;
use super::types::QueryDocument;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ceilings injected into the guard and the listing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    /// Largest `size` a client may ask for
    pub max_search_size: u64,
    /// `size` used by the match-all listing
    pub default_size: u64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_search_size: 1000,
            default_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    #[error("Search size too large ({0})")]
    SizeTooLarge(u64),

    #[error("Search {field} must be a non-negative integer ({raw})")]
    NotAnInteger { field: &'static str, raw: String },
}

/// Enforces paging ceilings and normalizes paging values to integers
#[derive(Debug, Clone, Copy)]
pub struct LimitGuard {
    limits: SearchLimits,
}

impl LimitGuard {
    pub fn new(limits: SearchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SearchLimits {
        self.limits
    }

    /// Coerce `size` and `from` to integers and check `size` against the
    /// ceiling. The returned document carries the coerced values.
    pub fn enforce(&self, mut document: QueryDocument) -> Result<QueryDocument, LimitError> {
        if let Some(raw) = document.size() {
            let size = coerce("size", raw)?;
            if size > self.limits.max_search_size {
                return Err(LimitError::SizeTooLarge(size));
            }
            document.set("size", Value::from(size));
        }

        if let Some(raw) = document.offset() {
            let from = coerce("from", raw)?;
            document.set("from", Value::from(from));
        }

        Ok(document)
    }
}

/// Integers, integral floats and numeric strings become `u64`
fn coerce(field: &'static str, raw: &Value) -> Result<u64, LimitError> {
    let coerced = match raw {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    coerced.ok_or_else(|| LimitError::NotAnInteger {
        field,
        raw: render(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(body: Value) -> QueryDocument {
        match body {
            Value::Object(map) => QueryDocument::from_map(map),
            _ => unreachable!(),
        }
    }

    fn guard() -> LimitGuard {
        LimitGuard::new(SearchLimits::default())
    }

    #[test]
    fn test_size_at_ceiling_is_accepted() {
        let doc = guard().enforce(document(json!({"size": 1000}))).unwrap();
        assert_eq!(doc.size(), Some(&json!(1000)));
    }

    #[test]
    fn test_size_over_ceiling() {
        let err = guard().enforce(document(json!({"size": 1001}))).unwrap_err();
        assert_eq!(err.to_string(), "Search size too large (1001)");
    }

    #[test]
    fn test_string_size_is_coerced_before_comparison() {
        let body = json!({"query": {"match_all": {}}, "size": "1001"});
        let err = guard().enforce(document(body)).unwrap_err();
        assert_eq!(err, LimitError::SizeTooLarge(1001));

        let doc = guard().enforce(document(json!({"size": " 0"}))).unwrap();
        assert_eq!(doc.size(), Some(&json!(0)));
    }

    #[test]
    fn test_integral_float_is_coerced() {
        let doc = guard().enforce(document(json!({"size": 5.0, "from": 20.0}))).unwrap();
        assert_eq!(doc.size(), Some(&json!(5)));
        assert_eq!(doc.offset(), Some(&json!(20)));
    }

    #[test]
    fn test_negative_or_non_numeric_size() {
        let err = guard().enforce(document(json!({"size": -1}))).unwrap_err();
        assert_eq!(err.to_string(), "Search size must be a non-negative integer (-1)");

        let err = guard().enforce(document(json!({"size": "ten"}))).unwrap_err();
        assert_eq!(err.to_string(), "Search size must be a non-negative integer (\"ten\")");

        let err = guard().enforce(document(json!({"size": 2.5}))).unwrap_err();
        assert!(matches!(err, LimitError::NotAnInteger { field: "size", .. }));
    }

    #[test]
    fn test_from_is_coerced_but_not_capped() {
        let body = json!({"from": "10000", "size": 1000});
        let doc = guard().enforce(document(body)).unwrap();
        assert_eq!(doc.offset(), Some(&json!(10000)));

        let err = guard().enforce(document(json!({"from": []}))).unwrap_err();
        assert_eq!(err.to_string(), "Search from must be a non-negative integer ([])");
    }

    #[test]
    fn test_missing_paging_is_left_alone() {
        let body = json!({"query": {"match_all": {}}});
        let doc = guard().enforce(document(body.clone())).unwrap();
        assert_eq!(doc.into_value(), body);
    }

    #[test]
    fn test_coercion_keeps_key_order() {
        let body = json!({"size": "3", "query": {"match_all": {}}, "from": "1"});
        let doc = guard().enforce(document(body)).unwrap();
        let keys: Vec<&String> = doc.as_map().keys().collect();
        assert_eq!(keys, ["size", "query", "from"]);
    }

    #[test]
    fn test_custom_ceiling() {
        let guard = LimitGuard::new(SearchLimits {
            max_search_size: 50,
            default_size: 10,
        });
        assert_eq!(
            guard.enforce(document(json!({"size": 51}))).unwrap_err(),
            LimitError::SizeTooLarge(51)
        );
    }
}
