//! Query clause evaluation over stored documents

use super::{parsing_error, StoredDocument};
use crate::error::StructuredReason;
use crate::store::{StoreError, StoreMessage};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A compiled query clause
#[derive(Debug)]
pub(super) enum Predicate {
    All,
    Nothing,
    Term {
        field: String,
        value: Value,
    },
    Terms {
        field: String,
        values: Vec<Value>,
    },
    Match {
        fields: Vec<String>,
        tokens: Vec<String>,
        require_all: bool,
    },
    Phrase {
        field: String,
        phrase: String,
    },
    Range {
        field: String,
        bounds: Vec<(RangeOp, Value)>,
    },
    Exists {
        field: String,
    },
    Prefix {
        field: String,
        prefix: String,
    },
    Pattern {
        field: String,
        pattern: Regex,
    },
    Ids(Vec<String>),
    Bool {
        must: Vec<Predicate>,
        must_not: Vec<Predicate>,
        should: Vec<Predicate>,
        minimum_should_match: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

fn field_name_error() -> StoreError {
    StoreError::MalformedQuery(StoreMessage::Structured(StructuredReason::with_type(
        "field name is null or empty",
        "query_shard_exception",
    )))
}

impl Predicate {
    pub(super) fn compile(clause: &Value) -> Result<Self, StoreError> {
        let (kind, body) = match clause.as_object().map(|m| (m.len(), m.iter().next())) {
            Some((1, Some(entry))) => entry,
            _ => {
                return Err(parsing_error(format!(
                    "query malformed, expected a single clause object but found {clause}"
                )))
            }
        };

        match kind.as_str() {
            "match_all" => Ok(Self::All),
            "match_none" => Ok(Self::Nothing),
            "term" => {
                let (field, params) = single_field(kind, body)?;
                let value = params.get("value").unwrap_or(params).clone();
                Ok(Self::Term { field, value })
            }
            "terms" => {
                let fields = body
                    .as_object()
                    .ok_or_else(|| parsing_error("[terms] query malformed"))?;
                let (field, values) = fields
                    .iter()
                    .find(|(key, _)| key.as_str() != "boost")
                    .ok_or_else(field_name_error)?;
                if field.is_empty() {
                    return Err(field_name_error());
                }
                let values = values.as_array().cloned().ok_or_else(|| {
                    parsing_error(format!("[terms] query does not support [{field}]"))
                })?;
                Ok(Self::Terms {
                    field: field.clone(),
                    values,
                })
            }
            "match" => {
                let (field, params) = single_field(kind, body)?;
                let (text, operator) = match params {
                    Value::Object(options) => (
                        options.get("query").and_then(scalar_text),
                        options.get("operator").and_then(Value::as_str),
                    ),
                    other => (scalar_text(other), None),
                };
                Ok(Self::Match {
                    fields: vec![field],
                    tokens: tokenize(&text.unwrap_or_default()),
                    require_all: is_and(operator),
                })
            }
            "multi_match" => {
                let text = body
                    .get("query")
                    .and_then(scalar_text)
                    .ok_or_else(|| parsing_error("[multi_match] requires query"))?;
                let fields = body
                    .get("fields")
                    .and_then(Value::as_array)
                    .map(|fields| {
                        fields
                            .iter()
                            .filter_map(Value::as_str)
                            // Strip boosts such as "target.locale^2"
                            .map(|f| f.split('^').next().unwrap_or(f).to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Self::Match {
                    fields,
                    tokens: tokenize(&text),
                    require_all: is_and(body.get("operator").and_then(Value::as_str)),
                })
            }
            "match_phrase" => {
                let (field, params) = single_field(kind, body)?;
                let text = params.get("query").unwrap_or(params);
                Ok(Self::Phrase {
                    field,
                    phrase: tokenize(&scalar_text(text).unwrap_or_default()).join(" "),
                })
            }
            "range" => {
                let (field, params) = single_field(kind, body)?;
                let params = params
                    .as_object()
                    .ok_or_else(|| parsing_error(format!("[range] query malformed for [{field}]")))?;
                let bounds = params
                    .iter()
                    .filter_map(|(op, bound)| {
                        let op = match op.as_str() {
                            "gt" => RangeOp::Gt,
                            "gte" => RangeOp::Gte,
                            "lt" => RangeOp::Lt,
                            "lte" => RangeOp::Lte,
                            _ => return None,
                        };
                        Some((op, bound.clone()))
                    })
                    .collect();
                Ok(Self::Range { field, bounds })
            }
            "exists" => {
                let field = body
                    .get("field")
                    .and_then(Value::as_str)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(field_name_error)?;
                Ok(Self::Exists {
                    field: field.to_string(),
                })
            }
            "prefix" => {
                let (field, params) = single_field(kind, body)?;
                let prefix = scalar_text(params.get("value").unwrap_or(params)).unwrap_or_default();
                Ok(Self::Prefix { field, prefix })
            }
            "wildcard" | "regexp" => {
                let (field, params) = single_field(kind, body)?;
                let raw = scalar_text(params.get("value").unwrap_or(params)).unwrap_or_default();
                let source = if kind == "wildcard" {
                    wildcard_to_regex(&raw)
                } else {
                    raw
                };
                Ok(Self::Pattern {
                    field,
                    pattern: anchored(&source)?,
                })
            }
            "ids" => {
                let values = body
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(scalar_text).collect())
                    .unwrap_or_default();
                Ok(Self::Ids(values))
            }
            "bool" => compile_bool(body),
            "constant_score" => match body.get("filter") {
                Some(filter) => Self::compile(filter),
                None => Err(parsing_error("[constant_score] requires a 'filter' element")),
            },
            other => Err(parsing_error(format!(
                "[{other}] queries are not supported by the in-memory store"
            ))),
        }
    }

    pub(super) fn matches(&self, document: &StoredDocument) -> bool {
        let source = &document.source;
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::Term { field, value } => field_values(source, field)
                .into_iter()
                .any(|candidate| values_equal(candidate, value)),
            Self::Terms { field, values } => field_values(source, field)
                .into_iter()
                .any(|candidate| values.iter().any(|v| values_equal(candidate, v))),
            Self::Match {
                fields,
                tokens,
                require_all,
            } => {
                let haystack: Vec<String> = fields
                    .iter()
                    .flat_map(|field| field_values(source, field))
                    .filter_map(scalar_text)
                    .flat_map(|text| tokenize(&text))
                    .collect();
                let found = |token: &String| haystack.contains(token);
                if tokens.is_empty() {
                    false
                } else if *require_all {
                    tokens.iter().all(found)
                } else {
                    tokens.iter().any(found)
                }
            }
            Self::Phrase { field, phrase } => field_values(source, field)
                .into_iter()
                .filter_map(scalar_text)
                .any(|text| format!(" {} ", tokenize(&text).join(" ")).contains(&format!(" {phrase} "))),
            Self::Range { field, bounds } => {
                field_values(source, field).into_iter().any(|candidate| {
                    bounds.iter().all(|(op, bound)| {
                        match (op, compare_values(candidate, bound)) {
                            (_, None) => false,
                            (RangeOp::Gt, Some(order)) => order == Ordering::Greater,
                            (RangeOp::Gte, Some(order)) => order != Ordering::Less,
                            (RangeOp::Lt, Some(order)) => order == Ordering::Less,
                            (RangeOp::Lte, Some(order)) => order != Ordering::Greater,
                        }
                    })
                })
            }
            Self::Exists { field } => !field_values(source, field).is_empty(),
            Self::Prefix { field, prefix } => field_values(source, field)
                .into_iter()
                .filter_map(scalar_text)
                .any(|text| text.starts_with(prefix.as_str())),
            Self::Pattern { field, pattern } => field_values(source, field)
                .into_iter()
                .filter_map(scalar_text)
                .any(|text| pattern.is_match(&text)),
            Self::Ids(ids) => ids.contains(&document.id),
            Self::Bool {
                must,
                must_not,
                should,
                minimum_should_match,
            } => {
                must.iter().all(|p| p.matches(document))
                    && !must_not.iter().any(|p| p.matches(document))
                    && should.iter().filter(|p| p.matches(document)).count()
                        >= *minimum_should_match
            }
        }
    }
}

fn compile_bool(body: &Value) -> Result<Predicate, StoreError> {
    let occurrences = body
        .as_object()
        .ok_or_else(|| parsing_error("[bool] query malformed, no start_object after query name"))?;

    let mut must = Vec::new();
    let mut must_not = Vec::new();
    let mut should = Vec::new();
    for (occurrence, clauses) in occurrences {
        let target = match occurrence.as_str() {
            "must" | "filter" => &mut must,
            "must_not" => &mut must_not,
            "should" => &mut should,
            _ => continue,
        };
        match clauses {
            Value::Array(list) => {
                for clause in list {
                    target.push(Predicate::compile(clause)?);
                }
            }
            clause => target.push(Predicate::compile(clause)?),
        }
    }

    let minimum_should_match = match occurrences.get("minimum_should_match") {
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| parsing_error(format!("[bool] unsupported minimum_should_match {value}")))?
            as usize,
        None if must.is_empty() && !should.is_empty() => 1,
        None => 0,
    };

    Ok(Predicate::Bool {
        must,
        must_not,
        should,
        minimum_should_match,
    })
}

/// `{"<field>": <params>}`, the shape of single-field clauses
fn single_field<'a>(kind: &str, body: &'a Value) -> Result<(String, &'a Value), StoreError> {
    let fields: &Map<String, Value> = match body {
        Value::Object(fields) => fields,
        Value::Null => return Err(field_name_error()),
        _ => return Err(parsing_error(format!("[{kind}] query malformed, no start_object after query name"))),
    };
    let mut entries = fields.iter();
    match (entries.next(), entries.next()) {
        (None, _) => Err(field_name_error()),
        (Some((field, _)), None) if field.is_empty() => Err(field_name_error()),
        (Some((field, params)), None) => Ok((field.clone(), params)),
        (Some((first, _)), Some((second, _))) => Err(parsing_error(format!(
            "[{kind}] query doesn't support multiple fields, found [{first}] and [{second}]"
        ))),
    }
}

fn is_and(operator: Option<&str>) -> bool {
    operator.is_some_and(|op| op.eq_ignore_ascii_case("and"))
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut source = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source
}

/// Store patterns must match the whole term
pub(super) fn anchored(source: &str) -> Result<Regex, StoreError> {
    Regex::new(&format!("^(?:{source})$"))
        .map_err(|e| parsing_error(format!("invalid regular expression [{source}]: {e}")))
}

/// Scalar values at a (possibly dotted) field path; arrays are flattened
pub(super) fn field_values<'a>(source: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    collect_values(source, path, &mut out);
    out
}

fn collect_values<'a>(value: &'a Value, path: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_values(item, path, out);
            }
        }
        Value::Object(map) => {
            if let Some(leaf) = map.get(path) {
                push_leaf(leaf, out);
                return;
            }
            for (i, _) in path.match_indices('.') {
                if let Some(child) = map.get(&path[..i]) {
                    collect_values(child, &path[i + 1..], out);
                }
            }
        }
        _ => {}
    }
}

fn push_leaf<'a>(leaf: &'a Value, out: &mut Vec<&'a Value>) {
    match leaf {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                push_leaf(item, out);
            }
        }
        other => out.push(other),
    }
}

pub(super) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => scalar_text(a).is_some() && scalar_text(a) == scalar_text(b),
    }
}

/// Numeric when both sides are numbers, lexicographic otherwise
pub(super) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(scalar_text(a)?.cmp(&scalar_text(b)?)),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
