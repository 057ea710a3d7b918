//! Aggregation evaluation over a matched document set

use super::matcher::{anchored, compare_values, field_values, scalar_text, Predicate};
use super::{parsing_error, StoredDocument};
use crate::query::{AggregationKind, AggregationNode};
use crate::store::StoreError;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

const DEFAULT_TERMS_SIZE: usize = 10;

/// Evaluation context: the documents in scope, and every stored document for
/// `global`
pub(super) struct Scope<'a> {
    pub docs: Vec<&'a StoredDocument>,
    pub all: &'a [StoredDocument],
}

pub(super) fn aggregate(aggs: &Value, scope: &Scope<'_>) -> Result<Map<String, Value>, StoreError> {
    let entries = aggs
        .as_object()
        .ok_or_else(|| parsing_error(format!("Expected [START_OBJECT] under aggregations, found {aggs}")))?;

    let mut results = Map::new();
    for (name, body) in entries {
        let node = AggregationNode::parse(body).map_err(|e| parsing_error(e.to_string()))?;
        if node.sub_aggs.is_some() && !node.kind.is_bucket() {
            return Err(parsing_error(format!(
                "Aggregator [{name}] of type [{}] cannot accept sub-aggregations",
                node.kind.as_str()
            )));
        }
        results.insert(name.clone(), evaluate(&node, scope)?);
    }
    Ok(results)
}

fn evaluate(node: &AggregationNode<'_>, scope: &Scope<'_>) -> Result<Value, StoreError> {
    let params = node.params;
    match node.kind {
        AggregationKind::Terms => terms(params, node.sub_aggs, scope),
        AggregationKind::Filter => {
            bucket(select(scope, params)?, node.sub_aggs, scope.all).map(Value::Object)
        }
        AggregationKind::Filters => filters(params, node.sub_aggs, scope),
        AggregationKind::Global => {
            bucket(scope.all.iter().collect(), node.sub_aggs, scope.all).map(Value::Object)
        }
        AggregationKind::Missing => {
            let field = required_field(node.kind, params)?;
            let docs = scope
                .docs
                .iter()
                .copied()
                .filter(|d| field_values(&d.source, field).is_empty())
                .collect();
            bucket(docs, node.sub_aggs, scope.all).map(Value::Object)
        }
        AggregationKind::Cardinality => {
            let field = required_field(node.kind, params)?;
            let distinct: HashSet<String> = values_of(scope, field).filter_map(scalar_text).collect();
            Ok(json!({"value": distinct.len()}))
        }
        AggregationKind::ValueCount => {
            let field = required_field(node.kind, params)?;
            Ok(json!({"value": values_of(scope, field).count()}))
        }
        AggregationKind::Avg
        | AggregationKind::Sum
        | AggregationKind::Min
        | AggregationKind::Max
        | AggregationKind::Stats => {
            let field = required_field(node.kind, params)?;
            let numbers: Vec<f64> = values_of(scope, field).filter_map(Value::as_f64).collect();
            Ok(metric(node.kind, &numbers))
        }
        other => Err(parsing_error(format!(
            "[{}] aggregations are not supported by the in-memory store",
            other.as_str()
        ))),
    }
}

fn required_field(kind: AggregationKind, params: &Value) -> Result<&str, StoreError> {
    params
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| parsing_error(format!("Required [field] for [{}] aggregation", kind.as_str())))
}

fn values_of<'a>(scope: &'a Scope<'a>, field: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    scope.docs.iter().flat_map(move |d| field_values(&d.source, field))
}

fn metric(kind: AggregationKind, numbers: &[f64]) -> Value {
    let sum: f64 = numbers.iter().sum();
    let min = numbers.iter().copied().reduce(f64::min);
    let max = numbers.iter().copied().reduce(f64::max);
    let avg = (!numbers.is_empty()).then(|| sum / numbers.len() as f64);

    match kind {
        AggregationKind::Sum => json!({"value": sum}),
        AggregationKind::Min => json!({"value": min}),
        AggregationKind::Max => json!({"value": max}),
        AggregationKind::Avg => json!({"value": avg}),
        _ => json!({
            "count": numbers.len(),
            "min": min,
            "max": max,
            "avg": avg,
            "sum": sum,
        }),
    }
}

/// Documents in scope matching a filter clause
fn select<'a>(scope: &Scope<'a>, clause: &Value) -> Result<Vec<&'a StoredDocument>, StoreError> {
    let predicate = Predicate::compile(clause)?;
    Ok(scope.docs.iter().copied().filter(|d| predicate.matches(d)).collect())
}

/// `{"doc_count": n, ...sub-aggregations}`
fn bucket(
    docs: Vec<&StoredDocument>,
    sub_aggs: Option<&Value>,
    all: &[StoredDocument],
) -> Result<Map<String, Value>, StoreError> {
    let mut result = Map::new();
    result.insert("doc_count".to_string(), Value::from(docs.len()));
    if let Some(sub_aggs) = sub_aggs {
        let scope = Scope { docs, all };
        result.extend(aggregate(sub_aggs, &scope)?);
    }
    Ok(result)
}

fn filters(params: &Value, sub_aggs: Option<&Value>, scope: &Scope<'_>) -> Result<Value, StoreError> {
    match params.get("filters") {
        Some(Value::Object(named)) => {
            let mut buckets = Map::new();
            for (name, clause) in named {
                buckets.insert(name.clone(), Value::Object(bucket(select(scope, clause)?, sub_aggs, scope.all)?));
            }
            Ok(json!({"buckets": buckets}))
        }
        Some(Value::Array(anonymous)) => {
            let buckets = anonymous
                .iter()
                .map(|clause| Ok(Value::Object(bucket(select(scope, clause)?, sub_aggs, scope.all)?)))
                .collect::<Result<Vec<_>, StoreError>>()?;
            Ok(json!({"buckets": buckets}))
        }
        _ => Err(parsing_error("[filters] cannot be empty.")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderKey {
    Count,
    Key,
}

/// Include/exclude terms by anchored pattern or exact list
enum TermFilter {
    Pattern(Regex),
    Exact(Vec<String>),
}

impl TermFilter {
    fn parse(value: Option<&Value>) -> Result<Option<Self>, StoreError> {
        match value {
            None => Ok(None),
            Some(Value::String(pattern)) => anchored(pattern).map(|re| Some(Self::Pattern(re))),
            Some(Value::Array(terms)) => Ok(Some(Self::Exact(terms.iter().filter_map(scalar_text).collect()))),
            Some(other) => Err(parsing_error(format!("Unsupported include/exclude value {other}"))),
        }
    }

    fn accepts(&self, term: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(term),
            Self::Exact(terms) => terms.iter().any(|t| t == term),
        }
    }
}

struct TermBucket<'a> {
    key: Value,
    docs: Vec<&'a StoredDocument>,
}

fn terms(params: &Value, sub_aggs: Option<&Value>, scope: &Scope<'_>) -> Result<Value, StoreError> {
    let field = required_field(AggregationKind::Terms, params)?;
    let size = match params.get("size") {
        None => DEFAULT_TERMS_SIZE,
        Some(raw) => raw
            .as_u64()
            .filter(|n| *n > 0)
            .ok_or_else(|| parsing_error(format!("[size] must be greater than 0. Found [{raw}] in [{field}]")))?
            as usize,
    };
    let min_doc_count = params.get("min_doc_count").and_then(Value::as_u64).unwrap_or(1) as usize;
    let include = TermFilter::parse(params.get("include"))?;
    let exclude = TermFilter::parse(params.get("exclude"))?;
    let order = parse_order(params.get("order"))?;

    let mut grouped: BTreeMap<String, TermBucket<'_>> = BTreeMap::new();
    for &doc in &scope.docs {
        let mut seen = HashSet::new();
        for value in field_values(&doc.source, field) {
            let Some(term) = scalar_text(value) else {
                continue;
            };
            if !seen.insert(term.clone()) {
                continue;
            }
            if include.as_ref().is_some_and(|f| !f.accepts(&term)) || exclude.as_ref().is_some_and(|f| f.accepts(&term)) {
                continue;
            }
            grouped
                .entry(term)
                .or_insert_with(|| TermBucket {
                    key: value.clone(),
                    docs: Vec::new(),
                })
                .docs
                .push(doc);
        }
    }

    let mut ranked: Vec<TermBucket<'_>> = grouped
        .into_values()
        .filter(|b| b.docs.len() >= min_doc_count)
        .collect();
    ranked.sort_by(|a, b| compare_buckets(a, b, &order));

    let sum_other_doc_count: usize = ranked.iter().skip(size).map(|b| b.docs.len()).sum();
    let mut buckets = Vec::with_capacity(size.min(ranked.len()));
    for term_bucket in ranked.into_iter().take(size) {
        let mut entry = Map::new();
        entry.insert("key".to_string(), term_bucket.key);
        entry.extend(bucket(term_bucket.docs, sub_aggs, scope.all)?);
        buckets.push(Value::Object(entry));
    }

    Ok(json!({
        "doc_count_error_upper_bound": 0,
        "sum_other_doc_count": sum_other_doc_count,
        "buckets": buckets,
    }))
}

/// `order` as an object or a list of objects; defaults to count desc
fn parse_order(order: Option<&Value>) -> Result<Vec<(OrderKey, bool)>, StoreError> {
    let criteria: Vec<&Map<String, Value>> = match order {
        None => return Ok(vec![(OrderKey::Count, true)]),
        Some(Value::Object(single)) => vec![single],
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_object).collect(),
        Some(other) => return Err(parsing_error(format!("Unexpected token in [order]: {other}"))),
    };

    let mut parsed = Vec::new();
    for (criterion, direction) in criteria.into_iter().flatten() {
        let key = match criterion.as_str() {
            "_count" => OrderKey::Count,
            "_term" | "_key" => OrderKey::Key,
            other => {
                return Err(parsing_error(format!(
                    "Ordering by [{other}] is not supported by the in-memory store"
                )))
            }
        };
        let descending = match direction.as_str() {
            Some(d) if d.eq_ignore_ascii_case("desc") => true,
            Some(d) if d.eq_ignore_ascii_case("asc") => false,
            _ => return Err(parsing_error(format!("Unknown terms order direction [{direction}]"))),
        };
        parsed.push((key, descending));
    }
    Ok(parsed)
}

fn compare_buckets(a: &TermBucket<'_>, b: &TermBucket<'_>, order: &[(OrderKey, bool)]) -> Ordering {
    let by_key = |a: &TermBucket<'_>, b: &TermBucket<'_>| compare_values(&a.key, &b.key).unwrap_or(Ordering::Equal);

    for (key, descending) in order {
        let ordering = match key {
            OrderKey::Count => a.docs.len().cmp(&b.docs.len()),
            OrderKey::Key => by_key(a, b),
        };
        let ordering = if *descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    // Ties break on ascending key
    by_key(a, b)
}
