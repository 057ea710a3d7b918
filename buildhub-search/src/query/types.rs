//! Query DSL document model
//!
//! These types cover the subset of the Elasticsearch Query DSL the search
//! endpoint accepts. Clause and aggregation bodies stay as raw JSON: only the
//! parts that get policed are given a typed shape.

use super::render;
use super::validator::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Keys allowed next to the kind key in an aggregation body
const AGGREGATION_CONTAINER_KEYS: [&str; 3] = ["aggs", "aggregations", "meta"];

/// A client-supplied search document.
///
/// Top-level keys the service does not police are kept untouched, in their
/// original order, and forwarded to the store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryDocument {
    body: Map<String, Value>,
}

impl QueryDocument {
    pub fn from_map(body: Map<String, Value>) -> Self {
        Self { body }
    }

    /// `{"query": {"match_all": {}}, "size": <size>}`
    pub fn match_all(size: u64) -> Self {
        let mut body = Map::new();
        body.insert("query".to_string(), json!({"match_all": {}}));
        body.insert("size".to_string(), Value::from(size));
        Self { body }
    }

    pub fn query(&self) -> Option<&Value> {
        self.body.get("query")
    }

    /// The aggregation map, under either of its spellings
    pub fn aggs(&self) -> Option<&Value> {
        self.body
            .get("aggs")
            .or_else(|| self.body.get("aggregations"))
    }

    pub fn size(&self) -> Option<&Value> {
        self.body.get("size")
    }

    /// The `from` paging offset
    pub fn offset(&self) -> Option<&Value> {
        self.body.get("from")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Replace a top-level value in place, keeping its position
    pub fn set(&mut self, key: &str, value: Value) {
        self.body.insert(key.to_string(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

impl From<QueryDocument> for Value {
    fn from(document: QueryDocument) -> Self {
        document.into_value()
    }
}

/// Query clause kinds the endpoint recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryClauseKind {
    MatchAll,
    MatchNone,
    Match,
    MatchPhrase,
    MatchPhrasePrefix,
    MultiMatch,
    Term,
    Terms,
    Range,
    Exists,
    Prefix,
    Wildcard,
    Regexp,
    Fuzzy,
    Ids,
    Bool,
    ConstantScore,
    QueryString,
    SimpleQueryString,
}

impl QueryClauseKind {
    pub const ALL: [QueryClauseKind; 19] = [
        Self::MatchAll,
        Self::MatchNone,
        Self::Match,
        Self::MatchPhrase,
        Self::MatchPhrasePrefix,
        Self::MultiMatch,
        Self::Term,
        Self::Terms,
        Self::Range,
        Self::Exists,
        Self::Prefix,
        Self::Wildcard,
        Self::Regexp,
        Self::Fuzzy,
        Self::Ids,
        Self::Bool,
        Self::ConstantScore,
        Self::QueryString,
        Self::SimpleQueryString,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MatchAll => "match_all",
            Self::MatchNone => "match_none",
            Self::Match => "match",
            Self::MatchPhrase => "match_phrase",
            Self::MatchPhrasePrefix => "match_phrase_prefix",
            Self::MultiMatch => "multi_match",
            Self::Term => "term",
            Self::Terms => "terms",
            Self::Range => "range",
            Self::Exists => "exists",
            Self::Prefix => "prefix",
            Self::Wildcard => "wildcard",
            Self::Regexp => "regexp",
            Self::Fuzzy => "fuzzy",
            Self::Ids => "ids",
            Self::Bool => "bool",
            Self::ConstantScore => "constant_score",
            Self::QueryString => "query_string",
            Self::SimpleQueryString => "simple_query_string",
        }
    }
}

/// Aggregation kinds the endpoint recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    // Bucket aggregations
    Terms,
    SignificantTerms,
    Filter,
    Filters,
    Global,
    Missing,
    Histogram,
    DateHistogram,
    Range,
    DateRange,

    // Metric aggregations
    Cardinality,
    ValueCount,
    Avg,
    Sum,
    Min,
    Max,
    Stats,
    ExtendedStats,
    Percentiles,
    TopHits,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 20] = [
        Self::Terms,
        Self::SignificantTerms,
        Self::Filter,
        Self::Filters,
        Self::Global,
        Self::Missing,
        Self::Histogram,
        Self::DateHistogram,
        Self::Range,
        Self::DateRange,
        Self::Cardinality,
        Self::ValueCount,
        Self::Avg,
        Self::Sum,
        Self::Min,
        Self::Max,
        Self::Stats,
        Self::ExtendedStats,
        Self::Percentiles,
        Self::TopHits,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terms => "terms",
            Self::SignificantTerms => "significant_terms",
            Self::Filter => "filter",
            Self::Filters => "filters",
            Self::Global => "global",
            Self::Missing => "missing",
            Self::Histogram => "histogram",
            Self::DateHistogram => "date_histogram",
            Self::Range => "range",
            Self::DateRange => "date_range",
            Self::Cardinality => "cardinality",
            Self::ValueCount => "value_count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Stats => "stats",
            Self::ExtendedStats => "extended_stats",
            Self::Percentiles => "percentiles",
            Self::TopHits => "top_hits",
        }
    }

    pub fn is_bucket(self) -> bool {
        matches!(
            self,
            Self::Terms
                | Self::SignificantTerms
                | Self::Filter
                | Self::Filters
                | Self::Global
                | Self::Missing
                | Self::Histogram
                | Self::DateHistogram
                | Self::Range
                | Self::DateRange
        )
    }
}

/// A single query clause: `{"<kind>": <body>}`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryClause<'a> {
    pub kind: QueryClauseKind,
    pub body: &'a Value,
}

impl<'a> QueryClause<'a> {
    /// Resolve a clause object into its kind.
    ///
    /// Anything but an object with exactly one key is rejected, as is a key
    /// that names no known clause kind.
    pub fn parse(value: &'a Value) -> Result<Self, ValidationError> {
        let single = value
            .as_object()
            .filter(|map| map.len() == 1)
            .and_then(|map| map.iter().next());

        let Some((name, body)) = single else {
            return Err(ValidationError::QueryShape(render(value)));
        };

        let kind = QueryClauseKind::from_name(name)
            .ok_or_else(|| ValidationError::UnknownQueryKind(name.clone()))?;

        Ok(Self { kind, body })
    }
}

/// A single aggregation body: `{"<kind>": <params>, "aggs": {...}}`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationNode<'a> {
    pub kind: AggregationKind,
    pub params: &'a Value,
    pub sub_aggs: Option<&'a Value>,
}

impl<'a> AggregationNode<'a> {
    pub fn parse(value: &'a Value) -> Result<Self, ValidationError> {
        let Some(map) = value.as_object() else {
            return Err(ValidationError::AggregationShape(render(value)));
        };

        let mut kinds = map
            .iter()
            .filter(|(key, _)| !AGGREGATION_CONTAINER_KEYS.contains(&key.as_str()));

        let (name, params) = match (kinds.next(), kinds.next()) {
            (Some(only), None) => only,
            _ => return Err(ValidationError::AggregationShape(render(value))),
        };

        let kind = AggregationKind::from_name(name)
            .ok_or_else(|| ValidationError::UnknownAggregationKind(name.clone()))?;

        let sub_aggs = map.get("aggs").or_else(|| map.get("aggregations"));

        Ok(Self {
            kind,
            params,
            sub_aggs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_kind_names_round_trip() {
        for kind in QueryClauseKind::ALL {
            assert_eq!(QueryClauseKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(QueryClauseKind::from_name("nested"), None);
    }

    #[test]
    fn test_aggregation_kind_names_round_trip() {
        for kind in AggregationKind::ALL {
            assert_eq!(AggregationKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(AggregationKind::from_name("date"), None);
    }

    #[test]
    fn test_query_only_words_are_not_aggregation_kinds() {
        for word in ["bool", "match", "term", "match_all", "query"] {
            assert_eq!(AggregationKind::from_name(word), None, "{word}");
        }
    }

    #[test]
    fn test_parse_clause() {
        let value = json!({"term": {"target.channel": "nightly"}});
        let clause = QueryClause::parse(&value).unwrap();
        assert_eq!(clause.kind, QueryClauseKind::Term);
        assert_eq!(clause.kind.as_str(), "term");
        assert_eq!(clause.body, &json!({"target.channel": "nightly"}));
    }

    #[test]
    fn test_parse_clause_empty_object() {
        let err = QueryClause::parse(&json!({})).unwrap_err();
        assert_eq!(err, ValidationError::QueryShape("{}".to_string()));
    }

    #[test]
    fn test_parse_clause_two_keys() {
        let value = json!({"term": {"a": 1}, "match": {"b": "x"}});
        let err = QueryClause::parse(&value).unwrap_err();
        assert_eq!(
            err,
            ValidationError::QueryShape(r#"{"term":{"a":1},"match":{"b":"x"}}"#.to_string())
        );
    }

    #[test]
    fn test_parse_clause_not_an_object() {
        let err = QueryClause::parse(&json!("nightly")).unwrap_err();
        assert_eq!(err, ValidationError::QueryShape(r#""nightly""#.to_string()));
    }

    #[test]
    fn test_parse_clause_unknown_kind() {
        let err = QueryClause::parse(&json!({"script": {}})).unwrap_err();
        assert_eq!(err, ValidationError::UnknownQueryKind("script".to_string()));
    }

    #[test]
    fn test_parse_aggregation_with_sub_aggs_and_meta() {
        let value = json!({
            "filter": {"match_all": {}},
            "meta": {"owner": "dashboard"},
            "aggs": {"versions": {"terms": {"field": "target.version"}}}
        });
        let node = AggregationNode::parse(&value).unwrap();
        assert_eq!(node.kind, AggregationKind::Filter);
        assert_eq!(node.params, &json!({"match_all": {}}));
        assert!(node.sub_aggs.unwrap().get("versions").is_some());
    }

    #[test]
    fn test_parse_aggregation_aggregations_spelling() {
        let value = json!({
            "terms": {"field": "source.product"},
            "aggregations": {"n": {"cardinality": {"field": "build.id"}}}
        });
        let node = AggregationNode::parse(&value).unwrap();
        assert!(node.sub_aggs.is_some());
    }

    #[test]
    fn test_parse_aggregation_unknown_kind() {
        let value = json!({"date": {"terms": {"field": "download.date"}}});
        let err = AggregationNode::parse(&value).unwrap_err();
        assert_eq!(err, ValidationError::UnknownAggregationKind("date".to_string()));
    }

    #[test]
    fn test_parse_aggregation_without_kind() {
        let value = json!({"aggs": {"x": {"terms": {"field": "f"}}}});
        let err = AggregationNode::parse(&value).unwrap_err();
        assert!(matches!(err, ValidationError::AggregationShape(_)));
    }

    #[test]
    fn test_document_keeps_unknown_keys_in_order() {
        let value = json!({"track_total_hits": true, "size": 3, "_source": ["build"]});
        let Value::Object(map) = value.clone() else {
            unreachable!()
        };
        let doc = QueryDocument::from_map(map);
        let keys: Vec<&String> = doc.as_map().keys().collect();
        assert_eq!(keys, ["track_total_hits", "size", "_source"]);
        assert_eq!(doc.into_value(), value);
    }

    #[test]
    fn test_match_all_document() {
        let doc = QueryDocument::match_all(10);
        assert_eq!(
            doc.into_value(),
            json!({"query": {"match_all": {}}, "size": 10})
        );
    }
}
