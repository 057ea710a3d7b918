//! Response bodies

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A store search response, relayed to the client as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Hits,
    #[serde(default)]
    pub aggregations: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hits {
    #[serde(deserialize_with = "deserialize_total")]
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub hits: Vec<Value>,
}

/// `hits.total` is a bare count on older stores and `{value, relation}` on
/// newer ones; both collapse to the count.
fn deserialize_total<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Total {
        Count(u64),
        Object { value: u64 },
    }

    Ok(match Total::deserialize(deserializer)? {
        Total::Count(count) => count,
        Total::Object { value } => value,
    })
}

/// `GET /api/records` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub builds: BuildsSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildsSummary {
    pub total: u64,
}

impl RecordsResponse {
    pub fn new(total: u64) -> Self {
        Self {
            builds: BuildsSummary { total },
        }
    }
}
