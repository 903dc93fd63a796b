//! Find, full-text search and model-load payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::doc::Doc;
use crate::ids::{ClassId, DocId, SpaceId};
use crate::time::Timestamp;
use crate::tx::Tx;

/// Mongo-style document filter, forwarded to the pipeline untouched.
pub type DocumentQuery = Map<String, Value>;

/// Options for `findAll`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    /// Maximum number of documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Sort specification (attribute → direction).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Map<String, Value>>,
    /// Attribute projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Map<String, Value>>,
    /// Lookup specification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Value>,
    /// Whether to compute the total match count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<bool>,
}

/// Result of `findAll`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResult {
    /// Matching documents.
    pub data: Vec<Doc>,
    /// Total match count, `-1` when not requested.
    pub total: i64,
    /// Looked-up documents keyed by reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_map: Option<Map<String, Value>>,
}

/// Full-text search query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Free-text query.
    pub query: String,
    /// Restrict to these classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<ClassId>>,
    /// Restrict to these spaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spaces: Option<Vec<SpaceId>>,
}

/// Options for `searchFulltext`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Maximum number of hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One full-text hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultDoc {
    /// Matching document.
    pub id: DocId,
    /// Its class.
    #[serde(rename = "_class")]
    pub class: ClassId,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Relevance score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Result of `searchFulltext`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Hits in relevance order.
    pub docs: Vec<SearchResultDoc>,
    /// Total hit count, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Model transactions a client needs to catch up since `lastModelTx`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDelta {
    /// `true` when `transactions` is the full model rather than a delta.
    pub full: bool,
    /// Hash of the model after applying `transactions`.
    pub hash: String,
    /// Model transactions newer than the requested timestamp.
    pub transactions: Vec<Tx>,
}

/// Parameters of a `loadModel` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModelParams {
    /// Timestamp of the newest model transaction the client holds.
    #[serde(default)]
    pub last_model_tx: Timestamp,
    /// Hash of the client's model, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}
