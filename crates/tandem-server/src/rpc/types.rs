//! Request envelope and per-method parameter shapes.

use serde::Deserialize;
use serde_json::Value;
use tandem_core::ClassId;
use tandem_core::Tx;
use tandem_core::query::{DocumentQuery, FindOptions, SearchOptions, SearchQuery};
use tandem_session::RequestId;

/// Incoming client request.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcRequest {
    /// Correlation id echoed in the reply; absent for fire-and-forget calls.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Method name.
    pub method: String,
    /// Method parameters, `null` when omitted.
    #[serde(default)]
    pub params: Value,
}

/// `hello` parameters. Omitted flags keep their current value.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HelloParams {
    /// Send payloads as binary frames.
    pub binary: Option<bool>,
    /// Client accepts compressed payloads.
    pub compression: Option<bool>,
}

/// `findAll` parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct FindAllParams {
    /// Class to search.
    #[serde(rename = "_class")]
    pub class: ClassId,
    /// Document filter.
    #[serde(default)]
    pub query: DocumentQuery,
    /// Find options.
    #[serde(default)]
    pub options: FindOptions,
}

/// `searchFulltext` parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchParams {
    /// The query.
    pub query: SearchQuery,
    /// Search options.
    #[serde(default)]
    pub options: SearchOptions,
}

/// `tx` parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct TxParams {
    /// Transaction to apply.
    pub tx: Tx,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_params_has_null_params() {
        let req: RpcRequest = serde_json::from_str(r#"{"id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Num(1)));
        assert!(req.params.is_null());
    }

    #[test]
    fn request_id_may_be_string_or_absent() {
        let req: RpcRequest = serde_json::from_str(r#"{"id":"r7","method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Str("r7".into())));

        let req: RpcRequest = serde_json::from_str(r#"{"method":"ping"}"#).unwrap();
        assert!(req.id.is_none());
    }

    #[test]
    fn find_all_defaults_query_and_options() {
        let p: FindAllParams = serde_json::from_value(json!({"_class": "task:class:Issue"})).unwrap();
        assert_eq!(p.class.as_str(), "task:class:Issue");
        assert!(p.query.is_empty());
        assert_eq!(p.options, FindOptions::default());
    }

    #[test]
    fn hello_flags_are_optional() {
        let p: HelloParams = serde_json::from_value(json!({"binary": true})).unwrap();
        assert_eq!(p.binary, Some(true));
        assert_eq!(p.compression, None);
    }
}
