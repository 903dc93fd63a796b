//! Session method handlers.
//!
//! Each handler parses its parameters and forwards to the session gateway,
//! which replies on its own. `hello` and `getStatistics` answer from
//! session state.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tandem_core::query::LoadModelParams;

use crate::rpc::errors::RpcError;
use crate::rpc::registry::{MethodHandler, MethodRegistry, RpcCall};
use crate::rpc::types::{FindAllParams, HelloParams, SearchParams, TxParams};

/// Parse `params`, treating `null` as an empty object.
fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    Ok(serde_json::from_value(params)?)
}

/// `hello`: negotiate transport flags.
pub struct HelloHandler;

#[async_trait]
impl MethodHandler for HelloHandler {
    async fn handle(&self, params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        let p: HelloParams = parse(params)?;
        let session = &call.session;
        if let Some(binary) = p.binary {
            session.set_binary_mode(binary);
        }
        if let Some(compression) = p.compression {
            session.set_compression(compression);
        }
        Ok(Some(json!({
            "sessionId": session.id(),
            "binary": session.binary_mode(),
            "compression": session.use_compression(),
        })))
    }
}

/// `ping`.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        call.session.ping(&call.responder()).await;
        Ok(None)
    }
}

/// `loadModel`.
pub struct LoadModelHandler;

#[async_trait]
impl MethodHandler for LoadModelHandler {
    async fn handle(&self, params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        let p: LoadModelParams = parse(params)?;
        call.session
            .load_model(&call.responder(), p.last_model_tx, p.hash.as_deref())
            .await;
        Ok(None)
    }
}

/// `getAccount`.
pub struct GetAccountHandler;

#[async_trait]
impl MethodHandler for GetAccountHandler {
    async fn handle(&self, _params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        call.session.get_account(&call.responder()).await;
        Ok(None)
    }
}

/// `findAll`.
pub struct FindAllHandler;

#[async_trait]
impl MethodHandler for FindAllHandler {
    async fn handle(&self, params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        let p: FindAllParams = parse(params)?;
        call.session
            .find_all(&call.responder(), &p.class, &p.query, &p.options)
            .await;
        Ok(None)
    }
}

/// `searchFulltext`.
pub struct SearchFulltextHandler;

#[async_trait]
impl MethodHandler for SearchFulltextHandler {
    async fn handle(&self, params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        let p: SearchParams = parse(params)?;
        call.session
            .search_fulltext(&call.responder(), &p.query, &p.options)
            .await;
        Ok(None)
    }
}

/// `tx`.
pub struct TxHandler;

#[async_trait]
impl MethodHandler for TxHandler {
    async fn handle(&self, params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        let p: TxParams = parse(params)?;
        call.session.tx(&call.responder(), p.tx).await;
        Ok(None)
    }
}

/// `getStatistics`.
pub struct GetStatisticsHandler;

#[async_trait]
impl MethodHandler for GetStatisticsHandler {
    async fn handle(&self, _params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
        Ok(Some(serde_json::to_value(call.session.statistics()).map_err(
            |e| RpcError::Internal {
                message: e.to_string(),
            },
        )?))
    }
}

/// Register every session method.
pub fn register_all(registry: &mut MethodRegistry) {
    registry.register("hello", HelloHandler);
    registry.register("ping", PingHandler);
    registry.register("loadModel", LoadModelHandler);
    registry.register("getAccount", GetAccountHandler);
    registry.register("findAll", FindAllHandler);
    registry.register("searchFulltext", SearchFulltextHandler);
    registry.register("tx", TxHandler);
    registry.register("getStatistics", GetStatisticsHandler);
}
