//! JSON-RPC client for a bitcoind-compatible node.
//!
//! One request per call, no retries. Recovery is up to the sync loop.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::RpcConfig;
use crate::models::{RpcBlock, RpcBlockHeader};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{method}: transport error: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method}: HTTP status {status}")]
    Status { method: String, status: u16 },

    #[error("{method}: node returned error {code}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method}: malformed response: {detail}")]
    Decode { method: String, detail: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<NodeError>,
}

#[derive(Debug, Deserialize)]
struct NodeError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// The node calls the sync loop needs. Only `call` is transport specific.
pub trait NodeRpc {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    async fn best_block_hash(&self) -> Result<String, RpcError> {
        self.call_as("getbestblockhash", json!([])).await
    }

    async fn block_header(&self, hash: &str) -> Result<RpcBlockHeader, RpcError> {
        self.call_as("getblockheader", json!([hash])).await
    }

    async fn block_hash(&self, height: i64) -> Result<String, RpcError> {
        self.call_as("getblockhash", json!([height])).await
    }

    /// Verbosity 2: transactions fully expanded.
    async fn block(&self, hash: &str) -> Result<RpcBlock, RpcError> {
        self.call_as("getblock", json!([hash, 2])).await
    }
}

pub struct RpcClient {
    client: Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RpcError::Client)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NodeRpc for RpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let transport = |source| RpcError::Transport {
            method: method.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        // bitcoind answers RPC errors with HTTP 500 and a JSON body, so the body
        // is inspected before the status.
        match serde_json::from_slice::<Envelope>(&body) {
            Ok(Envelope {
                error: Some(error), ..
            }) => Err(RpcError::Node {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }),
            _ if !status.is_success() => Err(RpcError::Status {
                method: method.to_string(),
                status: status.as_u16(),
            }),
            Ok(envelope) => Ok(envelope.result.unwrap_or(Value::Null)),
            Err(e) => Err(RpcError::Decode {
                method: method.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}
