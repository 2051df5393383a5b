//! In-process stand-ins for the node, the store and the clock.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::database::{BlockStore, RowCounts, StoreError, StoreOutcome, StoredTip};
use crate::models::NormalizedBlock;
use crate::rpc::{NodeRpc, RpcError};

pub fn block_hash_at(height: i64) -> String {
    format!("{:064x}", height + 1)
}

/// Verbosity-2 document for a block holding a single coinbase transaction.
pub fn block_document(height: i64) -> Value {
    let previous = if height == 0 { Value::Null } else { json!(block_hash_at(height - 1)) };
    json!({
        "hash": block_hash_at(height),
        "height": height,
        "time": 1231006505 + height * 600,
        "nTx": 1,
        "previousblockhash": previous,
        "tx": [{
            "txid": format!("{:064x}", 0xc0_0000 + height),
            "vin": [{ "coinbase": "04ffff001d", "sequence": 4294967295u32 }],
            "vout": [{
                "value": 50.0,
                "n": 0,
                "scriptPubKey": { "type": "pubkeyhash", "addresses": ["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"] }
            }]
        }]
    })
}

pub struct FakeNode {
    pub blocks: Mutex<Vec<Value>>,
    pub calls: Mutex<Vec<(String, Value)>>,
    /// One-shot failures keyed by method and first parameter.
    pub failures: Mutex<Vec<(&'static str, Value)>>,
}

impl FakeNode {
    pub fn with_tip(tip: i64) -> Self {
        FakeNode {
            blocks: Mutex::new((0..=tip).map(block_document).collect()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_once(&self, method: &'static str, first_param: Value) {
        self.failures.lock().unwrap().push((method, first_param));
    }

    pub fn fetched_heights(&self) -> Vec<i64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(method, _)| method == "getblockhash")
            .filter_map(|(_, params)| params[0].as_i64())
            .collect()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }

    fn find(&self, hash: &Value) -> Option<Value> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| &block["hash"] == hash)
            .cloned()
    }

    fn node_error(method: &str, code: i64, message: &str) -> RpcError {
        RpcError::Node {
            method: method.to_string(),
            code,
            message: message.to_string(),
        }
    }
}

impl NodeRpc for FakeNode {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push((method.to_string(), params.clone()));

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(pos) = failures
                .iter()
                .position(|(m, first)| *m == method && params.get(0).unwrap_or(&Value::Null) == first)
            {
                failures.remove(pos);
                return Err(RpcError::Status {
                    method: method.to_string(),
                    status: 503,
                });
            }
        }

        match method {
            "getbestblockhash" => {
                let blocks = self.blocks.lock().unwrap();
                Ok(blocks.last().map(|b| b["hash"].clone()).unwrap_or(Value::Null))
            }
            "getblockheader" => self
                .find(&params[0])
                .map(|b| json!({ "hash": b["hash"], "height": b["height"] }))
                .ok_or_else(|| Self::node_error(method, -5, "Block not found")),
            "getblockhash" => {
                let blocks = self.blocks.lock().unwrap();
                params[0]
                    .as_u64()
                    .and_then(|h| blocks.get(h as usize))
                    .map(|b| b["hash"].clone())
                    .ok_or_else(|| Self::node_error(method, -8, "Block height out of range"))
            }
            "getblock" => self
                .find(&params[0])
                .ok_or_else(|| Self::node_error(method, -5, "Block not found")),
            _ => Err(Self::node_error(method, -32601, "Method not found")),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub blocks: Mutex<Vec<NormalizedBlock>>,
    pub txids: Mutex<Vec<String>>,
    pub fail_next_store: Mutex<bool>,
}

impl MemoryStore {
    pub fn heights(&self) -> Vec<i64> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter_map(|b| b.block.height)
            .collect()
    }
}

impl BlockStore for MemoryStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn tip(&self) -> Result<Option<StoredTip>, StoreError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .iter()
            .filter_map(|b| b.block.height.map(|height| StoredTip { height, hash: b.block.hash.clone() }))
            .max_by_key(|tip| tip.height))
    }

    async fn store_block(&self, block: &NormalizedBlock) -> Result<StoreOutcome, StoreError> {
        // A failed write leaves nothing behind, like a rolled back transaction.
        if std::mem::take(&mut *self.fail_next_store.lock().unwrap()) {
            return Err(StoreError::Pool(bb8::RunError::TimedOut));
        }

        let mut blocks = self.blocks.lock().unwrap();
        if blocks.iter().any(|b| b.block.hash == block.block.hash) {
            return Ok(StoreOutcome::AlreadyStored);
        }
        let mut txids = self.txids.lock().unwrap();
        let mut counts = RowCounts::default();
        for tx in &block.transactions {
            if !txids.contains(&tx.txid) {
                txids.push(tx.txid.clone());
                counts.transactions += 1;
            }
        }
        counts.inputs = block.inputs.len() as u64;
        counts.outputs = block.outputs.len() as u64;
        counts.addresses = block.addresses.len() as u64;
        blocks.push(block.clone());
        Ok(StoreOutcome::Stored(counts))
    }
}

/// Returns immediately, remembering every requested delay. Optionally flips the
/// shutdown flag once a number of sleeps has been requested.
pub struct RecordingClock {
    pub sleeps: Mutex<Vec<Duration>>,
    stop_after: Option<(usize, watch::Sender<bool>)>,
}

impl RecordingClock {
    pub fn new() -> Self {
        RecordingClock {
            sleeps: Mutex::new(Vec::new()),
            stop_after: None,
        }
    }

    pub fn stopping_after(sleeps: usize, shutdown: watch::Sender<bool>) -> Self {
        RecordingClock {
            sleeps: Mutex::new(Vec::new()),
            stop_after: Some((sleeps, shutdown)),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        let mut sleeps = self.sleeps.lock().unwrap();
        sleeps.push(duration);
        if let Some((limit, shutdown)) = &self.stop_after {
            if sleeps.len() >= *limit {
                let _ = shutdown.send(true);
            }
        }
    }
}

impl<T: NodeRpc> NodeRpc for &T {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        (**self).call(method, params).await
    }
}

impl<T: BlockStore> BlockStore for &T {
    async fn init_schema(&self) -> Result<(), StoreError> {
        (**self).init_schema().await
    }

    async fn tip(&self) -> Result<Option<StoredTip>, StoreError> {
        (**self).tip().await
    }

    async fn store_block(&self, block: &NormalizedBlock) -> Result<StoreOutcome, StoreError> {
        (**self).store_block(block).await
    }
}

impl<T: Clock> Clock for &T {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}
