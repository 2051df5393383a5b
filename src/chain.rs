use crate::database::{BlockStore, StoreError, StoredTip};
use crate::rpc::{NodeRpc, RpcError};

/// Height of the node's best block. `getbestblockhash` only yields a hash, so
/// the header is fetched for the height.
pub async fn remote_tip<R: NodeRpc>(rpc: &R) -> Result<i64, RpcError> {
    let best = rpc.best_block_hash().await?;
    let header = rpc.block_header(&best).await?;
    Ok(header.height)
}

/// Highest stored block, re-read on every call.
pub async fn local_tip<S: BlockStore>(store: &S) -> Result<Option<StoredTip>, StoreError> {
    store.tip().await
}

/// First height that still has to be fetched. An empty store starts at genesis.
pub fn next_height(local: Option<&StoredTip>) -> i64 {
    local.map_or(0, |tip| tip.height + 1)
}
