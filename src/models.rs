use serde::Deserialize;

// Block document as returned by `getblock <hash> 2`. Every field is optional so
// that anything the node does not report ends up as NULL in the database.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcBlock {
    pub hash: Option<String>,
    pub confirmations: Option<i64>,
    pub strippedsize: Option<i64>,
    pub size: Option<i64>,
    pub weight: Option<i64>,
    pub height: Option<i64>,
    pub version: Option<i64>,
    #[serde(rename = "versionHex")]
    pub version_hex: Option<String>,
    pub merkleroot: Option<String>,
    pub time: Option<i64>,
    pub mediantime: Option<i64>,
    pub nonce: Option<i64>,
    pub bits: Option<String>,
    pub difficulty: Option<f64>,
    pub chainwork: Option<String>,
    #[serde(rename = "nTx")]
    pub n_tx: Option<i64>,
    pub previousblockhash: Option<String>,
    pub nextblockhash: Option<String>,
    #[serde(default)]
    pub tx: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcTransaction {
    pub txid: Option<String>,
    pub hash: Option<String>,
    pub version: Option<i64>,
    pub size: Option<i64>,
    pub vsize: Option<i64>,
    pub weight: Option<i64>,
    pub locktime: Option<i64>,
    pub hex: Option<String>,
    #[serde(default)]
    pub vin: Vec<RpcVin>,
    #[serde(default)]
    pub vout: Vec<RpcVout>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcVin {
    pub coinbase: Option<String>,
    pub txid: Option<String>,
    pub vout: Option<i64>,
    #[serde(rename = "scriptSig")]
    pub script_sig: Option<RpcScriptSig>,
    pub sequence: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcScriptSig {
    pub asm: Option<String>,
    pub hex: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcVout {
    pub value: Option<f64>,
    pub n: Option<i64>,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: Option<RpcScriptPubKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcScriptPubKey {
    pub asm: Option<String>,
    pub hex: Option<String>,
    #[serde(rename = "reqSigs")]
    pub req_sigs: Option<i64>,
    #[serde(rename = "type")]
    pub script_type: Option<String>,
    // Nodes before v22 report a list, later ones a single address.
    pub addresses: Option<Vec<String>>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlockHeader {
    pub height: i64,
}

// Relational rows, one struct per table.

#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub hash: String,
    pub confirmations: Option<i64>,
    pub strippedsize: Option<i64>,
    pub size: Option<i64>,
    pub weight: Option<i64>,
    pub height: Option<i64>,
    pub version: Option<i64>,
    pub version_hex: Option<String>,
    pub merkleroot: Option<String>,
    pub time: Option<i64>,
    pub mediantime: Option<i64>,
    pub nonce: Option<i64>,
    pub bits: Option<String>,
    pub difficulty: Option<f64>,
    pub chainwork: Option<String>,
    pub n_tx: Option<i64>,
    pub previousblockhash: Option<String>,
    pub nextblockhash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub block_hash: String,
    pub txid: String,
    pub hash: Option<String>,
    pub version: Option<i64>,
    pub size: Option<i64>,
    pub vsize: Option<i64>,
    pub weight: Option<i64>,
    pub locktime: Option<i64>,
    pub hex: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub txid: String,
    pub coinbase: Option<String>,
    pub prev_txid: Option<String>,
    pub prev_vout: Option<i64>,
    pub script_sig_asm: Option<String>,
    pub script_sig_hex: Option<String>,
    pub sequence: Option<i64>,
}

/// `script_pubkey` is the index of the paired row in
/// [`NormalizedBlock::script_pubkeys`]; the surrogate id is only known once the
/// row is written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub txid: String,
    pub value: Option<f64>,
    pub n: Option<i64>,
    pub script_pubkey: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptPubkeyRow {
    pub asm: Option<String>,
    pub hex: Option<String>,
    pub req_sigs: Option<i64>,
    pub script_type: Option<String>,
}

/// `output` indexes into [`NormalizedBlock::outputs`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRow {
    pub output: usize,
    pub address: String,
}

/// Every row derived from one block, ready to be written in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBlock {
    pub block: BlockRow,
    pub transactions: Vec<TransactionRow>,
    pub inputs: Vec<InputRow>,
    pub outputs: Vec<OutputRow>,
    pub script_pubkeys: Vec<ScriptPubkeyRow>,
    pub addresses: Vec<AddressRow>,
}
