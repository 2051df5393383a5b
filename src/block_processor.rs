use crate::models::{
    AddressRow, BlockRow, InputRow, NormalizedBlock, OutputRow, RpcBlock, RpcScriptPubKey,
    RpcTransaction, ScriptPubkeyRow, TransactionRow,
};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("block document has no `hash`")]
    MissingBlockHash,
    #[error("transaction #{index} of block {block_hash} has no `txid`")]
    MissingTxid { block_hash: String, index: usize },
}

/// Flattens a verbosity-2 block document into relational rows. Pure: no I/O,
/// no defaults invented for fields the node left out.
pub fn normalize_block(block: &RpcBlock) -> Result<NormalizedBlock, NormalizeError> {
    let hash = block.hash.clone().ok_or(NormalizeError::MissingBlockHash)?;

    let mut normalized = NormalizedBlock {
        block: BlockRow {
            hash: hash.clone(),
            confirmations: block.confirmations,
            strippedsize: block.strippedsize,
            size: block.size,
            weight: block.weight,
            height: block.height,
            version: block.version,
            version_hex: block.version_hex.clone(),
            merkleroot: block.merkleroot.clone(),
            time: block.time,
            mediantime: block.mediantime,
            nonce: block.nonce,
            bits: block.bits.clone(),
            difficulty: block.difficulty,
            chainwork: block.chainwork.clone(),
            n_tx: block.n_tx,
            previousblockhash: block.previousblockhash.clone(),
            nextblockhash: block.nextblockhash.clone(),
        },
        transactions: Vec::with_capacity(block.tx.len()),
        inputs: Vec::new(),
        outputs: Vec::new(),
        script_pubkeys: Vec::new(),
        addresses: Vec::new(),
    };

    for (index, tx) in block.tx.iter().enumerate() {
        let txid = tx.txid.clone().ok_or_else(|| NormalizeError::MissingTxid {
            block_hash: hash.clone(),
            index,
        })?;
        process_transaction(&mut normalized, &hash, txid, tx);
    }

    Ok(normalized)
}

fn process_transaction(out: &mut NormalizedBlock, block_hash: &str, txid: String, tx: &RpcTransaction) {
    out.transactions.push(TransactionRow {
        block_hash: block_hash.to_string(),
        txid: txid.clone(),
        hash: tx.hash.clone(),
        version: tx.version,
        size: tx.size,
        vsize: tx.vsize,
        weight: tx.weight,
        locktime: tx.locktime,
        hex: tx.hex.clone(),
    });

    for vin in &tx.vin {
        let is_coinbase = vin.coinbase.is_some();
        let script_sig = vin.script_sig.as_ref();
        out.inputs.push(InputRow {
            txid: txid.clone(),
            coinbase: vin.coinbase.clone(),
            prev_txid: if is_coinbase { None } else { vin.txid.clone() },
            prev_vout: if is_coinbase { None } else { vin.vout },
            script_sig_asm: script_sig.and_then(|s| s.asm.clone()),
            script_sig_hex: script_sig.and_then(|s| s.hex.clone()),
            sequence: vin.sequence,
        });
    }

    for vout in &tx.vout {
        let script = vout.script_pub_key.as_ref();

        // One fresh script row per output, never shared.
        let script_index = out.script_pubkeys.len();
        out.script_pubkeys.push(ScriptPubkeyRow {
            asm: script.and_then(|s| s.asm.clone()),
            hex: script.and_then(|s| s.hex.clone()),
            req_sigs: script.and_then(|s| s.req_sigs),
            script_type: script.and_then(|s| s.script_type.clone()),
        });

        let output_index = out.outputs.len();
        out.outputs.push(OutputRow {
            txid: txid.clone(),
            value: vout.value,
            n: vout.n,
            script_pubkey: script_index,
        });

        if let Some(script) = script {
            for address in script_addresses(script) {
                out.addresses.push(AddressRow {
                    output: output_index,
                    address,
                });
            }
        }
    }
}

fn script_addresses(script: &RpcScriptPubKey) -> Vec<String> {
    let mut addresses = script.addresses.clone().unwrap_or_default();
    if let Some(address) = &script.address {
        if !addresses.contains(address) {
            addresses.push(address.clone());
        }
    }
    addresses
}
