use std::collections::HashSet;

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use bytes::Bytes;
use futures::SinkExt;
use tokio_postgres::{NoTls, Transaction};
use tracing::{debug, info, warn};

use crate::models::NormalizedBlock;
use crate::utils::{csv_line, csv_text, csv_value};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] bb8::RunError<tokio_postgres::Error>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTip {
    pub height: i64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub transactions: u64,
    pub inputs: u64,
    pub outputs: u64,
    pub addresses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(RowCounts),
    AlreadyStored,
}

pub trait BlockStore {
    /// Creates any missing table or index. Never touches existing data.
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Highest stored block, `None` while the store is empty.
    async fn tip(&self) -> Result<Option<StoredTip>, StoreError>;

    /// Writes the block and all of its rows atomically. A block whose hash is
    /// already present is left untouched.
    async fn store_block(&self, block: &NormalizedBlock) -> Result<StoreOutcome, StoreError>;

    async fn tip_height(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.tip().await?.map(|tip| tip.height))
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        block_id BIGSERIAL PRIMARY KEY,
        hash VARCHAR(64) UNIQUE NOT NULL,
        confirmations BIGINT,
        strippedsize BIGINT,
        size BIGINT,
        weight BIGINT,
        height BIGINT,
        version BIGINT,
        version_hex TEXT,
        merkleroot VARCHAR(64),
        time BIGINT,
        mediantime BIGINT,
        nonce BIGINT,
        bits TEXT,
        difficulty DOUBLE PRECISION,
        chainwork TEXT,
        n_tx BIGINT,
        previousblockhash VARCHAR(64),
        nextblockhash VARCHAR(64)
    );

    CREATE TABLE IF NOT EXISTS transactions (
        tx_id BIGSERIAL PRIMARY KEY,
        block_hash VARCHAR(64) NOT NULL,
        txid VARCHAR(64) UNIQUE NOT NULL,
        hash VARCHAR(64),
        version BIGINT,
        size BIGINT,
        vsize BIGINT,
        weight BIGINT,
        locktime BIGINT,
        hex TEXT
    );

    CREATE TABLE IF NOT EXISTS vin (
        vin_id BIGSERIAL PRIMARY KEY,
        txid VARCHAR(64) NOT NULL,
        coinbase TEXT,
        prev_txid VARCHAR(64),
        prev_vout BIGINT,
        script_sig_asm TEXT,
        script_sig_hex TEXT,
        sequence BIGINT
    );

    CREATE TABLE IF NOT EXISTS script_pubkey (
        script_pubkey_id BIGSERIAL PRIMARY KEY,
        asm TEXT,
        hex TEXT,
        req_sigs BIGINT,
        type TEXT
    );

    CREATE TABLE IF NOT EXISTS vout (
        vout_id BIGSERIAL PRIMARY KEY,
        txid VARCHAR(64) NOT NULL,
        value DOUBLE PRECISION,
        n BIGINT,
        script_pubkey_id BIGINT
    );

    CREATE TABLE IF NOT EXISTS vout_addresses (
        vout_addr_id BIGSERIAL PRIMARY KEY,
        vout_id BIGINT NOT NULL,
        address TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS blocks_height_idx ON blocks (height);
    CREATE INDEX IF NOT EXISTS transactions_block_hash_idx ON transactions (block_hash);
    CREATE INDEX IF NOT EXISTS vin_txid_idx ON vin (txid);
    CREATE INDEX IF NOT EXISTS vout_txid_idx ON vout (txid);
    CREATE INDEX IF NOT EXISTS vout_addresses_vout_id_idx ON vout_addresses (vout_id);
    CREATE INDEX IF NOT EXISTS vout_addresses_address_idx ON vout_addresses (address);
";

const INSERT_BLOCK: &str = "
    INSERT INTO blocks (
        hash, confirmations, strippedsize, size, weight, height, version, version_hex,
        merkleroot, time, mediantime, nonce, bits, difficulty, chainwork, n_tx,
        previousblockhash, nextblockhash
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
    ON CONFLICT (hash) DO NOTHING";

const INSERT_TRANSACTION: &str = "
    INSERT INTO transactions (block_hash, txid, hash, version, size, vsize, weight, locktime, hex)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (txid) DO NOTHING";

const COPY_VIN: &str = "COPY vin (txid, coinbase, prev_txid, prev_vout, script_sig_asm, script_sig_hex, sequence) FROM STDIN WITH DELIMITER ',' CSV";
const COPY_SCRIPT_PUBKEY: &str = "COPY script_pubkey (script_pubkey_id, asm, hex, req_sigs, type) FROM STDIN WITH DELIMITER ',' CSV";
const COPY_VOUT: &str = "COPY vout (vout_id, txid, value, n, script_pubkey_id) FROM STDIN WITH DELIMITER ',' CSV";
const COPY_VOUT_ADDRESSES: &str = "COPY vout_addresses (vout_id, address) FROM STDIN WITH DELIMITER ',' CSV";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let config = database_url.parse::<tokio_postgres::Config>()?;
        Self::connect_with(config, pool_size).await
    }

    pub async fn connect_with(config: tokio_postgres::Config, pool_size: u32) -> Result<Self, StoreError> {
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager).await?;
        Ok(Self { pool })
    }

    pub async fn log_contents(&self) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "SELECT (SELECT COUNT(*) FROM blocks), (SELECT COUNT(*) FROM transactions), (SELECT COUNT(*) FROM vout)",
                &[],
            )
            .await?;
        let (blocks, transactions, outputs): (i64, i64, i64) = (row.get(0), row.get(1), row.get(2));
        info!(blocks, transactions, outputs, "store contents");
        Ok(())
    }
}

impl BlockStore for PgStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        Ok(())
    }

    async fn tip(&self) -> Result<Option<StoredTip>, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT height, hash FROM blocks WHERE height IS NOT NULL ORDER BY height DESC LIMIT 1",
                &[],
            )
            .await?;
        Ok(row.map(|row| StoredTip {
            height: row.get(0),
            hash: row.get(1),
        }))
    }

    async fn store_block(&self, block: &NormalizedBlock) -> Result<StoreOutcome, StoreError> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        // Dropping the transaction without commit rolls everything back.
        match write_block(&transaction, block).await? {
            Some(counts) => {
                transaction.commit().await?;
                Ok(StoreOutcome::Stored(counts))
            }
            None => {
                transaction.rollback().await?;
                debug!(hash = %block.block.hash, "block already stored");
                Ok(StoreOutcome::AlreadyStored)
            }
        }
    }
}

/// Writes every row of `block` inside `tx`. Returns `None` without writing
/// anything else when the block hash is already present.
async fn write_block(tx: &Transaction<'_>, block: &NormalizedBlock) -> Result<Option<RowCounts>, StoreError> {
    if insert_block_row(tx, block).await? == 0 {
        return Ok(None);
    }

    let skipped = insert_transaction_rows(tx, block).await?;
    let mut counts = RowCounts {
        transactions: (block.transactions.len() - skipped.len()) as u64,
        ..RowCounts::default()
    };
    counts.inputs = copy_inputs(tx, block, &skipped).await?;
    let (outputs, addresses) = copy_outputs(tx, block, &skipped).await?;
    counts.outputs = outputs;
    counts.addresses = addresses;

    Ok(Some(counts))
}

async fn insert_block_row(tx: &Transaction<'_>, block: &NormalizedBlock) -> Result<u64, StoreError> {
    let b = &block.block;
    let inserted = tx
        .execute(
            INSERT_BLOCK,
            &[
                &b.hash,
                &b.confirmations,
                &b.strippedsize,
                &b.size,
                &b.weight,
                &b.height,
                &b.version,
                &b.version_hex,
                &b.merkleroot,
                &b.time,
                &b.mediantime,
                &b.nonce,
                &b.bits,
                &b.difficulty,
                &b.chainwork,
                &b.n_tx,
                &b.previousblockhash,
                &b.nextblockhash,
            ],
        )
        .await?;
    Ok(inserted)
}

/// Returns the txids that were already stored; their inputs and outputs are not
/// written again.
async fn insert_transaction_rows<'a>(
    tx: &Transaction<'_>,
    block: &'a NormalizedBlock,
) -> Result<HashSet<&'a str>, StoreError> {
    let statement = tx.prepare(INSERT_TRANSACTION).await?;
    let mut skipped = HashSet::new();

    for row in &block.transactions {
        let inserted = tx
            .execute(
                &statement,
                &[
                    &row.block_hash,
                    &row.txid,
                    &row.hash,
                    &row.version,
                    &row.size,
                    &row.vsize,
                    &row.weight,
                    &row.locktime,
                    &row.hex,
                ],
            )
            .await?;
        if inserted == 0 {
            warn!(txid = %row.txid, block = %row.block_hash, "duplicate txid, keeping the stored transaction");
            skipped.insert(row.txid.as_str());
        }
    }

    Ok(skipped)
}

async fn copy_inputs(tx: &Transaction<'_>, block: &NormalizedBlock, skipped: &HashSet<&str>) -> Result<u64, StoreError> {
    let lines = block
        .inputs
        .iter()
        .filter(|input| !skipped.contains(input.txid.as_str()))
        .map(|input| {
            csv_line(&[
                csv_text(Some(&input.txid)),
                csv_text(input.coinbase.as_deref()),
                csv_text(input.prev_txid.as_deref()),
                csv_value(input.prev_vout),
                csv_text(input.script_sig_asm.as_deref()),
                csv_text(input.script_sig_hex.as_deref()),
                csv_value(input.sequence),
            ])
        })
        .collect();
    copy_lines(tx, COPY_VIN, lines).await
}

/// Script-pubkeys, outputs and addresses. Surrogate ids are reserved up front so
/// the rows can be linked while still being streamed through COPY.
async fn copy_outputs(
    tx: &Transaction<'_>,
    block: &NormalizedBlock,
    skipped: &HashSet<&str>,
) -> Result<(u64, u64), StoreError> {
    let kept: Vec<usize> = (0..block.outputs.len())
        .filter(|&i| !skipped.contains(block.outputs[i].txid.as_str()))
        .collect();
    if kept.is_empty() {
        return Ok((0, 0));
    }

    let script_ids = reserve_ids(tx, "script_pubkey", "script_pubkey_id", kept.len()).await?;
    let vout_ids = reserve_ids(tx, "vout", "vout_id", kept.len()).await?;

    // Output index -> reserved vout id.
    let mut vout_id_of = vec![None; block.outputs.len()];

    let mut script_lines = Vec::with_capacity(kept.len());
    let mut vout_lines = Vec::with_capacity(kept.len());
    for ((&index, &script_id), &vout_id) in kept.iter().zip(&script_ids).zip(&vout_ids) {
        let output = &block.outputs[index];
        let script = &block.script_pubkeys[output.script_pubkey];
        script_lines.push(csv_line(&[
            csv_value(Some(script_id)),
            csv_text(script.asm.as_deref()),
            csv_text(script.hex.as_deref()),
            csv_value(script.req_sigs),
            csv_text(script.script_type.as_deref()),
        ]));
        vout_lines.push(csv_line(&[
            csv_value(Some(vout_id)),
            csv_text(Some(&output.txid)),
            csv_value(output.value),
            csv_value(output.n),
            csv_value(Some(script_id)),
        ]));
        vout_id_of[index] = Some(vout_id);
    }

    let address_lines = block
        .addresses
        .iter()
        .filter_map(|row| {
            let vout_id = vout_id_of[row.output]?;
            Some(csv_line(&[csv_value(Some(vout_id)), csv_text(Some(&row.address))]))
        })
        .collect();

    copy_lines(tx, COPY_SCRIPT_PUBKEY, script_lines).await?;
    let outputs = copy_lines(tx, COPY_VOUT, vout_lines).await?;
    let addresses = copy_lines(tx, COPY_VOUT_ADDRESSES, address_lines).await?;
    Ok((outputs, addresses))
}

async fn reserve_ids(tx: &Transaction<'_>, table: &str, column: &str, count: usize) -> Result<Vec<i64>, StoreError> {
    let rows = tx
        .query(
            "SELECT nextval(pg_get_serial_sequence($1, $2)) FROM generate_series(1, $3::BIGINT)",
            &[&table, &column, &(count as i64)],
        )
        .await?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

async fn copy_lines(tx: &Transaction<'_>, statement: &str, lines: Vec<String>) -> Result<u64, StoreError> {
    if lines.is_empty() {
        return Ok(0);
    }
    let mut sink = Box::pin(tx.copy_in::<_, Bytes>(statement).await?);
    for line in lines {
        sink.as_mut().send(Bytes::from(line)).await?;
    }
    Ok(sink.as_mut().finish().await?)
}
