use {
    crate::{BlockHash, IndexBlockHash, TxId},
    sqlx::PgConnection,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[repr(i16)]
pub enum TxType {
    #[default]
    TokenTransfer = 0,
    SmartContract = 1,
    ContractCall = 2,
    PoisonMicroblock = 3,
    Coinbase = 4,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[repr(i16)]
pub enum TxStatus {
    Pending = 0,
    #[default]
    Success = 1,
    Failed = 2,
}

/// One row in the `txs` table.
///
/// The payload columns are nullable and gated by `type_id`; exactly the
/// columns belonging to the discriminated payload are set, everything else is
/// NULL. Keeping the union flat in SQL keeps the read queries trivial.
#[derive(Clone, Debug, Default, Eq, PartialEq, sqlx::FromRow)]
pub struct Tx {
    pub tx_id: TxId,
    pub index_block_hash: IndexBlockHash,
    pub tx_index: i32,
    pub block_hash: BlockHash,
    pub block_height: i64,
    pub burn_block_time: i64,
    pub type_id: TxType,
    pub status: TxStatus,
    pub canonical: bool,
    pub post_conditions: Vec<u8>,
    pub fee_rate: i64,
    pub sender_address: String,
    pub origin_hash_mode: i16,
    pub sponsored: bool,

    pub token_transfer_recipient_address: Option<String>,
    pub token_transfer_amount: Option<i64>,
    pub token_transfer_memo: Option<Vec<u8>>,
    pub smart_contract_contract_id: Option<String>,
    pub smart_contract_source_code: Option<String>,
    pub contract_call_contract_id: Option<String>,
    pub contract_call_function_name: Option<String>,
    pub contract_call_function_args: Option<Vec<u8>>,
    pub poison_microblock_header_1: Option<Vec<u8>>,
    pub poison_microblock_header_2: Option<Vec<u8>>,
    pub coinbase_payload: Option<Vec<u8>>,
}

pub const TXS_SELECT: &str = "\
    tx_id, index_block_hash, tx_index, block_hash, block_height, \
    burn_block_time, type_id, status, canonical, post_conditions, fee_rate, \
    sender_address, origin_hash_mode, sponsored, \
    token_transfer_recipient_address, token_transfer_amount, \
    token_transfer_memo, smart_contract_contract_id, \
    smart_contract_source_code, contract_call_contract_id, \
    contract_call_function_name, contract_call_function_args, \
    poison_microblock_header_1, poison_microblock_header_2, coinbase_payload";

/// Idempotent on (`tx_id`, `index_block_hash`).
pub async fn insert(ex: &mut PgConnection, tx: &Tx) -> Result<u64, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO txs (
    tx_id,
    index_block_hash,
    tx_index,
    block_hash,
    block_height,
    burn_block_time,
    type_id,
    status,
    canonical,
    post_conditions,
    fee_rate,
    sender_address,
    origin_hash_mode,
    sponsored,
    token_transfer_recipient_address,
    token_transfer_amount,
    token_transfer_memo,
    smart_contract_contract_id,
    smart_contract_source_code,
    contract_call_contract_id,
    contract_call_function_name,
    contract_call_function_args,
    poison_microblock_header_1,
    poison_microblock_header_2,
    coinbase_payload
)
VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
    $17, $18, $19, $20, $21, $22, $23, $24, $25
)
ON CONFLICT (tx_id, index_block_hash) DO NOTHING
    "#;
    let result = sqlx::query(QUERY)
        .bind(tx.tx_id)
        .bind(tx.index_block_hash)
        .bind(tx.tx_index)
        .bind(tx.block_hash)
        .bind(tx.block_height)
        .bind(tx.burn_block_time)
        .bind(tx.type_id)
        .bind(tx.status)
        .bind(tx.canonical)
        .bind(tx.post_conditions.as_slice())
        .bind(tx.fee_rate)
        .bind(&tx.sender_address)
        .bind(tx.origin_hash_mode)
        .bind(tx.sponsored)
        .bind(&tx.token_transfer_recipient_address)
        .bind(tx.token_transfer_amount)
        .bind(&tx.token_transfer_memo)
        .bind(&tx.smart_contract_contract_id)
        .bind(&tx.smart_contract_source_code)
        .bind(&tx.contract_call_contract_id)
        .bind(&tx.contract_call_function_name)
        .bind(&tx.contract_call_function_args)
        .bind(&tx.poison_microblock_header_1)
        .bind(&tx.poison_microblock_header_2)
        .bind(&tx.coinbase_payload)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// The canonical occurrence of a transaction. Fork siblings of the same
/// `tx_id` stay invisible until a reorg flips them back.
pub async fn get_by_id(ex: &mut PgConnection, tx_id: &TxId) -> Result<Option<Tx>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", TXS_SELECT,
" FROM txs WHERE tx_id = $1 AND canonical",
    );
    sqlx::query_as(QUERY).bind(tx_id).fetch_optional(ex).await
}

/// Canonical transactions, newest first. An empty `type_filter` means all
/// transaction types.
pub async fn list(
    ex: &mut PgConnection,
    limit: i64,
    offset: i64,
    type_filter: &[TxType],
) -> Result<Vec<Tx>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", TXS_SELECT,
" FROM txs WHERE canonical ",
"AND (cardinality($1::smallint[]) = 0 OR type_id = ANY($1)) ",
"ORDER BY block_height DESC, tx_index DESC ",
"LIMIT $2 ",
"OFFSET $3 ",
    );
    let type_ids: Vec<i16> = type_filter.iter().map(|t| *t as i16).collect();
    sqlx::query_as(QUERY)
        .bind(type_ids)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await
}

#[derive(Clone, Debug, sqlx::FromRow)]
struct TxWithCount {
    #[sqlx(flatten)]
    tx: Tx,
    total_count: i64,
}

/// Canonical transactions in which `address` is the sender or the recipient
/// of a token transfer, newest first, together with the total number of such
/// transactions (computed in the same statement via a window).
pub async fn address_txs(
    ex: &mut PgConnection,
    address: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Tx>, i64), sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", TXS_SELECT, ", COUNT(*) OVER () AS total_count",
" FROM txs WHERE canonical ",
"AND (sender_address = $1 OR token_transfer_recipient_address = $1) ",
"ORDER BY block_height DESC, tx_index DESC ",
"LIMIT $2 ",
"OFFSET $3 ",
    );
    let rows: Vec<TxWithCount> = sqlx::query_as(QUERY)
        .bind(address)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;
    let total = rows.first().map(|row| row.total_count).unwrap_or_default();
    Ok((rows.into_iter().map(|row| row.tx).collect(), total))
}
