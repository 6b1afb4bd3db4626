use {
    crate::{IndexBlockHash, TxId},
    sqlx::PgConnection,
};

/// One row in the `smart_contracts` table, written when a deployment
/// transaction is ingested. `abi` is the node-computed interface description,
/// absent when the node did not provide one.
#[derive(Clone, Debug, Default, Eq, PartialEq, sqlx::FromRow)]
pub struct SmartContract {
    pub tx_id: TxId,
    pub contract_id: String,
    pub block_height: i64,
    pub index_block_hash: IndexBlockHash,
    pub source_code: String,
    pub abi: Option<String>,
    pub canonical: bool,
}

pub const SMART_CONTRACTS_SELECT: &str = "\
    tx_id, contract_id, block_height, index_block_hash, source_code, abi, canonical";

/// Idempotent on (`contract_id`, `index_block_hash`).
pub async fn insert(ex: &mut PgConnection, contract: &SmartContract) -> Result<u64, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO smart_contracts (
    tx_id,
    contract_id,
    block_height,
    index_block_hash,
    source_code,
    abi,
    canonical
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (contract_id, index_block_hash) DO NOTHING
    "#;
    let result = sqlx::query(QUERY)
        .bind(contract.tx_id)
        .bind(&contract.contract_id)
        .bind(contract.block_height)
        .bind(contract.index_block_hash)
        .bind(&contract.source_code)
        .bind(&contract.abi)
        .bind(contract.canonical)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// The canonical deployment of a contract id. A fork can briefly hold two
/// deployments of the same id; the canonical chain decides which one exists.
pub async fn get_by_id(
    ex: &mut PgConnection,
    contract_id: &str,
) -> Result<Option<SmartContract>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", SMART_CONTRACTS_SELECT,
" FROM smart_contracts WHERE contract_id = $1 AND canonical ",
"ORDER BY block_height DESC ",
"LIMIT 1",
    );
    sqlx::query_as(QUERY)
        .bind(contract_id)
        .fetch_optional(ex)
        .await
}
