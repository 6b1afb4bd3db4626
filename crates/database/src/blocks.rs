use {
    crate::{BlockHash, IndexBlockHash, MicroblockHash, TxId},
    sqlx::PgConnection,
};

/// One row in the `blocks` table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::FromRow)]
pub struct Block {
    pub block_hash: BlockHash,
    pub index_block_hash: IndexBlockHash,
    pub parent_index_block_hash: IndexBlockHash,
    pub parent_block_hash: BlockHash,
    pub parent_microblock: MicroblockHash,
    pub block_height: i64,
    pub burn_block_time: i64,
    pub canonical: bool,
}

pub const BLOCKS_SELECT: &str = "\
    block_hash, index_block_hash, parent_index_block_hash, parent_block_hash, \
    parent_microblock, block_height, burn_block_time, canonical";

/// Idempotent on `index_block_hash`: redelivered blocks write 0 rows.
pub async fn insert(ex: &mut PgConnection, block: &Block) -> Result<u64, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO blocks (
    block_hash,
    index_block_hash,
    parent_index_block_hash,
    parent_block_hash,
    parent_microblock,
    block_height,
    burn_block_time,
    canonical
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (index_block_hash) DO NOTHING
    "#;
    let result = sqlx::query(QUERY)
        .bind(block.block_hash)
        .bind(block.index_block_hash)
        .bind(block.parent_index_block_hash)
        .bind(block.parent_block_hash)
        .bind(block.parent_microblock)
        .bind(block.block_height)
        .bind(block.burn_block_time)
        .bind(block.canonical)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

pub async fn get_by_index_block_hash(
    ex: &mut PgConnection,
    index_block_hash: &IndexBlockHash,
) -> Result<Option<Block>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", BLOCKS_SELECT,
" FROM blocks WHERE index_block_hash = $1",
    );
    sqlx::query_as(QUERY)
        .bind(index_block_hash)
        .fetch_optional(ex)
        .await
}

/// The content hash is ambiguous across forks, so this only answers for the
/// canonical chain.
pub async fn get_by_hash(
    ex: &mut PgConnection,
    block_hash: &BlockHash,
) -> Result<Option<Block>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", BLOCKS_SELECT,
" FROM blocks WHERE block_hash = $1 AND canonical",
    );
    sqlx::query_as(QUERY).bind(block_hash).fetch_optional(ex).await
}

/// Every stored row carrying `index_block_hash`. The unique key on the
/// column means more than one element is schema corruption, which reorg
/// handling checks for instead of assuming.
pub async fn all_by_index_block_hash(
    ex: &mut PgConnection,
    index_block_hash: &IndexBlockHash,
) -> Result<Vec<Block>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", BLOCKS_SELECT,
" FROM blocks WHERE index_block_hash = $1",
    );
    sqlx::query_as(QUERY)
        .bind(index_block_hash)
        .fetch_all(ex)
        .await
}

/// All stored blocks at `block_height` whose `index_block_hash` matches
/// `index_block_hash`. Used for parent lookups during reorg handling; more
/// than one element means the uniqueness invariant of `blocks` is broken.
pub async fn parents_at(
    ex: &mut PgConnection,
    block_height: i64,
    index_block_hash: &IndexBlockHash,
) -> Result<Vec<Block>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", BLOCKS_SELECT,
" FROM blocks WHERE block_height = $1 AND index_block_hash = $2",
    );
    sqlx::query_as(QUERY)
        .bind(block_height)
        .bind(index_block_hash)
        .fetch_all(ex)
        .await
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, sqlx::FromRow)]
pub struct ChainTip {
    pub block_height: i64,
    pub block_hash: BlockHash,
    pub index_block_hash: IndexBlockHash,
}

/// The highest canonical block, if any block has been ingested yet.
pub async fn chain_tip(ex: &mut PgConnection) -> Result<Option<ChainTip>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT block_height, block_hash, index_block_hash
FROM blocks
WHERE canonical
ORDER BY block_height DESC
LIMIT 1
    "#;
    sqlx::query_as(QUERY).fetch_optional(ex).await
}

/// Canonical blocks, newest first.
pub async fn list(
    ex: &mut PgConnection,
    limit: i64,
    offset: i64,
) -> Result<Vec<Block>, sqlx::Error> {
    #[rustfmt::skip]
    const QUERY: &str = const_format::concatcp!(
"SELECT ", BLOCKS_SELECT,
" FROM blocks WHERE canonical ",
"ORDER BY block_height DESC ",
"LIMIT $1 ",
"OFFSET $2 ",
    );
    sqlx::query_as(QUERY).bind(limit).bind(offset).fetch_all(ex).await
}

/// Transaction ids of one block in execution order.
pub async fn tx_ids_for_block(
    ex: &mut PgConnection,
    index_block_hash: &IndexBlockHash,
) -> Result<Vec<TxId>, sqlx::Error> {
    const QUERY: &str = "SELECT tx_id FROM txs WHERE index_block_hash = $1 ORDER BY tx_index";
    sqlx::query_scalar(QUERY)
        .bind(index_block_hash)
        .fetch_all(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::byte_array::ByteArray,
        sqlx::{Connection, PgConnection},
    };

    fn block(height: i64, seed: u8) -> Block {
        Block {
            block_hash: ByteArray([seed; 32]),
            index_block_hash: ByteArray([seed.wrapping_add(100); 32]),
            parent_index_block_hash: ByteArray([seed.wrapping_add(99); 32]),
            parent_block_hash: ByteArray([seed.wrapping_sub(1); 32]),
            parent_microblock: Default::default(),
            block_height: height,
            burn_block_time: 1_700_000_000 + height,
            canonical: true,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_insert_is_idempotent() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let b = block(1, 1);
        assert_eq!(insert(&mut db, &b).await.unwrap(), 1);
        assert_eq!(insert(&mut db, &b).await.unwrap(), 0);

        let read = get_by_index_block_hash(&mut db, &b.index_block_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, b);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_chain_tip_tracks_canonical_only() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        assert_eq!(chain_tip(&mut db).await.unwrap(), None);

        insert(&mut db, &block(1, 1)).await.unwrap();
        insert(&mut db, &block(2, 2)).await.unwrap();
        let orphan = Block {
            canonical: false,
            ..block(3, 3)
        };
        insert(&mut db, &orphan).await.unwrap();

        let tip = chain_tip(&mut db).await.unwrap().unwrap();
        assert_eq!(tip.block_height, 2);
        assert_eq!(tip.index_block_hash, block(2, 2).index_block_hash);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_get_by_hash_ignores_orphans() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        // fork sibling shares the content hash but not the index hash
        let canonical = block(2, 2);
        let mut sibling = block(2, 7);
        sibling.block_hash = canonical.block_hash;
        sibling.canonical = false;
        insert(&mut db, &canonical).await.unwrap();
        insert(&mut db, &sibling).await.unwrap();

        let read = get_by_hash(&mut db, &canonical.block_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.index_block_hash, canonical.index_block_hash);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_list_newest_first() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        for height in 1..=5 {
            insert(&mut db, &block(height, height as u8)).await.unwrap();
        }
        let page = list(&mut db, 2, 1).await.unwrap();
        let heights: Vec<_> = page.iter().map(|b| b.block_height).collect();
        assert_eq!(heights, [4, 3]);
    }
}
