//! Canonicality repair.
//!
//! A reorg never deletes rows. The store keeps every fork it has ever seen
//! and answers queries through the `canonical` flags, so repairing a reorg
//! means flipping those flags in lockstep across the block and everything
//! that shares its `index_block_hash`.

use {
    crate::{IndexBlockHash, PgTransaction, blocks},
    sqlx::PgConnection,
    std::fmt,
};

#[derive(Debug, thiserror::Error)]
pub enum RestoreChainError {
    #[error("block {0} not found")]
    BlockNotFound(IndexBlockHash),
    #[error("multiple block rows stored for {0}")]
    AmbiguousBlock(IndexBlockHash),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Per-table row counts touched by a canonicality repair.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpdatedEntities {
    pub blocks: u64,
    pub txs: u64,
    pub stx_events: u64,
    pub ft_events: u64,
    pub nft_events: u64,
    pub contract_logs: u64,
    pub smart_contracts: u64,
}

impl UpdatedEntities {
    pub fn total(&self) -> u64 {
        self.blocks
            + self.txs
            + self.stx_events
            + self.ft_events
            + self.nft_events
            + self.contract_logs
            + self.smart_contracts
    }

    fn absorb(&mut self, other: Self) {
        self.blocks += other.blocks;
        self.txs += other.txs;
        self.stx_events += other.stx_events;
        self.ft_events += other.ft_events;
        self.nft_events += other.nft_events;
        self.contract_logs += other.contract_logs;
        self.smart_contracts += other.smart_contracts;
    }
}

impl fmt::Display for UpdatedEntities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "blocks: {}, txs: {}, stx_events: {}, ft_events: {}, nft_events: {}, \
             contract_logs: {}, smart_contracts: {}",
            self.blocks,
            self.txs,
            self.stx_events,
            self.ft_events,
            self.nft_events,
            self.contract_logs,
            self.smart_contracts,
        )
    }
}

async fn flip_canonical(
    ex: &mut PgConnection,
    table: &str,
    index_block_hash: &IndexBlockHash,
    canonical: bool,
) -> Result<u64, sqlx::Error> {
    // Guarding on the current value keeps the counts meaningful and the
    // updates idempotent within one repair.
    let query = format!(
        "UPDATE {table} SET canonical = $2 WHERE index_block_hash = $1 AND canonical != $2;"
    );
    let result = sqlx::query(&query)
        .bind(index_block_hash)
        .bind(canonical)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Flip the `canonical` flag of every non-block entity sharing
/// `index_block_hash`. The block row itself is handled by the caller, which
/// knows whether it is promoting, demoting, or inserting it.
pub async fn mark_entities_canonical(
    ex: &mut PgTransaction<'_>,
    index_block_hash: &IndexBlockHash,
    canonical: bool,
) -> Result<UpdatedEntities, sqlx::Error> {
    Ok(UpdatedEntities {
        blocks: 0,
        txs: flip_canonical(ex, "txs", index_block_hash, canonical).await?,
        stx_events: flip_canonical(ex, "stx_events", index_block_hash, canonical).await?,
        ft_events: flip_canonical(ex, "ft_events", index_block_hash, canonical).await?,
        nft_events: flip_canonical(ex, "nft_events", index_block_hash, canonical).await?,
        contract_logs: flip_canonical(ex, "contract_logs", index_block_hash, canonical).await?,
        smart_contracts: flip_canonical(ex, "smart_contracts", index_block_hash, canonical)
            .await?,
    })
}

/// Promote the orphaned chain ending in `index_block_hash` to canonical.
///
/// Walks from the named block towards genesis: at each height the block is
/// promoted, the competing canonical sibling (and all entities of both) is
/// demoted, and the walk continues while the parent exists and is itself
/// orphaned. The first already-canonical ancestor is the fork point and ends
/// the walk.
pub async fn restore_orphaned_chain(
    ex: &mut PgTransaction<'_>,
    index_block_hash: IndexBlockHash,
) -> Result<UpdatedEntities, RestoreChainError> {
    let mut totals = UpdatedEntities::default();
    let mut current = index_block_hash;
    loop {
        let matches = blocks::all_by_index_block_hash(ex, &current).await?;
        let block = match matches.as_slice() {
            [] => return Err(RestoreChainError::BlockNotFound(current)),
            [block] => *block,
            _ => return Err(RestoreChainError::AmbiguousBlock(current)),
        };

        totals.blocks += flip_canonical(ex, "blocks", &current, true).await?;

        // demote whoever currently holds this height
        for sibling in canonical_siblings_at(ex, block.block_height, &current).await? {
            totals.blocks += flip_canonical(ex, "blocks", &sibling, false).await?;
            totals.absorb(mark_entities_canonical(ex, &sibling, false).await?);
        }

        totals.absorb(mark_entities_canonical(ex, &current, true).await?);

        let parent =
            blocks::parents_at(ex, block.block_height - 1, &block.parent_index_block_hash).await?;
        match parent.first() {
            Some(parent) if !parent.canonical => current = parent.index_block_hash,
            _ => break,
        }
    }
    Ok(totals)
}

async fn canonical_siblings_at(
    ex: &mut PgConnection,
    block_height: i64,
    excluding: &IndexBlockHash,
) -> Result<Vec<IndexBlockHash>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT index_block_hash FROM blocks \
        WHERE block_height = $1 AND canonical AND index_block_hash != $2;";
    sqlx::query_scalar(QUERY)
        .bind(block_height)
        .bind(excluding)
        .fetch_all(ex)
        .await
}
