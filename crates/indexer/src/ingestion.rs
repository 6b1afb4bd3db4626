//! The single-writer ingestion task.
//!
//! One decoded batch becomes one database transaction: reorg handling, block
//! insert, transaction and event inserts, commit, then one notification
//! round. Batches are consumed in arrival order and notifications for batch N
//! are published before batch N+1 is read, so subscribers observe commits in
//! chain order.

use {
    crate::{
        decoder::{self, BlockBatch, address::Network},
        notifier::{Notification, Notifier},
    },
    database::{
        IndexBlockHash, PgTransaction,
        blocks::{self, Block},
        events::{self, EventLocator},
        reorg::{self, RestoreChainError, UpdatedEntities},
        smart_contracts::{self, SmartContract},
        txs::{self, Tx},
    },
    sqlx::PgPool,
    std::{sync::Arc, time::Duration},
    tokio::sync::{mpsc, watch},
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The parent of the incoming block is not stored yet. Out-of-order
    /// delivery; the upstream connector is expected to replay.
    #[error("parent block {parent_index_block_hash} at height {missing_height} not stored")]
    ParentMissing {
        missing_height: i64,
        parent_index_block_hash: IndexBlockHash,
    },
    /// Rows that must be unique are not. Ingestion halts so an operator can
    /// inspect the database before anything makes it worse.
    #[error("store corruption: {0}")]
    SchemaCorruption(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<RestoreChainError> for IngestError {
    fn from(err: RestoreChainError) -> Self {
        match err {
            RestoreChainError::Database(err) => Self::Database(err),
            err => Self::SchemaCorruption(err.to_string()),
        }
    }
}

/// Errors worth retrying the whole batch for. Everything else either cannot
/// succeed on retry or must halt ingestion.
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

#[derive(Clone, Debug)]
pub struct IngestOutcome {
    /// False when the block was already stored and the batch degraded to a
    /// no-op.
    pub stored: bool,
    pub block: Block,
    pub txs: Vec<Tx>,
    pub restored: Option<UpdatedEntities>,
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "ingestion")]
struct Metrics {
    /// Block batches committed.
    blocks_ingested: prometheus::IntCounter,
    /// Redelivered blocks absorbed by the idempotent insert.
    duplicate_blocks: prometheus::IntCounter,
    /// Chain restorations performed.
    reorgs: prometheus::IntCounter,
    /// Messages dropped because they failed to decode.
    decode_failures: prometheus::IntCounter,
    /// Time from transaction begin to commit for one batch.
    ingest_seconds: prometheus::Histogram,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

pub struct Ingestor {
    pool: PgPool,
    notifier: Arc<Notifier>,
    network: Network,
    metrics: &'static Metrics,
}

impl Ingestor {
    pub fn new(pool: PgPool, notifier: Arc<Notifier>, network: Network) -> Self {
        Self {
            pool,
            notifier,
            network,
            metrics: Metrics::get(),
        }
    }

    /// Consume messages until the channel closes or `shutdown` fires. An
    /// in-flight batch always runs to commit or rollback before the loop
    /// stops.
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<decoder::RawBlockMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                message = messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let batch = match decoder::decode_block_message(&message, self.network) {
                Ok(batch) => batch,
                Err(err) => {
                    self.metrics.decode_failures.inc();
                    tracing::error!(
                        ?err,
                        block_height = message.block_height,
                        "dropping block message that failed to decode"
                    );
                    continue;
                }
            };

            match self.process(&batch).await {
                Ok(_) => (),
                Err(IngestError::ParentMissing { .. }) => {
                    tracing::error!(
                        block_height = batch.block.block_height,
                        index_block_hash = %batch.block.index_block_hash,
                        "parent not stored, dropping block until upstream replays it"
                    );
                }
                Err(err) => {
                    tracing::error!(?err, "unrecoverable ingestion failure, stopping");
                    break;
                }
            }
        }
        tracing::info!("ingestion stopped");
    }

    /// Ingest one batch and, if it committed new rows, publish the
    /// notification round: the block first, then its transactions in
    /// `tx_index` order. A duplicate batch publishes nothing.
    pub async fn process(&self, batch: &BlockBatch) -> Result<IngestOutcome, IngestError> {
        let outcome = self.ingest_with_retry(batch).await?;
        if outcome.stored {
            self.notifier
                .publish(Notification::Block(outcome.block));
            for tx in &outcome.txs {
                self.notifier.publish(Notification::Tx(tx.clone()));
            }
        }
        Ok(outcome)
    }

    async fn ingest_with_retry(&self, batch: &BlockBatch) -> Result<IngestOutcome, IngestError> {
        const MAX_ATTEMPTS: u32 = 5;
        let mut backoff = Duration::from_millis(250);
        let mut attempt = 1;
        loop {
            match self.ingest(batch).await {
                Err(IngestError::Database(err)) if is_transient(&err) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(?err, attempt, "transient store failure, retrying batch");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One batch, one transaction. Any error rolls the whole transaction
    /// back (dropping an uncommitted sqlx transaction is a rollback), so no
    /// partial block is ever visible.
    async fn ingest(&self, batch: &BlockBatch) -> Result<IngestOutcome, IngestError> {
        let timer = self.metrics.ingest_seconds.start_timer();
        let mut db = self.pool.begin().await?;

        let tip_height = blocks::chain_tip(&mut db)
            .await?
            .map(|tip| tip.block_height)
            .unwrap_or_default();

        let restored = handle_reorg(&mut db, &batch.block, tip_height).await?;
        if restored.is_some() {
            self.metrics.reorgs.inc();
        }

        // Height decides canonicality: anything not extending past the tip is
        // a sibling of stored history and is stored orphaned.
        let canonical = batch.block.block_height > tip_height;
        let block = Block {
            canonical,
            ..batch.block
        };

        if blocks::insert(&mut db, &block).await? == 0 {
            db.commit().await?;
            self.metrics.duplicate_blocks.inc();
            tracing::debug!(
                index_block_hash = %block.index_block_hash,
                "block already stored, skipping batch"
            );
            return Ok(IngestOutcome {
                stored: false,
                block,
                txs: Vec::new(),
                restored,
            });
        }

        let mut stored_txs = Vec::with_capacity(batch.txs.len());
        for decoded in &batch.txs {
            let tx = Tx {
                canonical,
                ..decoded.tx.clone()
            };
            txs::insert(&mut db, &tx).await?;
            let batch_events: Vec<_> = decoded
                .events
                .iter()
                .map(|(locator, event)| {
                    (
                        EventLocator {
                            canonical,
                            ..*locator
                        },
                        event.clone(),
                    )
                })
                .collect();
            events::append(&mut db, &batch_events).await?;
            for contract in &decoded.contracts {
                smart_contracts::insert(
                    &mut db,
                    &SmartContract {
                        canonical,
                        ..contract.clone()
                    },
                )
                .await?;
            }
            stored_txs.push(tx);
        }

        db.commit().await?;
        drop(timer);
        self.metrics.blocks_ingested.inc();
        tracing::info!(
            block_height = block.block_height,
            index_block_hash = %block.index_block_hash,
            txs = stored_txs.len(),
            canonical,
            "ingested block"
        );

        Ok(IngestOutcome {
            stored: true,
            block,
            txs: stored_txs,
            restored,
        })
    }
}

/// Decide whether the incoming block triggers a chain restoration.
///
/// The parent is looked up by (`block_height − 1`, `parent_index_block_hash`).
/// A missing parent is out-of-order delivery; an ambiguous parent is schema
/// corruption. A canonical parent needs nothing. An orphaned parent triggers
/// restoration only when the incoming block would out-grow the current tip;
/// otherwise the incoming block simply joins the orphaned branch.
async fn handle_reorg(
    db: &mut PgTransaction<'_>,
    block: &Block,
    tip_height: i64,
) -> Result<Option<UpdatedEntities>, IngestError> {
    if block.block_height <= 1 {
        return Ok(None);
    }

    let parents =
        blocks::parents_at(db, block.block_height - 1, &block.parent_index_block_hash).await?;
    let parent = match parents.as_slice() {
        [] => {
            return Err(IngestError::ParentMissing {
                missing_height: block.block_height - 1,
                parent_index_block_hash: block.parent_index_block_hash,
            });
        }
        [parent] => parent,
        _ => {
            return Err(IngestError::SchemaCorruption(format!(
                "multiple parent rows for {}",
                block.parent_index_block_hash
            )));
        }
    };

    if parent.canonical || block.block_height <= tip_height {
        return Ok(None);
    }

    let updated = reorg::restore_orphaned_chain(db, parent.index_block_hash).await?;
    tracing::info!(
        fork_tip = %parent.index_block_hash,
        %updated,
        "restored orphaned chain"
    );
    Ok(Some(updated))
}
