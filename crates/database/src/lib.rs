pub mod balances;
pub mod blocks;
pub mod byte_array;
pub mod events;
pub mod migrations;
pub mod reorg;
pub mod smart_contracts;
pub mod txs;

use {
    byte_array::ByteArray,
    sqlx::{
        Executor, PgPool,
        postgres::{PgConnectOptions, PgPoolOptions},
    },
    std::time::{Duration, Instant},
};

// Design:
//
// A function that runs several statements takes `&mut PgTransaction` so that
// the statements succeed or fail as a unit; a function that runs exactly one
// statement takes `&mut PgConnection` and can be used standalone or inside a
// caller's transaction (PgTransaction derefs to PgConnection). The executor
// parameter is conventionally named `ex`. Nothing in this crate commits;
// committing is the caller's responsibility.
//
// All ingestion writes for one block batch run inside a single transaction
// owned by the indexer. Rows are inserted once and afterwards only ever
// mutated through their `canonical` flag, so every insert is `ON CONFLICT DO
// NOTHING` and reports the number of rows it actually wrote. Duplicate
// message delivery therefore degrades to a no-op instead of an error.
//
// Postgres tests begin a transaction, run all their queries on it and never
// commit, so dropping the transaction rolls everything back. That keeps the
// tests runnable in parallel against one database.

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// The names of all tables we use in the db.
pub const ALL_TABLES: &[&str] = &[
    "blocks",
    "txs",
    "stx_events",
    "ft_events",
    "nft_events",
    "contract_logs",
    "smart_contracts",
];

/// Delete all data in the database. Only used by tests.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in ALL_TABLES {
        ex.execute(format!("TRUNCATE {table};").as_str()).await?;
    }
    Ok(())
}

/// Like above but more ergonomic for some tests that use a pool.
#[allow(non_snake_case)]
pub async fn clear_DANGER(pool: &PgPool) -> sqlx::Result<()> {
    let mut transaction = pool.begin().await?;
    clear_DANGER_(&mut transaction).await?;
    transaction.commit().await
}

/// Open a pool against the configured server.
///
/// The sidecar usually starts together with its database, so establishment
/// failures are retried every two seconds for up to ten seconds before the
/// error is surfaced. Query failures after establishment are never retried
/// here; the indexer decides what is worth retrying.
pub async fn connect(options: PgConnectOptions) -> sqlx::Result<PgPool> {
    const BACKOFF: Duration = Duration::from_secs(2);
    const GIVE_UP_AFTER: Duration = Duration::from_secs(10);

    let deadline = Instant::now() + GIVE_UP_AFTER;
    loop {
        match PgPoolOptions::new().connect_with(options.clone()).await {
            Ok(pool) => return Ok(pool),
            Err(err) if Instant::now() + BACKOFF <= deadline => {
                tracing::warn!(?err, "database not reachable yet, retrying");
                tokio::time::sleep(BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Content hash of a block. Repeats across fork siblings.
pub type BlockHash = ByteArray<32>;
/// Chain-position-unique block identifier. The correlation key across all
/// tables and the only safe way to address one specific block.
pub type IndexBlockHash = ByteArray<32>;
pub type MicroblockHash = ByteArray<32>;
pub type TxId = ByteArray<32>;

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_clear() {
        let pool = PgPool::connect("postgresql://").await.unwrap();
        migrations::run(&pool).await.unwrap();
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut con = con.begin().await.unwrap();
        clear_DANGER_(&mut con).await.unwrap();
    }
}
