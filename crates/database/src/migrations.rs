//! Schema versioning.
//!
//! The migration files are embedded at compile time; sqlx tracks the applied
//! versions in `_sqlx_migrations`. Migrations are directional: every step has
//! an `.up.sql` and a `.down.sql`. Reverting destroys data, so [`undo_all`]
//! exists for development and test databases only and callers must gate it on
//! a non-production environment.

use sqlx::{PgPool, migrate::Migrator};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Bring the schema up to the latest version. Safe to call on every start.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// Revert every applied migration, dropping all chain data.
pub async fn undo_all(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.undo(pool, 0).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn postgres_migrations_are_idempotent() {
        let pool = PgPool::connect("postgresql://").await.unwrap();
        run(&pool).await.unwrap();
        run(&pool).await.unwrap();
    }
}
