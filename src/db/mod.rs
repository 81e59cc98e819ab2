pub mod catalog;
pub mod models;

use crate::error::CoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

pub type DbPool = SqlitePool;

/// Open (creating if absent) the catalog database, with the busy-timeout
/// the scoped-connection design relies on to ride out short-lived
/// contention before surfacing a `BusyError`.
pub async fn create_pool(database_path: &str, busy_timeout_secs: u64) -> anyhow::Result<DbPool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{database_path}"))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(busy_timeout_secs))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./src/db/migrations").run(pool).await?;
    Ok(())
}

type TxFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send + 'c>>;

/// Run `body` inside a transaction, committing on success and rolling back
/// on any error. Retries up to `max_retries` times, with a 1s linear
/// back-off, but only when the failure is a catalog contention (`Busy`)
/// error — every other error kind propagates immediately.
pub async fn with_transaction<T, F>(
    pool: &DbPool,
    max_retries: u32,
    body: F,
) -> Result<T, CoreError>
where
    F: for<'c> Fn(&'c mut Transaction<'_, Sqlite>) -> TxFuture<'c, T>,
{
    let mut attempt = 0;
    loop {
        let mut tx = pool.begin().await?;
        match body(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                return Ok(value);
            }
            Err(CoreError::Busy(msg)) if attempt < max_retries => {
                let _ = tx.rollback().await;
                attempt += 1;
                tracing::warn!(attempt, "catalog busy, retrying: {msg}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }
    }
}
