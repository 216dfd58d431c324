//! Database transaction utilities

use sqlx::{PgPool, Postgres, Transaction};

/// Execute a closure within a database transaction
///
/// Begins a transaction, runs the closure, and commits if it succeeds or rolls back
/// if it fails. The closure's error type must absorb `sqlx::Error` so that begin and
/// commit failures surface through the same channel.
///
/// # Example
///
/// ```ignore
/// use capsule_db::transaction::with_transaction;
///
/// async fn example(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
///     with_transaction(pool, |tx| Box::pin(async move {
///         sqlx::query("UPDATE media_assets SET ...").execute(&mut **tx).await?;
///         sqlx::query("UPDATE albums SET ...").execute(&mut **tx).await?;
///         Ok::<_, sqlx::Error>(())
///     })).await
/// }
/// ```
pub async fn with_transaction<F, R, E>(pool: &PgPool, f: F) -> Result<R, E>
where
    F: for<'a> FnOnce(
        &'a mut Transaction<'_, Postgres>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<R, E>> + Send + 'a>,
    >,
    E: From<sqlx::Error>,
{
    let mut tx = pool.begin().await?;

    match f(&mut tx).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(error = %rollback_error, "Failed to roll back transaction");
            }
            Err(e)
        }
    }
}
