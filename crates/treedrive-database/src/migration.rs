//! Embedded schema migrations.

use sqlx::PgPool;
use tracing::info;

use treedrive_core::error::{AppError, ErrorKind};

/// Apply any migrations under `migrations/` the database has not seen.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!("Applying database migrations");
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, format!("Migration failed: {e}"), e)
        })?;
    info!("Database schema up to date");
    Ok(())
}
