//! Postgres connection bootstrap with embedded migrations.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::instrument;

use crate::errors::{PipelineError, db_err};

/// Connect and apply embedded migrations (idempotent).
#[instrument(skip(database_url), err)]
pub async fn connect(database_url: &str) -> Result<PgPool, PipelineError> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
        .map_err(db_err)?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| PipelineError::FatalDatabase(format!("migration failure: {e}")))?;
    Ok(pool)
}
