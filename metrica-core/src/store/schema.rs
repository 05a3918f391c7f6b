//! Postgres schema for the `metric` table.
//!
//! One row per metric name; gauge and counter values share the row. The
//! `has_gauge`/`has_counter` flags record which kinds were ever written so a
//! name used only as a gauge is never reported as a zero counter.

use crate::error::Result;
use sqlx::PgPool;
use tracing::{info, instrument};

/// Create the `metric` table if absent and bring older tables up to date.
///
/// Idempotent; safe to run on every startup.
#[instrument(skip(pool))]
pub async fn ensure(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric (
            name TEXT PRIMARY KEY,
            gauge DOUBLE PRECISION NOT NULL DEFAULT 0,
            counter BIGINT NOT NULL DEFAULT 0,
            has_gauge BOOLEAN NOT NULL DEFAULT FALSE,
            has_counter BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Tables created before the presence flags existed.
    sqlx::query("ALTER TABLE metric ADD COLUMN IF NOT EXISTS has_gauge BOOLEAN NOT NULL DEFAULT FALSE")
        .execute(pool)
        .await?;
    sqlx::query(
        "ALTER TABLE metric ADD COLUMN IF NOT EXISTS has_counter BOOLEAN NOT NULL DEFAULT FALSE",
    )
    .execute(pool)
    .await?;

    // Legacy rows carry no flags; infer them from non-zero values. Every row
    // written by this version has at least one flag set.
    sqlx::query(
        r#"
        UPDATE metric SET has_gauge = (gauge <> 0), has_counter = (counter <> 0)
        WHERE NOT has_gauge AND NOT has_counter
        "#,
    )
    .execute(pool)
    .await?;

    info!("Metric table ready");
    Ok(())
}
