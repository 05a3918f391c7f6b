//! Postgres-backed metric store.
//!
//! Every operation goes through [`retry_with_backoff`]; transient failures
//! surface as `StorageUnavailable` after the fourth attempt. Counter updates
//! are single-statement increments, so concurrent writers never lose
//! updates.

use super::{parse_batch, schema, MetricStore};
use crate::error::{MetricaError, Result};
use crate::retry::{retry_with_backoff, storage_exhausted};
use crate::types::{check_gauge, format_counter, format_gauge, MetricKind, MetricsSnapshot};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};

const UPSERT_GAUGE: &str = r#"
    INSERT INTO metric (name, gauge, has_gauge) VALUES ($1, $2, TRUE)
    ON CONFLICT (name) DO UPDATE SET gauge = EXCLUDED.gauge, has_gauge = TRUE
"#;

const INCREMENT_COUNTER: &str = r#"
    INSERT INTO metric (name, counter, has_counter) VALUES ($1, $2, TRUE)
    ON CONFLICT (name) DO UPDATE SET counter = metric.counter + EXCLUDED.counter, has_counter = TRUE
"#;

/// Metric store persisted in a Postgres `metric` table.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to `dsn` and create the schema if needed.
    ///
    /// Connection and schema creation are retried on the shared backoff
    /// schedule.
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self> {
        info!("Connecting to Postgres metric store");

        let pool = retry_with_backoff("connect", move |attempt| async move {
            debug!(attempt, "Opening Postgres pool");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(3))
                .connect(dsn)
                .await?;
            schema::ensure(&pool).await?;
            Ok::<_, MetricaError>(pool)
        })
        .await
        .map_err(|e| storage_exhausted("connect", e))?;

        info!("Postgres metric store initialized successfully");
        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_batch(
        tx: &mut Transaction<'_, Postgres>,
        gauges: &[(String, f64)],
        counters: &[(String, i64)],
    ) -> Result<()> {
        for (name, value) in gauges {
            sqlx::query(UPSERT_GAUGE).bind(name).bind(value).execute(&mut **tx).await?;
        }
        for (name, delta) in counters {
            sqlx::query(INCREMENT_COUNTER).bind(name).bind(delta).execute(&mut **tx).await?;
        }
        Ok(())
    }

    fn record_failure(operation: &'static str) {
        metrics::counter!("metrica_store_failures_total", "backend" => "postgres", "operation" => operation)
            .increment(1);
    }
}

fn row_value(row: &PgRow, kind: MetricKind) -> Result<Option<String>> {
    let value = match kind {
        MetricKind::Gauge => {
            if row.try_get::<bool, _>("has_gauge")? {
                Some(format_gauge(row.try_get::<f64, _>("gauge")?))
            } else {
                None
            }
        }
        MetricKind::Counter => {
            if row.try_get::<bool, _>("has_counter")? {
                Some(format_counter(row.try_get::<i64, _>("counter")?))
            } else {
                None
            }
        }
    };
    Ok(value)
}

#[async_trait]
impl MetricStore for PostgresStore {
    #[instrument(skip(self))]
    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        let value = check_gauge(value)?;
        let pool = &self.pool;
        retry_with_backoff("update_gauge", move |_| async move {
            sqlx::query(UPSERT_GAUGE).bind(name).bind(value).execute(pool).await?;
            Ok::<_, MetricaError>(())
        })
        .await
        .map_err(|e| {
            Self::record_failure("update_gauge");
            storage_exhausted("update_gauge", e)
        })
    }

    #[instrument(skip(self))]
    async fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        let pool = &self.pool;
        retry_with_backoff("update_counter", move |_| async move {
            sqlx::query(INCREMENT_COUNTER).bind(name).bind(delta).execute(pool).await?;
            Ok::<_, MetricaError>(())
        })
        .await
        .map_err(|e| {
            Self::record_failure("update_counter");
            storage_exhausted("update_counter", e)
        })
    }

    #[instrument(skip_all, fields(gauges = gauges.len(), counters = counters.len()))]
    async fn update_batch(
        &self,
        gauges: &[(String, String)],
        counters: &[(String, String)],
    ) -> Result<()> {
        // Parse failures are final and must not touch the table.
        let (gauges, counters) = parse_batch(gauges, counters)?;
        let (gauges, counters) = (gauges.as_slice(), counters.as_slice());
        let pool = &self.pool;

        retry_with_backoff("update_batch", move |attempt| async move {
            let mut tx = pool.begin().await?;
            // Dropping the transaction on error rolls it back.
            Self::apply_batch(&mut tx, gauges, counters).await?;
            tx.commit().await?;
            debug!(attempt, "Batch committed");
            Ok::<_, MetricaError>(())
        })
        .await
        .map_err(|e| {
            Self::record_failure("update_batch");
            storage_exhausted("update_batch", e)
        })
    }

    #[instrument(skip(self))]
    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<String> {
        let pool = &self.pool;
        let row = retry_with_backoff("get_metric", move |_| async move {
            let row = sqlx::query(
                "SELECT gauge, counter, has_gauge, has_counter FROM metric WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(pool)
            .await?;
            Ok::<_, MetricaError>(row)
        })
        .await
        .map_err(|e| {
            Self::record_failure("get_metric");
            storage_exhausted("get_metric", e)
        })?;

        let value = match row {
            Some(row) => row_value(&row, kind)?,
            None => None,
        };
        value.ok_or_else(|| MetricaError::NotFound { kind, name: name.to_string() })
    }

    #[instrument(skip(self))]
    async fn get_all_metrics(&self) -> Result<MetricsSnapshot> {
        let pool = &self.pool;
        let rows = retry_with_backoff("get_all_metrics", move |_| async move {
            let rows = sqlx::query(
                "SELECT name, gauge, counter, has_gauge, has_counter FROM metric ORDER BY name",
            )
            .fetch_all(pool)
            .await?;
            Ok::<_, MetricaError>(rows)
        })
        .await
        .map_err(|e| {
            Self::record_failure("get_all_metrics");
            storage_exhausted("get_all_metrics", e)
        })?;

        let mut snapshot = MetricsSnapshot::default();
        for row in rows {
            let name: String = row.try_get("name")?;
            if let Some(value) = row_value(&row, MetricKind::Gauge)? {
                snapshot.gauges.push((name.clone(), value));
            }
            if let Some(value) = row_value(&row, MetricKind::Counter)? {
                snapshot.counters.push((name, value));
            }
        }
        Ok(snapshot)
    }

    async fn ping(&self) -> Result<()> {
        let pool = &self.pool;
        retry_with_backoff("ping", move |_| async move {
            sqlx::query("SELECT 1").execute(pool).await?;
            Ok::<_, MetricaError>(())
        })
        .await
        .map_err(|e| storage_exhausted("ping", e))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
