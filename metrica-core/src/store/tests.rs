#[cfg(test)]
mod tests {
    use crate::error::MetricaError;
    use crate::store::{MemoryStore, MetricStore, PostgresStore};
    use crate::types::MetricKind;
    use std::sync::Arc;

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
    }

    /// Postgres store for tests, if `METRICA_TEST_DATABASE_DSN` is set.
    async fn postgres_store() -> Option<PostgresStore> {
        let dsn = std::env::var("METRICA_TEST_DATABASE_DSN").ok()?;
        Some(PostgresStore::connect(&dsn).await.expect("test database should be reachable"))
    }

    /// Metric name unique to one test run, so Postgres tests don't collide.
    fn unique(name: &str) -> String {
        format!("{}_{}", name, rand::random::<u32>())
    }

    async fn check_gauge_overwrite(store: &dyn MetricStore, name: &str) {
        store.update_gauge(name, 100.5).await.unwrap();
        assert_eq!(store.get_metric(MetricKind::Gauge, name).await.unwrap(), "100.5");

        store.update_gauge(name, 42.0).await.unwrap();
        assert_eq!(store.get_metric(MetricKind::Gauge, name).await.unwrap(), "42");
    }

    async fn check_counter_accumulates(store: &dyn MetricStore, name: &str) {
        for _ in 0..5 {
            store.update_counter(name, 1).await.unwrap();
        }
        assert_eq!(store.get_metric(MetricKind::Counter, name).await.unwrap(), "5");
    }

    async fn check_batch_atomicity(store: &dyn MetricStore, gauge: &str, counter: &str) {
        let fresh = format!("{}_fresh", gauge);
        store.update_gauge(gauge, 1.5).await.unwrap();
        store.update_counter(counter, 10).await.unwrap();

        let result = store
            .update_batch(
                &pairs(&[(gauge, "99"), (fresh.as_str(), "7")]),
                &pairs(&[(counter, "5"), ("broken", "not-a-number")]),
            )
            .await;

        assert!(matches!(result, Err(MetricaError::Parse { kind: MetricKind::Counter, .. })));
        assert_eq!(store.get_metric(MetricKind::Gauge, gauge).await.unwrap(), "1.5");
        assert_eq!(store.get_metric(MetricKind::Counter, counter).await.unwrap(), "10");
        assert!(matches!(
            store.get_metric(MetricKind::Gauge, &fresh).await,
            Err(MetricaError::NotFound { .. })
        ));
    }

    async fn check_counter_overflow_is_rejected(store: &dyn MetricStore, name: &str) {
        store.update_counter(name, i64::MAX - 1).await.unwrap();

        let err = store.update_counter(name, 5).await.unwrap_err();
        assert!(matches!(err, MetricaError::OutOfRange(_)), "{:?}", err);
        assert!(!err.is_retryable());

        let result = store.update_batch(&[], &pairs(&[(name, "1"), (name, "1")])).await;
        assert!(matches!(result, Err(MetricaError::OutOfRange(_))));
        assert_eq!(
            store.get_metric(MetricKind::Counter, name).await.unwrap(),
            (i64::MAX - 1).to_string()
        );
    }

    async fn check_non_finite_gauge_is_rejected(store: &dyn MetricStore, name: &str) {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = store.update_gauge(name, value).await.unwrap_err();
            assert!(matches!(err, MetricaError::Parse { kind: MetricKind::Gauge, .. }));
        }
        assert!(matches!(
            store.get_metric(MetricKind::Gauge, name).await,
            Err(MetricaError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_gauge_overwrite() {
        check_gauge_overwrite(&MemoryStore::new(), "Alloc").await;
    }

    #[tokio::test]
    async fn test_memory_counter_accumulates() {
        check_counter_accumulates(&MemoryStore::new(), "PollCount").await;
    }

    #[tokio::test]
    async fn test_memory_missing_metric_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_metric(MetricKind::Gauge, "nope").await.unwrap_err();
        assert!(matches!(
            err,
            MetricaError::NotFound { kind: MetricKind::Gauge, ref name } if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_memory_kinds_are_disjoint() {
        let store = MemoryStore::new();
        store.update_gauge("shared", 2.5).await.unwrap();
        store.update_counter("shared", 3).await.unwrap();

        assert_eq!(store.get_metric(MetricKind::Gauge, "shared").await.unwrap(), "2.5");
        assert_eq!(store.get_metric(MetricKind::Counter, "shared").await.unwrap(), "3");

        store.update_gauge("only_gauge", 1.0).await.unwrap();
        assert!(store.get_metric(MetricKind::Counter, "only_gauge").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_batch_applies_both_kinds() {
        let store = MemoryStore::new();
        store.update_counter("b", 2).await.unwrap();

        store
            .update_batch(&pairs(&[("a", "1.5"), ("a", "2.5")]), &pairs(&[("b", "3"), ("b", "4")]))
            .await
            .unwrap();

        assert_eq!(store.get_metric(MetricKind::Gauge, "a").await.unwrap(), "2.5");
        assert_eq!(store.get_metric(MetricKind::Counter, "b").await.unwrap(), "9");
    }

    #[tokio::test]
    async fn test_memory_batch_atomicity() {
        let store = MemoryStore::new();
        check_batch_atomicity(&store, "gauge_a", "counter_b").await;

        let before = store.get_all_metrics().await.unwrap();
        let result = store.update_batch(&pairs(&[("gauge_a", "1e")]), &[]).await;
        assert!(matches!(result, Err(MetricaError::Parse { kind: MetricKind::Gauge, .. })));
        assert_eq!(store.get_all_metrics().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_memory_counter_overflow_is_rejected() {
        check_counter_overflow_is_rejected(&MemoryStore::new(), "PollCount").await;
    }

    #[tokio::test]
    async fn test_memory_non_finite_gauge_is_rejected() {
        let store = MemoryStore::new();
        check_non_finite_gauge_is_rejected(&store, "CPU").await;

        let result = store.update_batch(&pairs(&[("a", "1"), ("CPU", "NaN")]), &[]).await;
        assert!(matches!(result, Err(MetricaError::Parse { kind: MetricKind::Gauge, .. })));
        assert!(store.get_all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_get_all_metrics_sorted_and_formatted() {
        let store = MemoryStore::new();
        store.update_gauge("b", 0.25).await.unwrap();
        store.update_gauge("a", 3.0).await.unwrap();
        store.update_counter("PollCount", 7).await.unwrap();

        let all = store.get_all_metrics().await.unwrap();
        assert_eq!(all.gauges, pairs(&[("a", "3"), ("b", "0.25")]));
        assert_eq!(all.counters, pairs(&[("PollCount", "7")]));
    }

    #[tokio::test]
    async fn test_memory_concurrent_counter_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.update_counter("hits", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_metric(MetricKind::Counter, "hits").await.unwrap(), "1600");
    }

    #[tokio::test]
    async fn test_postgres_gauge_overwrite() {
        let Some(store) = postgres_store().await else { return };
        check_gauge_overwrite(&store, &unique("Alloc")).await;
    }

    #[tokio::test]
    async fn test_postgres_counter_accumulates() {
        let Some(store) = postgres_store().await else { return };
        check_counter_accumulates(&store, &unique("PollCount")).await;
    }

    #[tokio::test]
    async fn test_postgres_batch_atomicity() {
        let Some(store) = postgres_store().await else { return };
        check_batch_atomicity(&store, &unique("gauge_a"), &unique("counter_b")).await;
    }

    #[tokio::test]
    async fn test_postgres_counter_overflow_is_rejected() {
        let Some(store) = postgres_store().await else { return };
        check_counter_overflow_is_rejected(&store, &unique("PollCount")).await;
    }

    #[tokio::test]
    async fn test_postgres_non_finite_gauge_is_rejected() {
        let Some(store) = postgres_store().await else { return };
        check_non_finite_gauge_is_rejected(&store, &unique("CPU")).await;
    }

    #[tokio::test]
    async fn test_postgres_gauge_only_row_has_no_counter() {
        let Some(store) = postgres_store().await else { return };
        let name = unique("only_gauge");
        store.update_gauge(&name, 4.0).await.unwrap();
        assert!(matches!(
            store.get_metric(MetricKind::Counter, &name).await,
            Err(MetricaError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_postgres_concurrent_counter_updates_are_not_lost() {
        let Some(store) = postgres_store().await else { return };
        let store = Arc::new(store);
        let name = unique("hits");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store.update_counter(&name, 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_metric(MetricKind::Counter, &name).await.unwrap(), "80");
    }
}
