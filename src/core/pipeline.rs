//! Fetch, normalize and reconcile rates from every registered source.

use crate::core::rate::{FetchError, RateObservation, RateSource, RateSourceAdapter};
use crate::core::record::{RateStore, RateUpdate, UpsertSummary, upsert_all};
use anyhow::{Result, bail};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Succeeded { observations: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: RateSource,
    pub status: SourceStatus,
}

impl SourceReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, SourceStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub sources: Vec<SourceReport>,
    pub updates: Vec<RateUpdate>,
    pub writes: UpsertSummary,
}

impl ReconciliationReport {
    /// True when no source produced anything. The store is left untouched in
    /// that case.
    pub fn all_sources_failed(&self) -> bool {
        self.sources.iter().all(|s| !s.succeeded())
    }
}

struct RegisteredSource {
    adapter: Box<dyn RateSourceAdapter>,
    name_prefix: String,
}

pub struct Pipeline {
    sources: Vec<RegisteredSource>,
    store: Arc<dyn RateStore>,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(store: Arc<dyn RateStore>, timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            store,
            timeout,
        }
    }

    /// Adds a source whose observations are stored as `{name_prefix}{currency}`.
    /// Prefixes keep sources from overwriting each other, so they must be unique.
    pub fn register(
        &mut self,
        adapter: Box<dyn RateSourceAdapter>,
        name_prefix: impl Into<String>,
    ) -> Result<()> {
        let name_prefix = name_prefix.into();
        if self.sources.iter().any(|s| s.name_prefix == name_prefix) {
            bail!(
                "Name prefix '{}' is already used by another source",
                name_prefix
            );
        }
        self.sources.push(RegisteredSource {
            adapter,
            name_prefix,
        });
        Ok(())
    }

    pub async fn run(&self) -> Result<ReconciliationReport> {
        if self.sources.is_empty() {
            bail!("No rate sources registered");
        }

        info!(sources = self.sources.len(), "Fetching rates");
        let results = join_all(self.sources.iter().map(|s| self.fetch_one(s))).await;

        let mut report = ReconciliationReport::default();
        let mut merged: BTreeMap<(String, chrono::NaiveDate), RateUpdate> = BTreeMap::new();

        for (registered, result) in self.sources.iter().zip(results) {
            let source = registered.adapter.source();
            match result {
                Ok(observations) => {
                    info!(%source, count = observations.len(), "Source fetched");
                    report.sources.push(SourceReport {
                        source,
                        status: SourceStatus::Succeeded {
                            observations: observations.len(),
                        },
                    });
                    for update in namespace(&registered.name_prefix, observations) {
                        merged.insert((update.name.clone(), update.date), update);
                    }
                }
                Err(e) => {
                    warn!(%source, error = %e, "Source failed, continuing without it");
                    report.sources.push(SourceReport {
                        source,
                        status: SourceStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        if report.all_sources_failed() {
            warn!("All sources failed, nothing to persist");
            return Ok(report);
        }

        report.updates = merged.into_values().collect();
        info!(records = report.updates.len(), "Reconciling records");
        report.writes = upsert_all(self.store.as_ref(), &report.updates).await?;
        info!(
            inserted = report.writes.inserted,
            updated = report.writes.updated,
            failed = report.writes.failed,
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn fetch_one(
        &self,
        registered: &RegisteredSource,
    ) -> Result<Vec<RateObservation>, FetchError> {
        match tokio::time::timeout(self.timeout, registered.adapter.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transport(format!(
                "timed out after {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

fn namespace(prefix: &str, observations: Vec<RateObservation>) -> Vec<RateUpdate> {
    observations
        .into_iter()
        .map(|o| RateUpdate {
            name: format!("{prefix}{}", o.currency),
            value: o.value,
            date: o.as_of_date,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{NaturalKey, RecordQuery};
    use crate::store::memory::MemoryRateStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAdapter {
        source: RateSource,
        result: Result<Vec<RateObservation>, FetchError>,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl StaticAdapter {
        fn ok(source: RateSource, rates: &[(&str, &str)], date: NaiveDate) -> Self {
            let observations = rates
                .iter()
                .map(|(c, v)| RateObservation {
                    currency: c.to_string(),
                    value: Decimal::from_str(v).unwrap(),
                    as_of_date: date,
                    source,
                })
                .collect();
            Self {
                source,
                result: Ok(observations),
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(source: RateSource, error: FetchError) -> Self {
            Self {
                source,
                result: Err(error),
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl RateSourceAdapter for StaticAdapter {
        fn source(&self) -> RateSource {
            self.source
        }

        async fn fetch(&self) -> Result<Vec<RateObservation>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    fn dec_12_10() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 10).unwrap()
    }

    /// Accepts writes but cannot make them durable.
    struct UnflushableStore {
        inner: MemoryRateStore,
    }

    #[async_trait]
    impl RateStore for UnflushableStore {
        async fn upsert(&self, update: &RateUpdate) -> Result<crate::core::UpsertOutcome> {
            self.inner.upsert(update).await
        }

        async fn get(&self, key: &NaturalKey) -> Result<Option<crate::core::CurrencyRecord>> {
            self.inner.get(key).await
        }

        async fn list(&self, query: &RecordQuery) -> Result<Vec<crate::core::CurrencyRecord>> {
            self.inner.list(query).await
        }

        async fn flush(&self) -> Result<()> {
            bail!("disk full")
        }
    }

    fn pipeline(store: Arc<MemoryRateStore>) -> Pipeline {
        Pipeline::new(store, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let store = Arc::new(MemoryRateStore::new());
        let mut pipeline = pipeline(store.clone());
        pipeline
            .register(
                Box::new(StaticAdapter::ok(
                    RateSource::BankPage,
                    &[("USD", "12650"), ("RUB", "130.5"), ("EUR", "13700")],
                    dec_12_10(),
                )),
                "",
            )
            .unwrap();
        pipeline
            .register(
                Box::new(StaticAdapter::ok(
                    RateSource::CentralBank,
                    &[("USD", "12700.50")],
                    dec_12_10(),
                )),
                "CBU-",
            )
            .unwrap();

        let report = pipeline.run().await.unwrap();
        assert!(!report.all_sources_failed());
        assert_eq!(report.writes.inserted, 4);

        let records = store.list(&RecordQuery::default()).await.unwrap();
        let rows: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.name.clone(), r.value.to_string()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("CBU-USD".to_string(), "12700.50".to_string()),
                ("EUR".to_string(), "13700".to_string()),
                ("RUB".to_string(), "130.5".to_string()),
                ("USD".to_string(), "12650".to_string()),
            ]
        );
        assert!(records.iter().all(|r| r.date == dec_12_10()));
    }

    #[tokio::test]
    async fn test_bank_page_failure_keeps_central_bank_rates() {
        let store = Arc::new(MemoryRateStore::new());
        let mut pipeline = pipeline(store.clone());
        pipeline
            .register(
                Box::new(StaticAdapter::failing(
                    RateSource::BankPage,
                    FetchError::Transport("connection refused".into()),
                )),
                "",
            )
            .unwrap();
        pipeline
            .register(
                Box::new(StaticAdapter::ok(
                    RateSource::CentralBank,
                    &[("USD", "12700.50"), ("EUR", "13400.10")],
                    dec_12_10(),
                )),
                "CBU-",
            )
            .unwrap();

        let report = pipeline.run().await.unwrap();

        assert!(!report.sources[0].succeeded());
        assert!(report.sources[1].succeeded());
        assert_eq!(report.writes.inserted, 2);
        assert!(
            store
                .get(&NaturalKey::new("CBU-USD", dec_12_10()))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .get(&NaturalKey::new("USD", dec_12_10()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_central_bank_failure_keeps_bank_page_rates() {
        let store = Arc::new(MemoryRateStore::new());
        let mut pipeline = pipeline(store.clone());
        pipeline
            .register(
                Box::new(StaticAdapter::ok(
                    RateSource::BankPage,
                    &[("USD", "12650")],
                    dec_12_10(),
                )),
                "",
            )
            .unwrap();
        pipeline
            .register(
                Box::new(StaticAdapter::failing(
                    RateSource::CentralBank,
                    FetchError::DataAbsent("feed returned no records".into()),
                )),
                "CBU-",
            )
            .unwrap();

        let report = pipeline.run().await.unwrap();

        assert_eq!(
            report.sources[1].status,
            SourceStatus::Failed {
                error: "no recognized currencies: feed returned no records".into()
            }
        );
        let records = store.list(&RecordQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "USD");
    }

    #[tokio::test]
    async fn test_all_sources_failed_leaves_store_untouched() {
        let store = Arc::new(MemoryRateStore::new());
        let mut pipeline = pipeline(store.clone());
        pipeline
            .register(
                Box::new(StaticAdapter::failing(
                    RateSource::BankPage,
                    FetchError::Parse("no rate boxes".into()),
                )),
                "",
            )
            .unwrap();
        pipeline
            .register(
                Box::new(StaticAdapter::failing(
                    RateSource::CentralBank,
                    FetchError::Transport("timeout".into()),
                )),
                "CBU-",
            )
            .unwrap();

        let report = pipeline.run().await.unwrap();

        assert!(report.all_sources_failed());
        assert!(report.updates.is_empty());
        assert_eq!(report.writes, UpsertSummary::default());
        assert!(store.list(&RecordQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_times_out_without_cancelling_other() {
        let store = Arc::new(MemoryRateStore::new());
        let mut pipeline = Pipeline::new(store.clone(), Duration::from_millis(50));
        let mut slow = StaticAdapter::ok(RateSource::BankPage, &[("USD", "1")], dec_12_10());
        slow.delay = Some(Duration::from_secs(5));
        pipeline.register(Box::new(slow), "").unwrap();
        pipeline
            .register(
                Box::new(StaticAdapter::ok(
                    RateSource::CentralBank,
                    &[("USD", "12700.50")],
                    dec_12_10(),
                )),
                "CBU-",
            )
            .unwrap();

        let report = pipeline.run().await.unwrap();

        match &report.sources[0].status {
            SourceStatus::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(report.sources[1].succeeded());
        assert_eq!(report.writes.inserted, 1);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(MemoryRateStore::new());
        let mut pipeline = pipeline(store.clone());
        let bank = StaticAdapter::ok(RateSource::BankPage, &[("USD", "12650")], dec_12_10());
        let calls = bank.calls.clone();
        pipeline.register(Box::new(bank), "").unwrap();

        let first = pipeline.run().await.unwrap();
        let second = pipeline.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.writes.inserted, 1);
        assert_eq!(second.writes.inserted, 0);
        assert_eq!(second.writes.updated, 1);
        assert_eq!(store.list(&RecordQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_failure_fails_the_run() {
        let store = Arc::new(UnflushableStore {
            inner: MemoryRateStore::new(),
        });
        let mut pipeline = Pipeline::new(store, Duration::from_secs(5));
        pipeline
            .register(
                Box::new(StaticAdapter::ok(
                    RateSource::BankPage,
                    &[("USD", "12650")],
                    dec_12_10(),
                )),
                "",
            )
            .unwrap();

        let err = pipeline.run().await.unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
    }

    #[test]
    fn test_register_rejects_duplicate_prefix() {
        let mut pipeline = pipeline(Arc::new(MemoryRateStore::new()));
        pipeline
            .register(
                Box::new(StaticAdapter::ok(RateSource::BankPage, &[], dec_12_10())),
                "",
            )
            .unwrap();
        let err = pipeline
            .register(
                Box::new(StaticAdapter::ok(RateSource::CentralBank, &[], dec_12_10())),
                "",
            )
            .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[tokio::test]
    async fn test_run_without_sources_is_an_error() {
        let pipeline = pipeline(Arc::new(MemoryRateStore::new()));
        assert!(pipeline.run().await.is_err());
    }
}
