use crate::core::record::{
    CurrencyRecord, NaturalKey, RateStore, RateUpdate, RecordQuery, UpsertOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Inner {
    records: BTreeMap<NaturalKey, CurrencyRecord>,
    last_id: u64,
}

/// In-memory record store, kept ordered by natural key.
#[derive(Default)]
pub struct MemoryRateStore {
    inner: Mutex<Inner>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn upsert(&self, update: &RateUpdate) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let key = update.key();

        if let Some(record) = inner.records.get_mut(&key) {
            record.apply(update, now);
            debug!("Store UPDATE for key: {:?}", key);
            return Ok(UpsertOutcome::Updated);
        }

        inner.last_id += 1;
        let record = CurrencyRecord::create(inner.last_id, update, now);
        debug!("Store INSERT for key: {:?}", key);
        inner.records.insert(key, record);
        Ok(UpsertOutcome::Inserted)
    }

    async fn get(&self, key: &NaturalKey) -> Result<Option<CurrencyRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(key).cloned())
    }

    async fn list(&self, query: &RecordQuery) -> Result<Vec<CurrencyRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }
}
