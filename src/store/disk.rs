use crate::core::record::{
    CurrencyRecord, NaturalKey, RateStore, RateUpdate, RecordQuery, UpsertOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

const LAST_ID_KEY: &str = "last_id";

/// Record store on a fjall keyspace.
///
/// Records live in the `records` partition under their encoded natural key,
/// serialized as JSON. The `meta` partition holds the id counter, which is
/// written in the same batch as the record it was allocated for.
pub struct FjallRateStore {
    keyspace: Keyspace,
    records: PartitionHandle,
    meta: PartitionHandle,
    write_lock: Mutex<()>,
}

impl FjallRateStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create store directory: {}", path.display()))?;

        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let records = keyspace.open_partition("records", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;
        debug!("Opened rate store at {}", path.display());

        Ok(Self {
            keyspace,
            records,
            meta,
            write_lock: Mutex::new(()),
        })
    }

    fn last_id(&self) -> Result<u64> {
        match self.meta.get(LAST_ID_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = (&*bytes)
                    .try_into()
                    .context("Corrupt id counter in store")?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn read(&self, key: &NaturalKey) -> Result<Option<CurrencyRecord>> {
        match self.records.get(key.encode())? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt record for key {}", key.encode()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RateStore for FjallRateStore {
    async fn upsert(&self, update: &RateUpdate) -> Result<UpsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let key = update.key();

        if let Some(mut record) = self.read(&key)? {
            record.apply(update, now);
            self.records
                .insert(key.encode(), serde_json::to_vec(&record)?)?;
            debug!("Store UPDATE for key: {:?}", key);
            return Ok(UpsertOutcome::Updated);
        }

        let id = self.last_id()? + 1;
        let record = CurrencyRecord::create(id, update, now);
        let mut batch = self.keyspace.batch();
        batch.insert(&self.records, key.encode(), serde_json::to_vec(&record)?);
        batch.insert(&self.meta, LAST_ID_KEY, id.to_be_bytes().to_vec());
        batch.commit()?;
        debug!("Store INSERT for key: {:?}", key);
        Ok(UpsertOutcome::Inserted)
    }

    async fn get(&self, key: &NaturalKey) -> Result<Option<CurrencyRecord>> {
        self.read(key)
    }

    async fn list(&self, query: &RecordQuery) -> Result<Vec<CurrencyRecord>> {
        let mut out = Vec::new();
        for item in self.records.prefix(NaturalKey::prefix()) {
            let (_key, value) = item?;
            let record: CurrencyRecord = serde_json::from_slice(&value)?;
            if query.matches(&record) {
                out.push(record);
            }
        }
        out.sort_by_key(|r| r.key());
        Ok(out)
    }

    async fn flush(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to persist store")
    }
}
