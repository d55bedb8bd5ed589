//! Persisted currency records and the store abstraction

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Identity of a stored record.
///
/// Uniqueness is the pair (name, date). The first revision of this store
/// keyed records by name alone, which collapsed every day onto one row; that
/// layout is retired and never read. `VERSION` is part of the encoded key so
/// a future change can live next to existing data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NaturalKey {
    pub name: String,
    pub date: NaiveDate,
}

impl NaturalKey {
    pub const VERSION: u8 = 2;

    pub fn new(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            date,
        }
    }

    pub fn prefix() -> String {
        format!("v{}/", Self::VERSION)
    }

    pub fn encode(&self) -> String {
        format!("{}{}/{}", Self::prefix(), self.name, self.date.format("%Y-%m-%d"))
    }
}

/// A namespaced rate ready to be reconciled into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateUpdate {
    pub name: String,
    pub value: Decimal,
    pub date: NaiveDate,
}

impl RateUpdate {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.name.clone(), self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRecord {
    pub id: u64,
    pub name: String,
    pub value: Decimal,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CurrencyRecord {
    pub fn create(id: u64, update: &RateUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: update.name.clone(),
            value: update.value,
            date: update.date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a fresh observation. Identity and creation time stay as they were.
    pub fn apply(&mut self, update: &RateUpdate, now: DateTime<Utc>) {
        self.value = update.value;
        self.updated_at = now;
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.name.clone(), self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
}

impl RecordQuery {
    pub fn matches(&self, record: &CurrencyRecord) -> bool {
        self.name.as_deref().is_none_or(|n| n == record.name)
            && self.date.is_none_or(|d| d == record.date)
    }
}

#[async_trait]
pub trait RateStore: Send + Sync {
    /// Inserts the record for `update.key()` if absent, otherwise updates its
    /// value and modification time.
    async fn upsert(&self, update: &RateUpdate) -> Result<UpsertOutcome>;

    async fn get(&self, key: &NaturalKey) -> Result<Option<CurrencyRecord>>;

    /// Records matching `query`, ordered by name then date.
    async fn list(&self, query: &RecordQuery) -> Result<Vec<CurrencyRecord>>;

    /// Makes previous writes durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Upserts each row independently. A failing row is logged and counted, the
/// rest still go through. A failed flush means nothing is known to be
/// durable and is returned as an error.
pub async fn upsert_all(store: &dyn RateStore, updates: &[RateUpdate]) -> Result<UpsertSummary> {
    let mut summary = UpsertSummary::default();
    for update in updates {
        match store.upsert(update).await {
            Ok(UpsertOutcome::Inserted) => {
                debug!(name = %update.name, date = %update.date, value = %update.value, "Inserted record");
                summary.inserted += 1;
            }
            Ok(UpsertOutcome::Updated) => {
                debug!(name = %update.name, date = %update.date, value = %update.value, "Updated record");
                summary.updated += 1;
            }
            Err(e) => {
                error!(name = %update.name, date = %update.date, error = ?e, "Failed to write record");
                summary.failed += 1;
            }
        }
    }

    store
        .flush()
        .await
        .inspect_err(|e| error!(error = ?e, "Failed to flush store"))
        .context("Failed to flush rate store")?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_natural_key_is_name_and_date() {
        let a = NaturalKey::new("USD", date(2024, 12, 10));
        let b = NaturalKey::new("USD", date(2024, 12, 11));
        let c = NaturalKey::new("CBU-USD", date(2024, 12, 10));

        assert_eq!(a.encode(), "v2/USD/2024-12-10");
        assert_ne!(a.encode(), b.encode());
        assert_ne!(a.encode(), c.encode());
        assert_eq!(a, NaturalKey::new("USD".to_string(), date(2024, 12, 10)));
    }

    #[test]
    fn test_apply_keeps_identity_and_created_at() {
        let created = Utc::now();
        let update = RateUpdate {
            name: "USD".into(),
            value: Decimal::new(12650, 0),
            date: date(2024, 12, 10),
        };
        let mut record = CurrencyRecord::create(7, &update, created);

        let later = created + chrono::Duration::seconds(30);
        let fresh = RateUpdate {
            value: Decimal::new(12660, 0),
            ..update
        };
        record.apply(&fresh, later);

        assert_eq!(record.id, 7);
        assert_eq!(record.value, Decimal::new(12660, 0));
        assert_eq!(record.created_at, created);
        assert_eq!(record.updated_at, later);
    }

    #[test]
    fn test_record_query_matches() {
        let update = RateUpdate {
            name: "RUB".into(),
            value: Decimal::new(1305, 1),
            date: date(2024, 12, 10),
        };
        let record = CurrencyRecord::create(1, &update, Utc::now());

        assert!(RecordQuery::default().matches(&record));
        assert!(
            RecordQuery {
                name: Some("RUB".into()),
                date: Some(date(2024, 12, 10)),
            }
            .matches(&record)
        );
        assert!(
            !RecordQuery {
                name: Some("USD".into()),
                date: None,
            }
            .matches(&record)
        );
        assert!(
            !RecordQuery {
                name: None,
                date: Some(date(2024, 12, 9)),
            }
            .matches(&record)
        );
    }
}
