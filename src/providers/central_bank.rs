use super::util::{HttpSettings, build_client, get_text, snippet};
use crate::core::rate::{
    CurrencyFilter, FetchError, RateObservation, RateSource, RateSourceAdapter, parse_rate_value,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, error, instrument, warn};

const FEED_DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedRate {
    Text(String),
    Number(serde_json::Number),
}

impl FeedRate {
    fn to_decimal(&self) -> Result<Decimal, FetchError> {
        match self {
            FeedRate::Text(s) => parse_rate_value(s),
            FeedRate::Number(n) => {
                let raw = n.to_string();
                if raw.contains(['e', 'E']) {
                    Decimal::from_scientific(&raw).map_err(|e| {
                        FetchError::Parse(format!("invalid rate value '{raw}': {e}"))
                    })
                } else {
                    parse_rate_value(&raw)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    #[serde(rename = "Ccy")]
    ccy: String,
    #[serde(rename = "Rate")]
    rate: FeedRate,
    #[serde(rename = "Date")]
    date: String,
}

/// Reads the central bank's JSON rate archive.
///
/// Every record in one response carries the same `DD.MM.YYYY` date, which
/// becomes the as-of date of the whole batch.
pub struct CentralBankFeedAdapter {
    url: String,
    client: reqwest::Client,
    http: HttpSettings,
    currencies: CurrencyFilter,
}

impl CentralBankFeedAdapter {
    pub fn new(url: &str, currencies: CurrencyFilter, http: HttpSettings) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: build_client(&http)?,
            http,
            currencies,
        })
    }

    fn parse_feed_date(raw: &str) -> Result<NaiveDate, FetchError> {
        NaiveDate::parse_from_str(raw.trim(), FEED_DATE_FORMAT)
            .map_err(|e| FetchError::Parse(format!("invalid feed date '{raw}': {e}")))
    }

    fn extract(&self, body: &str) -> Result<Vec<RateObservation>, FetchError> {
        let records: Vec<FeedRecord> = serde_json::from_str(body)
            .map_err(|e| FetchError::Parse(format!("unexpected feed structure: {e}")))?;

        let first = records
            .first()
            .ok_or_else(|| FetchError::DataAbsent("feed returned no records".to_string()))?;
        let as_of_date = Self::parse_feed_date(&first.date)?;

        let mut rates = BTreeMap::new();
        for record in &records {
            let code = record.ccy.trim().to_uppercase();
            if !self.currencies.accepts(&code) {
                continue;
            }
            if record.date != first.date {
                warn!(%code, date = %record.date, batch_date = %first.date, "Record date differs from batch date");
            }
            match record.rate.to_decimal() {
                Ok(value) => {
                    rates.insert(code, value);
                }
                Err(e) => warn!(%code, error = %e, "Skipping unparsable rate"),
            }
        }

        if rates.is_empty() {
            return Err(FetchError::DataAbsent(format!(
                "{} feed records, none for a recognized currency",
                records.len()
            )));
        }

        debug!(?rates, %as_of_date, "Extracted central bank rates");
        Ok(rates
            .into_iter()
            .map(|(currency, value)| RateObservation {
                currency,
                value,
                as_of_date,
                source: RateSource::CentralBank,
            })
            .collect())
    }
}

#[async_trait]
impl RateSourceAdapter for CentralBankFeedAdapter {
    fn source(&self) -> RateSource {
        RateSource::CentralBank
    }

    #[instrument(name = "CentralBankFetch", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<RateObservation>, FetchError> {
        let body = get_text(&self.client, &self.url, &self.http)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to fetch central bank feed"))?;

        self.extract(&body).inspect_err(|e| {
            error!(error = %e, body = %snippet(&body, 200), "Failed to read central bank feed");
        })
    }
}
