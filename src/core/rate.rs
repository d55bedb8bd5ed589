//! Rate observations and the source adapter abstraction

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RateSource {
    BankPage,
    CentralBank,
}

impl Display for RateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RateSource::BankPage => "bank-page",
                RateSource::CentralBank => "central-bank",
            }
        )
    }
}

/// One rate fact produced by an adapter during a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateObservation {
    pub currency: String,
    pub value: Decimal,
    pub as_of_date: NaiveDate,
    pub source: RateSource,
}

/// Why a source produced nothing usable for this run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("no recognized currencies: {0}")]
    DataAbsent(String),
}

/// The set of currency codes the pipeline keeps. Everything else a source
/// publishes is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyFilter {
    codes: BTreeSet<String>,
}

impl CurrencyFilter {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn accepts(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

impl Default for CurrencyFilter {
    fn default() -> Self {
        Self::new(["USD", "RUB", "EUR"])
    }
}

/// Parses a rate as published by a source into a decimal.
///
/// Sources group thousands with spaces (including non-breaking ones) and may
/// use a comma as the decimal separator. A comma is treated as a decimal
/// separator only when no dot is present, otherwise it is a grouping mark.
/// Without a dot, a comma followed by exactly three digits (`12,650`) reads
/// either way and is rejected.
pub fn parse_rate_value(raw: &str) -> Result<Decimal, FetchError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let normalized = if compact.contains('.') {
        compact.replace(',', "")
    } else {
        let ambiguous = compact
            .rsplit_once(',')
            .is_some_and(|(_, tail)| tail.len() == 3 && tail.chars().all(|c| c.is_ascii_digit()));
        if ambiguous {
            return Err(FetchError::Parse(format!(
                "ambiguous rate value '{raw}': comma may be a decimal or grouping mark"
            )));
        }
        compact.replace(',', ".")
    };

    if normalized.is_empty() {
        return Err(FetchError::Parse("empty rate value".to_string()));
    }

    Decimal::from_str(&normalized)
        .map_err(|e| FetchError::Parse(format!("invalid rate value '{raw}': {e}")))
}

#[async_trait]
pub trait RateSourceAdapter: Send + Sync {
    fn source(&self) -> RateSource;

    async fn fetch(&self) -> Result<Vec<RateObservation>, FetchError>;
}
