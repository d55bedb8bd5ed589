use super::util::{HttpSettings, build_client, get_text, snippet};
use crate::core::config::BankPageSelectors;
use crate::core::rate::{
    CurrencyFilter, FetchError, RateObservation, RateSource, RateSourceAdapter, parse_rate_value,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, error, instrument, warn};

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn text_of(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{css}': {e}"))
}

/// Scrapes rates from the bank's public page.
///
/// The page shows one rate box per currency holding a code element and a
/// value element. It publishes no date of its own, so observations are dated
/// with the day of the fetch.
pub struct BankPageAdapter {
    url: String,
    client: reqwest::Client,
    http: HttpSettings,
    currencies: CurrencyFilter,
    rate_box_css: String,
    rate_box: Selector,
    code: Selector,
    value: Selector,
    clock: fn() -> NaiveDate,
}

impl BankPageAdapter {
    pub fn new(
        url: &str,
        selectors: &BankPageSelectors,
        currencies: CurrencyFilter,
        http: HttpSettings,
    ) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: build_client(&http)?,
            http,
            currencies,
            rate_box_css: selectors.rate_box.clone(),
            rate_box: compile(&selectors.rate_box)?,
            code: compile(&selectors.code)?,
            value: compile(&selectors.value)?,
            clock: today,
        })
    }

    /// Replaces the source of the as-of date.
    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    /// Pulls `code -> value` pairs for recognized currencies out of the page.
    fn extract(&self, html: &str) -> Result<BTreeMap<String, Decimal>, FetchError> {
        let document = Html::parse_document(html);
        let mut boxes = 0;
        let mut rates = BTreeMap::new();

        for rate_box in document.select(&self.rate_box) {
            boxes += 1;
            let (Some(code), Some(raw_value)) = (
                text_of(rate_box, &self.code),
                text_of(rate_box, &self.value),
            ) else {
                return Err(FetchError::Parse(format!(
                    "rate box #{boxes} is missing its code or value element"
                )));
            };

            let code = code.to_uppercase();
            if !self.currencies.accepts(&code) {
                debug!(%code, "Skipping unrecognized currency");
                continue;
            }
            match parse_rate_value(&raw_value) {
                Ok(value) => {
                    rates.insert(code, value);
                }
                Err(e) => warn!(%code, error = %e, "Skipping unparsable rate"),
            }
        }

        if boxes == 0 {
            return Err(FetchError::Parse(format!(
                "no elements matched '{}'",
                self.rate_box_css
            )));
        }
        if rates.is_empty() {
            return Err(FetchError::DataAbsent(format!(
                "{boxes} rate boxes, none for a recognized currency"
            )));
        }
        Ok(rates)
    }
}

#[async_trait]
impl RateSourceAdapter for BankPageAdapter {
    fn source(&self) -> RateSource {
        RateSource::BankPage
    }

    #[instrument(name = "BankPageFetch", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<RateObservation>, FetchError> {
        let as_of_date = (self.clock)();
        let body = match get_text(&self.client, &self.url, &self.http).await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to fetch bank page");
                return Err(e);
            }
        };

        let rates = self.extract(&body).inspect_err(|e| {
            error!(error = %e, body = %snippet(&body, 200), "Failed to extract rates from bank page");
        })?;

        debug!(?rates, %as_of_date, "Extracted bank page rates");
        Ok(rates
            .into_iter()
            .map(|(currency, value)| RateObservation {
                currency,
                value,
                as_of_date,
                source: RateSource::BankPage,
            })
            .collect())
    }
}
