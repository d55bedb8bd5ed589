pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::Pipeline;
use crate::core::config::AppConfig;
use crate::core::record::{RateStore, RecordQuery};
use crate::providers::util::HttpSettings;
use crate::providers::{BankPageAdapter, CentralBankFeedAdapter};
use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Fetch,
    List {
        name: Option<String>,
        date: Option<NaiveDate>,
    },
}

/// Wires every configured source into a pipeline writing to `store`.
pub fn build_pipeline(config: &AppConfig, store: Arc<dyn RateStore>) -> Result<Pipeline> {
    let currencies = config.currency_filter();
    let mut pipeline = Pipeline::new(store, config.source_budget());

    if let Some(bank) = &config.providers.bank_page {
        let adapter = BankPageAdapter::new(
            &bank.url,
            &bank.selectors,
            currencies.clone(),
            HttpSettings::from_config(config, bank.insecure_tls),
        )?;
        pipeline.register(Box::new(adapter), bank.name_prefix.as_str())?;
    }

    if let Some(cbu) = &config.providers.central_bank {
        let adapter = CentralBankFeedAdapter::new(
            &cbu.url,
            currencies.clone(),
            HttpSettings::from_config(config, cbu.insecure_tls),
        )?;
        pipeline.register(Box::new(adapter), cbu.name_prefix.as_str())?;
    }

    Ok(pipeline)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("ratekeeper starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = store::open_store(&config)?;

    match command {
        AppCommand::Fetch => {
            let pipeline = build_pipeline(&config, store)?;
            cli::fetch::run(&pipeline).await
        }
        AppCommand::List { name, date } => {
            cli::list::run(store.as_ref(), &RecordQuery { name, date }).await
        }
    }
}
