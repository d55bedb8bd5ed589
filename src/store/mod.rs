pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use crate::core::record::RateStore;
use anyhow::Result;
use disk::FjallRateStore;
use std::sync::Arc;

/// Opens the persistent record store under the configured data directory.
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn RateStore>> {
    let path = config.data_path()?.join("rates");
    Ok(Arc::new(FjallRateStore::open(&path)?))
}
