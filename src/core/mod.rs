//! Core business logic abstractions

pub mod config;
pub mod log;
pub mod pipeline;
pub mod rate;
pub mod record;

// Re-export main types for cleaner imports
pub use pipeline::{Pipeline, ReconciliationReport, SourceReport, SourceStatus};
pub use rate::{CurrencyFilter, FetchError, RateObservation, RateSource, RateSourceAdapter};
pub use record::{CurrencyRecord, NaturalKey, RateStore, RateUpdate, RecordQuery, UpsertOutcome};
