use chrono::{DateTime, Utc};
use mlm_engine::config::EngineSettings;
use mlm_engine::error::AppError;
use mlm_engine::workflows::referral::{
    export_csv, ApprovalOrchestrator, EarningsEntry, MemoryStore, StoreSeed, TracingEventSink,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub(crate) type CliOrchestrator = ApprovalOrchestrator<MemoryStore, TracingEventSink>;

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC 3339 timestamp `{value}`: {err}"))
}

pub(crate) fn load_seed(path: &Path) -> Result<StoreSeed, AppError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Load the fixture into a fresh memory store and wire an orchestrator over it.
pub(crate) fn build_orchestrator(
    fixture: &Path,
    settings: EngineSettings,
) -> Result<(Arc<MemoryStore>, CliOrchestrator), AppError> {
    let store = Arc::new(MemoryStore::from_seed(load_seed(fixture)?)?);
    let orchestrator =
        ApprovalOrchestrator::new(store.clone(), Arc::new(TracingEventSink), settings);
    Ok((store, orchestrator))
}

pub(crate) fn write_ledger(path: &Path, entries: &[EarningsEntry]) -> Result<(), AppError> {
    let file = File::create(path)?;
    export_csv(entries, file)?;
    Ok(())
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
