//! CSV persistence for layer snapshots and running alert logs.
//!
//! Supports append-with-headers-once for incremental logs and whole-file
//! snapshots for tables with replace semantics.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::store::LayeredStore;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Appends rows to a CSV file, creating it with headers if it does not
/// already exist.
pub fn append_records<T: Serialize>(path: &str, records: &[T]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes a whole-file snapshot, replacing any previous contents.
pub fn write_snapshot<T: Serialize>(path: &str, records: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Exports the validated and gold layers as dated CSV snapshots under
/// `{dir}/agency_id={agency}/`. Snapshots are rewritten in full, matching
/// the replace semantics of the tables they mirror.
pub fn export_store(store: &LayeredStore, dir: &str, agency_id: &str, date: NaiveDate) -> Result<()> {
    let agency_dir = format!("{dir}/agency_id={agency_id}");
    std::fs::create_dir_all(&agency_dir)?;
    let date = date.format("%Y-%m-%d");

    write_snapshot(
        &format!("{agency_dir}/validated_positions_date={date}.csv"),
        store.validated_positions(),
    )?;
    write_snapshot(
        &format!("{agency_dir}/validated_trip_updates_date={date}.csv"),
        store.validated_trip_updates(),
    )?;
    write_snapshot(
        &format!("{agency_dir}/hourly_vehicle_metrics_date={date}.csv"),
        &store.hourly_metrics(),
    )?;
    write_snapshot(
        &format!("{agency_dir}/route_performance_date={date}.csv"),
        &store.route_performance(),
    )?;

    Ok(())
}
