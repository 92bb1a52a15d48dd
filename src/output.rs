//! Output formatting and persistence for trip lists and feed statistics.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::flatten::FlattenedTrip;
use crate::stats::FeedStats;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Flat CSV projection of a [`FlattenedTrip`].
///
/// Passengers collapse into a count and a `;`-joined list of names; the
/// driver position cells stay empty until a fix is reported.
#[derive(Debug, Serialize)]
pub struct TripRow<'a> {
    pub trip_id: &'a str,
    pub driver_id: &'a str,
    pub status: &'a str,
    pub company_address: &'a str,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub destination_lat: f64,
    pub destination_lon: f64,
    pub driver_lat: Option<f64>,
    pub driver_lon: Option<f64>,
    pub passenger_count: usize,
    pub passenger_names: String,
}

impl<'a> From<&'a FlattenedTrip> for TripRow<'a> {
    fn from(t: &'a FlattenedTrip) -> Self {
        TripRow {
            trip_id: &t.id,
            driver_id: &t.motorista_id,
            status: &t.status_viagem,
            company_address: &t.endereco_empresa,
            origin_lat: t.latitude_origem,
            origin_lon: t.longitude_origem,
            destination_lat: t.latitude_destino,
            destination_lon: t.longitude_destino,
            driver_lat: t.latitude_motorista,
            driver_lon: t.longitude_motorista,
            passenger_count: t.passageiros.len(),
            passenger_names: t
                .passageiros
                .iter()
                .filter_map(|p| p.name())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

/// Logs feed statistics using Rust's debug pretty-print format.
pub fn print_pretty(stats: &FeedStats) {
    debug!("{:#?}", stats);
}

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &str, record: &T) -> Result<()> {
    append_records(path, std::slice::from_ref(record))
}

/// Appends several records in one write. Nothing is written for an empty
/// slice, so the header is deferred to the first real row.
pub fn append_records<T: Serialize>(path: &str, records: &[T]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = records.len(), "Appending CSV records");

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten_snapshot;
    use crate::stats::FeedStats;
    use serde_json::json;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        let stats = FeedStats::default();
        print_pretty(&stats);
    }

    #[test]
    fn test_print_json_does_not_panic() {
        let stats = FeedStats::default();
        print_json(&stats).unwrap();
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let path = temp_path("trip_feed_test_header.csv");
        let _ = fs::remove_file(&path);

        let stats = FeedStats::default();
        append_record(&path, &stats).unwrap();
        append_record(&path, &stats).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        // Header line should appear exactly once
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_records_empty_creates_nothing() {
        let path = temp_path("trip_feed_test_empty.csv");
        let _ = fs::remove_file(&path);

        append_records::<FeedStats>(&path, &[]).unwrap();

        assert!(!Path::new(&path).exists());
    }

    #[test]
    fn test_trip_rows() {
        let path = temp_path("trip_feed_test_trips.csv");
        let _ = fs::remove_file(&path);

        let trips = flatten_snapshot(&json!({
            "m1": { "dadosDaViagem": {
                "idViagem": "t1",
                "passageiros": { "a": { "nome": "Ana" }, "b": { "nome": "Bia" } }
            } }
        }));
        let rows: Vec<TripRow> = trips.iter().map(TripRow::from).collect();
        assert_eq!(rows[0].passenger_names, "Ana;Bia");
        assert_eq!(rows[0].driver_lat, None);

        append_records(&path, &rows).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("trip_id,driver_id"));
        assert!(lines[1].starts_with("t1,m1,"));
        assert!(lines[1].ends_with(",,,2,Ana;Bia"));

        fs::remove_file(&path).unwrap();
    }
}
