use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::flatten::FlattenedTrip;

/// Summary of one pushed snapshot, written as a CSV row per push.
#[derive(Debug, Default, Serialize)]
pub struct FeedStats {
    pub timestamp: DateTime<Utc>,
    pub cooperative_id: Option<String>,
    pub revision: u64,

    // snapshot shape
    pub driver_entries: usize,
    pub active_trips: usize,

    // trip fields
    pub with_driver_fix: usize,
    pub awaiting_fix: usize,
    pub missing_origin: usize,
    pub missing_destination: usize,
    pub without_status: usize,
    pub passengers: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl FeedStats {
    /// `snapshot` is the raw subtree (to count driver entries) and `trips` its
    /// flattened form.
    pub fn from_trips(snapshot: Option<&Value>, trips: &[FlattenedTrip]) -> Self {
        let mut s = FeedStats {
            timestamp: Utc::now(),
            driver_entries: snapshot
                .and_then(Value::as_object)
                .map_or(trips.len(), |drivers| drivers.len()),
            active_trips: trips.len(),
            ..Default::default()
        };

        for t in trips {
            if t.awaiting_location() {
                s.awaiting_fix += 1;
            } else {
                s.with_driver_fix += 1;
            }

            // Flattening reports a missing coordinate as 0.
            if t.latitude_origem == 0.0 && t.longitude_origem == 0.0 {
                s.missing_origin += 1;
            }

            if t.latitude_destino == 0.0 && t.longitude_destino == 0.0 {
                s.missing_destination += 1;
            }

            if t.status_viagem.is_empty() {
                s.without_status += 1;
            }

            s.passengers += t.passageiros.len();
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn fix_pct(&self) -> f64 {
        Self::pct(self.with_driver_fix, self.active_trips)
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        FeedStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_cooperative(mut self, cooperative_id: &str) -> Self {
        self.cooperative_id = Some(cooperative_id.to_string());
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }
}
