//! Projection of a cooperative snapshot into a flat list of in-progress trips.

use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::snapshot::{Passenger, TripData};

/// One driver currently engaged in a trip.
///
/// Origin and destination default to `0.0` when missing so map rendering
/// always gets a number. Driver coordinates stay `None` until the device
/// reports a fix; `None` means "awaiting location", not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedTrip {
    pub id: String,
    pub motorista_id: String,
    pub passageiros: Vec<Passenger>,
    pub status_viagem: String,
    pub endereco_empresa: String,
    pub latitude_origem: f64,
    pub longitude_origem: f64,
    pub latitude_destino: f64,
    pub longitude_destino: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude_motorista: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude_motorista: Option<f64>,
}

impl FlattenedTrip {
    pub fn from_trip_data(driver_id: &str, trip: TripData) -> Self {
        FlattenedTrip {
            id: trip.id_viagem.unwrap_or_default(),
            motorista_id: driver_id.to_string(),
            passageiros: trip.passageiros,
            status_viagem: trip.status_viagem.unwrap_or_default(),
            endereco_empresa: trip.endereco_empresa.unwrap_or_default(),
            latitude_origem: trip.latitude_origem.unwrap_or(0.0),
            longitude_origem: trip.longitude_origem.unwrap_or(0.0),
            latitude_destino: trip.latitude_destino.unwrap_or(0.0),
            longitude_destino: trip.longitude_destino.unwrap_or(0.0),
            latitude_motorista: trip.latitude_motorista,
            longitude_motorista: trip.longitude_motorista,
        }
    }

    /// `(latitude, longitude)` of the driver, if both halves were reported.
    pub fn driver_position(&self) -> Option<(f64, f64)> {
        Some((self.latitude_motorista?, self.longitude_motorista?))
    }

    pub fn awaiting_location(&self) -> bool {
        self.driver_position().is_none()
    }
}

/// Flattens the subtree of one cooperative.
///
/// Anything that is not an object (including a deleted path, which the store
/// reports as `null`) yields an empty list.
pub fn flatten_snapshot(snapshot: &Value) -> Vec<FlattenedTrip> {
    let Some(drivers) = snapshot.as_object() else {
        return Vec::new();
    };

    let trips: Vec<FlattenedTrip> = drivers
        .iter()
        .filter_map(|(driver_id, entry)| {
            let trip = TripData::from_driver_entry(entry)?;
            Some(FlattenedTrip::from_trip_data(driver_id, trip))
        })
        .collect();

    debug!(
        drivers = drivers.len(),
        active_trips = trips.len(),
        "Snapshot flattened"
    );

    trips
}

/// An immutable, cheaply clonable list of flattened trips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripView(Arc<[FlattenedTrip]>);

impl TripView {
    pub fn from_snapshot(snapshot: &Value) -> Self {
        Self(flatten_snapshot(snapshot).into())
    }

    /// Single-driver view used by the tracking map.
    pub fn for_driver(&self, driver_id: &str) -> Option<&FlattenedTrip> {
        self.0.iter().find(|t| t.motorista_id == driver_id)
    }
}

impl From<Vec<FlattenedTrip>> for TripView {
    fn from(trips: Vec<FlattenedTrip>) -> Self {
        Self(trips.into())
    }
}

impl Deref for TripView {
    type Target = [FlattenedTrip];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for TripView {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}
