//! Wire model of a trip feed node as written by the driver application.
//!
//! The store is keyed `cooperative -> driver -> dadosDaViagem`. Every field
//! inside `dadosDaViagem` is optional and loosely typed, so decoding is
//! lenient per field: a bad value reads as absent instead of rejecting the
//! whole driver entry.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Key of the active trip object under each driver entry.
pub const TRIP_DATA_KEY: &str = "dadosDaViagem";

/// A passenger record, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Passenger(pub Value);

impl Passenger {
    pub fn name(&self) -> Option<&str> {
        self.0.get("nome").and_then(Value::as_str)
    }
}

/// The two shapes the passenger collection arrives in.
///
/// Only lives at the decoding boundary; everything past [`TripData`] sees a
/// plain `Vec<Passenger>`.
#[derive(Debug, PartialEq)]
pub enum PassengerField {
    List(Vec<Value>),
    Keyed(Map<String, Value>),
    Absent,
}

impl From<Value> for PassengerField {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => PassengerField::List(items),
            Value::Object(map) => PassengerField::Keyed(map),
            _ => PassengerField::Absent,
        }
    }
}

impl PassengerField {
    /// Collapses either shape into an ordered sequence.
    ///
    /// Keyed maps yield their values in the store's key order: integer keys
    /// ascending by value, then the remaining keys lexicographically. `null`
    /// holes, which the store produces when it renders a sparse
    /// integer-keyed map as an array, are dropped.
    pub fn normalize(self) -> Vec<Passenger> {
        let values: Vec<Value> = match self {
            PassengerField::List(items) => items,
            PassengerField::Keyed(map) => {
                let mut entries: Vec<(String, Value)> = map.into_iter().collect();
                entries.sort_by(|(a, _), (b, _)| key_order(a).cmp(&key_order(b)));
                entries.into_iter().map(|(_, v)| v).collect()
            }
            PassengerField::Absent => Vec::new(),
        };

        values
            .into_iter()
            .filter(|v| !v.is_null())
            .map(Passenger)
            .collect()
    }
}

/// Sort key placing canonical integer keys (no sign, no leading zeros)
/// first, by value, and every other key after them, lexicographically.
fn key_order(key: &str) -> (bool, u64, &str) {
    match key.parse::<u64>() {
        Ok(n) if n.to_string() == key => (false, n, ""),
        _ => (true, 0, key),
    }
}

/// Contents of `dadosDaViagem`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id_viagem: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status_viagem: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub endereco_empresa: Option<String>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub latitude_origem: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub longitude_origem: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub latitude_destino: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub longitude_destino: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub latitude_motorista: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub longitude_motorista: Option<f64>,
    #[serde(default, deserialize_with = "passengers")]
    pub passageiros: Vec<Passenger>,
}

impl TripData {
    /// Extracts the active trip of a driver entry.
    ///
    /// Returns `None` when the entry has no `dadosDaViagem`, or when it is
    /// `null`, not an object, or an empty object.
    pub fn from_driver_entry(entry: &Value) -> Option<Self> {
        let data = entry.get(TRIP_DATA_KEY)?;
        let fields = data.as_object()?;
        if fields.is_empty() {
            return None;
        }
        // Every field decoder is infallible, so this only fails on a
        // non-object, which was ruled out above.
        TripData::deserialize(data).ok()
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_coord<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite()))
}

fn passengers<'de, D>(deserializer: D) -> Result<Vec<Passenger>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PassengerField::from(Value::deserialize(deserializer)?).normalize())
}
