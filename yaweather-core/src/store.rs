//! Persisted city list.
//!
//! The on-disk document keeps two independently decoded collections:
//!
//! ```json
//! { "storageWeatherKey": [ WeatherSnapshot, ... ],
//!   "coordinatesKey":    [ CityCoordinate, ... ],
//!   "quarantinedKey":    [ QuarantinedRecord, ... ] }
//! ```
//!
//! Both are written together in one document, so a save never leaves one
//! collection updated and the other stale. Records that fail to decode are
//! moved under `quarantinedKey` with their raw JSON and carried through every
//! later save.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::{
    fmt::Debug,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tracing::{debug, warn};

use crate::{CityCoordinate, StoreError, WeatherSnapshot, model::same_city};

pub const WEATHER_KEY: &str = "storageWeatherKey";
pub const COORDINATES_KEY: &str = "coordinatesKey";
pub const QUARANTINE_KEY: &str = "quarantinedKey";

/// Tracked cities' weather (user-ordered) and their resolved coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredCities {
    weather: Vec<WeatherSnapshot>,
    coordinates: Vec<CityCoordinate>,
    quarantined: Vec<QuarantinedRecord>,
}

impl StoredCities {
    pub fn new(weather: Vec<WeatherSnapshot>, coordinates: Vec<CityCoordinate>) -> Self {
        Self {
            weather,
            coordinates,
            quarantined: Vec::new(),
        }
    }

    /// Undecodable records held aside. Saved back unchanged.
    pub fn quarantined(&self) -> &[QuarantinedRecord] {
        &self.quarantined
    }

    pub fn city_weather(&self) -> &[WeatherSnapshot] {
        &self.weather
    }

    pub fn set_city_weather(&mut self, weather: Vec<WeatherSnapshot>) {
        self.weather = weather;
    }

    pub fn city_coordinates(&self) -> &[CityCoordinate] {
        &self.coordinates
    }

    pub fn set_city_coordinates(&mut self, coordinates: Vec<CityCoordinate>) {
        self.coordinates = coordinates;
    }

    pub fn coordinate_for(&self, city: &str) -> Option<&CityCoordinate> {
        self.coordinates.iter().find(|c| c.matches(city))
    }

    /// Record a resolved coordinate. The first resolution of a city wins;
    /// returns `false` when one was already stored.
    pub fn add_coordinate(&mut self, coordinate: CityCoordinate) -> bool {
        if self.coordinate_for(&coordinate.city).is_some() {
            return false;
        }
        self.coordinates.push(coordinate);
        true
    }

    pub fn weather_index(&self, city: &str) -> Option<usize> {
        self.weather.iter().position(|w| same_city(&w.name, city))
    }

    pub fn weather_for(&self, city: &str) -> Option<&WeatherSnapshot> {
        self.weather_index(city).map(|i| &self.weather[i])
    }

    pub fn push_weather(&mut self, snapshot: WeatherSnapshot) {
        self.weather.push(snapshot);
    }

    /// Overwrite the snapshot stored for `city` in place, keeping its position.
    /// Returns `false` if the city is no longer tracked.
    pub fn replace_weather(&mut self, city: &str, snapshot: WeatherSnapshot) -> bool {
        match self.weather_index(city) {
            Some(i) => {
                let name = std::mem::take(&mut self.weather[i].name);
                self.weather[i] = snapshot;
                self.weather[i].name = name;
                true
            }
            None => false,
        }
    }

    /// Remove the first snapshot matching `city`. Coordinates are kept.
    pub fn remove_weather(&mut self, city: &str) -> Option<WeatherSnapshot> {
        self.weather_index(city).map(|i| self.weather.remove(i))
    }

    pub fn swap_weather(&mut self, i: usize, j: usize) -> Result<(), StoreError> {
        check_index(i, self.weather.len())?;
        check_index(j, self.weather.len())?;
        self.weather.swap(i, j);
        Ok(())
    }

    pub fn move_weather(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        check_index(from, self.weather.len())?;
        check_index(to, self.weather.len())?;
        let item = self.weather.remove(from);
        self.weather.insert(to, item);
        Ok(())
    }

    /// Tracked cities that have no resolved coordinate yet.
    pub fn missing_coordinates(&self) -> Vec<String> {
        self.weather
            .iter()
            .filter(|w| self.coordinate_for(&w.name).is_none())
            .map(|w| w.name.clone())
            .collect()
    }
}

pub(crate) fn check_index(index: usize, len: usize) -> Result<(), StoreError> {
    if index < len {
        Ok(())
    } else {
        Err(StoreError::IndexOutOfRange { index, len })
    }
}

/// A stored record that could not be decoded. Kept aside instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    /// Collection the record came from.
    pub key: String,
    /// Index within that collection when it was quarantined.
    pub position: usize,
    pub error: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedCities {
    /// Includes every held quarantined record, old and new.
    pub cities: StoredCities,
    /// Records that failed to decode on this load.
    pub quarantined: Vec<QuarantinedRecord>,
}

/// Persistence backend.
///
/// Implementations may block on file I/O; `CityList` calls `save` from
/// tokio's blocking pool.
pub trait Store: Send + Sync + Debug {
    fn load(&self) -> Result<LoadedCities, StoreError>;

    /// Replace everything persisted with `cities`, quarantined records included.
    fn save(&self, cities: &StoredCities) -> Result<(), StoreError>;
}

#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "storageWeatherKey")]
    weather: &'a [WeatherSnapshot],
    #[serde(rename = "coordinatesKey")]
    coordinates: &'a [CityCoordinate],
    #[serde(rename = "quarantinedKey", skip_serializing_if = "nothing_held")]
    quarantined: &'a [QuarantinedRecord],
}

fn nothing_held(records: &&[QuarantinedRecord]) -> bool {
    records.is_empty()
}

fn encode(cities: &StoredCities) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(&Document {
        weather: &cities.weather,
        coordinates: &cities.coordinates,
        quarantined: &cities.quarantined,
    })
    .map_err(StoreError::Encode)
}

fn decode(document: Value) -> Result<LoadedCities, StoreError> {
    let Value::Object(mut map) = document else {
        return Err(StoreError::Corrupt("top level is not an object".to_string()));
    };

    let mut quarantined = Vec::new();
    let weather: Vec<WeatherSnapshot> = decode_records(&mut map, WEATHER_KEY, &mut quarantined)?
        .into_iter()
        .map(|w: WeatherSnapshot| {
            let name = w.name.clone();
            w.with_name(&name)
        })
        .collect();
    let coordinates: Vec<CityCoordinate> =
        decode_records(&mut map, COORDINATES_KEY, &mut quarantined)?;

    let mut cities = StoredCities::new(weather, coordinates);
    cities.quarantined = held_records(&mut map)?;
    cities.quarantined.extend(quarantined.iter().cloned());

    Ok(LoadedCities {
        cities,
        quarantined,
    })
}

/// Records quarantined by an earlier load. A malformed entry is wrapped as
/// a record of its own rather than lost.
fn held_records(map: &mut Map<String, Value>) -> Result<Vec<QuarantinedRecord>, StoreError> {
    let records = match map.remove(QUARANTINE_KEY) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(records)) => records,
        Some(_) => {
            return Err(StoreError::Corrupt(format!(
                "'{QUARANTINE_KEY}' is not an array"
            )));
        }
    };

    Ok(records
        .into_iter()
        .enumerate()
        .map(|(position, raw)| {
            serde_json::from_value(raw.clone()).unwrap_or_else(|e| QuarantinedRecord {
                key: QUARANTINE_KEY.to_string(),
                position,
                error: e.to_string(),
                raw,
            })
        })
        .collect())
}

fn decode_records<T: DeserializeOwned>(
    map: &mut Map<String, Value>,
    key: &'static str,
    quarantined: &mut Vec<QuarantinedRecord>,
) -> Result<Vec<T>, StoreError> {
    let records = match map.remove(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(records)) => records,
        Some(_) => return Err(StoreError::Corrupt(format!("'{key}' is not an array"))),
    };

    let mut decoded = Vec::with_capacity(records.len());
    for (position, raw) in records.into_iter().enumerate() {
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(record) => decoded.push(record),
            Err(e) => {
                warn!(key, position, error = %e, "quarantining undecodable record");
                quarantined.push(QuarantinedRecord {
                    key: key.to_string(),
                    position,
                    error: e.to_string(),
                    raw,
                });
            }
        }
    }
    Ok(decoded)
}

/// JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for JsonFileStore {
    fn load(&self) -> Result<LoadedCities, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored cities yet");
                return Ok(LoadedCities::default());
            }
            Err(e) => return Err(e.into()),
        };

        let document: Value =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        decode(document)
    }

    fn save(&self, cities: &StoredCities) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = encode(cities)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            cities = cities.weather.len(),
            "saved cities"
        );
        Ok(())
    }
}

/// In-process store holding the encoded document.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-encoded document, e.g. one with damaged records.
    pub fn with_document(document: Value) -> Self {
        Self {
            document: Mutex::new(Some(document)),
        }
    }

    pub fn document(&self) -> Option<Value> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<LoadedCities, StoreError> {
        match self.document() {
            Some(document) => decode(document),
            None => Ok(LoadedCities::default()),
        }
    }

    fn save(&self, cities: &StoredCities) -> Result<(), StoreError> {
        let bytes = encode(cities)?;
        let document = serde_json::from_slice(&bytes).map_err(StoreError::Encode)?;
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConditionKind, Coordinate};
    use serde_json::json;

    fn sample() -> StoredCities {
        let mut moscow = WeatherSnapshot::placeholder("Москва");
        moscow.temperature = -3.4;
        moscow.condition = ConditionKind::Snow;
        StoredCities::new(
            vec![moscow, WeatherSnapshot::placeholder("Сочи")],
            vec![CityCoordinate::new("Москва", Coordinate::new(55.75, 37.62))],
        )
    }

    #[test]
    fn lookups_ignore_case() {
        let cities = sample();
        assert_eq!(cities.weather_index("МОСКВА"), Some(0));
        assert!(cities.coordinate_for("москва").is_some());
        assert!(cities.weather_for("сочи").is_some());
        assert_eq!(cities.missing_coordinates(), vec!["сочи".to_string()]);
    }

    #[test]
    fn whole_collection_setters_replace() {
        let mut cities = sample();
        let mut weather = cities.city_weather().to_vec();
        weather.reverse();
        cities.set_city_weather(weather);
        cities.set_city_coordinates(Vec::new());

        assert_eq!(cities.city_weather()[0].name, "сочи");
        assert!(cities.city_coordinates().is_empty());
        assert_eq!(cities.missing_coordinates().len(), 2);
    }

    #[test]
    fn first_coordinate_wins() {
        let mut cities = sample();
        let moved = CityCoordinate::new("москва", Coordinate::new(0.0, 0.0));
        assert!(!cities.add_coordinate(moved));
        assert_eq!(cities.coordinate_for("Москва").unwrap().lat, 55.75);
    }

    #[test]
    fn replace_keeps_tracked_name_and_position() {
        let mut cities = sample();
        let fresh = WeatherSnapshot {
            temperature: 12.0,
            ..WeatherSnapshot::default()
        };
        assert!(cities.replace_weather("СОЧИ", fresh));
        assert_eq!(cities.city_weather()[1].name, "сочи");
        assert_eq!(cities.city_weather()[1].temperature, 12.0);

        assert!(!cities.replace_weather("томск", WeatherSnapshot::default()));
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut cities = sample();
        assert!(cities.remove_weather("Москва").is_some());
        assert!(cities.remove_weather("Москва").is_none());
        assert_eq!(cities.city_weather().len(), 1);
        assert_eq!(cities.city_coordinates().len(), 1);
    }

    #[test]
    fn swap_and_move_check_bounds() {
        let mut cities = sample();
        cities.swap_weather(0, 1).unwrap();
        assert_eq!(cities.city_weather()[0].name, "сочи");

        let err = cities.swap_weather(0, 2).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfRange { index: 2, len: 2 }));

        cities.move_weather(1, 0).unwrap();
        assert_eq!(cities.city_weather()[0].name, "москва");
        assert!(cities.move_weather(5, 0).is_err());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("cities.json"));

        assert_eq!(store.load().unwrap(), LoadedCities::default());

        let cities = sample();
        store.save(&cities).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.cities, cities);
        assert!(loaded.quarantined.is_empty());

        let raw: Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw[WEATHER_KEY].as_array().map(Vec::len), Some(2));
        assert_eq!(raw[COORDINATES_KEY][0]["city"], "москва");
    }

    #[test]
    fn save_replaces_previous_value() {
        let store = MemoryStore::new();
        store.save(&sample()).unwrap();
        store.save(&StoredCities::default()).unwrap();
        assert_eq!(store.load().unwrap().cities, StoredCities::default());
    }

    #[test]
    fn undecodable_records_are_quarantined() {
        let store = MemoryStore::with_document(json!({
            WEATHER_KEY: [
                {"name": "Томск", "temperature": 1.5},
                {"name": "broken", "temperature": "warm"},
            ],
            COORDINATES_KEY: [
                {"city": "томск", "lon": 84.95, "lat": 56.48},
                {"city": "nowhere"},
            ],
        }));

        let loaded = store.load().unwrap();
        assert_eq!(loaded.cities.city_weather().len(), 1);
        assert_eq!(loaded.cities.city_weather()[0].name, "томск");
        assert_eq!(loaded.cities.city_coordinates().len(), 1);

        let keys: Vec<_> = loaded
            .quarantined
            .iter()
            .map(|q| (q.key.as_str(), q.position))
            .collect();
        assert_eq!(keys, vec![(WEATHER_KEY, 1), (COORDINATES_KEY, 1)]);
        assert_eq!(loaded.quarantined[1].raw, json!({"city": "nowhere"}));
        assert_eq!(loaded.cities.quarantined(), loaded.quarantined.as_slice());
    }

    #[test]
    fn quarantined_records_survive_later_saves() {
        let broken = json!({"name": "broken", "temperature": "warm"});
        let store = MemoryStore::with_document(json!({
            WEATHER_KEY: [{"name": "Томск"}, broken.clone()],
        }));

        let mut cities = store.load().unwrap().cities;
        cities.push_weather(WeatherSnapshot::placeholder("Сочи"));
        store.save(&cities).unwrap();

        let document = store.document().unwrap();
        assert_eq!(document[WEATHER_KEY].as_array().map(Vec::len), Some(2));
        assert_eq!(document[QUARANTINE_KEY][0]["raw"], broken);
        assert_eq!(document[QUARANTINE_KEY][0]["key"], WEATHER_KEY);

        // Held records come back as held, not as new failures.
        let reloaded = store.load().unwrap();
        assert!(reloaded.quarantined.is_empty());
        assert_eq!(reloaded.cities.quarantined().len(), 1);
        assert_eq!(reloaded.cities.quarantined()[0].raw, broken);
    }

    #[test]
    fn malformed_held_record_is_kept() {
        let store = MemoryStore::with_document(json!({ QUARANTINE_KEY: ["junk"] }));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.cities.quarantined().len(), 1);
        assert_eq!(loaded.cities.quarantined()[0].raw, json!("junk"));
    }

    #[test]
    fn clean_document_has_no_quarantine_key() {
        let store = MemoryStore::new();
        store.save(&sample()).unwrap();
        assert!(store.document().unwrap().get(QUARANTINE_KEY).is_none());
    }

    #[test]
    fn non_object_document_is_corrupt() {
        let store = MemoryStore::with_document(json!([1, 2, 3]));
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));

        let store = MemoryStore::with_document(json!({ WEATHER_KEY: "nope" }));
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cities.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }
}
