//! Tracked city list: resolves coordinates, fetches forecasts and keeps the
//! store up to date.
//!
//! All writes go through one lock: the state is copied, mutated, saved and
//! only then committed, so concurrent completions never lose each other's
//! updates and a failed save leaves memory and disk in agreement.
//!
//! Geocoding goes through its own gate, one lookup at a time and spaced by
//! `geocode_interval`, independent of the forecast request limit.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    AddCityError, CityCoordinate, CityError, Config, Coordinate, CoordinateResolver,
    GeocodeError, StoreError, WeatherProvider, WeatherSnapshot,
    model::{normalize_city, same_city},
    store::{LoadedCities, QuarantinedRecord, Store, StoredCities, check_index},
};

#[derive(Debug, Clone)]
pub struct CityListOptions {
    /// Upper bound on forecast requests in flight at the same time.
    pub max_concurrent_requests: usize,
    /// Seeded when the store holds no cities.
    pub default_cities: Vec<String>,
    /// Minimum spacing between two geocoding lookups.
    pub geocode_interval: Duration,
}

impl Default for CityListOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CityListOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_requests: config.concurrency(),
            default_cities: config.default_cities.clone(),
            geocode_interval: Duration::from_millis(config.geocoder.min_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// A newly tracked city and the outcome of its first fetch.
#[derive(Debug)]
pub struct AddedCity {
    pub index: usize,
    pub weather: Result<WeatherSnapshot, CityError>,
}

#[derive(Debug, Clone)]
struct Tracked {
    /// Lower-cased names, index-aligned with `cities.city_weather()`.
    names: Vec<String>,
    cities: StoredCities,
}

impl Tracked {
    fn position(&self, city: &str) -> Option<usize> {
        self.names.iter().position(|n| same_city(n, city))
    }
}

#[derive(Debug)]
struct Inner {
    resolver: Arc<dyn CoordinateResolver>,
    provider: Arc<dyn WeatherProvider>,
    store: Arc<dyn Store>,
    state: Mutex<Tracked>,
    limiter: Semaphore,
    /// Held for the whole lookup; stores when the previous one finished.
    geocoder: Mutex<Option<Instant>>,
    geocode_interval: Duration,
    offline: AtomicBool,
    quarantined: Vec<QuarantinedRecord>,
}

#[derive(Debug, Clone)]
pub struct CityList {
    inner: Arc<Inner>,
}

impl CityList {
    /// Load the tracked cities, seeding the defaults into an empty store.
    ///
    /// A store whose only records are quarantined is not empty and is left
    /// as it is.
    pub fn open(
        resolver: Arc<dyn CoordinateResolver>,
        provider: Arc<dyn WeatherProvider>,
        store: Arc<dyn Store>,
        options: CityListOptions,
    ) -> Result<Self, StoreError> {
        let LoadedCities {
            mut cities,
            quarantined,
        } = store.load()?;
        if !quarantined.is_empty() {
            warn!(records = quarantined.len(), "stored records could not be decoded");
        }

        if cities.city_weather().is_empty()
            && cities.quarantined().is_empty()
            && !options.default_cities.is_empty()
        {
            for city in &options.default_cities {
                let key = normalize_city(city);
                if key.is_empty() || cities.weather_index(&key).is_some() {
                    continue;
                }
                cities.push_weather(WeatherSnapshot::placeholder(&key));
            }
            store.save(&cities)?;
            info!(cities = cities.city_weather().len(), "seeded default cities");
        }

        let names = cities.city_weather().iter().map(|w| w.name.clone()).collect();
        let quarantined = cities.quarantined().to_vec();

        Ok(Self {
            inner: Arc::new(Inner {
                resolver,
                provider,
                store,
                state: Mutex::new(Tracked { names, cities }),
                limiter: Semaphore::new(options.max_concurrent_requests.max(1)),
                geocoder: Mutex::new(None),
                geocode_interval: options.geocode_interval,
                offline: AtomicBool::new(false),
                quarantined,
            }),
        })
    }

    /// Undecodable records held in the store when the list was opened.
    pub fn quarantined(&self) -> &[QuarantinedRecord] {
        &self.inner.quarantined
    }

    /// Set after a network-class failure, cleared by the next success.
    pub fn is_offline(&self) -> bool {
        self.inner.offline.load(Ordering::Relaxed)
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.state.lock().await.names.clone()
    }

    pub async fn snapshots(&self) -> Vec<WeatherSnapshot> {
        self.inner.state.lock().await.cities.city_weather().to_vec()
    }

    pub async fn snapshot(&self, city: &str) -> Option<WeatherSnapshot> {
        self.inner.state.lock().await.cities.weather_for(city).cloned()
    }

    /// Tracked snapshots whose name contains `query`, ignoring case.
    pub async fn search(&self, query: &str) -> Vec<WeatherSnapshot> {
        let query = normalize_city(query);
        self.inner
            .state
            .lock()
            .await
            .cities
            .city_weather()
            .iter()
            .filter(|w| w.name.contains(&query))
            .cloned()
            .collect()
    }

    /// Refresh every tracked city.
    pub async fn refresh_all<F>(&self, on_result: F) -> RefreshSummary
    where
        F: FnMut(usize, Result<WeatherSnapshot, CityError>),
    {
        let names = self.names().await;
        self.refresh(&names, on_result).await
    }

    /// Resolve and fetch each of `names` concurrently.
    ///
    /// `on_result` runs once per city as soon as that city completes, in
    /// completion order; `index` is the city's position in `names`. A city
    /// whose task panics is reported as [`CityError::Aborted`].
    pub async fn refresh<F>(&self, names: &[String], mut on_result: F) -> RefreshSummary
    where
        F: FnMut(usize, Result<WeatherSnapshot, CityError>),
    {
        let mut tasks = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let name = normalize_city(name);
            tasks.spawn(async move { (index, inner.refresh_city(&name).await) });
        }

        let mut summary = RefreshSummary::default();
        let mut reported = vec![false; names.len()];
        let mut abort_reason = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    reported[index] = true;
                    match &result {
                        Ok(_) => summary.succeeded += 1,
                        Err(e) => {
                            summary.failed += 1;
                            warn!(city = %names[index], error = %e, "refresh failed");
                        }
                    }
                    on_result(index, result);
                }
                Err(e) => {
                    warn!(error = %e, "refresh task aborted");
                    abort_reason.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let reason = abort_reason.unwrap_or_else(|| "task did not complete".to_string());
        for index in (0..names.len()).filter(|&i| !reported[i]) {
            summary.failed += 1;
            on_result(index, Err(CityError::Aborted(reason.clone())));
        }

        debug!(?summary, "refresh finished");
        summary
    }

    /// Start tracking `city`.
    ///
    /// Nothing is stored unless the city can be located; a geocoding failure
    /// is returned so the caller can retry or give up.
    pub async fn add_city(&self, city: &str) -> Result<AddedCity, AddCityError> {
        let key = normalize_city(city);
        if key.is_empty() {
            return Err(AddCityError::EmptyName);
        }

        let cached = {
            let state = self.inner.state.lock().await;
            if state.position(&key).is_some() {
                return Err(AddCityError::AlreadyTracked(key));
            }
            state.cities.coordinate_for(&key).map(CityCoordinate::coordinate)
        };

        let at = match cached {
            Some(at) => at,
            None => self.inner.locate(city.trim()).await?,
        };

        let index = self
            .inner
            .update(|t| {
                if t.position(&key).is_some() {
                    return Err(AddCityError::AlreadyTracked(key.clone()));
                }
                t.cities.add_coordinate(CityCoordinate::new(&key, at));
                t.cities.push_weather(WeatherSnapshot::placeholder(&key));
                t.names.push(key.clone());
                Ok(t.names.len() - 1)
            })
            .await?;
        info!(city = %key, index, "city added");

        let weather = self.inner.fetch_and_store(&key, at).await;
        Ok(AddedCity { index, weather })
    }

    /// Stop tracking `city`. Returns `false` when it was not tracked.
    ///
    /// The resolved coordinate stays in the store.
    pub async fn delete_city(&self, city: &str) -> Result<bool, StoreError> {
        let removed = self
            .inner
            .update(|t| -> Result<bool, StoreError> {
                let Some(i) = t.position(city) else {
                    return Ok(false);
                };
                t.names.remove(i);
                t.cities.remove_weather(city);
                Ok(true)
            })
            .await?;

        if removed {
            info!(city = %normalize_city(city), "city deleted");
        }
        Ok(removed)
    }

    /// Exchange the cities at `i` and `j`, keeping names and weather aligned.
    pub async fn swap_cities(&self, i: usize, j: usize) -> Result<(), StoreError> {
        self.inner
            .update(|t| {
                t.cities.swap_weather(i, j)?;
                t.names.swap(i, j);
                Ok(())
            })
            .await
    }

    /// Move the city at `from` to position `to`, shifting the ones between.
    pub async fn move_city(&self, from: usize, to: usize) -> Result<(), StoreError> {
        self.inner
            .update(|t| {
                check_index(from, t.names.len())?;
                check_index(to, t.names.len())?;
                t.cities.move_weather(from, to)?;
                let name = t.names.remove(from);
                t.names.insert(to, name);
                Ok(())
            })
            .await
    }
}

impl Inner {
    /// Apply `f` to a copy of the state, persist it, then commit.
    async fn update<T, E>(&self, f: impl FnOnce(&mut Tracked) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let out = f(&mut draft)?;
        if draft.cities != state.cities {
            let store = Arc::clone(&self.store);
            let cities = draft.cities.clone();
            tokio::task::spawn_blocking(move || store.save(&cities))
                .await
                .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        }
        *state = draft;
        Ok(out)
    }

    /// Geocode `city`, one lookup at a time and no sooner than
    /// `geocode_interval` after the previous one finished.
    async fn locate(&self, city: &str) -> Result<Coordinate, GeocodeError> {
        let mut last = self.geocoder.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.geocode_interval).await;
        }

        let resolved = self.resolver.resolve(city).await;
        *last = Some(Instant::now());

        if matches!(&resolved, Err(e) if e.is_network_failure()) {
            self.offline.store(true, Ordering::Relaxed);
        }
        resolved
    }

    async fn refresh_city(&self, city: &str) -> Result<WeatherSnapshot, CityError> {
        let cached = {
            let state = self.state.lock().await;
            state.cities.coordinate_for(city).map(CityCoordinate::coordinate)
        };

        let at = match cached {
            Some(at) => at,
            None => {
                let at = self.locate(city).await?;
                self.update(|t| {
                    t.cities.add_coordinate(CityCoordinate::new(city, at));
                    Ok::<_, StoreError>(())
                })
                .await?;
                debug!(city, %at, "stored new coordinate");
                at
            }
        };

        self.fetch_and_store(city, at).await
    }

    async fn fetch_and_store(&self, city: &str, at: Coordinate) -> Result<WeatherSnapshot, CityError> {
        let fetched = {
            let _permit = self.limiter.acquire().await.ok();
            self.provider.fetch_weather(at).await
        };
        match &fetched {
            Ok(_) => self.offline.store(false, Ordering::Relaxed),
            Err(e) if e.is_network_failure() => self.offline.store(true, Ordering::Relaxed),
            Err(_) => {}
        }
        let snapshot = fetched?.with_name(city);

        let stored = self
            .update(|t| Ok::<_, StoreError>(t.cities.replace_weather(city, snapshot.clone())))
            .await?;
        if !stored {
            debug!(city, "city no longer tracked; result not stored");
        }

        Ok(snapshot)
    }
}
