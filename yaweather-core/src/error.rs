use thiserror::Error;

/// Failure of a single forecast request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable response: connection, DNS, TLS or timeout.
    #[error("network failure: {0}")]
    NetworkFailure(#[source] reqwest::Error),

    /// Response arrived but the body was empty or unreadable.
    #[error("weather provider returned no data")]
    InvalidData,

    /// Body does not match the forecast schema, including error replies
    /// with a non-success status.
    #[error("weather provider returned an unexpected model: {0}")]
    InvalidModel(String),
}

impl ApiError {
    /// Whether the provider could not be reached at all.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, ApiError::NetworkFailure(_))
    }
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    /// No usable response: connection, DNS, TLS or timeout.
    #[error("geocoding provider unreachable: {0}")]
    Network(#[source] reqwest::Error),

    #[error("geocoding provider failed: {0}")]
    Provider(String),

    #[error("no place found for '{0}'")]
    NotFound(String),

    #[error("geocoding provider returned an unexpected response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode stored cities: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored document is corrupt: {0}")]
    Corrupt(String),

    #[error("index {index} is out of range for {len} cities")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Per-city outcome of a refresh that did not produce a snapshot.
#[derive(Debug, Error)]
pub enum CityError {
    #[error("could not locate city: {0}")]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("could not persist city: {0}")]
    Store(#[from] StoreError),

    /// The task refreshing this city panicked or was cancelled.
    #[error("refresh of this city was aborted: {0}")]
    Aborted(String),
}

const OFFLINE_MESSAGE: &str = "Нет соединения с сервером. Данные могут быть устаревшими.";

impl GeocodeError {
    pub fn is_network_failure(&self) -> bool {
        matches!(self, GeocodeError::Network(_))
    }
}

impl CityError {
    pub fn is_network_failure(&self) -> bool {
        match self {
            CityError::Api(e) => e.is_network_failure(),
            CityError::Geocode(e) => e.is_network_failure(),
            _ => false,
        }
    }

    /// Short banner text for the user.
    pub fn user_message(&self) -> &'static str {
        if self.is_network_failure() {
            return OFFLINE_MESSAGE;
        }
        match self {
            CityError::Geocode(GeocodeError::NotFound(_)) => "Город не найден.",
            CityError::Geocode(_) => "Не удалось определить координаты города. Попробуйте позже.",
            CityError::Api(_) | CityError::Aborted(_) => {
                "Не удалось загрузить погоду. Попробуйте позже."
            }
            CityError::Store(_) => "Не удалось сохранить данные.",
        }
    }
}

#[derive(Debug, Error)]
pub enum AddCityError {
    #[error("city name is empty")]
    EmptyName,

    #[error("city '{0}' is already tracked")]
    AlreadyTracked(String),

    #[error("could not locate city: {0}")]
    Geocode(#[from] GeocodeError),

    #[error("could not persist city: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A real transport-level `reqwest::Error`, built without touching the network.
    pub(crate) fn transport_error() -> reqwest::Error {
        reqwest::Client::new()
            .get("not a url")
            .build()
            .expect_err("relative URL must be rejected")
    }

    #[test]
    fn only_transport_errors_are_network_failures() {
        assert!(ApiError::NetworkFailure(transport_error()).is_network_failure());
        assert!(!ApiError::InvalidData.is_network_failure());
        assert!(!ApiError::InvalidModel("status 403: forbidden".into()).is_network_failure());
    }

    #[test]
    fn city_error_banner_distinguishes_offline() {
        let offline = CityError::from(ApiError::NetworkFailure(transport_error()));
        let broken = CityError::from(ApiError::InvalidData);
        assert!(offline.is_network_failure());
        assert_eq!(offline.user_message(), OFFLINE_MESSAGE);
        assert_ne!(offline.user_message(), broken.user_message());

        let missing = CityError::from(GeocodeError::NotFound("атлантида".into()));
        assert!(!missing.is_network_failure());
        assert!(missing.to_string().contains("атлантида"));
    }

    #[test]
    fn unreachable_geocoder_is_not_reported_as_unknown_city() {
        let not_found = CityError::from(GeocodeError::NotFound("томск".into()));
        let unreachable = CityError::from(GeocodeError::Network(transport_error()));
        let refused = CityError::from(GeocodeError::Provider("status 500".into()));

        assert!(unreachable.is_network_failure());
        assert_eq!(unreachable.user_message(), OFFLINE_MESSAGE);
        assert_ne!(refused.user_message(), not_found.user_message());
        assert!(!refused.is_network_failure());
    }
}
