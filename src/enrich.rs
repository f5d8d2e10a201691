//! Weather enrichment collaborator.
//!
//! Fetches current conditions from Open-Meteo, keyed by coordinates rounded
//! to two decimals, through an explicit bounded TTL cache owned by the
//! enrichment object. Observations feed the raw weather layer and are
//! validated by the quality gate with the 1-hour freshness limit.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::fetch::HttpClient;
use crate::models::{WeatherCondition, WeatherObservation};

pub const OPEN_METEO_API_BASE: &str = "https://api.open-meteo.com/v1";

/// Current-conditions block of the Open-Meteo forecast response.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub windspeed: f64,
    pub weathercode: i32,
    #[serde(default)]
    pub precipitation: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentWeather>,
}

/// Bounded, TTL-evicting cache of current conditions per rounded coordinate.
#[derive(Debug)]
pub struct WeatherCache {
    entries: HashMap<String, (DateTime<Utc>, CurrentWeather)>,
    ttl: Duration,
    capacity: usize,
}

impl WeatherCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        WeatherCache {
            entries: HashMap::new(),
            ttl,
            capacity,
        }
    }

    fn key(latitude: f64, longitude: f64) -> String {
        format!("{latitude:.2},{longitude:.2}")
    }

    pub fn get(&self, latitude: f64, longitude: f64, now: DateTime<Utc>) -> Option<&CurrentWeather> {
        let (cached_at, weather) = self.entries.get(&Self::key(latitude, longitude))?;
        if now - *cached_at < self.ttl {
            Some(weather)
        } else {
            None
        }
    }

    pub fn insert(
        &mut self,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
        weather: CurrentWeather,
    ) {
        self.entries
            .retain(|_, (cached_at, _)| now - *cached_at < self.ttl);
        if self.entries.len() >= self.capacity {
            // Still full after dropping expired entries: evict the oldest.
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (cached_at, _))| *cached_at)
                .map(|(key, _)| key.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries
            .insert(Self::key(latitude, longitude), (now, weather));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WeatherCache {
    /// 5-minute TTL, 256 coordinate cells.
    fn default() -> Self {
        WeatherCache::new(Duration::seconds(300), 256)
    }
}

/// Fetches and caches weather observations for agency service areas.
pub struct WeatherEnrichment<C: HttpClient> {
    client: C,
    api_base: String,
    cache: WeatherCache,
}

impl<C: HttpClient> WeatherEnrichment<C> {
    pub fn new(client: C) -> Self {
        WeatherEnrichment {
            client,
            api_base: OPEN_METEO_API_BASE.to_string(),
            cache: WeatherCache::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_cache(mut self, cache: WeatherCache) -> Self {
        self.cache = cache;
        self
    }

    /// Current weather at a location, served from cache when fresh.
    /// Returns `Ok(None)` when the API has no current-conditions block.
    pub async fn current_observation(
        &mut self,
        latitude: f64,
        longitude: f64,
        agency_id: &str,
    ) -> Result<Option<WeatherObservation>> {
        let now = Utc::now();

        if let Some(cached) = self.cache.get(latitude, longitude, now) {
            debug!(latitude, longitude, "Using cached weather");
            return Ok(Some(observation_from(
                cached, latitude, longitude, agency_id, now,
            )));
        }

        let url = format!(
            "{}/forecast?latitude={latitude}&longitude={longitude}\
             &current_weather=true&temperature_unit=celsius\
             &windspeed_unit=kmh&precipitation_unit=mm",
            self.api_base
        );
        let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);
        let resp = self
            .client
            .execute(req)
            .await
            .context("fetching weather data")?;
        let forecast: ForecastResponse =
            resp.json().await.context("parsing weather response")?;

        let Some(current) = forecast.current_weather else {
            warn!(latitude, longitude, "No current weather in response");
            return Ok(None);
        };

        self.cache.insert(latitude, longitude, now, current.clone());

        let observation = observation_from(&current, latitude, longitude, agency_id, now);
        info!(
            latitude,
            longitude,
            temperature = observation.temperature_celsius,
            condition = ?observation.weather_condition,
            "Weather observation fetched"
        );
        Ok(Some(observation))
    }
}

fn observation_from(
    current: &CurrentWeather,
    latitude: f64,
    longitude: f64,
    agency_id: &str,
    now: DateTime<Utc>,
) -> WeatherObservation {
    WeatherObservation {
        latitude,
        longitude,
        temperature_celsius: current.temperature,
        precipitation_mm: current.precipitation,
        wind_speed_kmh: current.windspeed,
        weather_code: current.weathercode,
        weather_condition: WeatherCondition::from_wmo_code(current.weathercode),
        observation_time: now,
        agency_id: agency_id.to_string(),
    }
}
