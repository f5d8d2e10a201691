//! Quality gate configuration: freshness limits, speed bounds, and
//! per-agency geographic bounding boxes.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Axis-aligned geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl GeoBounds {
    /// The whole globe; used when an agency has no configured service area.
    pub const GLOBAL: GeoBounds = GeoBounds {
        min_latitude: -90.0,
        max_latitude: 90.0,
        min_longitude: -180.0,
        max_longitude: 180.0,
    };

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_latitude
            && latitude <= self.max_latitude
            && longitude >= self.min_longitude
            && longitude <= self.max_longitude
    }
}

fn default_max_speed_ms() -> f64 {
    33.3 // ~120 km/h, upper bound for urban transit
}

fn default_max_position_age_secs() -> i64 {
    300
}

fn default_max_weather_age_secs() -> i64 {
    3600
}

fn default_promotion_window_secs() -> i64 {
    600
}

/// Tunable quality thresholds, loadable from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    /// Speed above this is a SPEED_VIOLATION. The bound is inclusive.
    #[serde(default = "default_max_speed_ms")]
    pub max_speed_ms: f64,

    /// Positions older than this are STALE_DATA.
    #[serde(default = "default_max_position_age_secs")]
    pub max_position_age_secs: i64,

    /// Weather observations older than this are STALE_DATA.
    #[serde(default = "default_max_weather_age_secs")]
    pub max_weather_age_secs: i64,

    /// Promotion drops records older than this even when individually
    /// valid, so ancient backlog never reaches the validated layer.
    #[serde(default = "default_promotion_window_secs")]
    pub promotion_window_secs: i64,

    /// Service-area bounding box per agency id. Agencies without an entry
    /// fall back to [`GeoBounds::GLOBAL`].
    #[serde(default)]
    pub agency_bounds: HashMap<String, GeoBounds>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            max_speed_ms: default_max_speed_ms(),
            max_position_age_secs: default_max_position_age_secs(),
            max_weather_age_secs: default_max_weather_age_secs(),
            promotion_window_secs: default_promotion_window_secs(),
            agency_bounds: HashMap::new(),
        }
    }
}

impl QualityConfig {
    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading quality config {}", path.display()))?;
        let config: QualityConfig = serde_json::from_str(&contents)
            .with_context(|| format!("parsing quality config {}", path.display()))?;
        Ok(config)
    }

    pub fn bounds_for(&self, agency_id: &str) -> GeoBounds {
        self.agency_bounds
            .get(agency_id)
            .copied()
            .unwrap_or(GeoBounds::GLOBAL)
    }
}
