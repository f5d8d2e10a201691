//! Typed domain records produced by the decoder and enforced by the quality
//! gate.
//!
//! Enumerated wire codes map through closed enums with an explicit `Unknown`
//! variant, so an unmapped code can never carry an out-of-vocabulary value
//! into downstream constraints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vehicle position relative to its current stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentStatus {
    #[serde(rename = "INCOMING_AT")]
    IncomingAt,
    #[serde(rename = "STOPPED_AT")]
    StoppedAt,
    #[serde(rename = "IN_TRANSIT_TO")]
    InTransitTo,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl CurrentStatus {
    pub fn from_wire(code: i32) -> Self {
        match code {
            0 => CurrentStatus::IncomingAt,
            1 => CurrentStatus::StoppedAt,
            2 => CurrentStatus::InTransitTo,
            _ => CurrentStatus::Unknown,
        }
    }
}

/// GTFS-RT congestion levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CongestionLevel {
    #[serde(rename = "UNKNOWN_CONGESTION_LEVEL")]
    Unknown,
    #[serde(rename = "RUNNING_SMOOTHLY")]
    RunningSmoothly,
    #[serde(rename = "STOP_AND_GO")]
    StopAndGo,
    #[serde(rename = "CONGESTION")]
    Congestion,
    #[serde(rename = "SEVERE_CONGESTION")]
    SevereCongestion,
}

impl CongestionLevel {
    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => CongestionLevel::RunningSmoothly,
            2 => CongestionLevel::StopAndGo,
            3 => CongestionLevel::Congestion,
            4 => CongestionLevel::SevereCongestion,
            _ => CongestionLevel::Unknown,
        }
    }

    /// Numeric score used by the gold-layer rollup. Unknown scores 0.
    pub fn score(self) -> u8 {
        match self {
            CongestionLevel::Unknown => 0,
            CongestionLevel::RunningSmoothly => 1,
            CongestionLevel::StopAndGo => 2,
            CongestionLevel::Congestion => 3,
            CongestionLevel::SevereCongestion => 4,
        }
    }
}

/// GTFS-RT occupancy levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupancyStatus {
    #[serde(rename = "EMPTY")]
    Empty,
    #[serde(rename = "MANY_SEATS_AVAILABLE")]
    ManySeatsAvailable,
    #[serde(rename = "FEW_SEATS_AVAILABLE")]
    FewSeatsAvailable,
    #[serde(rename = "STANDING_ROOM_ONLY")]
    StandingRoomOnly,
    #[serde(rename = "CRUSHED_STANDING_ROOM_ONLY")]
    CrushedStandingRoomOnly,
    #[serde(rename = "FULL")]
    Full,
    #[serde(rename = "NOT_ACCEPTING_PASSENGERS")]
    NotAcceptingPassengers,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl OccupancyStatus {
    pub fn from_wire(code: i32) -> Self {
        match code {
            0 => OccupancyStatus::Empty,
            1 => OccupancyStatus::ManySeatsAvailable,
            2 => OccupancyStatus::FewSeatsAvailable,
            3 => OccupancyStatus::StandingRoomOnly,
            4 => OccupancyStatus::CrushedStandingRoomOnly,
            5 => OccupancyStatus::Full,
            6 => OccupancyStatus::NotAcceptingPassengers,
            _ => OccupancyStatus::Unknown,
        }
    }
}

/// Stop-time schedule relationship. Unmapped wire codes fall back to
/// `Scheduled`, which is also the wire default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleRelationship {
    #[default]
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "SKIPPED")]
    Skipped,
    #[serde(rename = "NO_DATA")]
    NoData,
    #[serde(rename = "UNSCHEDULED")]
    Unscheduled,
}

impl ScheduleRelationship {
    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => ScheduleRelationship::Skipped,
            2 => ScheduleRelationship::NoData,
            3 => ScheduleRelationship::Unscheduled,
            _ => ScheduleRelationship::Scheduled,
        }
    }
}

/// A decoded vehicle position. Timestamps are always UTC; speed is m/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,

    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<f64>,
    pub speed: Option<f64>,

    /// When the vehicle reported this position. Falls back to the feed
    /// header timestamp when the entity carries none of its own.
    pub timestamp: DateTime<Utc>,

    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub current_status: Option<CurrentStatus>,
    pub congestion_level: Option<CongestionLevel>,
    pub occupancy_status: Option<OccupancyStatus>,

    pub agency_id: String,
    pub feed_timestamp: DateTime<Utc>,
}

impl VehiclePosition {
    /// Partition key for the event sink.
    pub fn partition_key(&self) -> &str {
        &self.vehicle_id
    }

    /// Speed converted to km/h, when reported.
    pub fn speed_kmh(&self) -> Option<f64> {
        self.speed.map(|s| s * 3.6)
    }
}

/// One stop-time update fanned out of a trip-update entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdate {
    pub trip_id: String,
    pub route_id: Option<String>,
    pub vehicle_id: Option<String>,

    pub stop_sequence: u32,
    pub stop_id: String,

    /// Delay in seconds; negative means early.
    pub arrival_delay: Option<i32>,
    pub departure_delay: Option<i32>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,

    pub schedule_relationship: ScheduleRelationship,

    pub agency_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TripUpdate {
    pub fn partition_key(&self) -> &str {
        &self.trip_id
    }

    /// Best-available delay for performance rollups: arrival delay when
    /// present, otherwise departure delay.
    pub fn effective_delay(&self) -> Option<i32> {
        self.arrival_delay.or(self.departure_delay)
    }
}

/// Simplified weather classification derived from WMO codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    #[serde(rename = "CLEAR")]
    Clear,
    #[serde(rename = "PARTLY_CLOUDY")]
    PartlyCloudy,
    #[serde(rename = "OVERCAST")]
    Overcast,
    #[serde(rename = "RAIN")]
    Rain,
    #[serde(rename = "HEAVY_RAIN")]
    HeavyRain,
    #[serde(rename = "SNOW")]
    Snow,
    #[serde(rename = "THUNDERSTORM")]
    Thunderstorm,
    #[serde(rename = "FOG")]
    Fog,
}

impl WeatherCondition {
    /// Maps a WMO weather code to a simplified condition.
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => WeatherCondition::Clear,
            1 | 2 => WeatherCondition::PartlyCloudy,
            3 => WeatherCondition::Overcast,
            45 | 48 => WeatherCondition::Fog,
            51..=67 => WeatherCondition::Rain,
            71..=77 => WeatherCondition::Snow,
            80..=82 => WeatherCondition::HeavyRain,
            95..=99 => WeatherCondition::Thunderstorm,
            _ => WeatherCondition::Clear,
        }
    }
}

/// Weather observation supplied by the enrichment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub latitude: f64,
    pub longitude: f64,

    pub temperature_celsius: f64,
    pub precipitation_mm: f64,
    pub wind_speed_kmh: f64,
    pub weather_code: i32,
    pub weather_condition: WeatherCondition,

    pub observation_time: DateTime<Utc>,
    pub agency_id: String,
}

/// Closed set of rejection reasons. Doubles as the alert type on emitted
/// [`QualityAlert`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "STALE_DATA")]
    StaleData,
    #[serde(rename = "GEOGRAPHIC_VIOLATION")]
    GeographicViolation,
    #[serde(rename = "SPEED_VIOLATION")]
    SpeedViolation,
}

impl AlertType {
    pub fn severity(self) -> Severity {
        match self {
            AlertType::SpeedViolation | AlertType::GeographicViolation => Severity::High,
            AlertType::StaleData | AlertType::ValidationError => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "vehicle_position")]
    VehiclePosition,
    #[serde(rename = "trip_update")]
    TripUpdate,
    #[serde(rename = "weather_observation")]
    WeatherObservation,
}

/// Data quality alert emitted for every record the gate rejects. Rejections
/// are never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAlert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,

    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub agency_id: String,

    pub error_message: String,
    pub field_name: Option<String>,
    pub field_value: Option<String>,

    pub detected_at: DateTime<Utc>,
}
