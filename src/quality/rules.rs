//! Ordered, named predicate rules over already-parsed records.
//!
//! Each rule is a pure function of the record, the gate configuration, and
//! the clock reading passed in through [`GateContext`]. Rule order is
//! significant: the gate evaluates a record against its rule slice top to
//! bottom and short-circuits on the first failure.

use chrono::{DateTime, Utc};

use super::config::QualityConfig;
use crate::models::{AlertType, TripUpdate, VehiclePosition, WeatherObservation};

/// Static inputs shared by every rule evaluation.
pub struct GateContext<'a> {
    pub config: &'a QualityConfig,
    pub now: DateTime<Utc>,
}

/// Structured rejection produced by a failed rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: AlertType,
    /// Name of the rule that fired; filled in by the gate.
    pub rule: &'static str,
    pub field_name: Option<&'static str>,
    pub field_value: Option<String>,
    pub message: String,
}

impl Rejection {
    fn new(reason: AlertType, message: String) -> Self {
        Rejection {
            reason,
            rule: "",
            field_name: None,
            field_value: None,
            message,
        }
    }

    fn with_field(mut self, name: &'static str, value: impl ToString) -> Self {
        self.field_name = Some(name);
        self.field_value = Some(value.to_string());
        self
    }
}

pub type PositionRule = fn(&VehiclePosition, &GateContext) -> Result<(), Rejection>;
pub type TripUpdateRule = fn(&TripUpdate, &GateContext) -> Result<(), Rejection>;
pub type WeatherRule = fn(&WeatherObservation, &GateContext) -> Result<(), Rejection>;

/// Vehicle position rules, in evaluation order.
pub const POSITION_RULES: &[(&str, PositionRule)] = &[
    ("required-identifiers", position_required_identifiers),
    ("coordinate-range", position_coordinate_range),
    ("bearing-range", position_bearing_range),
    ("speed-bounds", position_speed_bounds),
    ("freshness", position_freshness),
    ("agency-bounds", position_agency_bounds),
];

/// Trip update rules, in evaluation order.
pub const TRIP_UPDATE_RULES: &[(&str, TripUpdateRule)] = &[
    ("required-identifiers", trip_update_required_identifiers),
    ("arrival-departure-order", trip_update_schedule_order),
    ("delay-bounds", trip_update_delay_bounds),
];

/// Weather observation rules, in evaluation order.
pub const WEATHER_RULES: &[(&str, WeatherRule)] = &[
    ("coordinate-range", weather_coordinate_range),
    ("temperature-range", weather_temperature_range),
    ("precipitation-range", weather_precipitation_range),
    ("wind-speed-range", weather_wind_speed_range),
    ("weather-code-range", weather_code_range),
    ("freshness", weather_freshness),
];

fn position_required_identifiers(
    p: &VehiclePosition,
    _ctx: &GateContext,
) -> Result<(), Rejection> {
    if p.vehicle_id.is_empty() {
        return Err(Rejection::new(
            AlertType::ValidationError,
            "vehicle_id is empty".to_string(),
        )
        .with_field("vehicle_id", ""));
    }
    if p.agency_id.is_empty() {
        return Err(Rejection::new(
            AlertType::ValidationError,
            "agency_id is empty".to_string(),
        )
        .with_field("agency_id", ""));
    }
    Ok(())
}

fn position_coordinate_range(p: &VehiclePosition, _ctx: &GateContext) -> Result<(), Rejection> {
    if !(-90.0..=90.0).contains(&p.latitude) {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("latitude {} outside [-90, 90]", p.latitude),
        )
        .with_field("latitude", p.latitude));
    }
    if !(-180.0..=180.0).contains(&p.longitude) {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("longitude {} outside [-180, 180]", p.longitude),
        )
        .with_field("longitude", p.longitude));
    }
    Ok(())
}

fn position_bearing_range(p: &VehiclePosition, _ctx: &GateContext) -> Result<(), Rejection> {
    if let Some(bearing) = p.bearing
        && !(0.0..360.0).contains(&bearing)
    {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("bearing {bearing} outside [0, 360)"),
        )
        .with_field("bearing", bearing));
    }
    Ok(())
}

fn position_speed_bounds(p: &VehiclePosition, ctx: &GateContext) -> Result<(), Rejection> {
    let Some(speed) = p.speed else { return Ok(()) };

    if speed < 0.0 {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("speed {speed:.2} m/s is negative"),
        )
        .with_field("speed", speed));
    }
    // The maximum is inclusive: exactly max_speed_ms passes.
    if speed > ctx.config.max_speed_ms {
        return Err(Rejection::new(
            AlertType::SpeedViolation,
            format!(
                "speed {:.2} m/s ({:.1} km/h) exceeds maximum realistic speed {:.1} m/s",
                speed,
                speed * 3.6,
                ctx.config.max_speed_ms
            ),
        )
        .with_field("speed", speed));
    }
    Ok(())
}

fn position_freshness(p: &VehiclePosition, ctx: &GateContext) -> Result<(), Rejection> {
    let age_secs = (ctx.now - p.timestamp).num_seconds();
    if age_secs > ctx.config.max_position_age_secs {
        return Err(Rejection::new(
            AlertType::StaleData,
            format!(
                "position is {age_secs}s old, exceeds {}s limit",
                ctx.config.max_position_age_secs
            ),
        )
        .with_field("timestamp", p.timestamp.to_rfc3339()));
    }
    Ok(())
}

fn position_agency_bounds(p: &VehiclePosition, ctx: &GateContext) -> Result<(), Rejection> {
    let bounds = ctx.config.bounds_for(&p.agency_id);
    if !bounds.contains(p.latitude, p.longitude) {
        return Err(Rejection::new(
            AlertType::GeographicViolation,
            format!(
                "({}, {}) outside service area of agency {}",
                p.latitude, p.longitude, p.agency_id
            ),
        )
        .with_field("latitude", p.latitude));
    }
    Ok(())
}

fn trip_update_required_identifiers(
    tu: &TripUpdate,
    _ctx: &GateContext,
) -> Result<(), Rejection> {
    if tu.trip_id.is_empty() {
        return Err(Rejection::new(
            AlertType::ValidationError,
            "trip_id is empty".to_string(),
        )
        .with_field("trip_id", ""));
    }
    if tu.stop_id.is_empty() {
        return Err(Rejection::new(
            AlertType::ValidationError,
            "stop_id is empty".to_string(),
        )
        .with_field("stop_id", ""));
    }
    if tu.agency_id.is_empty() {
        return Err(Rejection::new(
            AlertType::ValidationError,
            "agency_id is empty".to_string(),
        )
        .with_field("agency_id", ""));
    }
    Ok(())
}

fn trip_update_schedule_order(tu: &TripUpdate, _ctx: &GateContext) -> Result<(), Rejection> {
    if let (Some(arrival), Some(departure)) = (tu.arrival_time, tu.departure_time)
        && arrival > departure
    {
        return Err(Rejection::new(
            AlertType::ValidationError,
            "arrival time cannot be after departure time".to_string(),
        )
        .with_field("arrival_time", arrival.to_rfc3339()));
    }
    Ok(())
}

fn trip_update_delay_bounds(tu: &TripUpdate, _ctx: &GateContext) -> Result<(), Rejection> {
    // One hour early to two hours late.
    const MIN_DELAY: i32 = -3600;
    const MAX_DELAY: i32 = 7200;

    for (name, delay) in [
        ("arrival_delay", tu.arrival_delay),
        ("departure_delay", tu.departure_delay),
    ] {
        if let Some(d) = delay
            && !(MIN_DELAY..=MAX_DELAY).contains(&d)
        {
            return Err(Rejection::new(
                AlertType::ValidationError,
                format!("delay {d}s outside bounds [{MIN_DELAY}s, {MAX_DELAY}s]"),
            )
            .with_field(name, d));
        }
    }
    Ok(())
}

fn weather_coordinate_range(w: &WeatherObservation, _ctx: &GateContext) -> Result<(), Rejection> {
    if !(-90.0..=90.0).contains(&w.latitude) || !(-180.0..=180.0).contains(&w.longitude) {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("coordinates ({}, {}) out of range", w.latitude, w.longitude),
        )
        .with_field("latitude", w.latitude));
    }
    Ok(())
}

fn weather_temperature_range(w: &WeatherObservation, _ctx: &GateContext) -> Result<(), Rejection> {
    if !(-50.0..=60.0).contains(&w.temperature_celsius) {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("temperature {}°C outside [-50, 60]", w.temperature_celsius),
        )
        .with_field("temperature_celsius", w.temperature_celsius));
    }
    Ok(())
}

fn weather_precipitation_range(
    w: &WeatherObservation,
    _ctx: &GateContext,
) -> Result<(), Rejection> {
    if w.precipitation_mm < 0.0 {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("precipitation {}mm is negative", w.precipitation_mm),
        )
        .with_field("precipitation_mm", w.precipitation_mm));
    }
    Ok(())
}

fn weather_wind_speed_range(w: &WeatherObservation, _ctx: &GateContext) -> Result<(), Rejection> {
    if !(0.0..=200.0).contains(&w.wind_speed_kmh) {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("wind speed {} km/h outside [0, 200]", w.wind_speed_kmh),
        )
        .with_field("wind_speed_kmh", w.wind_speed_kmh));
    }
    Ok(())
}

fn weather_code_range(w: &WeatherObservation, _ctx: &GateContext) -> Result<(), Rejection> {
    if !(0..=99).contains(&w.weather_code) {
        return Err(Rejection::new(
            AlertType::ValidationError,
            format!("WMO code {} outside [0, 99]", w.weather_code),
        )
        .with_field("weather_code", w.weather_code));
    }
    Ok(())
}

fn weather_freshness(w: &WeatherObservation, ctx: &GateContext) -> Result<(), Rejection> {
    let age_secs = (ctx.now - w.observation_time).num_seconds();
    if age_secs > ctx.config.max_weather_age_secs {
        return Err(Rejection::new(
            AlertType::StaleData,
            format!(
                "weather observation is {age_secs}s old, exceeds {}s limit",
                ctx.config.max_weather_age_secs
            ),
        )
        .with_field("observation_time", w.observation_time.to_rfc3339()));
    }
    Ok(())
}
