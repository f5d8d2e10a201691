//! Quality gate: data contracts enforced on every decoded record.
//!
//! The gate is stateless and performs no I/O; it is a pure function of the
//! record, the configuration, and the `now` argument, so it is safe to run
//! concurrently across independent entities.

pub mod config;
pub mod rules;

use chrono::{DateTime, Utc};

pub use config::{GeoBounds, QualityConfig};
pub use rules::{GateContext, Rejection};

use crate::models::{
    EntityType, QualityAlert, TripUpdate, VehiclePosition, WeatherObservation,
};

/// Evaluates records against the ordered rule sets in [`rules`].
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Validates a vehicle position. The first failing rule short-circuits
    /// and names itself in the returned [`Rejection`].
    pub fn validate_position(
        &self,
        position: &VehiclePosition,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let ctx = GateContext {
            config: &self.config,
            now,
        };
        for (name, rule) in rules::POSITION_RULES {
            rule(position, &ctx).map_err(|mut rejection| {
                rejection.rule = name;
                rejection
            })?;
        }
        Ok(())
    }

    pub fn validate_trip_update(
        &self,
        update: &TripUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let ctx = GateContext {
            config: &self.config,
            now,
        };
        for (name, rule) in rules::TRIP_UPDATE_RULES {
            rule(update, &ctx).map_err(|mut rejection| {
                rejection.rule = name;
                rejection
            })?;
        }
        Ok(())
    }

    pub fn validate_weather(
        &self,
        observation: &WeatherObservation,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let ctx = GateContext {
            config: &self.config,
            now,
        };
        for (name, rule) in rules::WEATHER_RULES {
            rule(observation, &ctx).map_err(|mut rejection| {
                rejection.rule = name;
                rejection
            })?;
        }
        Ok(())
    }
}

impl Rejection {
    /// Builds the quality alert this rejection must be emitted as.
    pub fn into_alert(
        self,
        alert_id: String,
        entity_type: EntityType,
        entity_id: Option<String>,
        agency_id: String,
        detected_at: DateTime<Utc>,
    ) -> QualityAlert {
        QualityAlert {
            alert_id,
            alert_type: self.reason,
            severity: self.reason.severity(),
            entity_type,
            entity_id,
            agency_id,
            error_message: self.message,
            field_name: self.field_name.map(str::to_string),
            field_value: self.field_value,
            detected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertType, ScheduleRelationship, Severity};
    use chrono::Duration;
    use std::collections::HashMap;

    fn fresh_position(now: DateTime<Utc>) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: "4012".to_string(),
            trip_id: Some("10293847".to_string()),
            route_id: Some("100".to_string()),
            latitude: 45.5152,
            longitude: -122.6784,
            bearing: Some(180.5),
            speed: Some(12.5),
            timestamp: now,
            current_stop_sequence: Some(5),
            stop_id: Some("7625".to_string()),
            current_status: None,
            congestion_level: None,
            occupancy_status: None,
            agency_id: "trimet".to_string(),
            feed_timestamp: now,
        }
    }

    fn trip_update(now: DateTime<Utc>) -> TripUpdate {
        TripUpdate {
            trip_id: "10293847".to_string(),
            route_id: Some("100".to_string()),
            vehicle_id: Some("4012".to_string()),
            stop_sequence: 5,
            stop_id: "7625".to_string(),
            arrival_delay: Some(120),
            departure_delay: Some(180),
            arrival_time: None,
            departure_time: None,
            schedule_relationship: ScheduleRelationship::Scheduled,
            agency_id: "trimet".to_string(),
            timestamp: now,
        }
    }

    #[test]
    fn test_valid_position_accepted() {
        let now = Utc::now();
        let gate = QualityGate::default();
        assert!(gate.validate_position(&fresh_position(now), now).is_ok());
    }

    #[test]
    fn test_speed_over_limit_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.speed = Some(40.0);

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.reason, AlertType::SpeedViolation);
        assert_eq!(rejection.rule, "speed-bounds");
        assert_eq!(rejection.field_name, Some("speed"));
    }

    #[test]
    fn test_speed_boundary_is_inclusive() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.speed = Some(33.3);
        assert!(gate.validate_position(&pos, now).is_ok());
    }

    #[test]
    fn test_negative_speed_is_validation_error() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.speed = Some(-1.0);

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.reason, AlertType::ValidationError);
    }

    #[test]
    fn test_missing_speed_passes_speed_rule() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.speed = None;
        assert!(gate.validate_position(&pos, now).is_ok());
    }

    #[test]
    fn test_stale_position_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.timestamp = now - Duration::seconds(301);

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.reason, AlertType::StaleData);
    }

    #[test]
    fn test_position_at_freshness_boundary_accepted() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.timestamp = now - Duration::seconds(300);
        assert!(gate.validate_position(&pos, now).is_ok());
    }

    #[test]
    fn test_empty_vehicle_id_rejected_first() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.vehicle_id = String::new();
        pos.speed = Some(99.0); // would also fail, but required-fields fires first

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.rule, "required-identifiers");
        assert_eq!(rejection.reason, AlertType::ValidationError);
    }

    #[test]
    fn test_bearing_360_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.bearing = Some(360.0);

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.rule, "bearing-range");
    }

    #[test]
    fn test_latitude_out_of_range_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.latitude = 91.0;

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.rule, "coordinate-range");
        assert_eq!(rejection.reason, AlertType::ValidationError);
    }

    #[test]
    fn test_agency_bounds_violation() {
        let now = Utc::now();
        let mut config = QualityConfig::default();
        config.agency_bounds.insert(
            "trimet".to_string(),
            GeoBounds {
                min_latitude: 45.2,
                max_latitude: 45.7,
                min_longitude: -123.2,
                max_longitude: -122.2,
            },
        );
        let gate = QualityGate::new(config);

        let mut pos = fresh_position(now);
        pos.latitude = 47.6; // Seattle
        pos.longitude = -122.3;

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        assert_eq!(rejection.reason, AlertType::GeographicViolation);
        assert_eq!(rejection.rule, "agency-bounds");
    }

    #[test]
    fn test_valid_trip_update_accepted() {
        let now = Utc::now();
        let gate = QualityGate::default();
        assert!(gate.validate_trip_update(&trip_update(now), now).is_ok());
    }

    #[test]
    fn test_arrival_after_departure_always_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut tu = trip_update(now);
        tu.arrival_time = Some(now + Duration::seconds(600));
        tu.departure_time = Some(now);

        let rejection = gate.validate_trip_update(&tu, now).unwrap_err();
        assert_eq!(rejection.reason, AlertType::ValidationError);
        assert_eq!(rejection.rule, "arrival-departure-order");
    }

    #[test]
    fn test_arrival_equal_departure_accepted() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut tu = trip_update(now);
        tu.arrival_time = Some(now);
        tu.departure_time = Some(now);
        assert!(gate.validate_trip_update(&tu, now).is_ok());
    }

    #[test]
    fn test_delay_out_of_bounds_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();

        let mut tu = trip_update(now);
        tu.arrival_delay = Some(7201);
        let rejection = gate.validate_trip_update(&tu, now).unwrap_err();
        assert_eq!(rejection.rule, "delay-bounds");

        let mut tu = trip_update(now);
        tu.departure_delay = Some(-3601);
        assert!(gate.validate_trip_update(&tu, now).is_err());

        let mut tu = trip_update(now);
        tu.arrival_delay = Some(-3600);
        tu.departure_delay = Some(7200);
        assert!(gate.validate_trip_update(&tu, now).is_ok());
    }

    #[test]
    fn test_empty_stop_id_rejected() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut tu = trip_update(now);
        tu.stop_id = String::new();

        let rejection = gate.validate_trip_update(&tu, now).unwrap_err();
        assert_eq!(rejection.rule, "required-identifiers");
    }

    #[test]
    fn test_weather_rules() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let observation = WeatherObservation {
            latitude: 45.5152,
            longitude: -122.6784,
            temperature_celsius: 15.5,
            precipitation_mm: 2.3,
            wind_speed_kmh: 12.5,
            weather_code: 61,
            weather_condition: crate::models::WeatherCondition::Rain,
            observation_time: now,
            agency_id: "trimet".to_string(),
        };
        assert!(gate.validate_weather(&observation, now).is_ok());

        let mut hot = observation.clone();
        hot.temperature_celsius = 75.0;
        assert_eq!(
            gate.validate_weather(&hot, now).unwrap_err().rule,
            "temperature-range"
        );

        let mut old = observation.clone();
        old.observation_time = now - Duration::seconds(3601);
        assert_eq!(
            gate.validate_weather(&old, now).unwrap_err().reason,
            AlertType::StaleData
        );

        // Weather freshness allows a full hour; a 10-minute-old observation
        // that would be stale as a vehicle position is fine here.
        let mut recent = observation;
        recent.observation_time = now - Duration::seconds(600);
        assert!(gate.validate_weather(&recent, now).is_ok());
    }

    #[test]
    fn test_rejection_into_alert() {
        let now = Utc::now();
        let gate = QualityGate::default();
        let mut pos = fresh_position(now);
        pos.speed = Some(45.2);

        let rejection = gate.validate_position(&pos, now).unwrap_err();
        let alert = rejection.into_alert(
            "dqa_20260823_120000_0001".to_string(),
            EntityType::VehiclePosition,
            Some(pos.vehicle_id.clone()),
            pos.agency_id.clone(),
            now,
        );

        assert_eq!(alert.alert_type, AlertType::SpeedViolation);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.entity_id.as_deref(), Some("4012"));
        assert_eq!(alert.field_name.as_deref(), Some("speed"));
        assert!(alert.error_message.contains("45.2"));
    }

    #[test]
    fn test_gate_uses_hashmap_config() {
        // Gate holds only immutable config; cloning it gives independent
        // gates safe to use across tasks.
        let config = QualityConfig {
            agency_bounds: HashMap::new(),
            ..QualityConfig::default()
        };
        let gate = QualityGate::new(config);
        let cloned = gate.clone();
        let now = Utc::now();
        assert!(cloned.validate_position(&fresh_position(now), now).is_ok());
    }
}
