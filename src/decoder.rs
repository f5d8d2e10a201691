//! Turns a parsed [`FeedMessage`] into typed domain records.
//!
//! The decoder resolves optional wire fields, maps enumerated codes through
//! the closed enums in [`crate::models`], inherits the feed header timestamp
//! where an entity carries none of its own, and fans stop-time updates out
//! into one [`TripUpdate`] record per stop.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::gtfs_rt;
use crate::models::{
    CongestionLevel, CurrentStatus, OccupancyStatus, ScheduleRelationship, TripUpdate,
    VehiclePosition,
};
use crate::parser::{DecodeError, parse_feed};

/// Everything decoded from one feed snapshot.
#[derive(Debug)]
pub struct DecodedFeed {
    pub positions: Vec<VehiclePosition>,
    pub trip_updates: Vec<TripUpdate>,
    pub feed_timestamp: DateTime<Utc>,
    /// Entities carrying no usable payload (deleted, or a vehicle with no
    /// position to report). Skipping them is not an error.
    pub skipped_entities: usize,
}

/// Decodes raw GTFS-RT bytes into domain records for one agency.
#[derive(Debug, Clone)]
pub struct FeedDecoder {
    agency_id: String,
}

impl FeedDecoder {
    pub fn new(agency_id: impl Into<String>) -> Self {
        Self {
            agency_id: agency_id.into(),
        }
    }

    /// Decodes one binary feed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the bytes are not a valid `FeedMessage`;
    /// the whole call fails and nothing is extracted.
    pub fn decode(&self, raw: &[u8]) -> Result<DecodedFeed, DecodeError> {
        let feed = parse_feed(raw)?;

        let feed_timestamp = feed
            .header
            .timestamp
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or_else(Utc::now);

        let mut decoded = DecodedFeed {
            positions: Vec::new(),
            trip_updates: Vec::new(),
            feed_timestamp,
            skipped_entities: 0,
        };

        for entity in &feed.entity {
            if entity.is_deleted == Some(true) {
                decoded.skipped_entities += 1;
                continue;
            }

            if let Some(vehicle) = &entity.vehicle {
                match self.decode_position(&entity.id, vehicle, feed_timestamp) {
                    Some(position) => decoded.positions.push(position),
                    None => decoded.skipped_entities += 1,
                }
            }

            if let Some(trip_update) = &entity.trip_update {
                let updates = self.decode_trip_updates(&entity.id, trip_update, feed_timestamp);
                if updates.is_empty() {
                    decoded.skipped_entities += 1;
                }
                decoded.trip_updates.extend(updates);
            }
        }

        debug!(
            positions = decoded.positions.len(),
            trip_updates = decoded.trip_updates.len(),
            skipped = decoded.skipped_entities,
            "Feed decoded"
        );

        Ok(decoded)
    }

    fn decode_position(
        &self,
        entity_id: &str,
        vehicle: &gtfs_rt::VehiclePosition,
        feed_timestamp: DateTime<Utc>,
    ) -> Option<VehiclePosition> {
        // A vehicle with no position payload has no location to report.
        let Some(position) = &vehicle.position else {
            debug!(entity_id, "Vehicle entity has no position data");
            return None;
        };

        let vehicle_id = vehicle
            .vehicle
            .as_ref()
            .and_then(|d| d.id.clone())
            .unwrap_or_else(|| entity_id.to_string());

        let timestamp = vehicle
            .timestamp
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or(feed_timestamp);

        Some(VehiclePosition {
            vehicle_id,
            trip_id: vehicle.trip.as_ref().and_then(|t| t.trip_id.clone()),
            route_id: vehicle.trip.as_ref().and_then(|t| t.route_id.clone()),
            latitude: f64::from(position.latitude),
            longitude: f64::from(position.longitude),
            bearing: position.bearing.map(f64::from),
            speed: position.speed.map(f64::from),
            timestamp,
            current_stop_sequence: vehicle.current_stop_sequence,
            stop_id: vehicle.stop_id.clone(),
            current_status: vehicle.current_status.map(CurrentStatus::from_wire),
            congestion_level: vehicle.congestion_level.map(CongestionLevel::from_wire),
            occupancy_status: vehicle.occupancy_status.map(OccupancyStatus::from_wire),
            agency_id: self.agency_id.clone(),
            feed_timestamp,
        })
    }

    /// One trip-update entity can carry many stop-time updates; each becomes
    /// its own record, inheriting the parent trip/vehicle/route identifiers.
    fn decode_trip_updates(
        &self,
        entity_id: &str,
        trip_update: &gtfs_rt::TripUpdate,
        feed_timestamp: DateTime<Utc>,
    ) -> Vec<TripUpdate> {
        let Some(trip_id) = trip_update.trip.trip_id.clone() else {
            debug!(entity_id, "Trip update has no trip_id");
            return Vec::new();
        };

        let route_id = trip_update.trip.route_id.clone();
        let vehicle_id = trip_update.vehicle.as_ref().and_then(|d| d.id.clone());

        let timestamp = trip_update
            .timestamp
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or(feed_timestamp);

        trip_update
            .stop_time_update
            .iter()
            .map(|stu| TripUpdate {
                trip_id: trip_id.clone(),
                route_id: route_id.clone(),
                vehicle_id: vehicle_id.clone(),
                stop_sequence: stu.stop_sequence.unwrap_or(0),
                stop_id: stu.stop_id.clone().unwrap_or_default(),
                arrival_delay: stu.arrival.as_ref().and_then(|ev| ev.delay),
                departure_delay: stu.departure.as_ref().and_then(|ev| ev.delay),
                arrival_time: stu
                    .arrival
                    .as_ref()
                    .and_then(|ev| ev.time)
                    .and_then(|secs| DateTime::from_timestamp(secs, 0)),
                departure_time: stu
                    .departure
                    .as_ref()
                    .and_then(|ev| ev.time)
                    .and_then(|secs| DateTime::from_timestamp(secs, 0)),
                schedule_relationship: stu
                    .schedule_relationship
                    .map(ScheduleRelationship::from_wire)
                    .unwrap_or_default(),
                agency_id: self.agency_id.clone(),
                timestamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
    use crate::gtfs_rt::{
        FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, VehicleDescriptor,
    };
    use prost::Message;

    fn encode_feed(timestamp: u64, entities: Vec<FeedEntity>) -> Vec<u8> {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(timestamp),
                incrementality: None,
                feed_version: None,
            },
            entity: entities,
        }
        .encode_to_vec()
    }

    fn vehicle_entity(id: &str, lat: f32, lon: f32, speed: f32, timestamp: u64) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            vehicle: Some(gtfs_rt::VehiclePosition {
                vehicle: Some(VehicleDescriptor {
                    id: Some(id.to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: lat,
                    longitude: lon,
                    speed: Some(speed),
                    ..Default::default()
                }),
                timestamp: Some(timestamp),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_single_vehicle_round_trip() {
        let now = Utc::now().timestamp() as u64;
        let bytes = encode_feed(now, vec![vehicle_entity("4012", 45.5152, -122.6784, 12.5, now)]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert_eq!(decoded.positions.len(), 1);
        let pos = &decoded.positions[0];
        assert_eq!(pos.vehicle_id, "4012");
        assert!((pos.latitude - 45.5152).abs() < 1e-4);
        assert!((pos.longitude - -122.6784).abs() < 1e-4);
        assert!((pos.speed.unwrap() - 12.5).abs() < 1e-6);
        assert_eq!(pos.agency_id, "trimet");
        assert_eq!(pos.timestamp.timestamp() as u64, now);
    }

    #[test]
    fn test_vehicle_without_position_is_skipped() {
        let now = Utc::now().timestamp() as u64;
        let entity = FeedEntity {
            id: "no-pos".to_string(),
            vehicle: Some(gtfs_rt::VehiclePosition::default()),
            ..Default::default()
        };
        let bytes = encode_feed(now, vec![entity]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert!(decoded.positions.is_empty());
        assert_eq!(decoded.skipped_entities, 1);
    }

    #[test]
    fn test_deleted_entity_is_skipped() {
        let now = Utc::now().timestamp() as u64;
        let mut entity = vehicle_entity("gone", 45.0, -122.0, 5.0, now);
        entity.is_deleted = Some(true);
        let bytes = encode_feed(now, vec![entity]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert!(decoded.positions.is_empty());
        assert_eq!(decoded.skipped_entities, 1);
    }

    #[test]
    fn test_missing_entity_timestamp_inherits_header() {
        let feed_ts = 1_700_000_000u64;
        let mut entity = vehicle_entity("4012", 45.0, -122.0, 5.0, 0);
        entity.vehicle.as_mut().unwrap().timestamp = None;
        let bytes = encode_feed(feed_ts, vec![entity]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert_eq!(
            decoded.positions[0].timestamp.timestamp() as u64,
            feed_ts
        );
        assert_eq!(decoded.feed_timestamp.timestamp() as u64, feed_ts);
    }

    #[test]
    fn test_unmapped_congestion_code_decodes_as_unknown() {
        let now = Utc::now().timestamp() as u64;
        let mut entity = vehicle_entity("4012", 45.0, -122.0, 5.0, now);
        entity.vehicle.as_mut().unwrap().congestion_level = Some(42);
        let bytes = encode_feed(now, vec![entity]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert_eq!(
            decoded.positions[0].congestion_level,
            Some(CongestionLevel::Unknown)
        );
    }

    #[test]
    fn test_trip_update_fans_out_per_stop() {
        let now = Utc::now().timestamp();
        let entity = FeedEntity {
            id: "tu1".to_string(),
            trip_update: Some(gtfs_rt::TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some("10293847".to_string()),
                    route_id: Some("100".to_string()),
                    ..Default::default()
                },
                vehicle: Some(VehicleDescriptor {
                    id: Some("4012".to_string()),
                    ..Default::default()
                }),
                stop_time_update: vec![
                    StopTimeUpdate {
                        stop_sequence: Some(5),
                        stop_id: Some("7625".to_string()),
                        arrival: Some(StopTimeEvent {
                            delay: Some(120),
                            time: Some(now),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    StopTimeUpdate {
                        stop_sequence: Some(6),
                        stop_id: Some("7626".to_string()),
                        departure: Some(StopTimeEvent {
                            delay: Some(180),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        };
        let bytes = encode_feed(now as u64, vec![entity]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert_eq!(decoded.trip_updates.len(), 2);
        for tu in &decoded.trip_updates {
            // Parent identifiers are inherited by every fanned-out record
            assert_eq!(tu.trip_id, "10293847");
            assert_eq!(tu.route_id.as_deref(), Some("100"));
            assert_eq!(tu.vehicle_id.as_deref(), Some("4012"));
        }
        assert_eq!(decoded.trip_updates[0].arrival_delay, Some(120));
        assert_eq!(decoded.trip_updates[1].departure_delay, Some(180));
    }

    #[test]
    fn test_trip_update_without_trip_id_is_skipped() {
        let now = Utc::now().timestamp() as u64;
        let entity = FeedEntity {
            id: "tu-empty".to_string(),
            trip_update: Some(gtfs_rt::TripUpdate {
                trip: TripDescriptor::default(),
                stop_time_update: vec![StopTimeUpdate::default()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let bytes = encode_feed(now, vec![entity]);

        let decoded = FeedDecoder::new("trimet").decode(&bytes).unwrap();

        assert!(decoded.trip_updates.is_empty());
        assert_eq!(decoded.skipped_entities, 1);
    }
}
