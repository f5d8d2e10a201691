//! Three-layer (raw → validated → aggregated) store with promotion and
//! rollup rules.
//!
//! Layer responsibilities mirror a medallion layout:
//! - Raw: append-only audit trail, one row per decode, never mutated.
//! - Validated: records that passed the quality gate, deduplicated on a
//!   stable identity key, written only via [`LayeredStore::promote`].
//! - Aggregated: time-bucketed rollups recomputed with replace semantics.
//!
//! Promotion and aggregation take `&mut self`, which serializes them; the
//! decode and per-entity validation that feed the store are free to run in
//! parallel. Every batch operation stages its writes and commits them in
//! one step, so a failure never leaves a partial layer transition behind.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{EntityType, QualityAlert, TripUpdate, VehiclePosition, WeatherObservation};
use crate::quality::QualityGate;

/// Threshold for counting a stop as on time in route performance rollups.
const ON_TIME_THRESHOLD_SECS: i32 = 300;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("aggregation bucket must be a positive duration")]
    InvalidBucketSize,
    #[error("cannot truncate timestamp to bucket: {0}")]
    BucketRounding(#[from] chrono::round::RoundingError),
}

/// One raw-layer row: the decoded record plus when it was ingested.
#[derive(Debug, Clone, Serialize)]
pub struct RawRecord<T> {
    pub ingestion_timestamp: DateTime<Utc>,
    pub record: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    bucket: DateTime<Utc>,
    agency_id: String,
    route_id: String,
}

/// Gold-layer rollup row, uniquely keyed by (time bucket, agency, route).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyVehicleMetrics {
    pub hour_timestamp: DateTime<Utc>,
    pub agency_id: String,
    pub route_id: String,
    pub total_vehicles: usize,
    pub avg_speed_kmh: Option<f64>,
    pub max_speed_kmh: Option<f64>,
    pub avg_congestion_score: f64,
    pub total_observations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteDayKey {
    date: NaiveDate,
    agency_id: String,
    route_id: String,
}

/// Gold-layer delay rollup per (date, agency, route).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePerformance {
    pub date: NaiveDate,
    pub agency_id: String,
    pub route_id: String,
    pub avg_delay_seconds: f64,
    pub max_delay_seconds: i32,
    pub min_delay_seconds: i32,
    pub on_time_percentage: f64,
    pub total_trips: usize,
}

/// Read-only per-layer counts plus the derived quality rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerMetrics {
    pub bronze_vehicle_positions: usize,
    pub bronze_trip_updates: usize,
    pub bronze_weather_observations: usize,
    pub silver_vehicle_positions: usize,
    pub silver_trip_updates: usize,
    pub gold_hourly_metrics: usize,
    pub gold_route_performance: usize,
    /// silver positions / bronze positions; 0.0 while bronze is empty.
    pub data_quality_rate: f64,
}

/// Counts and alerts from one promotion pass.
#[derive(Debug, Default)]
pub struct PromotionOutcome {
    pub promoted_positions: usize,
    pub promoted_trip_updates: usize,
    pub rejected: usize,
    /// Individually valid records dropped for lying outside the rolling
    /// promotion window. Not an error, so no alert is raised.
    pub dropped_stale: usize,
    pub duplicates: usize,
    pub alerts: Vec<QualityAlert>,
}

/// Owns the layered tables and the transition rules between them.
#[derive(Debug)]
pub struct LayeredStore {
    gate: QualityGate,

    raw_positions: Vec<RawRecord<VehiclePosition>>,
    raw_trip_updates: Vec<RawRecord<TripUpdate>>,
    raw_weather: Vec<RawRecord<WeatherObservation>>,

    validated_positions: Vec<VehiclePosition>,
    validated_trip_updates: Vec<TripUpdate>,
    // Stable identity keys; a record enters the validated layer at most once.
    position_keys: HashSet<(String, DateTime<Utc>)>,
    trip_update_keys: HashSet<(String, u32, DateTime<Utc>)>,

    // High-water marks over the append-only layers below them.
    promote_position_cursor: usize,
    promote_trip_update_cursor: usize,
    metrics_cursor: usize,
    performance_cursor: usize,

    hourly_metrics: HashMap<BucketKey, HourlyVehicleMetrics>,
    route_performance: HashMap<RouteDayKey, RoutePerformance>,

    alert_seq: u64,
}

impl LayeredStore {
    pub fn new(gate: QualityGate) -> Self {
        LayeredStore {
            gate,
            raw_positions: Vec::new(),
            raw_trip_updates: Vec::new(),
            raw_weather: Vec::new(),
            validated_positions: Vec::new(),
            validated_trip_updates: Vec::new(),
            position_keys: HashSet::new(),
            trip_update_keys: HashSet::new(),
            promote_position_cursor: 0,
            promote_trip_update_cursor: 0,
            metrics_cursor: 0,
            performance_cursor: 0,
            hourly_metrics: HashMap::new(),
            route_performance: HashMap::new(),
            alert_seq: 0,
        }
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Unconditional batch insert into the raw position table. Never
    /// rejects; returns the count inserted.
    pub fn append_raw_positions(
        &mut self,
        positions: &[VehiclePosition],
        ingested_at: DateTime<Utc>,
    ) -> usize {
        self.raw_positions
            .extend(positions.iter().map(|p| RawRecord {
                ingestion_timestamp: ingested_at,
                record: p.clone(),
            }));
        debug!(count = positions.len(), "Appended raw vehicle positions");
        positions.len()
    }

    pub fn append_raw_trip_updates(
        &mut self,
        updates: &[TripUpdate],
        ingested_at: DateTime<Utc>,
    ) -> usize {
        self.raw_trip_updates
            .extend(updates.iter().map(|u| RawRecord {
                ingestion_timestamp: ingested_at,
                record: u.clone(),
            }));
        debug!(count = updates.len(), "Appended raw trip updates");
        updates.len()
    }

    pub fn append_raw_weather(
        &mut self,
        observations: &[WeatherObservation],
        ingested_at: DateTime<Utc>,
    ) -> usize {
        self.raw_weather
            .extend(observations.iter().map(|w| RawRecord {
                ingestion_timestamp: ingested_at,
                record: w.clone(),
            }));
        observations.len()
    }

    /// Appends one weather observation to the raw layer (weather has no
    /// validated table) and returns the quality alert when the gate
    /// rejects it.
    pub fn ingest_weather(
        &mut self,
        observation: WeatherObservation,
        now: DateTime<Utc>,
    ) -> Option<QualityAlert> {
        let alert = match self.gate.validate_weather(&observation, now) {
            Ok(()) => None,
            Err(rejection) => {
                self.alert_seq += 1;
                Some(rejection.into_alert(
                    alert_id(now, self.alert_seq),
                    EntityType::WeatherObservation,
                    None,
                    observation.agency_id.clone(),
                    now,
                ))
            }
        };
        self.raw_weather.push(RawRecord {
            ingestion_timestamp: now,
            record: observation,
        });
        alert
    }

    /// Scans raw records not yet promoted, applies the quality gate, and
    /// inserts the survivors into the validated layer.
    ///
    /// Guarantees:
    /// - Idempotent: re-running over an unchanged raw set promotes nothing
    ///   new (cursor plus identity-key dedup).
    /// - Dedup keys on (vehicle id, position timestamp) for positions and
    ///   (trip id, stop sequence, timestamp) for trip updates, so a vehicle
    ///   keeps getting promoted for each new position it reports.
    /// - Records older than the rolling promotion window are dropped even
    ///   when individually valid.
    /// - Every gate rejection is returned as a [`QualityAlert`], never
    ///   silently dropped.
    pub fn promote(&mut self, now: DateTime<Utc>) -> PromotionOutcome {
        let window = Duration::seconds(self.gate.config().promotion_window_secs);
        let mut outcome = PromotionOutcome::default();
        let mut seq = self.alert_seq;

        let mut staged_positions: Vec<VehiclePosition> = Vec::new();
        for raw in &self.raw_positions[self.promote_position_cursor..] {
            let position = &raw.record;
            match self.gate.validate_position(position, now) {
                Err(rejection) => {
                    seq += 1;
                    outcome.rejected += 1;
                    outcome.alerts.push(rejection.into_alert(
                        alert_id(now, seq),
                        EntityType::VehiclePosition,
                        Some(position.vehicle_id.clone()),
                        position.agency_id.clone(),
                        now,
                    ));
                }
                Ok(()) => {
                    if now - position.timestamp > window {
                        outcome.dropped_stale += 1;
                        continue;
                    }
                    let key = (position.vehicle_id.clone(), position.timestamp);
                    if self.position_keys.contains(&key)
                        || staged_positions.iter().any(|s| {
                            s.vehicle_id == position.vehicle_id
                                && s.timestamp == position.timestamp
                        })
                    {
                        outcome.duplicates += 1;
                        continue;
                    }
                    staged_positions.push(position.clone());
                }
            }
        }

        let mut staged_updates: Vec<TripUpdate> = Vec::new();
        for raw in &self.raw_trip_updates[self.promote_trip_update_cursor..] {
            let update = &raw.record;
            match self.gate.validate_trip_update(update, now) {
                Err(rejection) => {
                    seq += 1;
                    outcome.rejected += 1;
                    outcome.alerts.push(rejection.into_alert(
                        alert_id(now, seq),
                        EntityType::TripUpdate,
                        Some(update.trip_id.clone()),
                        update.agency_id.clone(),
                        now,
                    ));
                }
                Ok(()) => {
                    if now - update.timestamp > window {
                        outcome.dropped_stale += 1;
                        continue;
                    }
                    let key = (update.trip_id.clone(), update.stop_sequence, update.timestamp);
                    if self.trip_update_keys.contains(&key)
                        || staged_updates.iter().any(|s| {
                            s.trip_id == update.trip_id
                                && s.stop_sequence == update.stop_sequence
                                && s.timestamp == update.timestamp
                        })
                    {
                        outcome.duplicates += 1;
                        continue;
                    }
                    staged_updates.push(update.clone());
                }
            }
        }

        // Commit: everything staged lands, or (had staging failed) nothing.
        outcome.promoted_positions = staged_positions.len();
        outcome.promoted_trip_updates = staged_updates.len();
        for position in staged_positions {
            self.position_keys
                .insert((position.vehicle_id.clone(), position.timestamp));
            self.validated_positions.push(position);
        }
        for update in staged_updates {
            self.trip_update_keys
                .insert((update.trip_id.clone(), update.stop_sequence, update.timestamp));
            self.validated_trip_updates.push(update);
        }
        self.promote_position_cursor = self.raw_positions.len();
        self.promote_trip_update_cursor = self.raw_trip_updates.len();
        self.alert_seq = seq;

        info!(
            promoted_positions = outcome.promoted_positions,
            promoted_trip_updates = outcome.promoted_trip_updates,
            rejected = outcome.rejected,
            dropped_stale = outcome.dropped_stale,
            duplicates = outcome.duplicates,
            "Promotion pass complete"
        );
        outcome
    }

    /// Recomputes every (time bucket, agency, route) touched by validated
    /// positions since the last pass and replaces the corresponding gold
    /// rows. Running it twice over the same validated data yields identical
    /// rows, and two sequential sub-batches equal one batch over the union.
    ///
    /// Only positions carrying a route id participate. Missing congestion
    /// levels score 0 and still count toward the average.
    pub fn aggregate_window(&mut self, bucket: Duration) -> Result<usize, StoreError> {
        if bucket <= Duration::zero() {
            return Err(StoreError::InvalidBucketSize);
        }

        let mut touched: HashSet<BucketKey> = HashSet::new();
        for position in &self.validated_positions[self.metrics_cursor..] {
            let Some(route_id) = &position.route_id else {
                continue;
            };
            touched.insert(BucketKey {
                bucket: position.timestamp.duration_trunc(bucket)?,
                agency_id: position.agency_id.clone(),
                route_id: route_id.clone(),
            });
        }

        for key in &touched {
            let mut vehicles: HashSet<&str> = HashSet::new();
            let mut speeds_kmh: Vec<f64> = Vec::new();
            let mut congestion_total = 0u64;
            let mut observations = 0usize;

            for position in &self.validated_positions {
                if position.route_id.as_deref() != Some(key.route_id.as_str())
                    || position.agency_id != key.agency_id
                    || position.timestamp.duration_trunc(bucket)? != key.bucket
                {
                    continue;
                }
                observations += 1;
                vehicles.insert(&position.vehicle_id);
                if let Some(speed) = position.speed {
                    speeds_kmh.push(speed * 3.6);
                }
                congestion_total += u64::from(
                    position.congestion_level.map(|c| c.score()).unwrap_or(0),
                );
            }

            let avg_speed_kmh = if speeds_kmh.is_empty() {
                None
            } else {
                Some(speeds_kmh.iter().sum::<f64>() / speeds_kmh.len() as f64)
            };
            let max_speed_kmh = speeds_kmh.iter().copied().fold(None, |max, s| match max {
                Some(m) if m >= s => Some(m),
                _ => Some(s),
            });

            self.hourly_metrics.insert(
                key.clone(),
                HourlyVehicleMetrics {
                    hour_timestamp: key.bucket,
                    agency_id: key.agency_id.clone(),
                    route_id: key.route_id.clone(),
                    total_vehicles: vehicles.len(),
                    avg_speed_kmh,
                    max_speed_kmh,
                    avg_congestion_score: if observations == 0 {
                        0.0
                    } else {
                        congestion_total as f64 / observations as f64
                    },
                    total_observations: observations,
                },
            );
        }

        self.metrics_cursor = self.validated_positions.len();
        info!(buckets = touched.len(), "Aggregated vehicle metrics");
        Ok(touched.len())
    }

    /// Recomputes daily delay rollups for every (date, agency, route)
    /// touched by validated trip updates since the last pass. Replace
    /// semantics, same idempotency contract as [`Self::aggregate_window`].
    ///
    /// Only updates carrying a route id and at least one delay participate;
    /// a stop counts as on time when |delay| <= 300s.
    pub fn aggregate_route_performance(&mut self) -> usize {
        let mut touched: HashSet<RouteDayKey> = HashSet::new();
        for update in &self.validated_trip_updates[self.performance_cursor..] {
            let (Some(route_id), Some(_)) = (&update.route_id, update.effective_delay()) else {
                continue;
            };
            touched.insert(RouteDayKey {
                date: update.timestamp.date_naive(),
                agency_id: update.agency_id.clone(),
                route_id: route_id.clone(),
            });
        }

        for key in &touched {
            let mut delays: Vec<i32> = Vec::new();
            let mut trips: HashSet<&str> = HashSet::new();
            for update in &self.validated_trip_updates {
                let (Some(route_id), Some(delay)) = (&update.route_id, update.effective_delay())
                else {
                    continue;
                };
                if route_id != &key.route_id
                    || update.agency_id != key.agency_id
                    || update.timestamp.date_naive() != key.date
                {
                    continue;
                }
                delays.push(delay);
                trips.insert(&update.trip_id);
            }
            if delays.is_empty() {
                continue;
            }

            let on_time = delays
                .iter()
                .filter(|d| d.abs() <= ON_TIME_THRESHOLD_SECS)
                .count();
            self.route_performance.insert(
                key.clone(),
                RoutePerformance {
                    date: key.date,
                    agency_id: key.agency_id.clone(),
                    route_id: key.route_id.clone(),
                    avg_delay_seconds: delays.iter().map(|d| f64::from(*d)).sum::<f64>()
                        / delays.len() as f64,
                    max_delay_seconds: delays.iter().copied().max().unwrap_or(0),
                    min_delay_seconds: delays.iter().copied().min().unwrap_or(0),
                    on_time_percentage: 100.0 * on_time as f64 / delays.len() as f64,
                    total_trips: trips.len(),
                },
            );
        }

        self.performance_cursor = self.validated_trip_updates.len();
        info!(buckets = touched.len(), "Aggregated route performance");
        touched.len()
    }

    /// Read-only counts per layer plus the derived quality rate. Not part
    /// of the write path.
    pub fn metrics(&self) -> LayerMetrics {
        let bronze_positions = self.raw_positions.len();
        let silver_positions = self.validated_positions.len();
        LayerMetrics {
            bronze_vehicle_positions: bronze_positions,
            bronze_trip_updates: self.raw_trip_updates.len(),
            bronze_weather_observations: self.raw_weather.len(),
            silver_vehicle_positions: silver_positions,
            silver_trip_updates: self.validated_trip_updates.len(),
            gold_hourly_metrics: self.hourly_metrics.len(),
            gold_route_performance: self.route_performance.len(),
            data_quality_rate: if bronze_positions == 0 {
                0.0
            } else {
                silver_positions as f64 / bronze_positions as f64
            },
        }
    }

    pub fn validated_positions(&self) -> &[VehiclePosition] {
        &self.validated_positions
    }

    pub fn validated_trip_updates(&self) -> &[TripUpdate] {
        &self.validated_trip_updates
    }

    /// Gold rows sorted by (bucket, agency, route) for stable reporting.
    pub fn hourly_metrics(&self) -> Vec<&HourlyVehicleMetrics> {
        let mut rows: Vec<&HourlyVehicleMetrics> = self.hourly_metrics.values().collect();
        rows.sort_by(|a, b| {
            (a.hour_timestamp, &a.agency_id, &a.route_id)
                .cmp(&(b.hour_timestamp, &b.agency_id, &b.route_id))
        });
        rows
    }

    pub fn route_performance(&self) -> Vec<&RoutePerformance> {
        let mut rows: Vec<&RoutePerformance> = self.route_performance.values().collect();
        rows.sort_by(|a, b| {
            (a.date, &a.agency_id, &a.route_id).cmp(&(b.date, &b.agency_id, &b.route_id))
        });
        rows
    }
}

fn alert_id(now: DateTime<Utc>, seq: u64) -> String {
    format!("dqa_{}_{:04}", now.format("%Y%m%d_%H%M%S"), seq)
}
