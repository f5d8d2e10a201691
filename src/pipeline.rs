//! Poll-cycle orchestration: fetch → decode → append raw → promote →
//! publish → aggregate.
//!
//! A decode failure is fatal for its cycle: nothing is appended and the
//! error bubbles to the caller. Record-level validation failures never
//! raise; they surface as quality alerts through the event sink.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::decoder::FeedDecoder;
use crate::fetch::FeedSource;
use crate::models::WeatherObservation;
use crate::sink::EventSink;
use crate::store::LayeredStore;

/// Running counters over the lifetime of a pipeline.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PollStats {
    pub total_polls: usize,
    pub successful_polls: usize,
    pub failed_polls: usize,
    pub total_entities: usize,
    pub decoded_positions: usize,
    pub decoded_trip_updates: usize,
    pub promoted_records: usize,
    pub rejected_records: usize,
}

impl PollStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_polls == 0 {
            0.0
        } else {
            self.successful_polls as f64 / self.total_polls as f64
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub appended_positions: usize,
    pub appended_trip_updates: usize,
    pub skipped_entities: usize,
    pub promoted_positions: usize,
    pub promoted_trip_updates: usize,
    pub rejected: usize,
    pub dropped_stale: usize,
    pub duplicates: usize,
    pub metric_buckets: usize,
    pub performance_buckets: usize,
}

/// Wires the decoder, quality gate (inside the store), event sink, and
/// layered store together for one feed.
pub struct FeedPipeline<F: FeedSource, S: EventSink> {
    source: F,
    sink: S,
    decoder: FeedDecoder,
    store: LayeredStore,
    bucket: Duration,
    stats: PollStats,
}

impl<F: FeedSource, S: EventSink> FeedPipeline<F, S> {
    pub fn new(source: F, sink: S, decoder: FeedDecoder, store: LayeredStore) -> Self {
        FeedPipeline {
            source,
            sink,
            decoder,
            store,
            bucket: Duration::hours(1),
            stats: PollStats::default(),
        }
    }

    /// Overrides the default one-hour aggregation bucket.
    pub fn with_bucket(mut self, bucket: Duration) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn store(&self) -> &LayeredStore {
        &self.store
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Runs one full cycle over the feed source.
    #[tracing::instrument(skip(self))]
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        self.stats.total_polls += 1;

        let raw = match self.source.fetch().await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.failed_polls += 1;
                return Err(e.context("feed fetch failed"));
            }
        };

        let decoded = match self.decoder.decode(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.failed_polls += 1;
                return Err(anyhow::Error::new(e).context("poll cycle aborted, nothing appended"));
            }
        };

        let now = Utc::now();
        let mut outcome = PollOutcome {
            skipped_entities: decoded.skipped_entities,
            ..PollOutcome::default()
        };

        outcome.appended_positions = self.store.append_raw_positions(&decoded.positions, now);
        outcome.appended_trip_updates =
            self.store.append_raw_trip_updates(&decoded.trip_updates, now);

        let silver_positions_before = self.store.validated_positions().len();
        let silver_updates_before = self.store.validated_trip_updates().len();

        let promotion = self.store.promote(now);
        outcome.promoted_positions = promotion.promoted_positions;
        outcome.promoted_trip_updates = promotion.promoted_trip_updates;
        outcome.rejected = promotion.rejected;
        outcome.dropped_stale = promotion.dropped_stale;
        outcome.duplicates = promotion.duplicates;

        self.sink
            .publish_positions(&self.store.validated_positions()[silver_positions_before..])
            .await?;
        self.sink
            .publish_trip_updates(&self.store.validated_trip_updates()[silver_updates_before..])
            .await?;
        self.sink.publish_alerts(&promotion.alerts).await?;

        outcome.metric_buckets = self.store.aggregate_window(self.bucket)?;
        outcome.performance_buckets = self.store.aggregate_route_performance();

        self.stats.successful_polls += 1;
        self.stats.total_entities += decoded.positions.len()
            + decoded.trip_updates.len()
            + decoded.skipped_entities;
        self.stats.decoded_positions += decoded.positions.len();
        self.stats.decoded_trip_updates += decoded.trip_updates.len();
        self.stats.promoted_records +=
            outcome.promoted_positions + outcome.promoted_trip_updates;
        self.stats.rejected_records += outcome.rejected;

        info!(
            positions = outcome.appended_positions,
            trip_updates = outcome.appended_trip_updates,
            promoted = outcome.promoted_positions + outcome.promoted_trip_updates,
            rejected = outcome.rejected,
            "Poll cycle complete"
        );

        Ok(outcome)
    }

    /// Feeds one weather observation from the enrichment collaborator into
    /// the raw layer, emitting an alert if the gate rejects it.
    pub async fn ingest_weather(&mut self, observation: WeatherObservation) -> Result<bool> {
        let now = Utc::now();
        match self.store.ingest_weather(observation, now) {
            None => Ok(true),
            Some(alert) => {
                self.sink.publish_alerts(std::slice::from_ref(&alert)).await?;
                Ok(false)
            }
        }
    }
}
