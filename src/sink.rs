//! Event sink collaborator seam.
//!
//! Validated records and quality alerts leave the pipeline through this
//! trait, keyed by vehicle/trip id for partition affinity. Delivery
//! guarantees are the sink's responsibility, not the core's.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{QualityAlert, TripUpdate, VehiclePosition};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_positions(&self, positions: &[VehiclePosition]) -> Result<()>;
    async fn publish_trip_updates(&self, updates: &[TripUpdate]) -> Result<()>;
    async fn publish_alerts(&self, alerts: &[QualityAlert]) -> Result<()>;
}

/// Logs each record as a JSON line. Stands in for the message broker in
/// local runs and tests.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish_positions(&self, positions: &[VehiclePosition]) -> Result<()> {
        for position in positions {
            info!(
                key = position.partition_key(),
                payload = serde_json::to_string(position)?,
                "vehicle position"
            );
        }
        Ok(())
    }

    async fn publish_trip_updates(&self, updates: &[TripUpdate]) -> Result<()> {
        for update in updates {
            info!(
                key = update.partition_key(),
                payload = serde_json::to_string(update)?,
                "trip update"
            );
        }
        Ok(())
    }

    async fn publish_alerts(&self, alerts: &[QualityAlert]) -> Result<()> {
        for alert in alerts {
            warn!(
                alert_id = %alert.alert_id,
                alert_type = ?alert.alert_type,
                severity = ?alert.severity,
                agency_id = %alert.agency_id,
                entity_id = alert.entity_id.as_deref().unwrap_or("unknown"),
                message = %alert.error_message,
                "quality alert"
            );
        }
        Ok(())
    }
}
