//! Protobuf parser for GTFS Realtime feeds.

use prost::Message;
use thiserror::Error;

use crate::gtfs_rt::FeedMessage;

/// Malformed binary input. Fatal for the poll cycle that produced it; the
/// caller must not attempt partial recovery.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid GTFS-RT protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are not valid protobuf for a
/// `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    Ok(FeedMessage::decode(bytes)?)
}
