//! Wire messages exchanged between two syncers.
//!
//! Every frame is a JSON array `["<type>", body]`; messages without a body
//! are sent as `["<type>"]`.

use crate::change::{ChangeKind, ChangeRecord};
use crate::error::SyncError;
use crate::world::WorldMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WORLD_CHANGE: &str = "worldChange";
pub const REQUEST_REFRESH: &str = "requestRefresh";
pub const REQUEST_METADATA: &str = "requestMetadata";
pub const METADATA_CHANGE: &str = "metadataChange";
pub const REQUEST_LESS_DATA: &str = "requestLessData";
pub const REQUEST_MORE_DATA: &str = "requestMoreData";

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// A batch of changes stamped with the sender's clock (ms since epoch)
    WorldChange {
        changes: Vec<ChangeRecord>,
        timestamp: u64,
    },
    RequestRefresh,
    RequestMetadata,
    MetadataChange(WorldMetadata),
    /// The receiver is seeing too much jitter; send less often
    RequestLessData,
    /// The link has been quiet for a while; send more often
    RequestMoreData,
}

#[derive(Serialize, Deserialize)]
struct WorldChangeBody {
    changes: Vec<Value>,
    timestamp: u64,
}

impl WireMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            WireMessage::WorldChange { .. } => WORLD_CHANGE,
            WireMessage::RequestRefresh => REQUEST_REFRESH,
            WireMessage::RequestMetadata => REQUEST_METADATA,
            WireMessage::MetadataChange(_) => METADATA_CHANGE,
            WireMessage::RequestLessData => REQUEST_LESS_DATA,
            WireMessage::RequestMoreData => REQUEST_MORE_DATA,
        }
    }

    pub fn encode(&self) -> Result<String, SyncError> {
        let tag = Value::String(self.tag().to_string());
        let frame = match self {
            WireMessage::WorldChange { changes, timestamp } => {
                let changes = changes
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let body = serde_json::to_value(WorldChangeBody {
                    changes,
                    timestamp: *timestamp,
                })?;
                vec![tag, body]
            }
            WireMessage::MetadataChange(metadata) => vec![tag, serde_json::to_value(metadata)?],
            _ => vec![tag],
        };
        Ok(Value::Array(frame).to_string())
    }

    pub fn decode(payload: &str) -> Result<Self, SyncError> {
        let frame: Vec<Value> = serde_json::from_str(payload)?;
        let mut parts = frame.into_iter();

        let tag = match parts.next() {
            Some(Value::String(tag)) => tag,
            _ => {
                return Err(SyncError::MalformedMessage(
                    "frame must start with a type tag".to_string(),
                ))
            }
        };
        let body = parts.next().unwrap_or(Value::Null);

        match tag.as_str() {
            WORLD_CHANGE => {
                let body: WorldChangeBody = serde_json::from_value(body)?;
                let changes = body
                    .changes
                    .into_iter()
                    .map(decode_record)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(WireMessage::WorldChange {
                    changes,
                    timestamp: body.timestamp,
                })
            }
            REQUEST_REFRESH => Ok(WireMessage::RequestRefresh),
            REQUEST_METADATA => Ok(WireMessage::RequestMetadata),
            METADATA_CHANGE => Ok(WireMessage::MetadataChange(serde_json::from_value(body)?)),
            REQUEST_LESS_DATA => Ok(WireMessage::RequestLessData),
            REQUEST_MORE_DATA => Ok(WireMessage::RequestMoreData),
            _ => Err(SyncError::UnknownMessageType { tag }),
        }
    }
}

/// Checks the record's `type` before handing it to serde so an unknown kind
/// is reported as such rather than as a generic parse failure
fn decode_record(record: Value) -> Result<ChangeRecord, SyncError> {
    let kind = record
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if ChangeKind::parse(kind).is_none() {
        return Err(SyncError::UnknownChangeType {
            kind: kind.to_string(),
        });
    }
    Ok(serde_json::from_value(record)?)
}
