//! Error types for the replication engine.

use thiserror::Error;

/// Errors raised while mutating a world or speaking the sync protocol.
///
/// Protocol errors (`UnknownMessageType`, `UnknownChangeType`,
/// `MalformedMessage`) mean the two peers disagree about the wire contract and
/// are returned to whoever delivered the message. Everything else is raised by
/// local operations on a [`GameWorld`](crate::GameWorld).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A GameObject was constructed with an empty owner
    #[error("GameObject {id} created without owner")]
    MissingOwner { id: String },

    /// A queued update targeted an object the world does not hold
    #[error("Could not update {id} as it did not exist")]
    UnknownObject { id: String },

    /// Inbound message carried a type tag this peer does not speak
    #[error("Can't handle message type: {tag}")]
    UnknownMessageType { tag: String },

    /// Inbound change record carried an unknown `type`
    #[error("Can't handle update type: {kind}")]
    UnknownChangeType { kind: String },

    /// A binding has no handler for the object's `type` property
    #[error("Bad GameObject type: {kind}")]
    UnknownObjectType { kind: String },

    /// A binding has no renderer registered for a rendered property
    #[error("No {property} renderer registered for type {kind}")]
    UnknownRenderer { property: String, kind: String },

    /// A binding was asked to update an object it never linked
    #[error("Binding {binding} has no linked object for {id}")]
    UnlinkedObject { binding: String, id: String },

    /// Payload could not be parsed into a wire message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The peer end of a transport has gone away
    #[error("Transport closed")]
    TransportClosed,

    /// Operation needs a transport but the syncer has none
    #[error("WorldSyncer is not connected")]
    NotConnected,
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedMessage(err.to_string())
    }
}
