//! Error types for the chat server
//!
//! Defines application-level errors using thiserror.
//!
//! Routing misses (unknown room, unknown client, private-room refusal) are
//! deliberately wire-silent: dispatch surfaces them as typed errors, the
//! read pump logs them, and the client sees nothing.

use thiserror::Error;

use crate::types::{ClientId, RoomId};

/// Application-level errors
///
/// Covers fatal transport errors (connection termination) and
/// routing errors (logged, the offending frame is dropped).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - the hub loop is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// A transport write missed its deadline (fatal)
    #[error("Write deadline exceeded")]
    WriteDeadline,

    /// The upgrade request carried no usable `name` query parameter
    #[error("Query parameter 'name' is missing")]
    MissingName,

    /// The frame needs a target room/client reference but carried none
    #[error("Message carries no target")]
    MissingTarget,

    /// The frame carried an identifier that is not a UUID
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// No room in the directory with the given id
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// No client in the registry with the given id
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    /// A non-member tried to enter a private room by name
    #[error("Room '{0}' is private")]
    PrivateRoom(String),
}
