//! Error taxonomy shared across the client.

use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;

/// Malformed or inconsistent server behavior. Connection-fatal.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("server response carries no connection id")]
    MissingConnectionId,
    #[error("instance id {0:?} is already registered")]
    DuplicateInstance(String),
    #[error("malformed server payload: {0}")]
    MalformedPayload(String),
}

/// Operation invalid for the current lifecycle state. Raised synchronously
/// to the caller, never retried.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("connection is already disconnected")]
    Disconnected,
    #[error("remote object {0:?} is already destroyed")]
    Destroyed(String),
    #[error("remote object {instance_id:?} has no method {method:?}")]
    UnknownMethod { instance_id: String, method: String },
}

/// Umbrella error for every operation on the client.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Error payload the server returned for one specific request. Does not
    /// affect connection state.
    #[error("server rejected the request: {0}")]
    Server(Value),
    /// The connection went away before a result arrived.
    #[error("connection lost before a result arrived")]
    ConnectionLost,
}
