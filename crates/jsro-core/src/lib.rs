//! Core building blocks for the JSRO remote-object client.
//!
//! This crate provides the protocol-independent pieces:
//! - `protocol` - wire types for the batch and long-poll bodies
//! - `Transport` - the seam to the hosting HTTP environment
//! - `EventRegistry` - name-keyed observer registry with ordered fan-out
//! - `RequestQueue` - correlation ids and result routing

pub mod error;
pub mod events;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use error::{Error, ProtocolError, StateError};
pub use events::{EventRegistry, ListenerId};
pub use queue::RequestQueue;
pub use transport::{Method, Transport, TransportError};
