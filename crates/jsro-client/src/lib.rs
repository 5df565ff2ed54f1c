//! JSRO client: remote objects over HTTP with long-poll event delivery.
//!
//! Building blocks:
//! - [`establish`] / [`Connection`] - session lifecycle and the send pipeline
//! - [`RemoteObject`] - proxy for one server-side instance
//! - an internal long-poll loop with watchdog, deduplication, and ordering
//!   guarantees
//!
//! The HTTP seam is [`jsro_core::Transport`]; the `jsro-http` crate ships a
//! reqwest implementation for applications without bespoke transports.

pub mod connection;
mod poller;
pub mod proxy;

pub use connection::{ConnectOptions, Connection, ConnectionEvent, establish};
pub use proxy::RemoteObject;

pub use jsro_core::{Error, ProtocolError, StateError, TransportError};
