//! Raw tcp connections to a node, used by subscriptions and heartbeats.
//!
//! Before any payload is exchanged, client and server agree on a protocol version for the
//! operation the connection serves. See [`negotiate_protocol_version`].
mod tcp_connection_header;
mod tcp_negotiation;

pub use tcp_connection_header::*;
pub use tcp_negotiation::*;
