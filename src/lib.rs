//! Public API for the `recordwire` library.
//!
//! This crate provides a minimal client/server messaging utility: clients
//! submit short text records over persistent TCP connections and the
//! server echoes an acknowledgement back. The wire protocol is a 2-byte
//! big-endian length prefix followed by the UTF-8 payload; the same codec
//! and reassembler serve both roles.

pub mod client;
pub mod codec;
pub mod connection;
pub mod reassembly;
pub mod record;
pub mod server;
pub mod session;

pub use client::{ClientConfig, ClientError, RecordClient};
pub use codec::{CorruptFrame, EncodeError, MAX_RECORD_BYTES, RecordCodec};
pub use connection::{RecordHandler, active_connection_count};
pub use reassembly::Reassembler;
pub use record::{Record, RecordParseError};
pub use server::{RecordServer, ServerConfig, ServerError};
pub use session::{ConnectionId, ConnectionRegistry, ConnectionState, DrainOutcome};
