//! The ed2k server connection.
//!
//! An ed2k client holds one long-lived TCP session to an index server:
//! it logs in with its hash and capabilities, receives an assigned
//! client id and the server's counters, and from then on announces
//! shared files, requests sources, and runs searches over the same
//! framed channel. This module implements that session end to end:
//! the six-octet frame header, the per-opcode message records, and the
//! connection state machine with its write queue, read loop, and
//! timers.
//!
//! # Overview
//!
//! A connection is created against a [`SessionFacade`] implementation
//! and driven entirely by [`ServerConnection::start`]:
//!
//! 1. the configured hostname is resolved and connected under the
//!    connect deadline,
//! 2. the login request is queued and the read loop takes over,
//! 3. once both an id-change and a server status have arrived the
//!    session is `Ready` and the keepalive starts,
//! 4. inbound frames are dispatched into alerts and transfer callbacks
//!    until the connection is closed.
//!
//! [`SessionFacade`]: crate::session::SessionFacade

mod connection;
mod error;
mod frame;
mod message;

pub use connection::{ConnectionState, ServerConnection};
pub use error::ServerError;
pub use frame::{FrameHeader, HEADER_LEN, PROTO_EDONKEY, PROTO_EMULE, PROTO_PACKED};
pub use message::{
    Endpoint, IdChange, LoginRequest, Message, Opcode, ServerIdent, SharedFileEntry,
};

#[cfg(test)]
mod tests;
