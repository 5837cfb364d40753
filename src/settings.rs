//! Session configuration snapshot.

use std::time::Duration;

use crate::constants::{
    DEFAULT_KEEP_ALIVE_TIMEOUT, DEFAULT_PEER_CONNECT_TIMEOUT, DEFAULT_SERVER_TIMEOUT,
    MAX_FRAME_BYTES, SERVER_UDP_PORT_OFFSET,
};
use crate::hash::Md4Hash;

/// A read-only snapshot of the session options the connection consumes.
///
/// The hosting session hands one of these out through
/// [`SessionFacade::settings`](crate::session::SessionFacade::settings);
/// the connection takes a snapshot when it starts and never observes
/// later changes.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// DNS name of the index server.
    pub server_hostname: String,
    /// TCP port of the index server.
    pub server_port: u16,
    /// Persistent 16-byte client identity.
    pub client_hash: Md4Hash,
    /// Human-readable nickname advertised at login.
    pub client_name: String,
    /// Port advertised to the server for incoming peer connections.
    pub listen_port: u16,
    /// Deadline for resolve + TCP connect.
    pub peer_connect_timeout: Duration,
    /// Per-operation deadline once connected.
    pub server_timeout: Duration,
    /// Period of the empty offer-files keepalive.
    pub server_keep_alive_timeout: Duration,
    /// Cap for the decompressed size of a packed frame.
    pub max_inflated_frame_bytes: u32,
}

impl SessionSettings {
    /// The server's UDP port, fixed at TCP port + 3 by convention.
    ///
    /// The UDP channel for global server state is an extension point;
    /// this crate does not open it.
    pub fn server_udp_port(&self) -> u16 {
        self.server_port.wrapping_add(SERVER_UDP_PORT_OFFSET)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            server_hostname: String::new(),
            server_port: 4661,
            client_hash: Md4Hash::EMPTY,
            client_name: "red2k".to_string(),
            listen_port: 4662,
            peer_connect_timeout: DEFAULT_PEER_CONNECT_TIMEOUT,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            server_keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            max_inflated_frame_bytes: MAX_FRAME_BYTES as u32,
        }
    }
}
