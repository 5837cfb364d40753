//! Observable events surfaced from the server connection.
//!
//! The connection never talks to a UI; everything a user could care
//! about is posted as an [`Alert`] through the session facade, and only
//! when the session's `should_post` predicate for the alert's
//! [`AlertKind`] allows it.

use crate::server::{ServerError, SharedFileEntry};

/// An event posted from the server connection to the hosting session.
#[derive(Debug)]
pub enum Alert {
    /// The login handshake completed: both an id-change and a server
    /// status have been observed.
    ServerConnectionInitialized {
        client_id: u32,
        files: u32,
        users: u32,
    },
    /// The connection terminated with the originating error.
    ServerConnectionFailed { error: ServerError },
    /// Free-text message from the server operator.
    ServerMessage { message: String },
    /// Updated user and file counts.
    ServerStatus { users: u32, files: u32 },
    /// Results for an outstanding search request.
    SearchResult { results: Vec<SharedFileEntry> },
}

/// The kind of an [`Alert`], used for `should_post` filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    ServerConnectionInitialized,
    ServerConnectionFailed,
    ServerMessage,
    ServerStatus,
    SearchResult,
}

impl Alert {
    /// Returns the kind of this alert.
    pub fn kind(&self) -> AlertKind {
        match self {
            Alert::ServerConnectionInitialized { .. } => AlertKind::ServerConnectionInitialized,
            Alert::ServerConnectionFailed { .. } => AlertKind::ServerConnectionFailed,
            Alert::ServerMessage { .. } => AlertKind::ServerMessage,
            Alert::ServerStatus { .. } => AlertKind::ServerStatus,
            Alert::SearchResult { .. } => AlertKind::SearchResult,
        }
    }
}
