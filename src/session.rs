//! The capability surface the connection requires of its host.
//!
//! The server connection depends on a narrow slice of the wider
//! session: configuration, alert delivery, transfer lookup, and the two
//! lifecycle notifications. Expressing that slice as a trait keeps the
//! connection testable against a fake session.

use std::sync::Arc;

use thiserror::Error;

use crate::alert::{Alert, AlertKind};
use crate::hash::Md4Hash;
use crate::server::Endpoint;
use crate::settings::SessionSettings;

/// Errors raised at the session boundary when a request targets a
/// transfer that cannot accept it.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A transfer with this hash already exists.
    #[error("duplicate transfer")]
    DuplicateTransfer,

    /// The transfer has already completed.
    #[error("transfer finished")]
    TransferFinished,

    /// The transfer is shutting down.
    #[error("stopping transfer")]
    StoppingTransfer,
}

/// A live handle to a transfer managed by the session.
///
/// Handles are handed out by [`SessionFacade::find_transfer`]; a dead
/// transfer simply yields no handle.
pub trait TransferHandle: Send + Sync {
    /// Delivers the source endpoints the server returned for this
    /// transfer's hash.
    fn set_sources(&self, sources: Vec<Endpoint>);
}

/// What the server connection needs from the hosting session.
///
/// All methods are invoked from the connection's tasks, so
/// implementations must be shareable across them. The connection spawns
/// onto the runtime it is started from; the facade does not hand out an
/// executor.
pub trait SessionFacade: Send + Sync + 'static {
    /// Returns a snapshot of the current configuration.
    fn settings(&self) -> SessionSettings;

    /// Returns `true` if alerts of this kind should be posted.
    fn should_post(&self, kind: AlertKind) -> bool;

    /// Delivers an alert. Only called when [`should_post`] allowed the
    /// alert's kind.
    ///
    /// [`should_post`]: SessionFacade::should_post
    fn post_alert(&self, alert: Alert);

    /// Looks up the transfer for a hash; `None` means the transfer is
    /// gone and frames addressed to it are dropped.
    fn find_transfer(&self, hash: &Md4Hash) -> Option<Arc<dyn TransferHandle>>;

    /// The connection reached `Ready`: it has both a client id and the
    /// server's counters. Fired at most once per connection.
    fn server_ready(&self, client_id: u32, files: u32, users: u32, tcp_flags: u32, aux_port: u32);

    /// The connection closed. Fired at most once per connection.
    fn server_stopped(&self);
}
