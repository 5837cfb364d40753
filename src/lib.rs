//! red2k - an eDonkey2000 client library
//!
//! This library implements the server-connection core of the ed2k
//! protocol: the binary tag-based wire format and a long-lived TCP
//! session to an index server, surfaced to a hosting session through a
//! narrow capability trait.
//!
//! # Modules
//!
//! - [`hash`] - 16-byte MD4 identifiers with textual round-trip
//! - [`tag`] - Typed name-value pairs and tag lists
//! - [`codec`] - Little-endian primitive I/O and zlib inflation
//! - [`server`] - Frames, message records, and the server connection
//! - [`session`] - The capability surface required of the host
//! - [`alert`] - Events surfaced from the connection
//! - [`settings`] - Session configuration snapshot
//! - [`constants`] - Protocol constants and tuning parameters

pub mod alert;
pub mod codec;
pub mod constants;
pub mod hash;
pub mod server;
pub mod session;
pub mod settings;
pub mod tag;

pub use alert::{Alert, AlertKind};
pub use codec::CodecError;
pub use hash::{HashError, Md4Hash};
pub use server::{
    ConnectionState, Endpoint, FrameHeader, IdChange, LoginRequest, Message, Opcode,
    ServerConnection, ServerError, ServerIdent, SharedFileEntry,
};
pub use session::{SessionFacade, TransferError, TransferHandle};
pub use settings::SessionSettings;
pub use tag::{Tag, TagError, TagList, TagName, TagValue};
