//! Protocol constants and tuning parameters.
//!
//! This module contains the wire-level constants of the eDonkey2000
//! client-server protocol along with the caps and default periods used
//! throughout the crate. Wire values match the historical eDonkey/eMule
//! servers; tuning values match common client defaults.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Protocol version advertised in the login request (CT_VERSION).
pub const EDONKEY_VERSION: u32 = 0x3C;

/// eMule-compatible client version word advertised at login
/// (CT_EMULE_VERSION): major 3, minor 2, update 3, build 1.
pub const EMULE_CLIENT_VERSION: u32 = (3 << 24) | (2 << 17) | (3 << 10) | (1 << 7);

// ============================================================================
// Capability flags (CT_SERVER_FLAGS)
// ============================================================================

/// Client understands zlib-packed frames.
pub const CAPABLE_ZLIB: u32 = 0x0001;

/// Client sends its IP inside the login request.
pub const CAPABLE_IP_IN_LOGIN: u32 = 0x0002;

/// Client accepts an auxiliary port in the id-change reply.
pub const CAPABLE_AUXPORT: u32 = 0x0004;

/// Client understands the new-style (typed width) tags.
pub const CAPABLE_NEWTAGS: u32 = 0x0008;

/// Client strings are UTF-8.
pub const CAPABLE_UNICODE: u32 = 0x0010;

/// Client supports files larger than 4 GiB.
pub const CAPABLE_LARGEFILES: u32 = 0x0100;

/// Capability word sent in the login request.
pub const LOGIN_CAPABILITIES: u32 =
    CAPABLE_AUXPORT | CAPABLE_NEWTAGS | CAPABLE_UNICODE | CAPABLE_LARGEFILES;

// ============================================================================
// Login tag ids
// ============================================================================

/// Client nickname.
pub const CT_NAME: u8 = 0x01;

/// Protocol version.
pub const CT_VERSION: u8 = 0x11;

/// Capability flags.
pub const CT_SERVER_FLAGS: u8 = 0x20;

/// eMule-compatible client version.
pub const CT_EMULE_VERSION: u8 = 0xFB;

// ============================================================================
// Identifiers
// ============================================================================

/// Client ids below this boundary are "low ids": the server could not
/// reach the client directly and will relay callbacks instead.
pub const LOW_ID_BOUNDARY: u32 = 0x0100_0000;

/// Offset of the server's UDP port relative to its TCP port.
pub const SERVER_UDP_PORT_OFFSET: u16 = 3;

// ============================================================================
// Decode caps
// ============================================================================

/// Maximum number of tags accepted in a single tag list.
pub const MAX_TAG_LIST_TAGS: u32 = 4096;

/// Maximum accepted length of a blob tag payload.
pub const MAX_BLOB_TAG_BYTES: usize = 1 << 20;

/// Maximum accepted payload of a single frame, plain or inflated.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// Connection tuning
// ============================================================================

/// Soft cap on the outbound frame queue.
pub const MAX_QUEUED_FRAMES: usize = 1024;

/// Default deadline for resolve + TCP connect.
pub const DEFAULT_PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-operation deadline once connected.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period of the empty offer-files keepalive.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(30);
