use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::ServerError;
use crate::codec;
use crate::constants::{
    CT_EMULE_VERSION, CT_NAME, CT_SERVER_FLAGS, CT_VERSION, EDONKEY_VERSION, EMULE_CLIENT_VERSION,
    LOGIN_CAPABILITIES,
};
use crate::hash::Md4Hash;
use crate::settings::SessionSettings;
use crate::tag::{Tag, TagList};

/// Opcodes of the client-server TCP channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Initial handshake with hash, id, port, and the login tag list.
    LoginRequest = 0x01,
    /// Server refused the previous request.
    Reject = 0x05,
    /// Ask for the server's list of known servers.
    GetServerList = 0x14,
    /// Announce shared files; the empty announce is the keepalive.
    OfferFiles = 0x15,
    /// Opaque pre-encoded search tree.
    SearchRequest = 0x16,
    /// Server is closing the session.
    Disconnect = 0x18,
    /// Ask for sources of a file.
    GetSources = 0x19,
    /// Ask the server to relay a connect-back to a low-id client.
    CallbackRequest = 0x1C,
    /// List of other known servers.
    ServerList = 0x32,
    /// Results for a search request.
    SearchResult = 0x33,
    /// User and file counts.
    ServerStatus = 0x34,
    /// A peer asked the server to have us connect back.
    CallbackRequested = 0x35,
    /// Free-text operator message.
    ServerMessage = 0x38,
    /// Our assigned client id.
    IdChange = 0x40,
    /// The server's own identity.
    ServerIdent = 0x41,
    /// Sources for a previously requested file.
    FoundSources = 0x42,
    /// User list reply.
    UsersList = 0x43,
}

impl Opcode {
    /// Maps a wire opcode; unknown values are not an error, the frame
    /// is logged and skipped.
    pub fn from_u8(value: u8) -> Option<Opcode> {
        match value {
            0x01 => Some(Opcode::LoginRequest),
            0x05 => Some(Opcode::Reject),
            0x14 => Some(Opcode::GetServerList),
            0x15 => Some(Opcode::OfferFiles),
            0x16 => Some(Opcode::SearchRequest),
            0x18 => Some(Opcode::Disconnect),
            0x19 => Some(Opcode::GetSources),
            0x1C => Some(Opcode::CallbackRequest),
            0x32 => Some(Opcode::ServerList),
            0x33 => Some(Opcode::SearchResult),
            0x34 => Some(Opcode::ServerStatus),
            0x35 => Some(Opcode::CallbackRequested),
            0x38 => Some(Opcode::ServerMessage),
            0x40 => Some(Opcode::IdChange),
            0x41 => Some(Opcode::ServerIdent),
            0x42 => Some(Opcode::FoundSources),
            0x43 => Some(Opcode::UsersList),
            _ => None,
        }
    }
}

/// An IPv4 endpoint as carried on the wire: four raw octets then a
/// little-endian port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn to_socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.ip.octets());
        buf.put_u16_le(self.port);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, ServerError> {
        let octets: [u8; 4] = codec::get_array(buf)?;
        let port = codec::get_u16(buf)?;
        Ok(Self {
            ip: Ipv4Addr::from(octets),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A shared file descriptor: the unit of offer-files announces and
/// search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFileEntry {
    pub hash: Md4Hash,
    pub endpoint: Endpoint,
    pub tags: TagList,
}

impl SharedFileEntry {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.hash.as_bytes());
        self.endpoint.encode(buf);
        self.tags.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, ServerError> {
        let hash = Md4Hash::from_bytes(codec::get_array(buf)?);
        let endpoint = Endpoint::decode(buf)?;
        let tags = TagList::decode(buf)?;
        Ok(Self {
            hash,
            endpoint,
            tags,
        })
    }
}

/// The login handshake record.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
    pub hash: Md4Hash,
    pub client_id: u32,
    pub port: u16,
    pub tags: TagList,
}

impl LoginRequest {
    /// Builds the handshake the way servers expect it: zero id, the
    /// advertised listen port, and the name/version/capability tags.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let mut tags = TagList::new();
        tags.push(Tag::new(CT_NAME, settings.client_name.as_str()));
        tags.push(Tag::new(CT_VERSION, EDONKEY_VERSION));
        tags.push(Tag::new(CT_SERVER_FLAGS, LOGIN_CAPABILITIES));
        tags.push(Tag::new(CT_EMULE_VERSION, EMULE_CLIENT_VERSION));

        Self {
            hash: settings.client_hash,
            client_id: 0,
            port: settings.listen_port,
            tags,
        }
    }
}

/// The id-change record. `tcp_flags` and `aux_port` are optional on the
/// wire; absent fields decode as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdChange {
    pub client_id: u32,
    pub tcp_flags: u32,
    pub aux_port: u32,
}

/// The server's self-description.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIdent {
    pub hash: Md4Hash,
    pub endpoint: Endpoint,
    pub tags: TagList,
}

/// A decoded client-server message.
///
/// Recognized messages round-trip through `encode`/`decode`; unknown
/// opcodes round-trip their raw payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    LoginRequest(LoginRequest),
    ServerMessage { message: String },
    ServerList { servers: Vec<Endpoint> },
    ServerStatus { users: u32, files: u32 },
    IdChange(IdChange),
    ServerIdent(ServerIdent),
    OfferFiles { files: Vec<SharedFileEntry> },
    GetServerList,
    GetSources { hash: Md4Hash, size: u64 },
    CallbackRequest { client_id: u32 },
    FoundSources { hash: Md4Hash, sources: Vec<Endpoint> },
    SearchRequest { query: Bytes },
    SearchResult { results: Vec<SharedFileEntry> },
    Reject,
    Disconnect,
    UsersList { payload: Bytes },
    CallbackRequested { payload: Bytes },
    Unknown { opcode: u8, payload: Bytes },
}

impl Message {
    /// The wire opcode of this message.
    pub fn opcode(&self) -> u8 {
        match self {
            Message::LoginRequest(_) => Opcode::LoginRequest as u8,
            Message::ServerMessage { .. } => Opcode::ServerMessage as u8,
            Message::ServerList { .. } => Opcode::ServerList as u8,
            Message::ServerStatus { .. } => Opcode::ServerStatus as u8,
            Message::IdChange(_) => Opcode::IdChange as u8,
            Message::ServerIdent(_) => Opcode::ServerIdent as u8,
            Message::OfferFiles { .. } => Opcode::OfferFiles as u8,
            Message::GetServerList => Opcode::GetServerList as u8,
            Message::GetSources { .. } => Opcode::GetSources as u8,
            Message::CallbackRequest { .. } => Opcode::CallbackRequest as u8,
            Message::FoundSources { .. } => Opcode::FoundSources as u8,
            Message::SearchRequest { .. } => Opcode::SearchRequest as u8,
            Message::SearchResult { .. } => Opcode::SearchResult as u8,
            Message::Reject => Opcode::Reject as u8,
            Message::Disconnect => Opcode::Disconnect as u8,
            Message::UsersList { .. } => Opcode::UsersList as u8,
            Message::CallbackRequested { .. } => Opcode::CallbackRequested as u8,
            Message::Unknown { opcode, .. } => *opcode,
        }
    }

    /// Encodes the payload (the bytes following the header).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::LoginRequest(login) => {
                buf.put_slice(login.hash.as_bytes());
                buf.put_u32_le(login.client_id);
                buf.put_u16_le(login.port);
                login.tags.encode(&mut buf);
            }
            Message::ServerMessage { message } => {
                codec::put_u16_string(&mut buf, message);
            }
            Message::ServerList { servers } => {
                buf.put_u8(servers.len() as u8);
                for server in servers {
                    server.encode(&mut buf);
                }
            }
            Message::ServerStatus { users, files } => {
                buf.put_u32_le(*users);
                buf.put_u32_le(*files);
            }
            Message::IdChange(id) => {
                buf.put_u32_le(id.client_id);
                buf.put_u32_le(id.tcp_flags);
                buf.put_u32_le(id.aux_port);
            }
            Message::ServerIdent(ident) => {
                buf.put_slice(ident.hash.as_bytes());
                ident.endpoint.encode(&mut buf);
                ident.tags.encode(&mut buf);
            }
            Message::OfferFiles { files } => {
                buf.put_u32_le(files.len() as u32);
                for file in files {
                    file.encode(&mut buf);
                }
            }
            Message::GetServerList => {}
            Message::GetSources { hash, size } => {
                buf.put_slice(hash.as_bytes());
                buf.put_u32_le(*size as u32);
                buf.put_u32_le((*size >> 32) as u32);
            }
            Message::CallbackRequest { client_id } => {
                buf.put_u32_le(*client_id);
            }
            Message::FoundSources { hash, sources } => {
                buf.put_slice(hash.as_bytes());
                buf.put_u8(sources.len() as u8);
                for source in sources {
                    source.encode(&mut buf);
                }
            }
            Message::SearchRequest { query } => {
                buf.put_slice(query);
            }
            Message::SearchResult { results } => {
                buf.put_u32_le(results.len() as u32);
                for result in results {
                    result.encode(&mut buf);
                }
            }
            Message::Reject | Message::Disconnect => {}
            Message::UsersList { payload } | Message::CallbackRequested { payload } => {
                buf.put_slice(payload);
            }
            Message::Unknown { payload, .. } => {
                buf.put_slice(payload);
            }
        }

        buf.freeze()
    }

    /// Decodes a payload for the given opcode.
    ///
    /// Unknown opcodes yield [`Message::Unknown`] with the raw payload.
    ///
    /// # Errors
    ///
    /// A recognized opcode whose payload does not parse is a decode
    /// failure; the caller terminates the connection.
    pub fn decode(opcode: u8, mut payload: Bytes) -> Result<Message, ServerError> {
        let Some(op) = Opcode::from_u8(opcode) else {
            return Ok(Message::Unknown { opcode, payload });
        };

        let buf = &mut payload;
        let message = match op {
            Opcode::LoginRequest => {
                let hash = Md4Hash::from_bytes(codec::get_array(buf)?);
                let client_id = codec::get_u32(buf)?;
                let port = codec::get_u16(buf)?;
                let tags = TagList::decode(buf)?;
                Message::LoginRequest(LoginRequest {
                    hash,
                    client_id,
                    port,
                    tags,
                })
            }
            Opcode::ServerMessage => Message::ServerMessage {
                message: codec::get_u16_string(buf)?,
            },
            Opcode::ServerList => {
                let count = codec::get_u8(buf)? as usize;
                let mut servers = Vec::with_capacity(count);
                for _ in 0..count {
                    servers.push(Endpoint::decode(buf)?);
                }
                Message::ServerList { servers }
            }
            Opcode::ServerStatus => Message::ServerStatus {
                users: codec::get_u32(buf)?,
                files: codec::get_u32(buf)?,
            },
            Opcode::IdChange => {
                let client_id = codec::get_u32(buf)?;
                let tcp_flags = if buf.remaining() >= 4 {
                    codec::get_u32(buf)?
                } else {
                    0
                };
                let aux_port = if buf.remaining() >= 4 {
                    codec::get_u32(buf)?
                } else {
                    0
                };
                Message::IdChange(IdChange {
                    client_id,
                    tcp_flags,
                    aux_port,
                })
            }
            Opcode::ServerIdent => {
                let hash = Md4Hash::from_bytes(codec::get_array(buf)?);
                let endpoint = Endpoint::decode(buf)?;
                let tags = TagList::decode(buf)?;
                Message::ServerIdent(ServerIdent {
                    hash,
                    endpoint,
                    tags,
                })
            }
            Opcode::OfferFiles => {
                let count = codec::get_u32(buf)? as usize;
                let mut files = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    files.push(SharedFileEntry::decode(buf)?);
                }
                Message::OfferFiles { files }
            }
            Opcode::GetServerList => Message::GetServerList,
            Opcode::GetSources => {
                let hash = Md4Hash::from_bytes(codec::get_array(buf)?);
                let low = codec::get_u32(buf)?;
                let high = codec::get_u32(buf)?;
                Message::GetSources {
                    hash,
                    size: u64::from(low) | (u64::from(high) << 32),
                }
            }
            Opcode::CallbackRequest => Message::CallbackRequest {
                client_id: codec::get_u32(buf)?,
            },
            Opcode::FoundSources => {
                let hash = Md4Hash::from_bytes(codec::get_array(buf)?);
                let count = codec::get_u8(buf)? as usize;
                let mut sources = Vec::with_capacity(count);
                for _ in 0..count {
                    sources.push(Endpoint::decode(buf)?);
                }
                Message::FoundSources { hash, sources }
            }
            Opcode::SearchRequest => Message::SearchRequest {
                query: buf.copy_to_bytes(buf.remaining()),
            },
            Opcode::SearchResult => {
                let count = codec::get_u32(buf)? as usize;
                let mut results = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    results.push(SharedFileEntry::decode(buf)?);
                }
                Message::SearchResult { results }
            }
            Opcode::Reject => Message::Reject,
            Opcode::Disconnect => Message::Disconnect,
            Opcode::UsersList => Message::UsersList {
                payload: buf.copy_to_bytes(buf.remaining()),
            },
            Opcode::CallbackRequested => Message::CallbackRequested {
                payload: buf.copy_to_bytes(buf.remaining()),
            },
        };

        Ok(message)
    }
}
