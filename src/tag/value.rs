use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use super::error::TagError;
use crate::codec;
use crate::constants::MAX_BLOB_TAG_BYTES;
use crate::hash::Md4Hash;

// Wire type codes.
pub(crate) const TAGTYPE_HASH16: u8 = 0x01;
pub(crate) const TAGTYPE_STRING: u8 = 0x02;
pub(crate) const TAGTYPE_UINT32: u8 = 0x03;
pub(crate) const TAGTYPE_FLOAT32: u8 = 0x04;
pub(crate) const TAGTYPE_BOOL: u8 = 0x05;
pub(crate) const TAGTYPE_BLOB: u8 = 0x07;
pub(crate) const TAGTYPE_UINT16: u8 = 0x08;
pub(crate) const TAGTYPE_UINT8: u8 = 0x09;
pub(crate) const TAGTYPE_UINT64: u8 = 0x0B;
pub(crate) const TAGTYPE_STR1: u8 = 0x11;
pub(crate) const TAGTYPE_STR16: u8 = 0x20;

/// High bit of the type byte: the name is a single numeric id.
const TAG_NUMERIC_NAME: u8 = 0x80;

/// Longest string stored in the compact fixed-length form.
const COMPACT_STRING_MAX: usize = 16;

/// A tag name: either a one-byte numeric id or a short string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagName {
    /// Numeric id in `1..=255`.
    Id(u8),
    /// String name, at most 255 octets.
    Name(String),
}

impl From<u8> for TagName {
    fn from(id: u8) -> Self {
        TagName::Id(id)
    }
}

impl From<&str> for TagName {
    fn from(name: &str) -> Self {
        TagName::Name(name.to_string())
    }
}

impl From<String> for TagName {
    fn from(name: String) -> Self {
        TagName::Name(name)
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagName::Id(id) => write!(f, "0x{:02X}", id),
            TagName::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// A tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    String(String),
    Blob(Bytes),
    Hash(Md4Hash),
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<u8> for TagValue {
    fn from(v: u8) -> Self {
        TagValue::U8(v)
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::U16(v)
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::U32(v)
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        TagValue::U64(v)
    }
}

impl From<f32> for TagValue {
    fn from(v: f32) -> Self {
        TagValue::F32(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

impl From<Md4Hash> for TagValue {
    fn from(v: Md4Hash) -> Self {
        TagValue::Hash(v)
    }
}

/// A typed, named field on the ed2k wire.
///
/// # Examples
///
/// ```
/// use red2k::tag::Tag;
///
/// let tag = Tag::new(0x01u8, "nickname");
/// assert_eq!(tag.as_str().unwrap(), "nickname");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: TagName,
    pub value: TagValue,
}

impl Tag {
    /// Creates a tag from anything convertible to a name and a value.
    pub fn new(name: impl Into<TagName>, value: impl Into<TagValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Encodes the tag to the wire form.
    ///
    /// String values of length 1..=16 use the compact fixed-length type
    /// codes; longer (or empty) strings use the explicit-length form.
    pub fn encode(&self, buf: &mut impl BufMut) {
        let type_code = self.type_code();

        match &self.name {
            TagName::Id(id) => {
                buf.put_u8(type_code | TAG_NUMERIC_NAME);
                buf.put_u8(*id);
            }
            TagName::Name(name) => {
                buf.put_u8(type_code);
                codec::put_u16_string(buf, name);
            }
        }

        match &self.value {
            TagValue::Bool(v) => buf.put_u8(u8::from(*v)),
            TagValue::U8(v) => buf.put_u8(*v),
            TagValue::U16(v) => buf.put_u16_le(*v),
            TagValue::U32(v) => buf.put_u32_le(*v),
            TagValue::U64(v) => buf.put_u64_le(*v),
            TagValue::F32(v) => buf.put_f32_le(*v),
            TagValue::String(s) => {
                if (1..=COMPACT_STRING_MAX).contains(&s.len()) {
                    buf.put_slice(s.as_bytes());
                } else {
                    codec::put_u16_string(buf, s);
                }
            }
            TagValue::Blob(b) => {
                buf.put_u32_le(b.len() as u32);
                buf.put_slice(b);
            }
            TagValue::Hash(h) => buf.put_slice(h.as_bytes()),
        }
    }

    /// Decodes one tag from the wire form.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, TagError> {
        let type_byte = codec::get_u8(buf)?;
        let type_code = type_byte & !TAG_NUMERIC_NAME;

        let name = if type_byte & TAG_NUMERIC_NAME != 0 {
            TagName::Id(codec::get_u8(buf)?)
        } else {
            TagName::Name(codec::get_u16_string(buf)?)
        };

        let value = match type_code {
            TAGTYPE_HASH16 => TagValue::Hash(Md4Hash::from_bytes(codec::get_array(buf)?)),
            TAGTYPE_STRING => TagValue::String(codec::get_u16_string(buf)?),
            TAGTYPE_UINT32 => TagValue::U32(codec::get_u32(buf)?),
            TAGTYPE_FLOAT32 => TagValue::F32(codec::get_f32(buf)?),
            TAGTYPE_BOOL => TagValue::Bool(codec::get_u8(buf)? != 0),
            TAGTYPE_BLOB => {
                let len = codec::get_u32(buf)? as usize;
                if len > MAX_BLOB_TAG_BYTES {
                    return Err(TagError::BlobTagTooLong {
                        len,
                        cap: MAX_BLOB_TAG_BYTES,
                    });
                }
                TagValue::Blob(codec::get_bytes(buf, len)?)
            }
            TAGTYPE_UINT16 => TagValue::U16(codec::get_u16(buf)?),
            TAGTYPE_UINT8 => TagValue::U8(codec::get_u8(buf)?),
            TAGTYPE_UINT64 => TagValue::U64(codec::get_u64(buf)?),
            TAGTYPE_STR1..=TAGTYPE_STR16 => {
                let len = (type_code - TAGTYPE_STR1 + 1) as usize;
                TagValue::String(codec::get_string(buf, len)?)
            }
            other => return Err(TagError::InvalidTagType(other)),
        };

        Ok(Self { name, value })
    }

    fn type_code(&self) -> u8 {
        match &self.value {
            TagValue::Bool(_) => TAGTYPE_BOOL,
            TagValue::U8(_) => TAGTYPE_UINT8,
            TagValue::U16(_) => TAGTYPE_UINT16,
            TagValue::U32(_) => TAGTYPE_UINT32,
            TagValue::U64(_) => TAGTYPE_UINT64,
            TagValue::F32(_) => TAGTYPE_FLOAT32,
            TagValue::String(s) => {
                if (1..=COMPACT_STRING_MAX).contains(&s.len()) {
                    TAGTYPE_STR1 + (s.len() - 1) as u8
                } else {
                    TAGTYPE_STRING
                }
            }
            TagValue::Blob(_) => TAGTYPE_BLOB,
            TagValue::Hash(_) => TAGTYPE_HASH16,
        }
    }

    /// Returns the value as `u64`, widening any unsigned width.
    pub fn as_u64(&self) -> Result<u64, TagError> {
        match &self.value {
            TagValue::U8(v) => Ok(u64::from(*v)),
            TagValue::U16(v) => Ok(u64::from(*v)),
            TagValue::U32(v) => Ok(u64::from(*v)),
            TagValue::U64(v) => Ok(*v),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as `u32` if the stored width fits.
    pub fn as_u32(&self) -> Result<u32, TagError> {
        match &self.value {
            TagValue::U8(v) => Ok(u32::from(*v)),
            TagValue::U16(v) => Ok(u32::from(*v)),
            TagValue::U32(v) => Ok(*v),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as `u16` if the stored width fits.
    pub fn as_u16(&self) -> Result<u16, TagError> {
        match &self.value {
            TagValue::U8(v) => Ok(u16::from(*v)),
            TagValue::U16(v) => Ok(*v),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as `u8` if stored as `u8`.
    pub fn as_u8(&self) -> Result<u8, TagError> {
        match &self.value {
            TagValue::U8(v) => Ok(*v),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as `bool` if stored as a boolean.
    pub fn as_bool(&self) -> Result<bool, TagError> {
        match &self.value {
            TagValue::Bool(v) => Ok(*v),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as `f32` if stored as a float.
    pub fn as_f32(&self) -> Result<f32, TagError> {
        match &self.value {
            TagValue::F32(v) => Ok(*v),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as a string slice if stored as a string.
    pub fn as_str(&self) -> Result<&str, TagError> {
        match &self.value {
            TagValue::String(s) => Ok(s),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as raw blob bytes if stored as a blob.
    pub fn as_blob(&self) -> Result<&Bytes, TagError> {
        match &self.value {
            TagValue::Blob(b) => Ok(b),
            _ => Err(TagError::IncompatibleGetter),
        }
    }

    /// Returns the value as a hash if stored as a hash.
    pub fn as_hash(&self) -> Result<Md4Hash, TagError> {
        match &self.value {
            TagValue::Hash(h) => Ok(*h),
            _ => Err(TagError::IncompatibleGetter),
        }
    }
}
