//! Little-endian primitive I/O and frame decompression.
//!
//! All integers on the ed2k wire are little-endian, strings are octet
//! runs with explicit length prefixes, and floats are IEEE-754 single
//! precision. The readers here are checked: they fail with
//! [`CodecError::UnexpectedEof`] instead of panicking on truncated
//! input. Packed (`0xD4`) frames are inflated with a caller-supplied
//! bound so a malicious length field cannot force unbounded allocation.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes};
use flate2::read::ZlibDecoder;
use thiserror::Error;

/// Default cap for a single inflated frame (2^22 octets).
pub const DEFAULT_INFLATE_CAP: usize = 4 * 1024 * 1024;

const INFLATE_CHUNK: usize = 16 * 1024;

/// Errors that can occur while reading primitives or inflating frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A length-prefixed string was not valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// The zlib stream could not be inflated.
    #[error("inflate failed: {0}")]
    Inflate(String),

    /// The inflated frame would exceed the configured cap.
    #[error("inflated frame exceeds cap of {cap} bytes")]
    InflatedTooLarge { cap: usize },
}

/// Reads a single octet.
pub fn get_u8(buf: &mut impl Buf) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

/// Reads a little-endian `u16`.
pub fn get_u16(buf: &mut impl Buf) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u16_le())
}

/// Reads a little-endian `u32`.
pub fn get_u32(buf: &mut impl Buf) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u32_le())
}

/// Reads a little-endian `u64`.
pub fn get_u64(buf: &mut impl Buf) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_u64_le())
}

/// Reads a little-endian IEEE-754 single-precision float.
pub fn get_f32(buf: &mut impl Buf) -> Result<f32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.get_f32_le())
}

/// Reads a raw run of `len` octets.
pub fn get_bytes(buf: &mut impl Buf, len: usize) -> Result<Bytes, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Reads a fixed-size array of octets.
pub fn get_array<const N: usize>(buf: &mut impl Buf) -> Result<[u8; N], CodecError> {
    if buf.remaining() < N {
        return Err(CodecError::UnexpectedEof);
    }
    let mut arr = [0u8; N];
    buf.copy_to_slice(&mut arr);
    Ok(arr)
}

/// Reads `len` octets as a UTF-8 string.
pub fn get_string(buf: &mut impl Buf, len: usize) -> Result<String, CodecError> {
    let bytes = get_bytes(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Reads a `u16`-length-prefixed UTF-8 string.
pub fn get_u16_string(buf: &mut impl Buf) -> Result<String, CodecError> {
    let len = get_u16(buf)? as usize;
    get_string(buf, len)
}

/// Writes a `u16`-length-prefixed string.
pub fn put_u16_string(buf: &mut impl BufMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Inflates a zlib stream, bounded by `cap` output octets.
///
/// # Errors
///
/// Returns [`CodecError::InflatedTooLarge`] as soon as the output would
/// exceed `cap` (no more than `cap` bytes are ever held), and
/// [`CodecError::Inflate`] if the stream is corrupt or truncated.
pub fn inflate_bounded(data: &[u8], cap: usize) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    let mut chunk = [0u8; INFLATE_CHUNK];

    loop {
        let n = decoder
            .read(&mut chunk)
            .map_err(|e| CodecError::Inflate(e.to_string()))?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() + n > cap {
            return Err(CodecError::InflatedTooLarge { cap });
        }
        out.extend_from_slice(&chunk[..n]);
    }
}
