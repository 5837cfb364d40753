use thiserror::Error;

use crate::codec::CodecError;

/// Errors that can occur while decoding or reading tags.
#[derive(Debug, Error)]
pub enum TagError {
    /// The type byte does not name a known tag type.
    #[error("invalid tag type 0x{0:02x}")]
    InvalidTagType(u8),

    /// A blob tag's declared length exceeds the cap.
    #[error("blob tag too long: {len} bytes (cap {cap})")]
    BlobTagTooLong { len: usize, cap: usize },

    /// A coercing getter would lose information or change kind.
    #[error("incompatible tag getter")]
    IncompatibleGetter,

    /// Index-based access past the end of the list.
    #[error("tag list index {0} out of range")]
    IndexOutOfRange(usize),

    /// The declared tag count exceeds the sanity cap.
    #[error("tag list too long: {0} entries")]
    TooManyTags(u32),

    /// Truncated or malformed primitive data.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
