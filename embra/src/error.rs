//! Error types for encoding and decoding.

use core::fmt;

/// The main error type for compression and decompression operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// An API was called with incompatible extents.
    WrongDims,
    /// A header was consumed but the payload is shorter than announced.
    BitstreamTruncated,
    /// The arithmetic-coder state is inconsistent, or a header is malformed.
    BitstreamCorrupt,
    /// The stream was produced by an incompatible version.
    VersionMismatch,
    /// The quantization step is not positive, or the input contains NaN,
    /// or quantization overflowed the integer range.
    QzInvalid,
    /// A packet transform was requested with mismatched spatial/temporal
    /// levels in dyadic mode, or level counts exceed what the extents allow.
    UnsupportedTransform,
    /// An internal invariant was violated. Never recoverable.
    Internal,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongDims => write!(f, "incompatible extents"),
            Self::BitstreamTruncated => write!(f, "bitstream shorter than its header announces"),
            Self::BitstreamCorrupt => write!(f, "bitstream is corrupt"),
            Self::VersionMismatch => write!(f, "bitstream produced by an incompatible version"),
            Self::QzInvalid => write!(f, "invalid quantization"),
            Self::UnsupportedTransform => write!(f, "unsupported transform configuration"),
            Self::Internal => write!(f, "internal invariant violated"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for compression and decompression operations.
pub type Result<T> = core::result::Result<T, CodecError>;

/// The two conditions that end a coding loop without being errors.
///
/// `BudgetMet` is reported by the arithmetic coder when the bit budget is
/// exhausted during encoding; `EndOfStream` is reported during decoding when
/// a truncated stream runs out of bits. Both leave the session with a valid
/// (lower-quality) state, which is what makes the bitstream embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The bit budget was reached while encoding.
    BudgetMet,
    /// The bitstream ran out while decoding.
    EndOfStream,
}

/// Outcome of a full coding pass: either it ran to completion, or one of the
/// two loop-breaking conditions fired, or a real error occurred.
pub(crate) type PassResult = core::result::Result<Option<Termination>, CodecError>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

pub(crate) use bail;
