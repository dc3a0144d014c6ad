//! Error types for tree walks and mutations.

use thiserror::Error;

/// A packed block mutation did not fit the block's byte budget.
///
/// This is a recoverable signal: the block is left exactly as it was before
/// the attempt, and the owner is expected to split the leaf and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("block capacity exceeded: {required} bytes required, {capacity} available")]
pub struct CapacityExceeded {
    /// Bytes the block would occupy after the mutation.
    pub required: usize,
    /// The block's byte budget.
    pub capacity: usize,
}

/// Error variants for tree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A mutation still did not fit after splitting the leaf the configured
    /// number of times.
    #[error("capacity exceeded after split retries: {0}")]
    Capacity(#[from] CapacityExceeded),

    /// The path was built before a later edit or structural change and must
    /// be re-seeked.
    #[error("stale tree path")]
    StalePath,

    /// A structural invariant does not hold. Indicates a bug, never retried.
    #[error("structural invariant violated: {0}")]
    Structure(String),

    /// A position lies outside of the stream.
    #[error("position {pos} out of range for stream of size {size}")]
    OutOfRange {
        /// Requested position.
        pos: u64,
        /// Current stream size.
        size: u64,
    },

    /// The leaf layout has no stream with this index.
    #[error("no such stream: {0}")]
    NoSuchStream(usize),

    /// The stream exists but has a different kind than the operation needs.
    #[error("stream {stream} is not a {expected} stream")]
    StreamKind {
        /// Stream index.
        stream: usize,
        /// Kind the operation requires.
        expected: &'static str,
    },

    /// Keys inserted into a max-ordered stream would break its order.
    #[error("keys inserted at {pos} break the stream order")]
    Unordered {
        /// Insert position.
        pos: u64,
    },

    /// A mutation was attempted through a read-only path.
    #[error("path is read-only")]
    ReadOnlyPath,

    /// The tree configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn structure(msg: impl Into<String>) -> Self {
        Error::Structure(msg.into())
    }
}

/// A specialized Result type for tree operations.
pub type Result<T> = std::result::Result<T, Error>;
