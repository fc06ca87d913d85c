//! Error types for record decoding and the batching pipeline

use crate::types::{Color, Square};

/// Invariant violations inside a single record.
///
/// Every one of these leaves the stream misaligned, so none is recoverable.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Occupancy mask with more than 32 occupied squares
    #[error("occupancy has {0} squares set, at most 32 allowed")]
    TooManyPieces(u32),

    /// Half-move clock outside 0..=100
    #[error("rule-50 counter {0} exceeds 100")]
    InvalidRule50(u8),

    /// King not found for a specific color
    #[error("no {0:?} king on the board")]
    MissingKing(Color),

    /// Second king of the same color
    #[error("more than one {0:?} king on the board")]
    DuplicateKing(Color),

    /// Two pieces placed on one square
    #[error("square {0:?} holds more than one piece")]
    SquareCollision(Square),

    /// Occupancy mask disagrees with the placed pieces
    #[error("occupancy {occupancy:#018x} does not match placed pieces {placed:#018x}")]
    OccupancyMismatch { occupancy: u64, placed: u64 },

    /// Stream ended inside a record
    #[error("record truncated while reading {0}")]
    Truncated(&'static str),
}

/// Pipeline-level errors
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    /// Malformed record; `record` is zero-based, `offset` is the byte offset of its first byte
    #[error("malformed record #{record} at byte {offset}: {source}")]
    Format {
        record: u64,
        offset: u64,
        #[source]
        source: FormatError,
    },

    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Rejected loader configuration
    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),

    /// Worker thread went away without reporting completion
    #[error("data loader worker terminated without reporting completion")]
    WorkerLost,

    /// Pulled again after a failure was already reported
    #[error("data loader already failed")]
    Aborted,
}

impl DataError {
    /// The underlying format violation, if this is one.
    pub fn format_error(&self) -> Option<FormatError> {
        match self {
            DataError::Format { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Result type for data loading operations
pub type DataResult<T> = Result<T, DataError>;
