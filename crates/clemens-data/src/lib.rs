//! Training data pipeline for the Clemens NNUE
//!
//! Streams packed chess positions from disk, turns every position into a pair of
//! sparse feature vectors (one per king perspective) and hands them to a trainer
//! in fixed-size batches produced by a background worker.
//!
//! ```no_run
//! use clemens_data::{BatchReader, LoaderConfig};
//!
//! # fn main() -> clemens_data::DataResult<()> {
//! let config = LoaderConfig::new("positions.bin").with_batch_size(4096);
//! let mut reader = BatchReader::start(&config)?;
//! while let Some(batch) = reader.next_batch()? {
//!     println!("{} positions, {} white features", batch.len(), batch.white.nnz());
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod error;
pub mod features;
pub mod io;
pub mod loader;
pub mod record;
pub mod types;

pub use batch::{Batch, BatchAccumulator, SparseRows};
pub use error::{DataError, DataResult, FormatError};
pub use features::{FeaturePair, FeatureVector, NUM_FEATURES, feature_index};
pub use io::InputSource;
pub use loader::{BatchReader, LoaderConfig, PipelineStats, PipelineSummary};
pub use record::{PlacedPiece, PositionRecord, RecordDecoder};
pub use types::{Color, PieceType, Square};
