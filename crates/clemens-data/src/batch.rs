//! Batch accumulation
//!
//! Positions are stacked batch-major in arrival order. Only full batches leave
//! the accumulator; a trailing partial batch is discarded by the caller.

use crate::error::{DataError, DataResult};
use crate::features::{FeaturePair, FeatureVector, NUM_FEATURES};
use crate::types::Color;

/// Feature vectors of a batch in compressed sparse row form
///
/// Row `i` holds the active indices `indices[offsets[i]..offsets[i + 1]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseRows {
    offsets: Vec<usize>,
    indices: Vec<u32>,
}

impl Default for SparseRows {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl SparseRows {
    fn with_capacity(rows: usize) -> Self {
        let mut offsets = Vec::with_capacity(rows + 1);
        offsets.push(0);
        Self {
            offsets,
            indices: Vec::new(),
        }
    }

    fn push_row(&mut self, row: &FeatureVector) {
        self.indices.extend_from_slice(row.indices());
        self.offsets.push(self.indices.len());
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Active indices of row `i`
    pub fn row(&self, i: usize) -> &[u32] {
        &self.indices[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> + '_ {
        self.offsets.windows(2).map(|w| &self.indices[w[0]..w[1]])
    }

    /// Total number of active slots
    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Dense row-major 0/1 matrix of shape `rows x NUM_FEATURES`
    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0; self.rows() * NUM_FEATURES];
        for (i, row) in self.iter().enumerate() {
            let base = i * NUM_FEATURES;
            for &index in row {
                dense[base + index as usize] = 1.0;
            }
        }
        dense
    }
}

/// Stacked data of `len()` positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// White-perspective features
    pub white: SparseRows,
    /// Black-perspective features
    pub black: SparseRows,
    /// Side to move (0 = White, 1 = Black)
    pub turn: Vec<u8>,
    pub score: Vec<i32>,
    pub result: Vec<u32>,
}

impl Batch {
    fn with_capacity(positions: usize) -> Self {
        Self {
            white: SparseRows::with_capacity(positions),
            black: SparseRows::with_capacity(positions),
            turn: Vec::with_capacity(positions),
            score: Vec::with_capacity(positions),
            result: Vec::with_capacity(positions),
        }
    }

    /// Number of positions
    #[inline]
    pub fn len(&self) -> usize {
        self.turn.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turn.is_empty()
    }

    fn push(&mut self, features: &FeaturePair, turn: Color, score: i32, result: u32) {
        self.white.push_row(&features.white);
        self.black.push_row(&features.black);
        self.turn.push(turn as u8);
        self.score.push(score);
        self.result.push(result);
    }
}

/// Groups positions into batches of exactly `batch_size`
pub struct BatchAccumulator {
    batch_size: usize,
    buffer: Batch,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize) -> DataResult<Self> {
        if batch_size == 0 {
            return Err(DataError::InvalidConfig("batch size must be positive".to_string()));
        }
        Ok(Self {
            batch_size,
            buffer: Batch::with_capacity(batch_size),
        })
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Positions waiting for the current batch to fill
    #[inline]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append one position; returns the completed batch once `batch_size` is reached.
    pub fn push(
        &mut self,
        features: &FeaturePair,
        turn: Color,
        score: i32,
        result: u32,
    ) -> Option<Batch> {
        self.buffer.push(features, turn, score, result);
        if self.buffer.len() < self.batch_size {
            return None;
        }
        Some(std::mem::replace(&mut self.buffer, Batch::with_capacity(self.batch_size)))
    }

    /// Drop the partial batch and return how many positions it held.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer = Batch::default();
        dropped
    }
}
