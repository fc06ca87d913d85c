//! Sparse input features
//!
//! Every non-king piece activates one feature per perspective. The perspective
//! is given by that side's king square.

use smallvec::SmallVec;

use crate::record::{PlacedPiece, PositionRecord};
use crate::types::{Color, PieceType, Square};

/// Size of the feature space: 64 (king) x 64 (square) x 5 (type) x 2 (color) x 2
pub const NUM_FEATURES: usize = Square::NUM * Square::NUM * PieceType::NUM_NON_KING * 2 * 2;

/// Most features one perspective can activate (one per non-king piece)
pub const MAX_ACTIVE: usize = 30;

/// Feature index of `piece` seen from the king on `king_square`.
///
/// The components are summed rather than laid out in disjoint ranges, so distinct
/// (square, piece, king) triples can share an index. Trained networks depend on
/// this exact folding.
#[inline]
pub fn feature_index(piece: &PlacedPiece, king_square: Square) -> usize {
    piece.square.index() + (piece.piece_index() + king_square.index())
}

/// Boolean vector over [`NUM_FEATURES`] slots, stored as the sorted set of active
/// indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureVector {
    active: SmallVec<[u32; MAX_ACTIVE]>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one slot. Setting an already active slot is a no-op.
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < NUM_FEATURES, "feature index {index} out of range");
        let index = index as u32;
        if let Err(pos) = self.active.binary_search(&index) {
            self.active.insert(pos, index);
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        u32::try_from(index).is_ok_and(|index| self.active.binary_search(&index).is_ok())
    }

    /// Number of set slots
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.active.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Active indices in ascending order
    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.active
    }

    /// Dense 0/1 view of length [`NUM_FEATURES`]
    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0; NUM_FEATURES];
        for &index in &self.active {
            dense[index as usize] = 1.0;
        }
        dense
    }
}

/// White- and Black-perspective features of one position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeaturePair {
    pub white: FeatureVector,
    pub black: FeatureVector,
}

impl FeaturePair {
    /// Index every non-king piece of `record` from both kings.
    pub fn from_record(record: &PositionRecord) -> Self {
        let white_king = record.king(Color::White);
        let black_king = record.king(Color::Black);

        let mut pair = Self::default();
        for piece in &record.pieces {
            pair.white.set(feature_index(piece, white_king));
            pair.black.set(feature_index(piece, black_king));
        }
        pair
    }

    #[inline]
    pub fn perspective(&self, color: Color) -> &FeatureVector {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }
}
