//! Board primitives shared by the decoder and the feature indexer.

use serde::{Deserialize, Serialize};

/// Side (White/Black)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    /// Number of colors
    pub const NUM: usize = 2;

    pub const ALL: [Color; Color::NUM] = [Color::White, Color::Black];

    /// Color from the low bit of a value.
    #[inline]
    pub const fn from_bit(bit: u8) -> Color {
        match bit & 1 {
            0 => Color::White,
            _ => Color::Black,
        }
    }

    #[inline]
    pub const fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Index for array access
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::ops::Not for Color {
    type Output = Color;

    #[inline]
    fn not(self) -> Color {
        self.opponent()
    }
}

/// Piece type. Kings are decoded but never become features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PieceType {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

impl PieceType {
    /// Number of non-king piece types
    pub const NUM_NON_KING: usize = 5;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Board square, 0 = a1 ... 63 = h8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Square(u8);

impl Square {
    pub const NUM: usize = 64;

    #[inline]
    pub const fn new(index: u8) -> Option<Square> {
        if (index as usize) < Self::NUM {
            Some(Square(index))
        } else {
            None
        }
    }

    /// Lowest set bit of a non-empty bitboard.
    #[inline]
    pub(crate) const fn lowest(bitboard: u64) -> Square {
        debug_assert!(bitboard != 0);
        Square(bitboard.trailing_zeros() as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn bit(self) -> u64 {
        1u64 << self.0
    }
}
