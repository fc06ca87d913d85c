//! Packed position records
//!
//! Reads the binary position stream produced by the data generation pipeline and
//! turns each record into a [`PositionRecord`].
//!
//! # Layout
//!
//! Records repeat back to back with no header or footer; the stream ends at EOF on
//! a record boundary.
//!
//! | field          | size                   | encoding                                  |
//! |----------------|------------------------|-------------------------------------------|
//! | occupancy      | 8                      | u64 little-endian, at most 32 bits set    |
//! | turn + rule50  | 1                      | bit0 = side to move, bits1-7 = rule50     |
//! | packed pieces  | ceil(popcount / 2)     | 4-bit codes, low nibble first             |
//! | score          | 4                      | i32 little-endian                         |
//! | result         | 4                      | u32 little-endian                         |
//!
//! Piece codes are matched one-to-one against the occupied squares in ascending
//! order. Bits 1-3 of a code select the piece type from [`CODE_TO_PIECE`], bit 0 is
//! the color. With an odd number of occupied squares the last high nibble is
//! padding.

use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::{DataError, DataResult, FormatError};
use crate::types::{Color, PieceType, Square};

/// Maximum number of occupied squares in a record
pub const MAX_OCCUPIED: u32 = 32;

/// Maximum half-move clock
pub const MAX_RULE50: u8 = 100;

/// Maximum number of packed piece bytes
pub const MAX_PACKED_BYTES: usize = (MAX_OCCUPIED as usize).div_ceil(2);

/// Size of the fixed-width fields (occupancy, turn/rule50, score, result)
pub const FIXED_SIZE: usize = 8 + 1 + 4 + 4;

/// Piece type selected by bits 1-3 of a piece code.
///
/// Slots 6 and 7 are alternate encodings of rooks and pawns.
pub const CODE_TO_PIECE: [PieceType; 8] = [
    PieceType::Knight,
    PieceType::Bishop,
    PieceType::Rook,
    PieceType::Queen,
    PieceType::King,
    PieceType::Pawn,
    PieceType::Rook,
    PieceType::Pawn,
];

/// Canonical code slot written by the encoder.
#[inline]
const fn code_slot(piece_type: PieceType) -> u8 {
    match piece_type {
        PieceType::Knight => 0,
        PieceType::Bishop => 1,
        PieceType::Rook => 2,
        PieceType::Queen => 3,
        PieceType::King => 4,
        PieceType::Pawn => 5,
    }
}

#[inline]
const fn piece_code(piece_type: PieceType, color: Color) -> u8 {
    (code_slot(piece_type) << 1) | color as u8
}

/// Non-king piece on a square
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacedPiece {
    pub square: Square,
    pub piece_type: PieceType,
    pub color: Color,
}

impl PlacedPiece {
    pub const fn new(square: Square, piece_type: PieceType, color: Color) -> Self {
        Self {
            square,
            piece_type,
            color,
        }
    }

    /// Type and color folded into one index (`type * 2 + color`).
    #[inline]
    pub const fn piece_index(&self) -> usize {
        self.piece_type.index() * 2 + self.color.index()
    }
}

/// One decoded position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionRecord {
    /// Bit i set iff square i is occupied
    pub occupancy: u64,
    /// Side to move
    pub turn: Color,
    /// Half-move clock
    pub rules50: u8,
    /// Non-king pieces in ascending square order
    pub pieces: SmallVec<[PlacedPiece; 30]>,
    /// King squares indexed by [`Color::index`]
    pub kings: [Square; Color::NUM],
    /// Evaluation in the unit of the producing pipeline
    pub score: i32,
    /// Game outcome label as written upstream
    pub result: u32,
}

impl PositionRecord {
    /// Build a record from its parts, deriving the occupancy mask.
    pub fn from_parts<I>(
        turn: Color,
        rules50: u8,
        kings: [Square; Color::NUM],
        pieces: I,
        score: i32,
        result: u32,
    ) -> Result<Self, FormatError>
    where
        I: IntoIterator<Item = PlacedPiece>,
    {
        let mut pieces: SmallVec<[PlacedPiece; 30]> = pieces.into_iter().collect();
        pieces.sort_unstable_by_key(|p| p.square);

        let mut occupancy = 0u64;
        for square in pieces.iter().map(|p| p.square).chain(kings) {
            if occupancy & square.bit() != 0 {
                return Err(FormatError::SquareCollision(square));
            }
            occupancy |= square.bit();
        }

        let record = Self {
            occupancy,
            turn,
            rules50,
            pieces,
            kings,
            score,
            result,
        };
        record.validate()?;
        Ok(record)
    }

    #[inline]
    pub fn king(&self, color: Color) -> Square {
        self.kings[color.index()]
    }

    /// Number of occupied squares, kings included
    #[inline]
    pub fn piece_count(&self) -> u32 {
        self.occupancy.count_ones()
    }

    /// Size of this record on the wire
    #[inline]
    pub fn encoded_len(&self) -> usize {
        FIXED_SIZE + (self.piece_count() as usize).div_ceil(2)
    }

    /// Check the invariants the wire format relies on.
    pub fn validate(&self) -> Result<(), FormatError> {
        let count = self.piece_count();
        if count > MAX_OCCUPIED {
            return Err(FormatError::TooManyPieces(count));
        }
        if self.rules50 > MAX_RULE50 {
            return Err(FormatError::InvalidRule50(self.rules50));
        }
        if let Some(king) = self.pieces.iter().find(|p| p.piece_type == PieceType::King) {
            return Err(FormatError::DuplicateKing(king.color));
        }

        let mut placed = 0u64;
        for square in self.pieces.iter().map(|p| p.square).chain(self.kings) {
            if placed & square.bit() != 0 {
                return Err(FormatError::SquareCollision(square));
            }
            placed |= square.bit();
        }
        if placed != self.occupancy {
            return Err(FormatError::OccupancyMismatch {
                occupancy: self.occupancy,
                placed,
            });
        }
        Ok(())
    }

    /// Write the record in wire format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.validate().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut codes: SmallVec<[(Square, u8); 32]> = self
            .pieces
            .iter()
            .map(|p| (p.square, piece_code(p.piece_type, p.color)))
            .collect();
        for color in Color::ALL {
            codes.push((self.king(color), piece_code(PieceType::King, color)));
        }
        codes.sort_unstable_by_key(|&(square, _)| square);

        let mut packed = [0u8; MAX_PACKED_BYTES];
        for (i, &(_, code)) in codes.iter().enumerate() {
            packed[i / 2] |= code << (4 * (i % 2));
        }

        writer.write_u64::<LittleEndian>(self.occupancy)?;
        writer.write_u8(self.turn as u8 | (self.rules50 << 1))?;
        writer.write_all(&packed[..codes.len().div_ceil(2)])?;
        writer.write_i32::<LittleEndian>(self.score)?;
        writer.write_u32::<LittleEndian>(self.result)
    }

    /// Serialize the record into a fresh buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

/// Maps a failed read inside a record to a truncation error.
fn read_error(record: u64, offset: u64, field: &'static str) -> impl FnOnce(io::Error) -> DataError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DataError::Format {
                record,
                offset,
                source: FormatError::Truncated(field),
            }
        } else {
            DataError::Io(e)
        }
    }
}

/// Sequential decoder over a byte stream
///
/// The stream is read strictly forward; the decoder never seeks.
pub struct RecordDecoder<R> {
    reader: R,
    records: u64,
    offset: u64,
    failed: bool,
}

impl<R: Read> RecordDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            records: 0,
            offset: 0,
            failed: false,
        }
    }

    /// Records decoded so far
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode the next record.
    ///
    /// Returns `Ok(None)` when the stream ends exactly on a record boundary. Any
    /// other short read is a [`FormatError::Truncated`].
    pub fn next_record(&mut self) -> DataResult<Option<PositionRecord>> {
        let record = self.records;
        let offset = self.offset;
        let fail = |source| DataError::Format {
            record,
            offset,
            source,
        };

        let mut occupancy_bytes = [0u8; 8];
        match self.read_up_to(&mut occupancy_bytes)? {
            0 => return Ok(None),
            8 => {}
            _ => return Err(fail(FormatError::Truncated("occupancy"))),
        }
        let occupancy = LittleEndian::read_u64(&occupancy_bytes);
        let count = occupancy.count_ones();
        if count > MAX_OCCUPIED {
            return Err(fail(FormatError::TooManyPieces(count)));
        }

        let turn_and_rules50 =
            self.reader.read_u8().map_err(read_error(record, offset, "turn/rule50"))?;
        let turn = Color::from_bit(turn_and_rules50);
        let rules50 = turn_and_rules50 >> 1;
        if rules50 > MAX_RULE50 {
            return Err(fail(FormatError::InvalidRule50(rules50)));
        }

        let packed_len = (count as usize).div_ceil(2);
        let mut packed = [0u8; MAX_PACKED_BYTES];
        self.reader
            .read_exact(&mut packed[..packed_len])
            .map_err(read_error(record, offset, "packed pieces"))?;

        let mut remaining = occupancy;
        let mut kings: [Option<Square>; Color::NUM] = [None; Color::NUM];
        let mut pieces = SmallVec::new();
        // Exactly `count` codes; the padding nibble of an odd count is never read.
        for i in 0..count as usize {
            let byte = packed[i / 2];
            let code = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            let square = Square::lowest(remaining);
            remaining &= remaining - 1;

            let piece_type = CODE_TO_PIECE[usize::from(code >> 1)];
            let color = Color::from_bit(code);
            if piece_type == PieceType::King {
                let slot = &mut kings[color.index()];
                if slot.is_some() {
                    return Err(fail(FormatError::DuplicateKing(color)));
                }
                *slot = Some(square);
            } else {
                pieces.push(PlacedPiece::new(square, piece_type, color));
            }
        }

        let score = self
            .reader
            .read_i32::<LittleEndian>()
            .map_err(read_error(record, offset, "score"))?;
        let result = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(read_error(record, offset, "result"))?;

        let white_king = kings[Color::White.index()]
            .ok_or_else(|| fail(FormatError::MissingKing(Color::White)))?;
        let black_king = kings[Color::Black.index()]
            .ok_or_else(|| fail(FormatError::MissingKing(Color::Black)))?;

        self.records += 1;
        self.offset += (FIXED_SIZE + packed_len) as u64;

        Ok(Some(PositionRecord {
            occupancy,
            turn,
            rules50,
            pieces,
            kings: [white_king, black_king],
            score,
            result,
        }))
    }

    /// Fill `buf` as far as the stream allows; returns the number of bytes read.
    fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for RecordDecoder<R> {
    type Item = DataResult<PositionRecord>;

    /// Stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(index: u8) -> Square {
        Square::new(index).unwrap()
    }

    /// Kings only: white king on 1, black king on 0.
    const KINGS_ONLY: [u8; 18] = [
        0x03, 0, 0, 0, 0, 0, 0, 0, // occupancy
        0x00, // white to move, rule50 0
        0x89, // black king (0x9) on square 0, white king (0x8) on square 1
        0, 0, 0, 0, // score
        1, 0, 0, 0, // result
    ];

    #[test]
    fn test_decode_kings_only() {
        let mut decoder = RecordDecoder::new(&KINGS_ONLY[..]);
        let record = decoder.next_record().unwrap().unwrap();

        assert_eq!(record.occupancy, 3);
        assert_eq!(record.turn, Color::White);
        assert_eq!(record.rules50, 0);
        assert_eq!(record.king(Color::White), sq(1));
        assert_eq!(record.king(Color::Black), sq(0));
        assert!(record.pieces.is_empty());
        assert_eq!(record.score, 0);
        assert_eq!(record.result, 1);

        assert_eq!(decoder.bytes_read(), 18);
        assert!(decoder.next_record().unwrap().is_none());
        assert_eq!(decoder.records_read(), 1);
    }

    #[test]
    fn test_odd_count_ignores_padding_nibble() {
        // Kings on 0 and 1, a black pawn (code 0xB) on 2, garbage in the padding nibble.
        let mut bytes = vec![0x07, 0, 0, 0, 0, 0, 0, 0];
        bytes.push((37 << 1) | 1);
        bytes.extend_from_slice(&[0x89, 0xFB]);
        bytes.extend_from_slice(&(-25i32).to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        // A second record must still be aligned.
        bytes.extend_from_slice(&KINGS_ONLY);

        let mut decoder = RecordDecoder::new(&bytes[..]);
        let first = decoder.next_record().unwrap().unwrap();
        assert_eq!(decoder.bytes_read(), 8 + 1 + 2 + 4 + 4);
        assert_eq!(first.turn, Color::Black);
        assert_eq!(first.rules50, 37);
        assert_eq!(
            first.pieces.as_slice(),
            &[PlacedPiece::new(sq(2), PieceType::Pawn, Color::Black)]
        );
        assert_eq!(first.score, -25);
        assert_eq!(first.result, 2);

        let second = decoder.next_record().unwrap().unwrap();
        assert_eq!(second.occupancy, 3);
        assert!(decoder.next_record().unwrap().is_none());
    }

    #[test]
    fn test_alternate_rook_and_pawn_slots() {
        // Kings on 0 and 1, code 0xC (slot 6, white) on 2, code 0xF (slot 7, black) on 3.
        let mut bytes = vec![0x0F, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x89, 0xFC];
        bytes.extend_from_slice(&[0; 8]);
        let record = RecordDecoder::new(&bytes[..]).next_record().unwrap().unwrap();
        assert_eq!(
            record.pieces.as_slice(),
            &[
                PlacedPiece::new(sq(2), PieceType::Rook, Color::White),
                PlacedPiece::new(sq(3), PieceType::Pawn, Color::Black),
            ]
        );
    }

    #[test]
    fn test_missing_king_fails() {
        // The second code is a black knight where the black king should be.
        let mut bytes = vec![0x03, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x18];
        bytes.extend_from_slice(&[0; 8]);
        let err = RecordDecoder::new(&bytes[..]).next_record().unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::MissingKing(Color::Black)));
    }

    #[test]
    fn test_duplicate_king_fails() {
        let mut bytes = vec![0x07, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x88, 0x09];
        bytes.extend_from_slice(&[0; 8]);
        let err = RecordDecoder::new(&bytes[..]).next_record().unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::DuplicateKing(Color::White)));
    }

    #[test]
    fn test_rule50_out_of_range_fails() {
        let mut bytes = KINGS_ONLY;
        bytes[8] = 101 << 1;
        let err = RecordDecoder::new(&bytes[..]).next_record().unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::InvalidRule50(101)));
    }

    #[test]
    fn test_too_many_pieces_fails() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.push(0);
        let err = RecordDecoder::new(&bytes[..]).next_record().unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::TooManyPieces(64)));
    }

    #[test]
    fn test_short_reads_are_truncation() {
        let err = RecordDecoder::new(&KINGS_ONLY[..3]).next_record().unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::Truncated("occupancy")));

        let err = RecordDecoder::new(&KINGS_ONLY[..12]).next_record().unwrap_err();
        assert_eq!(err.format_error(), Some(FormatError::Truncated("score")));
    }

    #[test]
    fn test_error_reports_record_offset() {
        let mut bytes = KINGS_ONLY.to_vec();
        bytes.extend_from_slice(&KINGS_ONLY[..16]);
        let mut decoder = RecordDecoder::new(&bytes[..]);
        assert!(decoder.next().unwrap().is_ok());
        match decoder.next() {
            Some(Err(DataError::Format { record, offset, source })) => {
                assert_eq!(record, 1);
                assert_eq!(offset, 18);
                assert_eq!(source, FormatError::Truncated("result"));
            }
            other => panic!("expected format error, got {other:?}"),
        }
        // Iteration stops after the first failure.
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_encode_start_position() {
        use PieceType::*;

        let back_rank = [Rook, Knight, Bishop, Queen, King, Bishop, Knight, Rook];
        let mut pieces = Vec::new();
        for (file, &piece_type) in back_rank.iter().enumerate() {
            let file = file as u8;
            if piece_type != King {
                pieces.push(PlacedPiece::new(sq(file), piece_type, Color::White));
                pieces.push(PlacedPiece::new(sq(56 + file), piece_type, Color::Black));
            }
            pieces.push(PlacedPiece::new(sq(8 + file), Pawn, Color::White));
            pieces.push(PlacedPiece::new(sq(48 + file), Pawn, Color::Black));
        }
        let record =
            PositionRecord::from_parts(Color::White, 0, [sq(4), sq(60)], pieces, 15, 1).unwrap();
        assert_eq!(record.occupancy, 0xFFFF_0000_0000_FFFF);
        assert_eq!(record.pieces.len(), 30);

        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), FIXED_SIZE + 16);
        assert_eq!(bytes.len(), record.encoded_len());
        // a1 white rook (0x4), b1 white knight (0x0)
        assert_eq!(bytes[9], 0x04);

        let decoded = RecordDecoder::new(&bytes[..]).next_record().unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_from_parts_rejects_collision() {
        let pawn = PlacedPiece::new(sq(4), PieceType::Pawn, Color::White);
        let err = PositionRecord::from_parts(Color::White, 0, [sq(4), sq(60)], [pawn], 0, 0)
            .unwrap_err();
        assert_eq!(err, FormatError::SquareCollision(sq(4)));
    }
}
