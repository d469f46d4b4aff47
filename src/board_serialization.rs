//! Position keys and text serialization.
//!
//! The board sum is the position's 64-bit Zobrist hash. It covers piece
//! placement, side to move, castling rights and legal en passant squares, and
//! ignores the move clocks, so transpositions share a key.

use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{fen::Fen, Chess, EnPassantMode};

/// Board sum of a position.
pub fn board_sum(pos: &Chess) -> u64 {
    pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
}

/// FEN of a position, reporting en passant squares only when a capture is legal.
pub fn fen(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{san::San, CastlingMode, Position};

    fn play(pos: &mut Chess, sans: &[&str]) {
        for s in sans {
            let san: San = s.parse().unwrap();
            let m = san.to_move(pos).unwrap();
            pos.play_unchecked(m);
        }
    }

    #[test]
    fn test_transpositions_share_board_sum() {
        let mut a = Chess::default();
        play(&mut a, &["Nf3", "Nf6", "Nc3", "Nc6"]);
        let mut b = Chess::default();
        play(&mut b, &["Nc3", "Nc6", "Nf3", "Nf6"]);
        assert_eq!(board_sum(&a), board_sum(&b));
    }

    #[test]
    fn test_start_position_key() {
        assert_eq!(board_sum(&Chess::default()), 0x463b_9618_1691_fc9c);
    }

    #[test]
    fn test_moves_change_board_sum() {
        let start = Chess::default();
        let mut after = Chess::default();
        play(&mut after, &["e4"]);
        assert_ne!(board_sum(&start), board_sum(&after));
    }

    #[test]
    fn test_same_occupancy_different_pieces() {
        // Swapping a white knight for a white bishop keeps occupancy identical.
        let knight: Fen = "4k3/8/8/8/8/8/8/4KN2 w - - 0 1".parse().unwrap();
        let bishop: Fen = "4k3/8/8/8/8/8/8/4KB2 w - - 0 1".parse().unwrap();
        let knight: Chess = knight.into_position(CastlingMode::Standard).unwrap();
        let bishop: Chess = bishop.into_position(CastlingMode::Standard).unwrap();
        assert_ne!(board_sum(&knight), board_sum(&bishop));
    }

    #[test]
    fn test_different_placements_get_different_keys() {
        let mut a3 = Chess::default();
        play(&mut a3, &["a3"]);
        let mut b3_c6 = Chess::default();
        play(&mut b3_c6, &["b3", "c6"]);
        assert_ne!(board_sum(&a3), board_sum(&b3_c6));

        let a: Fen = "4k3/P7/8/8/8/8/2p5/4K3 w - - 0 1".parse().unwrap();
        let b: Fen = "4k3/8/P7/8/8/2p5/8/4K3 w - - 0 1".parse().unwrap();
        let a: Chess = a.into_position(CastlingMode::Standard).unwrap();
        let b: Chess = b.into_position(CastlingMode::Standard).unwrap();
        assert_ne!(board_sum(&a), board_sum(&b));
    }

    #[test]
    fn test_side_to_move_is_part_of_key() {
        let white: Fen = "4k3/8/8/8/8/8/8/4KN2 w - - 0 1".parse().unwrap();
        let black: Fen = "4k3/8/8/8/8/8/8/4KN2 b - - 0 1".parse().unwrap();
        let white: Chess = white.into_position(CastlingMode::Standard).unwrap();
        let black: Chess = black.into_position(CastlingMode::Standard).unwrap();
        assert_ne!(board_sum(&white), board_sum(&black));
    }

    #[test]
    fn test_move_clocks_are_ignored() {
        let early: Fen = "4k3/8/8/8/8/8/8/4KN2 w - - 0 1".parse().unwrap();
        let late: Fen = "4k3/8/8/8/8/8/8/4KN2 w - - 12 40".parse().unwrap();
        let early: Chess = early.into_position(CastlingMode::Standard).unwrap();
        let late: Chess = late.into_position(CastlingMode::Standard).unwrap();
        assert_eq!(board_sum(&early), board_sum(&late));
    }

    #[test]
    fn test_initial_fen() {
        assert_eq!(
            fen(&Chess::default()),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn test_fen_after_double_push_has_no_ep_square() {
        let mut pos = Chess::default();
        play(&mut pos, &["e4"]);
        assert_eq!(
            fen(&pos),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }
}
