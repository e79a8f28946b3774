//! Standard Algebraic Notation rendering and matching.
//!
//! Rendering follows the FIDE/PGN canonical form: piece letter, minimal
//! disambiguation (file, then rank, then both), `x` for captures, `O-O` /
//! `O-O-O`, `=Q` promotions, `+` check and `#` mate suffixes.

use crate::board::{file_of, rank_of, Board, Move, MoveEffect};
use crate::fen::square_to_string;
use crate::Piece;

pub(crate) fn render(before: &Board, after: &Board, mv: Move, effect: MoveEffect) -> String {
    let mut san = String::new();

    if effect.castled_kingside {
        san.push_str("O-O");
    } else if effect.castled_queenside {
        san.push_str("O-O-O");
    } else {
        let (_, piece) = before
            .piece_at(mv.from)
            .expect("rendered move came from apply");

        match piece {
            Piece::Pawn => {
                if effect.capture {
                    san.push((b'a' + file_of(mv.from)) as char);
                }
            }
            _ => {
                san.push(piece_letter(piece));
                san.push_str(&disambiguation(before, mv, piece));
            }
        }

        if effect.capture {
            san.push('x');
        }
        san.push_str(&square_to_string(mv.to));

        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(piece_letter(promo));
        } else if piece == Piece::Pawn && (rank_of(mv.to) == 0 || rank_of(mv.to) == 7) {
            // apply() promotes to queen when no piece was named.
            san.push_str("=Q");
        }
    }

    if after.in_check(after.side) {
        san.push(if after.has_any_legal_move() { '+' } else { '#' });
    }

    san
}

/// Minimal origin disambiguation when another piece of the same kind could
/// also legally reach the destination.
fn disambiguation(before: &Board, mv: Move, piece: Piece) -> String {
    let mut same_file = false;
    let mut same_rank = false;
    let mut ambiguous = false;

    for other in before.legal_moves() {
        if other.to != mv.to || other.from == mv.from {
            continue;
        }
        match before.piece_at(other.from) {
            Some((_, p)) if p == piece => {}
            _ => continue,
        }
        ambiguous = true;
        if file_of(other.from) == file_of(mv.from) {
            same_file = true;
        }
        if rank_of(other.from) == rank_of(mv.from) {
            same_rank = true;
        }
    }

    if !ambiguous {
        return String::new();
    }
    let file = (b'a' + file_of(mv.from)) as char;
    let rank = (b'1' + rank_of(mv.from)) as char;
    if !same_file {
        file.to_string()
    } else if !same_rank {
        rank.to_string()
    } else {
        format!("{file}{rank}")
    }
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

/// Find the legal move whose canonical SAN equals `token` (after stripping
/// trailing annotation glyphs). Used by replay.
pub(crate) fn find_move(board: &Board, token: &str) -> Option<Move> {
    let wanted = token.trim_end_matches(['!', '?']);
    for mv in board.legal_moves() {
        let mut probe = *board;
        let effect = probe.apply(mv)?;
        if render(board, &probe, mv, effect) == wanted {
            return Some(mv);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::square_from_str;
    use crate::Color;

    fn sq(name: &str) -> u8 {
        square_from_str(name).unwrap()
    }

    fn play(board: &mut Board, from: &str, to: &str) -> String {
        let mv = Move { from: sq(from), to: sq(to), promotion: None };
        let before = *board;
        let effect = board.apply(mv).expect("legal move");
        render(&before, board, mv, effect)
    }

    #[test]
    fn plain_moves_and_captures() {
        let mut b = Board::initial();
        assert_eq!(play(&mut b, "e2", "e4"), "e4");
        assert_eq!(play(&mut b, "d7", "d5"), "d5");
        assert_eq!(play(&mut b, "e4", "d5"), "exd5");
        assert_eq!(play(&mut b, "d8", "d5"), "Qxd5");
    }

    #[test]
    fn castle_notation() {
        let mut b = Board::initial();
        for (f, t) in [("e2", "e4"), ("e7", "e5"), ("g1", "f3"), ("b8", "c6"), ("f1", "c4"), ("g8", "f6")] {
            play(&mut b, f, t);
        }
        assert_eq!(play(&mut b, "e1", "g1"), "O-O");
    }

    #[test]
    fn knight_file_disambiguation() {
        // Two knights on b1 and f3 can both reach d2.
        let mut b = Board::empty();
        b.put(Color::White, Piece::King, sq("e1"));
        b.put(Color::Black, Piece::King, sq("e8"));
        b.put(Color::White, Piece::Knight, sq("b1"));
        b.put(Color::White, Piece::Knight, sq("f3"));
        assert_eq!(play(&mut b, "b1", "d2"), "Nbd2");
    }

    #[test]
    fn rank_disambiguation_when_files_match() {
        // Rooks on a1 and a5 can both reach a3.
        let mut b = Board::empty();
        b.put(Color::White, Piece::King, sq("e1"));
        b.put(Color::Black, Piece::King, sq("e8"));
        b.put(Color::White, Piece::Rook, sq("a1"));
        b.put(Color::White, Piece::Rook, sq("a5"));
        assert_eq!(play(&mut b, "a1", "a3"), "R1a3");
    }

    #[test]
    fn mate_suffix() {
        let mut b = Board::initial();
        for (f, t) in [("f2", "f3"), ("e7", "e5"), ("g2", "g4")] {
            play(&mut b, f, t);
        }
        assert_eq!(play(&mut b, "d8", "h4"), "Qh4#");
    }

    #[test]
    fn promotion_notation() {
        let mut b = Board::empty();
        b.put(Color::White, Piece::King, sq("a1"));
        b.put(Color::Black, Piece::King, sq("h7"));
        b.put(Color::White, Piece::Pawn, sq("b7"));
        let mv = Move { from: sq("b7"), to: sq("b8"), promotion: Some(Piece::Queen) };
        let before = b;
        let effect = b.apply(mv).unwrap();
        assert_eq!(render(&before, &b, mv, effect), "b8=Q");
    }

    #[test]
    fn find_move_matches_canonical_tokens() {
        let b = Board::initial();
        let mv = find_move(&b, "Nf3").unwrap();
        assert_eq!(mv.from, sq("g1"));
        assert_eq!(mv.to, sq("f3"));
        assert!(find_move(&b, "Nf6").is_none());
        assert!(find_move(&b, "garbage").is_none());
    }
}
