//! FEN parsing and rendering.

use crate::board::{Board, CASTLE_BK, CASTLE_BQ, CASTLE_WK, CASTLE_WQ};
use crate::{Color, FenError, Piece};

pub(crate) fn parse(fen: &str) -> Result<Board, FenError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(FenError::FieldCount(fields.len()));
    }

    let mut board = Board::empty();

    let ranks: Vec<&str> = fields[0].split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::Placement);
    }
    for (i, rank_str) in ranks.iter().enumerate() {
        let rank = 7 - i as u8;
        let mut file = 0u8;
        for c in rank_str.chars() {
            if let Some(skip) = c.to_digit(10) {
                if skip == 0 || skip > 8 {
                    return Err(FenError::Placement);
                }
                file += skip as u8;
            } else {
                let (color, piece) = piece_from_char(c).ok_or(FenError::Placement)?;
                if file >= 8 {
                    return Err(FenError::Placement);
                }
                board.put(color, piece, rank * 8 + file);
                file += 1;
            }
            if file > 8 {
                return Err(FenError::Placement);
            }
        }
        if file != 8 {
            return Err(FenError::Placement);
        }
    }

    board.side = match fields[1] {
        "w" => Color::White,
        "b" => Color::Black,
        other => return Err(FenError::SideToMove(other.to_string())),
    };

    board.castling = 0;
    if fields[2] != "-" {
        for c in fields[2].chars() {
            board.castling |= match c {
                'K' => CASTLE_WK,
                'Q' => CASTLE_WQ,
                'k' => CASTLE_BK,
                'q' => CASTLE_BQ,
                _ => return Err(FenError::Castling(fields[2].to_string())),
            };
        }
    }

    board.ep = match fields[3] {
        "-" => None,
        s => Some(square_from_str(s).ok_or_else(|| FenError::EnPassant(s.to_string()))?),
    };

    board.halfmove = fields[4]
        .parse()
        .map_err(|_| FenError::Clock(fields[4].to_string()))?;
    board.fullmove = fields[5]
        .parse()
        .map_err(|_| FenError::Clock(fields[5].to_string()))?;
    if board.fullmove == 0 {
        return Err(FenError::Clock(fields[5].to_string()));
    }

    // Exactly one king per side; anything else breaks check detection.
    for color in [Color::White, Color::Black] {
        let kings = board.pieces[color.index() * 6 + Piece::King.index()];
        if kings.count_ones() != 1 {
            return Err(FenError::Placement);
        }
    }

    Ok(board)
}

pub(crate) fn render(board: &Board) -> String {
    let mut out = String::with_capacity(80);
    for rank in (0..8u8).rev() {
        let mut empty = 0;
        for file in 0..8u8 {
            match board.piece_at(rank * 8 + file) {
                Some((color, piece)) => {
                    if empty > 0 {
                        out.push(char::from_digit(empty, 10).unwrap());
                        empty = 0;
                    }
                    out.push(piece_to_char(color, piece));
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            out.push(char::from_digit(empty, 10).unwrap());
        }
        if rank > 0 {
            out.push('/');
        }
    }

    out.push(' ');
    out.push(if board.side == Color::White { 'w' } else { 'b' });

    out.push(' ');
    if board.castling == 0 {
        out.push('-');
    } else {
        for (bit, c) in [
            (CASTLE_WK, 'K'),
            (CASTLE_WQ, 'Q'),
            (CASTLE_BK, 'k'),
            (CASTLE_BQ, 'q'),
        ] {
            if board.castling & bit != 0 {
                out.push(c);
            }
        }
    }

    out.push(' ');
    match board.ep {
        Some(sq) => out.push_str(&square_to_string(sq)),
        None => out.push('-'),
    }

    out.push_str(&format!(" {} {}", board.halfmove, board.fullmove));
    out
}

pub(crate) fn square_from_str(s: &str) -> Option<u8> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    let file = bytes[0].checked_sub(b'a')?;
    let rank = bytes[1].checked_sub(b'1')?;
    if file > 7 || rank > 7 {
        return None;
    }
    Some((rank << 3) | file)
}

pub(crate) fn square_to_string(sq: u8) -> String {
    let file = (b'a' + (sq & 7)) as char;
    let rank = (b'1' + (sq >> 3)) as char;
    format!("{file}{rank}")
}

fn piece_from_char(c: char) -> Option<(Color, Piece)> {
    let color = if c.is_ascii_uppercase() { Color::White } else { Color::Black };
    let piece = match c.to_ascii_lowercase() {
        'p' => Piece::Pawn,
        'n' => Piece::Knight,
        'b' => Piece::Bishop,
        'r' => Piece::Rook,
        'q' => Piece::Queen,
        'k' => Piece::King,
        _ => return None,
    };
    Some((color, piece))
}

fn piece_to_char(color: Color, piece: Piece) -> char {
    let c = match piece {
        Piece::Pawn => 'p',
        Piece::Knight => 'n',
        Piece::Bishop => 'b',
        Piece::Rook => 'r',
        Piece::Queen => 'q',
        Piece::King => 'k',
    };
    if color == Color::White {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INITIAL_FEN;

    #[test]
    fn initial_round_trip() {
        let board = parse(INITIAL_FEN).unwrap();
        assert_eq!(render(&board), INITIAL_FEN);
        assert!(Board::initial() == board);
    }

    #[test]
    fn mid_game_round_trip() {
        let fen = "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3";
        assert_eq!(render(&parse(fen).unwrap()), fen);
    }

    #[test]
    fn rejects_malformed_inputs() {
        assert!(matches!(parse("only three fields here x"), Err(FenError::FieldCount(_))));
        assert!(parse("8/8/8/8/8/8/8/9 w - - 0 1").is_err());
        assert!(parse("8/8/8/8/8/8/8/8 x - - 0 1").is_err());
        // No kings.
        assert!(parse("8/8/8/8/8/8/8/8 w - - 0 1").is_err());
        let two_kings = "kk6/8/8/8/8/8/8/KK6 w - - 0 1";
        assert!(parse(two_kings).is_err());
    }

    #[test]
    fn en_passant_square_parses() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        let board = parse(fen).unwrap();
        assert_eq!(board.ep, Some(square_from_str("e3").unwrap()));
    }
}
