//! Chess rules oracle.
//!
//! Pure library: positions, move legality, SAN, FEN, and draw-by-rule
//! detection. The server treats this crate as the sole authority on what a
//! move does; nothing here touches a clock or a store.

mod board;
mod fen;
mod san;

use serde::{Deserialize, Serialize};

use board::{Board, Move};

/// FEN of the standard starting position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Color {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "white" => Ok(Color::White),
            "black" => Ok(Color::Black),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Piece {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl Piece {
    pub(crate) fn index(self) -> usize {
        match self {
            Piece::Pawn => 0,
            Piece::Knight => 1,
            Piece::Bishop => 2,
            Piece::Rook => 3,
            Piece::Queen => 4,
            Piece::King => 5,
        }
    }
}

/// A board square named like `e4`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Square(u8);

impl Square {
    /// Parse `[a-h][1-8]`.
    pub fn parse(s: &str) -> Option<Square> {
        fen::square_from_str(s).map(Square)
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Square {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&fen::square_to_string(self.0))
    }
}

/// Promotion choice. The wire protocol restricts promotions to these four.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    pub fn from_str(s: &str) -> Option<Promotion> {
        match s {
            "q" => Some(Promotion::Queen),
            "r" => Some(Promotion::Rook),
            "b" => Some(Promotion::Bishop),
            "n" => Some(Promotion::Knight),
            _ => None,
        }
    }

    fn piece(self) -> Piece {
        match self {
            Promotion::Queen => Piece::Queen,
            Promotion::Rook => Piece::Rook,
            Promotion::Bishop => Piece::Bishop,
            Promotion::Knight => Piece::Knight,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FenError {
    #[error("expected 6 FEN fields, got {0}")]
    FieldCount(usize),
    #[error("malformed piece placement")]
    Placement,
    #[error("bad side to move: {0}")]
    SideToMove(String),
    #[error("bad castling rights: {0}")]
    Castling(String),
    #[error("bad en passant square: {0}")]
    EnPassant(String),
    #[error("bad move clock: {0}")]
    Clock(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("illegal move")]
pub struct IllegalMove;

/// Everything the server needs to know about an accepted move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub san: String,
    pub fen: String,
    pub captured: bool,
    pub check: bool,
    pub checkmate: bool,
    pub stalemate: bool,
    pub insufficient_material: bool,
    pub fifty_move_draw: bool,
    pub threefold: bool,
}

impl MoveOutcome {
    /// A move that terminates the game by rule.
    pub fn is_terminal(&self) -> bool {
        self.checkmate
            || self.stalemate
            || self.insufficient_material
            || self.fifty_move_draw
            || self.threefold
    }

    /// Draw by rule (terminal but not a win).
    pub fn is_draw(&self) -> bool {
        self.is_terminal() && !self.checkmate
    }
}

/// Result of replaying a SAN move sequence from the initial position.
#[derive(Debug)]
pub struct Replay {
    pub position: Position,
    /// Index of the first move that failed to replay, if any. Moves before
    /// it were applied; the rest were discarded.
    pub failed_at: Option<usize>,
}

/// A chess position plus the repetition history needed for threefold
/// detection.
#[derive(Clone, Debug)]
pub struct Position {
    board: Board,
    history: Vec<u64>,
}

impl Position {
    pub fn initial() -> Position {
        let board = Board::initial();
        let hash = board.repetition_hash();
        Position { board, history: vec![hash] }
    }

    /// Strict FEN parse. Repetition history restarts at the given position;
    /// callers that need full threefold tracking should `replay` the move
    /// log instead.
    pub fn from_fen(fen: &str) -> Result<Position, FenError> {
        let board = fen::parse(fen)?;
        let hash = board.repetition_hash();
        Ok(Position { board, history: vec![hash] })
    }

    pub fn fen(&self) -> String {
        fen::render(&self.board)
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side
    }

    pub fn in_check(&self) -> bool {
        self.board.in_check(self.board.side)
    }

    pub fn fullmove_number(&self) -> u16 {
        self.board.fullmove
    }

    /// Validate and apply a move given as coordinates, returning its SAN and
    /// the post-move state flags. The position is unchanged on error.
    pub fn play(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<Promotion>,
    ) -> Result<MoveOutcome, IllegalMove> {
        let mv = Move {
            from: from.index(),
            to: to.index(),
            promotion: promotion.map(Promotion::piece),
        };
        self.play_inner(mv)
    }

    /// Apply a move given in SAN, as stored in the move log.
    pub fn play_san(&mut self, token: &str) -> Result<MoveOutcome, IllegalMove> {
        let mv = san::find_move(&self.board, token).ok_or(IllegalMove)?;
        self.play_inner(mv)
    }

    fn play_inner(&mut self, mv: Move) -> Result<MoveOutcome, IllegalMove> {
        let before = self.board;
        let mut after = self.board;
        let effect = after.apply(mv).ok_or(IllegalMove)?;

        let san = san::render(&before, &after, mv, effect);
        self.board = after;
        let hash = after.repetition_hash();
        self.history.push(hash);

        let check = after.in_check(after.side);
        let any_reply = after.has_any_legal_move();
        let repetitions = self.history.iter().filter(|h| **h == hash).count();

        Ok(MoveOutcome {
            san,
            fen: fen::render(&after),
            captured: effect.capture,
            check,
            checkmate: check && !any_reply,
            stalemate: !check && !any_reply,
            insufficient_material: after.insufficient_material(),
            fifty_move_draw: after.halfmove >= 100,
            threefold: repetitions >= 3,
        })
    }

    /// Number of legal moves available to the side to move.
    pub fn legal_move_count(&self) -> usize {
        self.board.legal_moves().len()
    }
}

/// Replay a SAN sequence from the initial position, stopping at the first
/// move that fails. Used to reconcile a stored move log with the record.
pub fn replay<S: AsRef<str>>(moves: &[S]) -> Replay {
    let mut position = Position::initial();
    for (i, token) in moves.iter().enumerate() {
        if position.play_san(token.as_ref()).is_err() {
            return Replay { position, failed_at: Some(i) };
        }
    }
    Replay { position, failed_at: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_fen_constant_round_trips() {
        assert_eq!(Position::initial().fen(), INITIAL_FEN);
    }

    #[test]
    fn play_rejects_illegal_and_preserves_position() {
        let mut pos = Position::initial();
        let before = pos.fen();
        let err = pos.play(
            Square::parse("e2").unwrap(),
            Square::parse("e6").unwrap(),
            None,
        );
        assert_eq!(err, Err(IllegalMove));
        assert_eq!(pos.fen(), before);
    }

    #[test]
    fn threefold_detected_through_history() {
        let mut pos = Position::initial();
        // Shuffle knights back and forth; the third occurrence of the start
        // shape (with white to move) trips the detector.
        let mut last = None;
        for _ in 0..2 {
            for san in ["Nf3", "Nf6", "Ng1", "Ng8"] {
                last = Some(pos.play_san(san).unwrap());
            }
        }
        assert!(last.unwrap().threefold);
    }
}
