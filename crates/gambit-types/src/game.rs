//! The game record and its satellite types.

use gambit_rules::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Waiting,
    InProgress,
    Finished,
    Abandoned,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "WAITING",
            GameStatus::InProgress => "IN_PROGRESS",
            GameStatus::Finished => "FINISHED",
            GameStatus::Abandoned => "ABANDONED",
        }
    }

    pub fn parse(s: &str) -> Option<GameStatus> {
        match s {
            "WAITING" => Some(GameStatus::Waiting),
            "IN_PROGRESS" => Some(GameStatus::InProgress),
            "FINISHED" => Some(GameStatus::Finished),
            "ABANDONED" => Some(GameStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameResult {
    pub fn win_for(color: Color) -> GameResult {
        match color {
            Color::White => GameResult::WhiteWins,
            Color::Black => GameResult::BlackWins,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "WHITE_WINS",
            GameResult::BlackWins => "BLACK_WINS",
            GameResult::Draw => "DRAW",
        }
    }

    pub fn parse(s: &str) -> Option<GameResult> {
        match s {
            "WHITE_WINS" => Some(GameResult::WhiteWins),
            "BLACK_WINS" => Some(GameResult::BlackWins),
            "DRAW" => Some(GameResult::Draw),
            _ => None,
        }
    }

    /// PGN result token.
    pub fn pgn_token(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }
}

/// Which color the room's creator asked for. `Random` resolves by coin flip
/// when the second player joins.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatorColor {
    White,
    Black,
    Random,
}

impl CreatorColor {
    pub fn as_str(self) -> &'static str {
        match self {
            CreatorColor::White => "white",
            CreatorColor::Black => "black",
            CreatorColor::Random => "random",
        }
    }

    pub fn parse(s: &str) -> Option<CreatorColor> {
        match s {
            "white" => Some(CreatorColor::White),
            "black" => Some(CreatorColor::Black),
            "random" => Some(CreatorColor::Random),
            _ => None,
        }
    }
}

/// The authoritative per-room game record. Clock balances are the values at
/// `last_move_at`, not at read time; the live remaining time of the side to
/// move is derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameRecord {
    pub id: Uuid,
    pub status: GameStatus,
    pub result: Option<GameResult>,
    pub current_fen: String,
    pub is_public: bool,
    pub creator_color: CreatorColor,
    pub creator_ip: Option<String>,
    pub time_initial_ms: u64,
    pub time_increment_ms: u64,
    pub white_time_ms: u64,
    pub black_time_ms: u64,
    pub last_move_at: u64,
    pub created_at: u64,
}

impl GameRecord {
    /// Zero initial time means the game is untimed.
    pub fn is_timed(&self) -> bool {
        self.time_initial_ms > 0
    }
}

/// Seat bindings, kept apart from the record so joins can swap tokens
/// atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seats {
    pub white_token: Uuid,
    pub black_token: Option<Uuid>,
    pub white_connected: bool,
    pub black_connected: bool,
}

impl Seats {
    /// Resolve a bearer token to a seat. Anything else is a spectator.
    pub fn role_of(&self, token: Option<Uuid>) -> PlayerRole {
        match token {
            Some(t) if t == self.white_token => PlayerRole::White,
            Some(t) if Some(t) == self.black_token => PlayerRole::Black,
            _ => PlayerRole::Spectator,
        }
    }

    pub fn connected(&self, color: Color) -> bool {
        match color {
            Color::White => self.white_connected,
            Color::Black => self.black_connected,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    White,
    Black,
    Spectator,
    Unknown,
}

impl PlayerRole {
    pub fn color(self) -> Option<Color> {
        match self {
            PlayerRole::White => Some(Color::White),
            PlayerRole::Black => Some(Color::Black),
            _ => None,
        }
    }
}

/// One accepted move. `move_number` is the 1-based ordinal in the log, not
/// the chess fullmove number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEntry {
    pub move_number: u32,
    pub san: String,
    pub fen: String,
    pub created_at_ms: u64,
}

/// Deadline after which a disconnected player's game may be finalized
/// against them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbandonmentTimer {
    pub disconnected_color: Color,
    pub deadline_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_result_round_trip_their_wire_names() {
        for s in [
            GameStatus::Waiting,
            GameStatus::InProgress,
            GameStatus::Finished,
            GameStatus::Abandoned,
        ] {
            assert_eq!(GameStatus::parse(s.as_str()), Some(s));
        }
        for r in [GameResult::WhiteWins, GameResult::BlackWins, GameResult::Draw] {
            assert_eq!(GameResult::parse(r.as_str()), Some(r));
        }
        assert_eq!(GameStatus::parse("waiting"), None);
    }

    #[test]
    fn seat_role_resolution() {
        let white = Uuid::new_v4();
        let black = Uuid::new_v4();
        let seats = Seats {
            white_token: white,
            black_token: Some(black),
            white_connected: true,
            black_connected: false,
        };
        assert_eq!(seats.role_of(Some(white)), PlayerRole::White);
        assert_eq!(seats.role_of(Some(black)), PlayerRole::Black);
        assert_eq!(seats.role_of(Some(Uuid::new_v4())), PlayerRole::Spectator);
        assert_eq!(seats.role_of(None), PlayerRole::Spectator);
    }

    #[test]
    fn pgn_tokens() {
        assert_eq!(GameResult::WhiteWins.pgn_token(), "1-0");
        assert_eq!(GameResult::Draw.pgn_token(), "1/2-1/2");
    }
}
