//! Shared vocabulary of the gambit server: the game data model, the wire
//! frames exchanged over the WebSocket, and the error taxonomy.

pub mod error;
pub mod frames;
pub mod game;

pub use error::GameError;
pub use frames::{ClientFrame, FrameError, ServerFrame, MAX_FRAME_BYTES};
pub use game::{
    AbandonmentTimer, CreatorColor, GameRecord, GameResult, GameStatus, MoveEntry, PlayerRole,
    Seats,
};

pub use gambit_rules::Color;

/// Current time as epoch milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
