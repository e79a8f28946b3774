//! Logical chess clock.
//!
//! Balances are stored as of `last_move_at`; only the side to move is
//! running. Everything here is a pure function of (record, now).

use gambit_rules::Color;
use gambit_types::{GameRecord, GameStatus};

/// Live remaining time for the side whose clock is running.
pub fn remaining_ms(balance_ms: u64, last_move_at: u64, now_ms: u64) -> i64 {
    balance_ms as i64 - now_ms.saturating_sub(last_move_at) as i64
}

/// Side to move according to the record's FEN. Defaults to white when the
/// FEN is unreadable; the replay recovery path corrects the record itself.
pub fn side_to_move(record: &GameRecord) -> Color {
    match record.current_fen.split_whitespace().nth(1) {
        Some("b") => Color::Black,
        _ => Color::White,
    }
}

pub fn balance_of(record: &GameRecord, color: Color) -> u64 {
    match color {
        Color::White => record.white_time_ms,
        Color::Black => record.black_time_ms,
    }
}

/// If the side to move has exhausted its clock, return that side (the
/// loser-by-flag). Only meaningful for timed games in progress with a
/// started clock.
pub fn flagged_side(record: &GameRecord, now_ms: u64) -> Option<Color> {
    if !record.is_timed()
        || record.status != GameStatus::InProgress
        || record.last_move_at == 0
    {
        return None;
    }
    let mover = side_to_move(record);
    if remaining_ms(balance_of(record, mover), record.last_move_at, now_ms) <= 0 {
        Some(mover)
    } else {
        None
    }
}
