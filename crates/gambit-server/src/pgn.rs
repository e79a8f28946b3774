//! PGN text generation for export.

use chrono::{TimeZone, Utc};

use gambit_types::{GameResult, MoveEntry};

/// Render a game as PGN: seven-tag roster plus movetext. `result` is `None`
/// for games still in progress (`*`).
pub fn render(
    game_id: &str,
    result: Option<GameResult>,
    created_at_ms: u64,
    moves: &[MoveEntry],
) -> String {
    let date = Utc
        .timestamp_millis_opt(created_at_ms as i64)
        .single()
        .map(|t| t.format("%Y.%m.%d").to_string())
        .unwrap_or_else(|| "????.??.??".into());
    let result_token = result.map(GameResult::pgn_token).unwrap_or("*");

    let mut pgn = String::new();
    pgn.push_str("[Event \"Casual game\"]\n");
    pgn.push_str("[Site \"gambit\"]\n");
    pgn.push_str(&format!("[Date \"{date}\"]\n"));
    pgn.push_str("[Round \"-\"]\n");
    pgn.push_str("[White \"Anonymous\"]\n");
    pgn.push_str("[Black \"Anonymous\"]\n");
    pgn.push_str(&format!("[Result \"{result_token}\"]\n"));
    pgn.push_str(&format!("[GameId \"{game_id}\"]\n"));
    pgn.push('\n');

    let mut line = String::new();
    for (i, entry) in moves.iter().enumerate() {
        if i % 2 == 0 {
            line.push_str(&format!("{}. ", i / 2 + 1));
        }
        line.push_str(&entry.san);
        line.push(' ');
    }
    line.push_str(result_token);
    pgn.push_str(&line);
    pgn.push('\n');
    pgn
}
