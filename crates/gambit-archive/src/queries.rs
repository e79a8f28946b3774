use anyhow::{anyhow, Result};
use rusqlite::Connection;

use gambit_types::{GameRecord, GameResult, GameStatus, MoveEntry, Seats};

use crate::models::{ArchivePage, ArchivedGame};
use crate::Archive;

impl Archive {
    /// Write a terminal game and its move list. Idempotent: a second insert
    /// for the same id succeeds without touching the stored rows.
    pub fn insert_game(
        &self,
        record: &GameRecord,
        seats: &Seats,
        moves: &[MoveEntry],
        now_ms: u64,
    ) -> Result<bool> {
        let result = record
            .result
            .ok_or_else(|| anyhow!("refusing to archive {} without a result", record.id))?;
        if !record.status.is_terminal() {
            return Err(anyhow!(
                "refusing to archive {} in status {}",
                record.id,
                record.status.as_str()
            ));
        }

        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            let outcome = insert_game_tx(conn, record, result, seats, moves, now_ms);
            match outcome {
                Ok(inserted) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(inserted)
                }
                Err(e) => {
                    conn.execute_batch("ROLLBACK").ok();
                    Err(e)
                }
            }
        })
    }

    pub fn find_game(&self, id: &str) -> Result<Option<ArchivedGame>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, status, result, white_token, black_token, is_public,
                        time_initial_ms, time_increment_ms, created_at, updated_at
                 FROM games WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], row_to_game).optional()?;
            Ok(row)
        })
    }

    pub fn find_moves(&self, id: &str) -> Result<Vec<MoveEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT move_number, notation, fen, created_at
                 FROM moves WHERE game_id = ?1 ORDER BY move_number",
            )?;
            let rows = stmt
                .query_map([id], |row| {
                    Ok(MoveEntry {
                        move_number: row.get(0)?,
                        san: row.get(1)?,
                        fen: row.get(2)?,
                        created_at_ms: row.get::<_, i64>(3)? as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Newest-first page of archived games.
    pub fn list_terminal(
        &self,
        limit: u32,
        offset: u32,
        status_filter: Option<GameStatus>,
    ) -> Result<ArchivePage> {
        self.with_conn(|conn| {
            let (total, games) = match status_filter {
                Some(status) => {
                    let total: u64 = conn.query_row(
                        "SELECT COUNT(*) FROM games WHERE status = ?1",
                        [status.as_str()],
                        |row| row.get(0),
                    )?;
                    let mut stmt = conn.prepare(
                        "SELECT id, status, result, white_token, black_token, is_public,
                                time_initial_ms, time_increment_ms, created_at, updated_at
                         FROM games WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    )?;
                    let games = stmt
                        .query_map(
                            rusqlite::params![status.as_str(), limit, offset],
                            row_to_game,
                        )?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    (total, games)
                }
                None => {
                    let total: u64 =
                        conn.query_row("SELECT COUNT(*) FROM games", [], |row| row.get(0))?;
                    let mut stmt = conn.prepare(
                        "SELECT id, status, result, white_token, black_token, is_public,
                                time_initial_ms, time_increment_ms, created_at, updated_at
                         FROM games ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    )?;
                    let games = stmt
                        .query_map(rusqlite::params![limit, offset], row_to_game)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    (total, games)
                }
            };
            Ok(ArchivePage { games, total })
        })
    }
}

fn insert_game_tx(
    conn: &Connection,
    record: &GameRecord,
    result: GameResult,
    seats: &Seats,
    moves: &[MoveEntry],
    now_ms: u64,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO games
            (id, status, result, white_token, black_token, is_public,
             time_initial_ms, time_increment_ms, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            record.id.to_string(),
            record.status.as_str(),
            result.as_str(),
            seats.white_token.to_string(),
            seats.black_token.map(|t| t.to_string()),
            record.is_public as i64,
            record.time_initial_ms as i64,
            record.time_increment_ms as i64,
            record.created_at as i64,
            now_ms as i64,
        ],
    )?;
    if changed == 0 {
        // Unique-id conflict: the game is already archived.
        return Ok(false);
    }

    let game_id = record.id.to_string();
    let mut stmt = conn.prepare(
        "INSERT INTO moves (game_id, move_number, notation, fen, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in moves {
        stmt.execute(rusqlite::params![
            game_id,
            entry.move_number,
            entry.san,
            entry.fen,
            entry.created_at_ms as i64,
        ])?;
    }
    Ok(true)
}

fn row_to_game(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchivedGame> {
    let status_str: String = row.get(1)?;
    let result_str: String = row.get(2)?;
    Ok(ArchivedGame {
        id: row.get(0)?,
        status: GameStatus::parse(&status_str).unwrap_or(GameStatus::Finished),
        result: GameResult::parse(&result_str).unwrap_or(GameResult::Draw),
        white_token: row.get(3)?,
        black_token: row.get(4)?,
        is_public: row.get::<_, i64>(5)? != 0,
        time_initial_ms: row.get::<_, i64>(6)? as u64,
        time_increment_ms: row.get::<_, i64>(7)? as u64,
        created_at: row.get::<_, i64>(8)? as u64,
        updated_at: row.get::<_, i64>(9)? as u64,
    })
}

/// Extension trait for optional query results.
trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gambit_types::CreatorColor;
    use uuid::Uuid;

    fn terminal_record() -> (GameRecord, Seats) {
        let record = GameRecord {
            id: Uuid::new_v4(),
            status: GameStatus::Finished,
            result: Some(GameResult::WhiteWins),
            current_fen: "fen".into(),
            is_public: true,
            creator_color: CreatorColor::White,
            creator_ip: None,
            time_initial_ms: 60_000,
            time_increment_ms: 1_000,
            white_time_ms: 30_000,
            black_time_ms: 0,
            last_move_at: 5_000,
            created_at: 1_000,
        };
        let seats = Seats {
            white_token: Uuid::new_v4(),
            black_token: Some(Uuid::new_v4()),
            white_connected: false,
            black_connected: false,
        };
        (record, seats)
    }

    fn some_moves() -> Vec<MoveEntry> {
        vec![
            MoveEntry { move_number: 1, san: "e4".into(), fen: "f1".into(), created_at_ms: 1 },
            MoveEntry { move_number: 2, san: "e5".into(), fen: "f2".into(), created_at_ms: 2 },
        ]
    }

    #[test]
    fn insert_then_read_back() {
        let archive = Archive::open_in_memory().unwrap();
        let (record, seats) = terminal_record();
        assert!(archive.insert_game(&record, &seats, &some_moves(), 9_000).unwrap());

        let found = archive.find_game(&record.id.to_string()).unwrap().unwrap();
        assert_eq!(found.result, GameResult::WhiteWins);
        assert_eq!(found.updated_at, 9_000);

        let moves = archive.find_moves(&record.id.to_string()).unwrap();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].san, "e4");
    }

    #[test]
    fn double_insert_is_idempotent() {
        let archive = Archive::open_in_memory().unwrap();
        let (record, seats) = terminal_record();
        assert!(archive.insert_game(&record, &seats, &some_moves(), 1).unwrap());
        assert!(!archive.insert_game(&record, &seats, &some_moves(), 2).unwrap());

        let moves = archive.find_moves(&record.id.to_string()).unwrap();
        assert_eq!(moves.len(), 2, "moves must not duplicate");
        let page = archive.list_terminal(10, 0, None).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn refuses_non_terminal_games() {
        let archive = Archive::open_in_memory().unwrap();
        let (mut record, seats) = terminal_record();
        record.status = GameStatus::InProgress;
        assert!(archive.insert_game(&record, &seats, &[], 1).is_err());
        record.status = GameStatus::Finished;
        record.result = None;
        assert!(archive.insert_game(&record, &seats, &[], 1).is_err());
    }

    #[test]
    fn pagination_and_status_filter() {
        let archive = Archive::open_in_memory().unwrap();
        for i in 0..5 {
            let (mut record, seats) = terminal_record();
            record.created_at = i;
            if i % 2 == 0 {
                record.status = GameStatus::Abandoned;
                record.result = Some(GameResult::BlackWins);
            }
            archive.insert_game(&record, &seats, &[], 100).unwrap();
        }

        let page = archive.list_terminal(2, 0, None).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.games.len(), 2);
        // Newest first.
        assert_eq!(page.games[0].created_at, 4);

        let abandoned = archive.list_terminal(10, 0, Some(GameStatus::Abandoned)).unwrap();
        assert_eq!(abandoned.total, 3);
        assert!(abandoned.games.iter().all(|g| g.status == GameStatus::Abandoned));
    }
}
