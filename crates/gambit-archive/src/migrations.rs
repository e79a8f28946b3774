use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Current schema version. Increment this and add a new migration function
/// to the `MIGRATIONS` array when the schema changes.
const CURRENT_VERSION: u32 = 1;

type MigrationFn = fn(&Connection) -> Result<()>;

/// Ordered list of migrations. Index 0 = version 1.
const MIGRATIONS: &[MigrationFn] = &[migrate_v1];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = get_current_version(conn)?;
    if current >= CURRENT_VERSION {
        return Ok(());
    }

    // Each migration + version bump runs in one transaction; BEGIN IMMEDIATE
    // takes the write lock up front so concurrent starters cannot interleave.
    for version in (current + 1)..=CURRENT_VERSION {
        let idx = (version - 1) as usize;
        info!("Applying archive migration v{}", version);

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match MIGRATIONS[idx](conn) {
            Ok(()) => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
                conn.execute_batch("COMMIT")?;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(anyhow::anyhow!("archive migration v{} failed: {}", version, e));
            }
        }
    }

    info!("Archive migrations complete (now at v{})", CURRENT_VERSION);
    Ok(())
}

fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Version 1: games and their move lists.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS games (
            id                 TEXT PRIMARY KEY,
            status             TEXT NOT NULL,
            result             TEXT NOT NULL,
            white_token        TEXT NOT NULL,
            black_token        TEXT,
            is_public          INTEGER NOT NULL DEFAULT 0,
            time_initial_ms    INTEGER NOT NULL DEFAULT 0,
            time_increment_ms  INTEGER NOT NULL DEFAULT 0,
            created_at         INTEGER NOT NULL,
            updated_at         INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS moves (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id      TEXT NOT NULL REFERENCES games(id),
            move_number  INTEGER NOT NULL,
            notation     TEXT NOT NULL,
            fen          TEXT NOT NULL,
            created_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_moves_game
            ON moves(game_id, move_number);

        CREATE INDEX IF NOT EXISTS idx_games_created
            ON games(created_at DESC);
        ",
    )?;
    Ok(())
}
