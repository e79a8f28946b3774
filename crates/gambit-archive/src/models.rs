use gambit_types::{GameResult, GameStatus};

/// A terminal game as stored in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedGame {
    pub id: String,
    pub status: GameStatus,
    pub result: GameResult,
    pub white_token: String,
    pub black_token: Option<String>,
    pub is_public: bool,
    pub time_initial_ms: u64,
    pub time_increment_ms: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// One page of the terminal-game listing plus the unpaged total.
#[derive(Clone, Debug)]
pub struct ArchivePage {
    pub games: Vec<ArchivedGame>,
    pub total: u64,
}
