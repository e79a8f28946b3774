//! Session store: every mutation of the game record goes through here.
//!
//! Each operation runs as one atomic transaction against the hot store, so
//! concurrent message loops touching the same room serialize on the script,
//! not on any per-room mutex. The archive is written after the hot-state
//! transition commits; its idempotent insert makes the pair safe to retry.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};
use uuid::Uuid;

use gambit_archive::Archive;
use gambit_hot::{HotStore, Txn};
use gambit_rules::Color;
use gambit_types::{
    AbandonmentTimer, CreatorColor, GameError, GameRecord, GameResult, GameStatus, MoveEntry,
    Seats,
};

use crate::codec;
use crate::keys;

/// Hot-key TTLs per status. Every mutation refreshes the room's sub-keys.
pub const TTL_WAITING_MS: u64 = 60 * 60 * 1000;
pub const TTL_IN_PROGRESS_MS: u64 = 24 * 60 * 60 * 1000;
pub const TTL_TERMINAL_MS: u64 = 60 * 60 * 1000;

/// Clock bounds; out-of-range requests are clamped, not rejected.
pub const MAX_TIME_INITIAL_MS: u64 = 3 * 60 * 60 * 1000;
pub const MAX_TIME_INCREMENT_MS: u64 = 5 * 60 * 1000;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub claim_win_timeout_ms: u64,
    pub abandonment_timeout_ms: u64,
    pub max_active_games_per_ip: u64,
    pub waiting_game_max_age_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            claim_win_timeout_ms: 60_000,
            abandonment_timeout_ms: 300_000,
            max_active_games_per_ip: 5,
            waiting_game_max_age_ms: 3_600_000,
            sweep_interval_ms: 300_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreateGameParams {
    pub is_public: bool,
    pub creator_ip: Option<String>,
    pub time_initial_ms: u64,
    pub time_increment_ms: u64,
    pub creator_color: CreatorColor,
}

/// What the joiner walks away with.
#[derive(Clone, Debug)]
pub struct JoinOutcome {
    pub token: Uuid,
    pub color: Color,
    pub record: GameRecord,
    pub seats: Seats,
}

/// Result of the atomic time-deduction script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeductOutcome {
    Applied {
        white_time_ms: u64,
        black_time_ms: u64,
        last_move_at: u64,
    },
    TimedOut {
        loser: Color,
        white_time_ms: u64,
        black_time_ms: u64,
    },
}

/// Tokens of a freshly minted rematch room. Colors are swapped relative to
/// the previous game: the old white player holds `black_token`.
#[derive(Clone, Debug)]
pub struct RematchGame {
    pub id: Uuid,
    pub white_token: Uuid,
    pub black_token: Uuid,
}

#[derive(Clone)]
pub struct SessionStore {
    hot: HotStore,
    archive: Arc<Archive>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(hot: HotStore, archive: Arc<Archive>, config: SessionConfig) -> SessionStore {
        SessionStore { hot, archive, config }
    }

    pub fn hot(&self) -> &HotStore {
        &self.hot
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── creation and joining ────────────────────────────────────────────

    pub fn create_game(
        &self,
        params: &CreateGameParams,
        now_ms: u64,
    ) -> Result<(Uuid, Uuid), GameError> {
        let creator_ip = match &params.creator_ip {
            Some(raw) => Some(keys::sanitize_ip(raw).ok_or(GameError::InvalidId)?),
            None => None,
        };

        let id = Uuid::new_v4();
        let white_token = Uuid::new_v4();
        let record = GameRecord {
            id,
            status: GameStatus::Waiting,
            result: None,
            current_fen: gambit_rules::INITIAL_FEN.to_string(),
            is_public: params.is_public,
            creator_color: params.creator_color,
            creator_ip: creator_ip.clone(),
            time_initial_ms: params.time_initial_ms.min(MAX_TIME_INITIAL_MS),
            time_increment_ms: params.time_increment_ms.min(MAX_TIME_INCREMENT_MS),
            white_time_ms: 0,
            black_time_ms: 0,
            last_move_at: 0,
            created_at: now_ms,
        };
        let seats = Seats {
            white_token,
            black_token: None,
            white_connected: false,
            black_connected: false,
        };

        let max_per_ip = self.config.max_active_games_per_ip;
        self.hot.atomically(now_ms, |txn| {
            if let Some(ip) = &creator_ip {
                if active_games_of_ip(txn, ip) >= max_per_ip {
                    return Err(GameError::QuotaExceeded);
                }
                txn.sadd(&keys::ip_games_key(ip), &id.to_string());
            }

            txn.hset_many(&keys::game_key(&id), &codec::record_fields(&record));
            txn.hset_many(&keys::seats_key(&id), &codec::seats_fields(&seats));
            if record.is_public {
                txn.zadd(keys::LOBBY_KEY, &id.to_string(), now_ms as i64);
            }
            refresh_ttls(txn, &id, TTL_WAITING_MS);
            Ok(())
        })?;

        debug!(game = %id, public = params.is_public, "game created");
        Ok((id, white_token))
    }

    /// The join script: seat the second player, resolve colors, flip the
    /// room to IN_PROGRESS, and start the clock of a timed game.
    pub fn join(&self, id: Uuid, now_ms: u64) -> Result<JoinOutcome, GameError> {
        self.hot.atomically(now_ms, |txn| {
            let mut record = read_record(txn, id)?.ok_or(GameError::NotFound)?;
            let mut seats = read_seats(txn, id)?.ok_or(GameError::NotFound)?;

            if record.status != GameStatus::Waiting {
                return Err(GameError::NotWaiting);
            }
            if seats.black_token.is_some() {
                return Err(GameError::AlreadyFull);
            }

            let joiner_token = Uuid::new_v4();
            let creator_takes_black = match record.creator_color {
                CreatorColor::White => false,
                CreatorColor::Black => true,
                // Unbiased coin flip, resolved at join time.
                CreatorColor::Random => rand::thread_rng().gen::<bool>(),
            };
            let joiner_color = if creator_takes_black {
                seats.black_token = Some(seats.white_token);
                seats.white_token = joiner_token;
                Color::White
            } else {
                seats.black_token = Some(joiner_token);
                Color::Black
            };

            record.status = GameStatus::InProgress;
            if record.is_timed() {
                record.white_time_ms = record.time_initial_ms;
                record.black_time_ms = record.time_initial_ms;
                record.last_move_at = now_ms;
            }

            write_record(txn, &record);
            // Rewrite the whole seats hash so the token swap is one unit.
            txn.del(&keys::seats_key(&id));
            txn.hset_many(&keys::seats_key(&id), &codec::seats_fields(&seats));
            refresh_ttls(txn, &id, TTL_IN_PROGRESS_MS);

            Ok(JoinOutcome { token: joiner_token, color: joiner_color, record, seats })
        })
    }

    pub fn create_rematch_game(
        &self,
        prev: &GameRecord,
        now_ms: u64,
    ) -> Result<RematchGame, GameError> {
        let id = Uuid::new_v4();
        let white_token = Uuid::new_v4();
        let black_token = Uuid::new_v4();

        let timed = prev.time_initial_ms > 0;
        let record = GameRecord {
            id,
            status: GameStatus::InProgress,
            result: None,
            current_fen: gambit_rules::INITIAL_FEN.to_string(),
            is_public: prev.is_public,
            creator_color: prev.creator_color,
            creator_ip: prev.creator_ip.clone(),
            time_initial_ms: prev.time_initial_ms,
            time_increment_ms: prev.time_increment_ms,
            white_time_ms: if timed { prev.time_initial_ms } else { 0 },
            black_time_ms: if timed { prev.time_initial_ms } else { 0 },
            last_move_at: if timed { now_ms } else { 0 },
            created_at: now_ms,
        };
        let seats = Seats {
            white_token,
            black_token: Some(black_token),
            white_connected: true,
            black_connected: true,
        };

        self.hot.atomically(now_ms, |txn| {
            txn.hset_many(&keys::game_key(&id), &codec::record_fields(&record));
            txn.hset_many(&keys::seats_key(&id), &codec::seats_fields(&seats));
            if record.is_public {
                txn.zadd(keys::LOBBY_KEY, &id.to_string(), now_ms as i64);
            }
            if let Some(ip) = &record.creator_ip {
                txn.sadd(&keys::ip_games_key(ip), &id.to_string());
            }
            refresh_ttls(txn, &id, TTL_IN_PROGRESS_MS);
        });

        Ok(RematchGame { id, white_token, black_token })
    }

    // ── reads ───────────────────────────────────────────────────────────

    pub fn get_game(&self, id: Uuid, now_ms: u64) -> Result<Option<GameRecord>, GameError> {
        self.hot.atomically(now_ms, |txn| read_record(txn, id))
    }

    pub fn get_seats(&self, id: Uuid, now_ms: u64) -> Result<Option<Seats>, GameError> {
        self.hot.atomically(now_ms, |txn| read_seats(txn, id))
    }

    /// Strict move-log read; a corrupt entry is an error. The recovery path
    /// uses [`SessionStore::load_move_log`] instead.
    pub fn get_moves(&self, id: Uuid, now_ms: u64) -> Result<Vec<MoveEntry>, GameError> {
        self.hot.atomically(now_ms, |txn| {
            txn.lrange(&keys::moves_key(&id))
                .iter()
                .map(|raw| codec::decode_move(id, raw))
                .collect()
        })
    }

    /// Lenient move-log read: decoding stops at the first bad entry and the
    /// boolean reports whether a tail was dropped.
    pub fn load_move_log(&self, id: Uuid, now_ms: u64) -> (Vec<MoveEntry>, bool) {
        self.hot.atomically(now_ms, |txn| {
            let raw = txn.lrange(&keys::moves_key(&id));
            let mut entries = Vec::with_capacity(raw.len());
            for item in &raw {
                match codec::decode_move(id, item) {
                    Ok(entry) => entries.push(entry),
                    Err(_) => return (entries, true),
                }
            }
            (entries, false)
        })
    }

    /// Replace the move log wholesale; used after replay truncation. The
    /// rebuilt key keeps the room's TTL.
    pub fn replace_move_log(&self, id: Uuid, moves: &[MoveEntry], now_ms: u64) {
        self.hot.atomically(now_ms, |txn| {
            let key = keys::moves_key(&id);
            let ttl = txn.expires_at(&key).or_else(|| txn.expires_at(&keys::game_key(&id)));
            txn.del(&key);
            for entry in moves {
                txn.rpush(&key, &codec::encode_move(entry));
            }
            if let Some(at) = ttl {
                txn.expire_at(&key, at);
            }
        });
    }

    /// Silently correct the recorded FEN to the replay result.
    pub fn correct_fen(&self, id: Uuid, fen: &str, now_ms: u64) {
        self.hot.atomically(now_ms, |txn| {
            txn.hset(&keys::game_key(&id), "current_fen", fen);
        });
    }

    pub fn spectator_count(&self, id: Uuid, now_ms: u64) -> u64 {
        self.hot
            .atomically(now_ms, |txn| txn.counter(&keys::spectators_key(&id)))
            .max(0) as u64
    }

    pub fn incr_spectators(&self, id: Uuid, now_ms: u64) -> u64 {
        self.hot
            .atomically(now_ms, |txn| txn.incr(&keys::spectators_key(&id), 1))
            .max(0) as u64
    }

    pub fn decr_spectators(&self, id: Uuid, now_ms: u64) -> u64 {
        self.hot
            .atomically(now_ms, |txn| txn.decr_floor(&keys::spectators_key(&id)))
            .max(0) as u64
    }

    /// Lobby listing: hydrate every indexed room, pruning ids whose records
    /// are gone or no longer lobby-visible.
    pub fn list_public(&self, now_ms: u64) -> Vec<GameRecord> {
        self.hot.atomically(now_ms, |txn| {
            let ids = txn.zrange(keys::LOBBY_KEY);
            let mut out = Vec::new();
            for (member, _) in ids {
                let Some(id) = gambit_types::frames::parse_canonical_uuid(&member) else {
                    txn.zrem(keys::LOBBY_KEY, &member);
                    continue;
                };
                match read_record(txn, id) {
                    Ok(Some(record))
                        if record.is_public && !record.status.is_terminal() =>
                    {
                        out.push(record)
                    }
                    _ => {
                        txn.zrem(keys::LOBBY_KEY, &member);
                    }
                }
            }
            out
        })
    }

    pub fn ip_active_count(&self, raw_ip: &str, now_ms: u64) -> u64 {
        let Some(ip) = keys::sanitize_ip(raw_ip) else {
            return 0;
        };
        self.hot.atomically(now_ms, |txn| active_games_of_ip(txn, &ip))
    }

    // ── moves and clocks ────────────────────────────────────────────────

    /// Append an accepted move in an untimed game.
    pub fn add_move(&self, id: Uuid, entry: &MoveEntry, now_ms: u64) -> Result<(), GameError> {
        self.hot.atomically(now_ms, |txn| {
            let record = read_record(txn, id)?.ok_or(GameError::NotFound)?;
            if record.status != GameStatus::InProgress {
                return Err(GameError::NotInProgress);
            }
            txn.rpush(&keys::moves_key(&id), &codec::encode_move(entry));
            txn.hset(&keys::game_key(&id), "current_fen", &entry.fen);
            refresh_ttls(txn, &id, TTL_IN_PROGRESS_MS);
            Ok(())
        })
    }

    /// The deduct-time script: charge the mover's clock, reject the move as
    /// a flag when it is already spent, otherwise credit the increment and
    /// append the move — all in one transaction.
    pub fn deduct_time_and_move(
        &self,
        id: Uuid,
        mover: Color,
        entry: &MoveEntry,
        now_ms: u64,
    ) -> Result<DeductOutcome, GameError> {
        self.hot.atomically(now_ms, |txn| {
            let mut record = read_record(txn, id)?.ok_or(GameError::NotFound)?;
            if record.status != GameStatus::InProgress {
                return Err(GameError::NotInProgress);
            }

            let balance = crate::clock::balance_of(&record, mover);
            let elapsed = now_ms.saturating_sub(record.last_move_at);
            let remaining = balance as i64 - elapsed as i64;

            if remaining <= 0 {
                // Flag: the mover loses, their balance pins to zero.
                let winner = mover.opponent();
                record.status = GameStatus::Finished;
                record.result = Some(GameResult::win_for(winner));
                set_balance(&mut record, mover, 0);
                write_record(txn, &record);
                txn.del(&keys::draw_key(&id));
                txn.zrem(keys::LOBBY_KEY, &id.to_string());
                refresh_ttls(txn, &id, TTL_TERMINAL_MS);
                return Ok(DeductOutcome::TimedOut {
                    loser: mover,
                    white_time_ms: record.white_time_ms,
                    black_time_ms: record.black_time_ms,
                });
            }

            let new_balance = remaining as u64 + record.time_increment_ms;
            set_balance(&mut record, mover, new_balance);
            record.last_move_at = now_ms;
            record.current_fen = entry.fen.clone();
            write_record(txn, &record);
            txn.rpush(&keys::moves_key(&id), &codec::encode_move(entry));
            refresh_ttls(txn, &id, TTL_IN_PROGRESS_MS);

            Ok(DeductOutcome::Applied {
                white_time_ms: record.white_time_ms,
                black_time_ms: record.black_time_ms,
                last_move_at: record.last_move_at,
            })
        })
    }

    /// Finalize a confirmed flag: the loser's balance pins to zero and the
    /// opponent wins. Used by `flag` frames and by the server-side check on
    /// `game_state` emission; the move-path flag lives in the deduct script.
    pub fn flag_timeout(
        &self,
        id: Uuid,
        loser: Color,
        now_ms: u64,
    ) -> Result<(GameResult, u64, u64), GameError> {
        let out = self.hot.atomically(now_ms, |txn| {
            let mut record = read_record(txn, id)?.ok_or(GameError::NotFound)?;
            if record.status != GameStatus::InProgress {
                return Err(GameError::NotInProgress);
            }
            let result = GameResult::win_for(loser.opponent());
            record.status = GameStatus::Finished;
            record.result = Some(result);
            set_balance(&mut record, loser, 0);
            write_record(txn, &record);
            txn.del(&keys::draw_key(&id));
            txn.del(&keys::abandon_key(&id));
            txn.zrem(keys::LOBBY_KEY, &id.to_string());
            refresh_ttls(txn, &id, TTL_TERMINAL_MS);
            Ok((result, record.white_time_ms, record.black_time_ms))
        })?;

        self.archive_game(id, now_ms)?;
        Ok(out)
    }

    // ── termination ─────────────────────────────────────────────────────

    pub fn set_game_result(
        &self,
        id: Uuid,
        result: GameResult,
        now_ms: u64,
    ) -> Result<(), GameError> {
        self.finalize(id, GameStatus::Finished, result, now_ms)
    }

    pub fn set_game_abandoned(
        &self,
        id: Uuid,
        result: GameResult,
        now_ms: u64,
    ) -> Result<(), GameError> {
        self.finalize(id, GameStatus::Abandoned, result, now_ms)
    }

    fn finalize(
        &self,
        id: Uuid,
        status: GameStatus,
        result: GameResult,
        now_ms: u64,
    ) -> Result<(), GameError> {
        self.hot.atomically(now_ms, |txn| {
            let mut record = read_record(txn, id)?.ok_or(GameError::NotFound)?;
            record.status = status;
            record.result = Some(result);
            write_record(txn, &record);
            txn.del(&keys::draw_key(&id));
            txn.del(&keys::abandon_key(&id));
            txn.zrem(keys::LOBBY_KEY, &id.to_string());
            refresh_ttls(txn, &id, TTL_TERMINAL_MS);
            Ok(())
        })
    }

    // ── connection mirror and timers ────────────────────────────────────

    pub fn set_player_connected(
        &self,
        id: Uuid,
        color: Color,
        connected: bool,
        now_ms: u64,
    ) -> Result<(), GameError> {
        self.hot.atomically(now_ms, |txn| {
            if !txn.exists(&keys::seats_key(&id)) {
                return Err(GameError::NotFound);
            }
            let field = match color {
                Color::White => "white_connected",
                Color::Black => "black_connected",
            };
            txn.hset(&keys::seats_key(&id), field, if connected { "1" } else { "0" });
            Ok(())
        })
    }

    /// Start a disconnect timer unless a live one already exists. Returns
    /// the timer actually in force.
    pub fn set_abandonment_timer(
        &self,
        id: Uuid,
        disconnected: Color,
        timeout_ms: u64,
        now_ms: u64,
    ) -> Result<AbandonmentTimer, GameError> {
        self.hot.atomically(now_ms, |txn| {
            if let Some(existing) = read_timer(txn, id) {
                if existing.deadline_ms > now_ms {
                    return Ok(existing);
                }
            }
            let timer = AbandonmentTimer {
                disconnected_color: disconnected,
                deadline_ms: now_ms + timeout_ms,
            };
            txn.hset_many(
                &keys::abandon_key(&id),
                &[
                    ("color", disconnected.as_str().to_string()),
                    ("deadline_ms", timer.deadline_ms.to_string()),
                ],
            );
            // The timer must not outlive the room.
            if let Some(at) = txn.expires_at(&keys::game_key(&id)) {
                txn.expire_at(&keys::abandon_key(&id), at);
            }
            Ok(timer)
        })
    }

    pub fn get_abandonment_timer(&self, id: Uuid, now_ms: u64) -> Option<AbandonmentTimer> {
        self.hot.atomically(now_ms, |txn| read_timer(txn, id))
    }

    pub fn clear_abandonment_timer(&self, id: Uuid, now_ms: u64) {
        self.hot.atomically(now_ms, |txn| {
            txn.del(&keys::abandon_key(&id));
        });
    }

    /// Fulfil an expired disconnect timer: the present side wins, the room
    /// is abandoned and archived. Returns the result when it fired.
    pub fn check_and_process_abandonment(
        &self,
        id: Uuid,
        now_ms: u64,
    ) -> Result<Option<GameResult>, GameError> {
        let fired = self.hot.atomically(now_ms, |txn| {
            let record = match read_record(txn, id)? {
                Some(r) if r.status == GameStatus::InProgress => r,
                _ => return Ok::<Option<GameResult>, GameError>(None),
            };
            let Some(timer) = read_timer(txn, id) else {
                return Ok::<Option<GameResult>, GameError>(None);
            };
            if timer.deadline_ms > now_ms {
                return Ok::<Option<GameResult>, GameError>(None);
            }
            let result = GameResult::win_for(timer.disconnected_color.opponent());
            let mut record = record;
            record.status = GameStatus::Abandoned;
            record.result = Some(result);
            write_record(txn, &record);
            txn.del(&keys::draw_key(&id));
            txn.del(&keys::abandon_key(&id));
            txn.zrem(keys::LOBBY_KEY, &id.to_string());
            refresh_ttls(txn, &id, TTL_TERMINAL_MS);
            Ok(Some(result))
        })?;

        if let Some(result) = fired {
            self.archive_game(id, now_ms)?;
            debug!(game = %id, result = result.as_str(), "abandonment fulfilled");
            return Ok(Some(result));
        }
        Ok(None)
    }

    /// The claim-win script: the opponent of a disconnected player claims
    /// after the deadline, provided the absentee has not come back.
    pub fn claim_win(
        &self,
        id: Uuid,
        claimant: Color,
        now_ms: u64,
    ) -> Result<GameResult, GameError> {
        let result = self.hot.atomically(now_ms, |txn| {
            let mut record = read_record(txn, id)?.ok_or(GameError::NotFound)?;
            if record.status != GameStatus::InProgress {
                return Err(GameError::NotInProgress);
            }
            let timer = read_timer(txn, id).ok_or(GameError::OpponentStillConnected)?;
            if timer.disconnected_color != claimant.opponent() {
                return Err(GameError::OpponentStillConnected);
            }
            if timer.deadline_ms > now_ms {
                return Err(GameError::ClaimTooEarly);
            }
            let seats = read_seats(txn, id)?.ok_or(GameError::NotFound)?;
            if seats.connected(timer.disconnected_color) {
                return Err(GameError::OpponentStillConnected);
            }

            let result = GameResult::win_for(claimant);
            record.status = GameStatus::Abandoned;
            record.result = Some(result);
            write_record(txn, &record);
            txn.del(&keys::draw_key(&id));
            txn.del(&keys::abandon_key(&id));
            txn.zrem(keys::LOBBY_KEY, &id.to_string());
            refresh_ttls(txn, &id, TTL_TERMINAL_MS);
            Ok(result)
        })?;

        self.archive_game(id, now_ms)?;
        Ok(result)
    }

    // ── offers ──────────────────────────────────────────────────────────

    pub fn set_draw_offer(&self, id: Uuid, from: Color, now_ms: u64) {
        self.set_offer(&keys::draw_key(&id), id, from, now_ms)
    }

    pub fn get_draw_offer(&self, id: Uuid, now_ms: u64) -> Option<Color> {
        self.get_offer(&keys::draw_key(&id), now_ms)
    }

    pub fn clear_draw_offer(&self, id: Uuid, now_ms: u64) {
        self.hot.atomically(now_ms, |txn| {
            txn.del(&keys::draw_key(&id));
        });
    }

    pub fn set_rematch_offer(&self, id: Uuid, from: Color, now_ms: u64) {
        self.set_offer(&keys::rematch_key(&id), id, from, now_ms)
    }

    pub fn get_rematch_offer(&self, id: Uuid, now_ms: u64) -> Option<Color> {
        self.get_offer(&keys::rematch_key(&id), now_ms)
    }

    pub fn clear_rematch_offer(&self, id: Uuid, now_ms: u64) {
        self.hot.atomically(now_ms, |txn| {
            txn.del(&keys::rematch_key(&id));
        });
    }

    fn set_offer(&self, key: &str, id: Uuid, from: Color, now_ms: u64) {
        self.hot.atomically(now_ms, |txn| {
            txn.set(key, from.as_str());
            if let Some(at) = txn.expires_at(&keys::game_key(&id)) {
                txn.expire_at(key, at);
            }
        });
    }

    fn get_offer(&self, key: &str, now_ms: u64) -> Option<Color> {
        self.hot
            .atomically(now_ms, |txn| txn.get(key))
            .and_then(|s| s.parse().ok())
    }

    // ── archive and deletion ────────────────────────────────────────────

    /// Write a terminal room to the durable archive. Safe to call more than
    /// once; only the first write inserts.
    pub fn archive_game(&self, id: Uuid, now_ms: u64) -> Result<bool, GameError> {
        let (record, seats) = self.hot.atomically(now_ms, |txn| {
            Ok::<_, GameError>((read_record(txn, id)?, read_seats(txn, id)?))
        })?;
        let (Some(record), Some(seats)) = (record, seats) else {
            return Err(GameError::NotFound);
        };

        let (moves, truncated) = self.load_move_log(id, now_ms);
        if truncated {
            warn!(game = %id, "archiving with truncated move log");
        }

        let inserted = self
            .archive
            .insert_game(&record, &seats, &moves, now_ms)
            .map_err(GameError::Internal)?;
        Ok(inserted)
    }

    /// Archive then drop every hot key of the room.
    pub fn archive_and_delete(&self, id: Uuid, now_ms: u64) -> Result<(), GameError> {
        self.archive_game(id, now_ms)?;
        self.delete_game(id, now_ms)
    }

    /// Drop the room from the hot store without archiving (WAITING rooms
    /// have nothing worth keeping).
    pub fn delete_game(&self, id: Uuid, now_ms: u64) -> Result<(), GameError> {
        self.hot.atomically(now_ms, |txn| {
            let record = read_record(txn, id)?;
            for key in keys::all_keys(&id) {
                txn.del(&key);
            }
            txn.zrem(keys::LOBBY_KEY, &id.to_string());
            if let Some(record) = record {
                if let Some(ip) = &record.creator_ip {
                    txn.srem(&keys::ip_games_key(ip), &id.to_string());
                }
            }
            Ok(())
        })
    }
}

// ── script helpers (run inside a transaction) ───────────────────────────

fn read_record(txn: &mut Txn<'_>, id: Uuid) -> Result<Option<GameRecord>, GameError> {
    let Some(fields) = txn.hgetall(&keys::game_key(&id)) else {
        return Ok(None);
    };
    codec::record_from_fields(id, &fields).map(Some)
}

fn read_seats(txn: &mut Txn<'_>, id: Uuid) -> Result<Option<Seats>, GameError> {
    let Some(fields) = txn.hgetall(&keys::seats_key(&id)) else {
        return Ok(None);
    };
    codec::seats_from_fields(id, &fields).map(Some)
}

fn write_record(txn: &mut Txn<'_>, record: &GameRecord) {
    txn.del(&keys::game_key(&record.id));
    txn.hset_many(&keys::game_key(&record.id), &codec::record_fields(record));
}

fn read_timer(txn: &mut Txn<'_>, id: Uuid) -> Option<AbandonmentTimer> {
    let fields = txn.hgetall(&keys::abandon_key(&id))?;
    let color: Color = fields.get("color")?.parse().ok()?;
    let deadline_ms: u64 = fields.get("deadline_ms")?.parse().ok()?;
    Some(AbandonmentTimer { disconnected_color: color, deadline_ms })
}

fn set_balance(record: &mut GameRecord, color: Color, value: u64) {
    match color {
        Color::White => record.white_time_ms = value,
        Color::Black => record.black_time_ms = value,
    }
}

/// Count live rooms tracked for an IP, pruning dead ids as a side effect.
fn active_games_of_ip(txn: &mut Txn<'_>, ip: &str) -> u64 {
    let key = keys::ip_games_key(ip);
    let mut live = 0;
    for member in txn.smembers(&key) {
        let alive = gambit_types::frames::parse_canonical_uuid(&member)
            .map(|id| txn.exists(&keys::game_key(&id)))
            .unwrap_or(false);
        if alive {
            live += 1;
        } else {
            txn.srem(&key, &member);
        }
    }
    live
}

fn refresh_ttls(txn: &mut Txn<'_>, id: &Uuid, ttl_ms: u64) {
    let deadline = txn.now_ms() + ttl_ms;
    for key in keys::all_keys(id) {
        txn.expire_at(&key, deadline);
    }
}
