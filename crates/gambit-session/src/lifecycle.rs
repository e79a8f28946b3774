//! Lifecycle façade: the command surface behind the protocol dispatcher.
//!
//! Each operation checks its preconditions against a fresh record, performs
//! the transition through the session store, and returns the broadcast-ready
//! frame. At most one broadcast frame comes back per successful command.

use tracing::warn;
use uuid::Uuid;

use gambit_rules::{Color, Position, Promotion, Square};
use gambit_types::{
    GameError, GameRecord, GameResult, GameStatus, MoveEntry, PlayerRole, ServerFrame,
};

use crate::clock;
use crate::store::{
    CreateGameParams, DeductOutcome, JoinOutcome, RematchGame, SessionStore,
};

/// What `game_state` produced: either a state frame for the requesting peer,
/// or — when the side to move had already busted its clock — a flag
/// finalization to broadcast to the whole room instead.
pub enum StateReply {
    State(Box<ServerFrame>),
    Flagged(ServerFrame),
}

/// A rematch acceptance: the dispatcher echoes per-seat tokens individually.
#[derive(Clone, Debug)]
pub struct RematchAccept {
    pub new_game: RematchGame,
}

/// Outcome of `rematch_offer`: crossing offers collapse into an acceptance,
/// which the dispatcher must fan out per seat rather than broadcast.
pub enum RematchReply {
    Offered(ServerFrame),
    Accepted(RematchAccept),
}

#[derive(Clone)]
pub struct Lifecycle {
    store: SessionStore,
}

impl Lifecycle {
    pub fn new(store: SessionStore) -> Lifecycle {
        Lifecycle { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn create_game(
        &self,
        params: &CreateGameParams,
        now_ms: u64,
    ) -> Result<(Uuid, Uuid), GameError> {
        self.store.create_game(params, now_ms)
    }

    pub fn join_game(&self, id: Uuid, now_ms: u64) -> Result<JoinOutcome, GameError> {
        self.store.join(id, now_ms)
    }

    // ── state emission and recovery ─────────────────────────────────────

    /// Build the `game_state` frame for a peer, reconciling the move log by
    /// replay first and finalizing a pending flag instead of reporting a
    /// stale IN_PROGRESS.
    pub fn game_state(
        &self,
        id: Uuid,
        viewer_role: PlayerRole,
        spectators: u64,
        now_ms: u64,
    ) -> Result<StateReply, GameError> {
        let mut record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        let seats = self.store.get_seats(id, now_ms)?.ok_or(GameError::NotFound)?;

        let (position, moves, corrupted) = self.recovered_position(id, now_ms)?;
        let replayed_fen = position.fen();
        if replayed_fen != record.current_fen {
            if !corrupted {
                warn!(game = %id, "stored FEN diverged from move log; replay wins");
            }
            self.store.correct_fen(id, &replayed_fen, now_ms);
            record.current_fen = replayed_fen;
        }

        if let Some(loser) = clock::flagged_side(&record, now_ms) {
            let (result, white_time_ms, black_time_ms) =
                self.store.flag_timeout(id, loser, now_ms)?;
            return Ok(StateReply::Flagged(ServerFrame::Flag {
                result,
                white_time_ms,
                black_time_ms,
            }));
        }

        let claim_deadline = self
            .store
            .get_abandonment_timer(id, now_ms)
            .filter(|_| record.is_timed() && record.status == GameStatus::InProgress)
            .map(|t| t.deadline_ms);

        Ok(StateReply::State(Box::new(ServerFrame::GameState {
            game_id: id,
            status: record.status,
            result: record.result,
            fen: record.current_fen.clone(),
            moves,
            your_role: viewer_role,
            white_connected: seats.white_connected,
            black_connected: seats.black_connected,
            spectators,
            time_initial_ms: record.time_initial_ms,
            time_increment_ms: record.time_increment_ms,
            white_time_ms: record.white_time_ms,
            black_time_ms: record.black_time_ms,
            last_move_at: record.last_move_at,
            draw_offer: self.store.get_draw_offer(id, now_ms),
            rematch_offer: self.store.get_rematch_offer(id, now_ms),
            claim_deadline,
            game_state_corrupted: corrupted,
        })))
    }

    /// Clock re-anchor for peers already in the room when a player attaches.
    pub fn clock_sync(&self, record: &GameRecord) -> ServerFrame {
        ServerFrame::ClockSync {
            white_time_ms: record.white_time_ms,
            black_time_ms: record.black_time_ms,
            last_move_at: record.last_move_at,
        }
    }

    /// Rebuild the position from the move log, truncating any tail that
    /// fails to decode or replay. The truncated log is written back so the
    /// room converges instead of re-reporting corruption forever.
    fn recovered_position(
        &self,
        id: Uuid,
        now_ms: u64,
    ) -> Result<(Position, Vec<MoveEntry>, bool), GameError> {
        let (mut moves, decode_truncated) = self.store.load_move_log(id, now_ms);

        let sans: Vec<&str> = moves.iter().map(|m| m.san.as_str()).collect();
        let replayed = gambit_rules::replay(&sans);
        let replay_truncated = replayed.failed_at.is_some();
        if let Some(at) = replayed.failed_at {
            moves.truncate(at);
        }

        let corrupted = decode_truncated || replay_truncated;
        if corrupted {
            warn!(game = %id, kept = moves.len(), "move log failed to replay; tail dropped");
            self.store.replace_move_log(id, &moves, now_ms);
        }
        Ok((replayed.position, moves, corrupted))
    }

    // ── moves ───────────────────────────────────────────────────────────

    pub fn make_move(
        &self,
        id: Uuid,
        role: PlayerRole,
        from: &str,
        to: &str,
        promotion: Option<&str>,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        if record.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        let color = role.color().ok_or(GameError::NotAPlayer)?;

        let (mut position, moves, _) = self.recovered_position(id, now_ms)?;
        if position.side_to_move() != color {
            return Err(GameError::NotYourTurn);
        }

        let from = Square::parse(from).ok_or(GameError::IllegalMove)?;
        let to = Square::parse(to).ok_or(GameError::IllegalMove)?;
        let promotion = match promotion {
            Some(p) => Some(Promotion::from_str(p).ok_or(GameError::IllegalMove)?),
            None => None,
        };
        let outcome = position
            .play(from, to, promotion)
            .map_err(|_| GameError::IllegalMove)?;

        let entry = MoveEntry {
            move_number: moves.len() as u32 + 1,
            san: outcome.san.clone(),
            fen: outcome.fen.clone(),
            created_at_ms: now_ms,
        };

        let (white_time_ms, black_time_ms, last_move_at) = if record.is_timed() {
            match self.store.deduct_time_and_move(id, color, &entry, now_ms)? {
                DeductOutcome::TimedOut { loser, white_time_ms, black_time_ms } => {
                    // The move arrived after the mover's clock ran out: it
                    // is rejected as a flag, not recorded.
                    self.store.archive_game(id, now_ms)?;
                    return Ok(ServerFrame::Flag {
                        result: GameResult::win_for(loser.opponent()),
                        white_time_ms,
                        black_time_ms,
                    });
                }
                DeductOutcome::Applied { white_time_ms, black_time_ms, last_move_at } => {
                    (white_time_ms, black_time_ms, last_move_at)
                }
            }
        } else {
            self.store.add_move(id, &entry, now_ms)?;
            (0, 0, 0)
        };

        // An accepted move clears any pending draw offer; no broadcast.
        self.store.clear_draw_offer(id, now_ms);

        let result = if outcome.checkmate {
            Some(GameResult::win_for(color))
        } else if outcome.is_draw() {
            Some(GameResult::Draw)
        } else {
            None
        };
        if let Some(result) = result {
            self.store.set_game_result(id, result, now_ms)?;
            self.store.archive_game(id, now_ms)?;
        }

        Ok(ServerFrame::Move {
            san: outcome.san,
            fen: outcome.fen,
            move_number: entry.move_number,
            color,
            check: outcome.check,
            white_time_ms,
            black_time_ms,
            last_move_at,
            game_over: result.is_some(),
            result,
        })
    }

    // ── resignation and flags ───────────────────────────────────────────

    pub fn resign(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        if record.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        let color = role.color().ok_or(GameError::NotAPlayer)?;
        let result = GameResult::win_for(color.opponent());
        self.store.set_game_result(id, result, now_ms)?;
        self.store.archive_game(id, now_ms)?;
        Ok(ServerFrame::Resign { color, result })
    }

    /// Confirm a reported flag against the clock formula. Any peer may
    /// report; the server is the judge.
    pub fn flag_opponent(&self, id: Uuid, now_ms: u64) -> Result<ServerFrame, GameError> {
        let record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        if record.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        let loser = clock::flagged_side(&record, now_ms).ok_or(GameError::ClockNotExpired)?;
        let (result, white_time_ms, black_time_ms) =
            self.store.flag_timeout(id, loser, now_ms)?;
        Ok(ServerFrame::Flag { result, white_time_ms, black_time_ms })
    }

    pub fn claim_win(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let color = role.color().ok_or(GameError::NotAPlayer)?;
        let result = self.store.claim_win(id, color, now_ms)?;
        Ok(ServerFrame::GameAbandoned { result })
    }

    // ── draw negotiation ────────────────────────────────────────────────

    pub fn offer_draw(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let color = self.in_progress_player(id, role, now_ms)?;
        match self.store.get_draw_offer(id, now_ms) {
            // Crossing offers are an implicit acceptance.
            Some(existing) if existing != color => self.accept_draw(id, role, now_ms),
            _ => {
                self.store.set_draw_offer(id, color, now_ms);
                Ok(ServerFrame::DrawOffer { from: color })
            }
        }
    }

    pub fn accept_draw(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let color = self.in_progress_player(id, role, now_ms)?;
        match self.store.get_draw_offer(id, now_ms) {
            Some(from) if from != color => {
                self.store.clear_draw_offer(id, now_ms);
                self.store.set_game_result(id, GameResult::Draw, now_ms)?;
                self.store.archive_game(id, now_ms)?;
                Ok(ServerFrame::DrawAccepted { result: GameResult::Draw })
            }
            _ => Err(GameError::NoDrawOffer),
        }
    }

    pub fn decline_draw(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let color = self.in_progress_player(id, role, now_ms)?;
        match self.store.get_draw_offer(id, now_ms) {
            Some(from) if from != color => {
                self.store.clear_draw_offer(id, now_ms);
                Ok(ServerFrame::DrawDeclined)
            }
            _ => Err(GameError::NoDrawOffer),
        }
    }

    pub fn cancel_draw(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let color = self.in_progress_player(id, role, now_ms)?;
        match self.store.get_draw_offer(id, now_ms) {
            Some(from) if from == color => {
                self.store.clear_draw_offer(id, now_ms);
                Ok(ServerFrame::DrawCancelled)
            }
            _ => Err(GameError::NotYourDrawOffer),
        }
    }

    // ── rematch negotiation ─────────────────────────────────────────────

    pub fn offer_rematch(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<RematchReply, GameError> {
        let color = self.finished_player(id, role, now_ms)?;
        match self.store.get_rematch_offer(id, now_ms) {
            Some(existing) if existing != color => {
                // Crossing rematch offers accept, same as draws.
                self.accept_rematch(id, role, now_ms).map(RematchReply::Accepted)
            }
            _ => {
                self.store.set_rematch_offer(id, color, now_ms);
                Ok(RematchReply::Offered(ServerFrame::RematchOffer { from: color }))
            }
        }
    }

    /// Accepting mints a new room with the colors swapped: the old white
    /// player receives the new black seat and vice versa. The caller echoes
    /// each peer its own token; the old room is deleted afterwards.
    pub fn accept_rematch(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<RematchAccept, GameError> {
        let color = self.finished_player(id, role, now_ms)?;
        let record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        match self.store.get_rematch_offer(id, now_ms) {
            Some(from) if from != color => {}
            _ => return Err(GameError::NoRematchOffer),
        }

        let new_game = self.store.create_rematch_game(&record, now_ms)?;
        self.store.clear_rematch_offer(id, now_ms);
        self.store.delete_game(id, now_ms)?;
        Ok(RematchAccept { new_game })
    }

    pub fn cancel_rematch(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<ServerFrame, GameError> {
        let color = self.finished_player(id, role, now_ms)?;
        match self.store.get_rematch_offer(id, now_ms) {
            Some(from) if from == color => {
                self.store.clear_rematch_offer(id, now_ms);
                Ok(ServerFrame::RematchCancelled)
            }
            _ => Err(GameError::NotYourRematchOffer),
        }
    }

    // ── precondition helpers ────────────────────────────────────────────

    fn in_progress_player(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<Color, GameError> {
        let record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        if record.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        role.color().ok_or(GameError::NotAPlayer)
    }

    fn finished_player(
        &self,
        id: Uuid,
        role: PlayerRole,
        now_ms: u64,
    ) -> Result<Color, GameError> {
        let record = self.store.get_game(id, now_ms)?.ok_or(GameError::NotFound)?;
        if record.status != GameStatus::Finished {
            return Err(GameError::NotFinished);
        }
        role.color().ok_or(GameError::NotAPlayer)
    }
}
