//! Protocol dispatcher: validated frames in, state transitions and
//! broadcasts out.
//!
//! Contract per inbound frame: the peer must have joined (except `join`
//! itself), preconditions run against a fresh record, failures reply an
//! `error` frame to the sender only, and a successful command broadcasts at
//! most one frame to the room.

use tracing::{debug, error, warn};
use uuid::Uuid;

use gambit_session::{RematchReply, StateReply};
use gambit_types::{
    ClientFrame, GameError, GameStatus, PlayerRole, Seats, ServerFrame,
};

use crate::hub::{Outbound, PeerHandle};
use crate::Gateway;

/// Per-connection dispatcher state. The room slot is shared with the
/// connection task so teardown still knows the room when the receive loop
/// is aborted mid-frame. std::sync::Mutex — trivial critical section, never
/// held across an await.
pub struct PeerSession {
    pub conn_id: Uuid,
    pub tx: tokio::sync::mpsc::UnboundedSender<Outbound>,
    room: std::sync::Arc<std::sync::Mutex<Option<Uuid>>>,
    pub token: Option<Uuid>,
}

impl PeerSession {
    pub fn new(
        conn_id: Uuid,
        tx: tokio::sync::mpsc::UnboundedSender<Outbound>,
        room: std::sync::Arc<std::sync::Mutex<Option<Uuid>>>,
    ) -> PeerSession {
        PeerSession { conn_id, tx, room, token: None }
    }

    pub fn room(&self) -> Option<Uuid> {
        *self.room.lock().expect("room slot poisoned")
    }

    fn set_room(&self, id: Uuid) {
        *self.room.lock().expect("room slot poisoned") = Some(id);
    }

    pub(crate) fn send(&self, frame: &ServerFrame) {
        let _ = self.tx.send(Outbound::Frame(frame.to_json()));
    }
}

/// Extract the bearer token for a room from the Cookie header value.
pub fn token_from_cookies(cookies: &str, game_id: Uuid) -> Option<Uuid> {
    let wanted = format!("chess_token_{game_id}");
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let name = parts.next()?.trim();
        if name == wanted {
            return gambit_types::frames::parse_canonical_uuid(parts.next()?.trim());
        }
    }
    None
}

pub async fn dispatch(
    gw: &Gateway,
    session: &mut PeerSession,
    frame: ClientFrame,
    cookies: &str,
    now_ms: u64,
) {
    if let ClientFrame::Join { game_id } = &frame {
        let game_id = *game_id;
        if session.room().is_some() {
            session.send(&ServerFrame::error("Already joined a game"));
            return;
        }
        if let Err(e) = handle_join(gw, session, game_id, cookies, now_ms).await {
            reply_error(session, &e);
        }
        return;
    }

    // Every other frame requires a prior join.
    let Some(room) = session.room() else {
        session.send(&ServerFrame::error("Join a game first"));
        return;
    };

    // Opportunistic realization of an expired disconnect timer. claim_win
    // runs its own stricter verification instead.
    if !matches!(frame, ClientFrame::ClaimWin) {
        match gw.lifecycle.store().check_and_process_abandonment(room, now_ms) {
            Ok(Some(result)) => {
                gw.hub.broadcast(room, &ServerFrame::GameAbandoned { result }).await;
            }
            Ok(None) => {}
            Err(e) => warn!(room = %room, "abandonment check failed: {e}"),
        }
    }

    let role = gw.hub.role_of(room, session.conn_id).await;
    let outcome = match frame {
        ClientFrame::Join { .. } => unreachable!("handled above"),
        ClientFrame::Move { from, to, promotion } => {
            handle_move(gw, room, role, &from, &to, promotion.as_deref(), now_ms).await
        }
        ClientFrame::Resign => broadcast_result(gw, room, gw.lifecycle.resign(room, role, now_ms)).await,
        ClientFrame::DrawOffer => {
            broadcast_result(gw, room, gw.lifecycle.offer_draw(room, role, now_ms)).await
        }
        ClientFrame::DrawAccept => {
            broadcast_result(gw, room, gw.lifecycle.accept_draw(room, role, now_ms)).await
        }
        ClientFrame::DrawDecline => {
            broadcast_result(gw, room, gw.lifecycle.decline_draw(room, role, now_ms)).await
        }
        ClientFrame::DrawCancel => {
            broadcast_result(gw, room, gw.lifecycle.cancel_draw(room, role, now_ms)).await
        }
        ClientFrame::RematchOffer => handle_rematch_offer(gw, room, role, now_ms).await,
        ClientFrame::RematchAccept => {
            match gw.lifecycle.accept_rematch(room, role, now_ms) {
                Ok(accept) => {
                    announce_rematch(gw, room, &accept).await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        ClientFrame::RematchCancel => {
            broadcast_result(gw, room, gw.lifecycle.cancel_rematch(room, role, now_ms)).await
        }
        ClientFrame::Flag => {
            broadcast_result(gw, room, gw.lifecycle.flag_opponent(room, now_ms)).await
        }
        ClientFrame::ClaimWin => {
            broadcast_result(gw, room, gw.lifecycle.claim_win(room, role, now_ms)).await
        }
    };

    if let Err(e) = outcome {
        reply_error(session, &e);
    }
}

fn reply_error(session: &PeerSession, e: &GameError) {
    if e.is_client_error() {
        debug!(conn = %session.conn_id, "rejected frame: {e}");
    } else {
        error!(conn = %session.conn_id, "command failed: {e}");
    }
    session.send(&ServerFrame::error(e.to_string()));
}

async fn broadcast_result(
    gw: &Gateway,
    room: Uuid,
    result: Result<ServerFrame, GameError>,
) -> Result<(), GameError> {
    let frame = result?;
    gw.hub.broadcast(room, &frame).await;
    Ok(())
}

async fn handle_move(
    gw: &Gateway,
    room: Uuid,
    role: PlayerRole,
    from: &str,
    to: &str,
    promotion: Option<&str>,
    now_ms: u64,
) -> Result<(), GameError> {
    let frame = gw.lifecycle.make_move(room, role, from, to, promotion, now_ms)?;
    gw.hub.broadcast(room, &frame).await;
    Ok(())
}

async fn handle_rematch_offer(
    gw: &Gateway,
    room: Uuid,
    role: PlayerRole,
    now_ms: u64,
) -> Result<(), GameError> {
    match gw.lifecycle.offer_rematch(room, role, now_ms)? {
        RematchReply::Offered(frame) => {
            gw.hub.broadcast(room, &frame).await;
        }
        RematchReply::Accepted(accept) => announce_rematch(gw, room, &accept).await,
    }
    Ok(())
}

/// Echo `rematch_accepted` individually: each seat gets the token for the
/// role it will hold in the new room (colors swapped), spectators get none.
async fn announce_rematch(gw: &Gateway, room: Uuid, accept: &gambit_session::RematchAccept) {
    let new = &accept.new_game;
    gw.hub
        .send_to_role(
            room,
            PlayerRole::White,
            &ServerFrame::RematchAccepted { new_game_id: new.id, token: Some(new.black_token) },
        )
        .await;
    gw.hub
        .send_to_role(
            room,
            PlayerRole::Black,
            &ServerFrame::RematchAccepted { new_game_id: new.id, token: Some(new.white_token) },
        )
        .await;
    gw.hub
        .send_to_role(
            room,
            PlayerRole::Spectator,
            &ServerFrame::RematchAccepted { new_game_id: new.id, token: None },
        )
        .await;
}

// ── attach / detach policy ──────────────────────────────────────────────

async fn handle_join(
    gw: &Gateway,
    session: &mut PeerSession,
    game_id: Uuid,
    cookies: &str,
    now_ms: u64,
) -> Result<(), GameError> {
    let store = gw.lifecycle.store();
    let record = store.get_game(game_id, now_ms)?.ok_or(GameError::NotFound)?;
    let seats = store.get_seats(game_id, now_ms)?.ok_or(GameError::NotFound)?;

    let token = token_from_cookies(cookies, game_id);
    let role = seats.role_of(token);

    gw.hub
        .attach(
            game_id,
            session.conn_id,
            PeerHandle { tx: session.tx.clone(), role, token },
        )
        .await;
    session.set_room(game_id);
    session.token = token;

    if let Some(color) = role.color() {
        store.set_player_connected(game_id, color, true, now_ms)?;

        // A live timer against the returning player is void.
        if let Some(timer) = store.get_abandonment_timer(game_id, now_ms) {
            if timer.disconnected_color == color {
                store.clear_abandonment_timer(game_id, now_ms);
            }
        }
        gw.hub
            .broadcast_except(game_id, session.conn_id, &ServerFrame::OpponentConnected { color })
            .await;

        // Re-anchor the other peer's countdown display.
        if record.is_timed() && record.status == GameStatus::InProgress {
            if let Some(fresh) = store.get_game(game_id, now_ms)? {
                gw.hub
                    .broadcast_except(game_id, session.conn_id, &gw.lifecycle.clock_sync(&fresh))
                    .await;
            }
        }
    } else {
        let count = store.incr_spectators(game_id, now_ms);
        gw.hub
            .broadcast(game_id, &ServerFrame::SpectatorCount { count })
            .await;
    }

    let fresh_seats = store.get_seats(game_id, now_ms)?.unwrap_or(seats);
    session.send(&ServerFrame::ConnectionStatus {
        role,
        white_connected: fresh_seats.white_connected,
        black_connected: fresh_seats.black_connected,
    });

    let spectators = store.spectator_count(game_id, now_ms);
    match gw.lifecycle.game_state(game_id, role, spectators, now_ms)? {
        StateReply::State(frame) => session.send(&frame),
        // The side to move had already busted: the room learns of the flag
        // instead of a stale in-progress state.
        StateReply::Flagged(frame) => gw.hub.broadcast(game_id, &frame).await,
    }

    debug!(room = %game_id, conn = %session.conn_id, role = ?role, "peer attached");
    Ok(())
}

/// Disconnect policy: claim-win timer for timed rooms,
/// abandonment timer for untimed ones, immediate cleanup of empty WAITING
/// rooms, archive of deserted terminal rooms.
pub async fn handle_detach(gw: &Gateway, conn_id: Uuid, room: Option<Uuid>, now_ms: u64) {
    let Some(room) = room else {
        return;
    };
    let Some((handle, now_empty)) = gw.hub.detach(room, conn_id).await else {
        return;
    };
    let store = gw.lifecycle.store();

    let Some(color) = handle.role.color() else {
        let count = store.decr_spectators(room, now_ms);
        gw.hub
            .broadcast(room, &ServerFrame::SpectatorCount { count })
            .await;
        return;
    };

    // Another tab may still hold the same seat.
    if gw.hub.has_role(room, handle.role).await {
        return;
    }

    if store.set_player_connected(room, color, false, now_ms).is_err() {
        // Room already gone (swept or deleted); nothing to update.
        return;
    }
    let record = match store.get_game(room, now_ms) {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(e) => {
            warn!(room = %room, "detach read failed: {e}");
            return;
        }
    };

    match record.status {
        GameStatus::Waiting => {
            // An empty advertisement is worthless; drop it immediately.
            if now_empty {
                if let Err(e) = store.delete_game(room, now_ms) {
                    warn!(room = %room, "waiting-room cleanup failed: {e}");
                }
            }
        }
        GameStatus::InProgress => {
            let timeout = if record.is_timed() {
                store.config().claim_win_timeout_ms
            } else {
                store.config().abandonment_timeout_ms
            };
            match store.set_abandonment_timer(room, color, timeout, now_ms) {
                Ok(timer) => {
                    let claim_deadline = record.is_timed().then_some(timer.deadline_ms);
                    gw.hub
                        .broadcast(
                            room,
                            &ServerFrame::OpponentDisconnected { color, claim_deadline },
                        )
                        .await;
                }
                Err(e) => warn!(room = %room, "failed to start disconnect timer: {e}"),
            }
        }
        GameStatus::Finished | GameStatus::Abandoned => {
            if now_empty {
                if let Err(e) = store.archive_and_delete(room, now_ms) {
                    warn!(room = %room, "terminal cleanup failed: {e}");
                }
            }
        }
    }
}

/// Seats changed over HTTP (a player joined): re-resolve roles, fix the
/// spectator count for promoted peers, and tell the room.
pub async fn notify_seats_changed(gw: &Gateway, room: Uuid, seats: &Seats, now_ms: u64) {
    let store = gw.lifecycle.store();
    let changes = gw.hub.refresh_roles(room, seats).await;
    let mut count_changed = false;
    for change in &changes {
        if change.old == PlayerRole::Spectator && change.new.color().is_some() {
            store.decr_spectators(room, now_ms);
            count_changed = true;
        }
        if let Some(color) = change.new.color() {
            if let Err(e) = store.set_player_connected(room, color, true, now_ms) {
                warn!(room = %room, "connected-bit mirror failed: {e}");
            }
        }
    }
    if count_changed {
        let count = store.spectator_count(room, now_ms);
        gw.hub
            .broadcast(room, &ServerFrame::SpectatorCount { count })
            .await;
    }
    if let Ok(Some(record)) = store.get_game(room, now_ms) {
        gw.hub
            .broadcast(room, &ServerFrame::GameUpdate { status: record.status })
            .await;
    }
}
