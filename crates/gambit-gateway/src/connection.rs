//! Per-connection WebSocket loop.
//!
//! One task drains the outbound pipeline and drives the heartbeat; one task
//! reads, validates, and dispatches inbound frames. Either ending tears the
//! connection down and runs the disconnect policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use gambit_types::{ClientFrame, ServerFrame};

use crate::dispatcher::{self, PeerSession};
use crate::hub::Outbound;
use crate::Gateway;

/// Heartbeat interval: the server pings every peer every 30 seconds. A peer
/// that has not answered the previous ping by the next cycle is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WS close code for "going away", sent on server shutdown.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Handle a single upgraded WebSocket. `cookies` is the raw Cookie header
/// from the upgrade request; the bearer token for the room the peer joins
/// is resolved from it.
pub async fn handle_connection(gw: Gateway, socket: WebSocket, cookies: String) {
    let conn_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Shared between the two tasks: recv sets the flag on Pong, send checks
    // it on each heartbeat tick. Release pairs with Acquire.
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_send = pong_received.clone();
    let pong_recv = pong_received.clone();

    // The room slot outlives the recv task so teardown knows where the peer
    // was even when the task is aborted.
    let room_slot: Arc<Mutex<Option<Uuid>>> = Arc::new(Mutex::new(None));

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        // Skip the immediate first tick.
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                out = rx.recv() => {
                    match out {
                        Some(Outbound::Frame(json)) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::GoingAway) => {
                            let _ = ws_tx
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_GOING_AWAY,
                                    reason: "server shutting down".into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let gw_recv = gw.clone();
    let recv_room = room_slot.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut session = PeerSession::new(conn_id, tx, recv_room);
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    match ClientFrame::parse(text.as_str()) {
                        Ok(frame) => {
                            dispatcher::dispatch(
                                &gw_recv,
                                &mut session,
                                frame,
                                &cookies,
                                gambit_types::now_ms(),
                            )
                            .await;
                        }
                        Err(e) => {
                            debug!(conn = %conn_id, "invalid frame: {e}");
                            session.send(&ServerFrame::error(e.to_string()));
                        }
                    }
                }
                // The protocol is JSON text only.
                Message::Binary(_) => {
                    session.send(&ServerFrame::error("Binary frames are not supported"));
                }
                Message::Pong(_) => {
                    pong_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then stop the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let room = *room_slot.lock().expect("room slot poisoned");
    dispatcher::handle_detach(&gw, conn_id, room, gambit_types::now_ms()).await;
    debug!(conn = %conn_id, "connection closed");
}
