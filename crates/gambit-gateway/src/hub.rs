//! Room hub: per-room membership and fan-out.
//!
//! The hub owns the live peer handles; the session store owns the durable
//! record. The only bridge between them is the room id. Peers hold their
//! room by id too, so dropping a peer can never dangle into the hub.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use gambit_types::{PlayerRole, Seats, ServerFrame};

/// Messages queued onto a peer's outbound pipeline. Frames are
/// pre-serialized so a broadcast serializes once, not per peer.
#[derive(Clone, Debug)]
pub enum Outbound {
    Frame(String),
    /// Orderly close (WS code 1001); used on server shutdown.
    GoingAway,
}

#[derive(Clone)]
pub struct PeerHandle {
    pub tx: mpsc::UnboundedSender<Outbound>,
    pub role: PlayerRole,
    pub token: Option<Uuid>,
}

#[derive(Default)]
struct Room {
    peers: HashMap<Uuid, PeerHandle>,
}

/// A role change produced by seat re-resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleChange {
    pub conn_id: Uuid,
    pub old: PlayerRole,
    pub new: PlayerRole,
}

/// Manages all connected peers, keyed by room id.
#[derive(Clone, Default)]
pub struct RoomHub {
    inner: Arc<RwLock<HashMap<Uuid, Room>>>,
}

impl RoomHub {
    pub fn new() -> RoomHub {
        RoomHub::default()
    }

    pub async fn attach(&self, room_id: Uuid, conn_id: Uuid, handle: PeerHandle) {
        let mut rooms = self.inner.write().await;
        rooms.entry(room_id).or_default().peers.insert(conn_id, handle);
    }

    /// Remove a peer. Returns its handle and whether the room is now empty
    /// (an empty room is dropped from the map).
    pub async fn detach(&self, room_id: Uuid, conn_id: Uuid) -> Option<(PeerHandle, bool)> {
        let mut rooms = self.inner.write().await;
        let room = rooms.get_mut(&room_id)?;
        let handle = room.peers.remove(&conn_id)?;
        let empty = room.peers.is_empty();
        if empty {
            rooms.remove(&room_id);
        }
        Some((handle, empty))
    }

    /// Serialize once and send to every peer in the room.
    pub async fn broadcast(&self, room_id: Uuid, frame: &ServerFrame) {
        self.fan_out(room_id, frame, None).await;
    }

    /// Broadcast to everyone except one connection (typically the sender,
    /// which already received a directed reply).
    pub async fn broadcast_except(&self, room_id: Uuid, exclude: Uuid, frame: &ServerFrame) {
        self.fan_out(room_id, frame, Some(exclude)).await;
    }

    async fn fan_out(&self, room_id: Uuid, frame: &ServerFrame, exclude: Option<Uuid>) {
        let json = frame.to_json();
        let rooms = self.inner.read().await;
        let Some(room) = rooms.get(&room_id) else {
            return;
        };
        for (conn_id, peer) in &room.peers {
            if Some(*conn_id) == exclude {
                continue;
            }
            // A closed channel means the peer is tearing down; detach will
            // reap it.
            let _ = peer.tx.send(Outbound::Frame(json.clone()));
        }
    }

    pub async fn send_to(&self, room_id: Uuid, conn_id: Uuid, frame: &ServerFrame) {
        let rooms = self.inner.read().await;
        if let Some(peer) = rooms.get(&room_id).and_then(|r| r.peers.get(&conn_id)) {
            let _ = peer.tx.send(Outbound::Frame(frame.to_json()));
        }
    }

    /// Send to every peer currently resolved to a role (normally one).
    pub async fn send_to_role(&self, room_id: Uuid, role: PlayerRole, frame: &ServerFrame) {
        let json = frame.to_json();
        let rooms = self.inner.read().await;
        let Some(room) = rooms.get(&room_id) else {
            return;
        };
        for peer in room.peers.values() {
            if peer.role == role {
                let _ = peer.tx.send(Outbound::Frame(json.clone()));
            }
        }
    }

    pub async fn role_of(&self, room_id: Uuid, conn_id: Uuid) -> PlayerRole {
        let rooms = self.inner.read().await;
        rooms
            .get(&room_id)
            .and_then(|r| r.peers.get(&conn_id))
            .map(|p| p.role)
            .unwrap_or(PlayerRole::Unknown)
    }

    /// Is any live connection resolved to this role? Used to tell a real
    /// disconnect from one of several tabs going away.
    pub async fn has_role(&self, room_id: Uuid, role: PlayerRole) -> bool {
        let rooms = self.inner.read().await;
        rooms
            .get(&room_id)
            .map(|r| r.peers.values().any(|p| p.role == role))
            .unwrap_or(false)
    }

    pub async fn peer_count(&self, room_id: Uuid) -> usize {
        let rooms = self.inner.read().await;
        rooms.get(&room_id).map(|r| r.peers.len()).unwrap_or(0)
    }

    /// Re-resolve every attached peer's role against the final seats; called
    /// when a `game_update` lands (a player joined over HTTP). Returns the
    /// changes so the caller can fix spectator accounting.
    pub async fn refresh_roles(&self, room_id: Uuid, seats: &Seats) -> Vec<RoleChange> {
        let mut rooms = self.inner.write().await;
        let Some(room) = rooms.get_mut(&room_id) else {
            return Vec::new();
        };
        let mut changes = Vec::new();
        for (conn_id, peer) in room.peers.iter_mut() {
            let new = seats.role_of(peer.token);
            if new != peer.role {
                changes.push(RoleChange { conn_id: *conn_id, old: peer.role, new });
                peer.role = new;
            }
        }
        changes
    }

    /// Ask every peer in every room to close (WS 1001). Rooms stay in the
    /// map until the connection tasks detach themselves.
    pub async fn close_all(&self) {
        let rooms = self.inner.read().await;
        for room in rooms.values() {
            for peer in room.peers.values() {
                let _ = peer.tx.send(Outbound::GoingAway);
            }
        }
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(role: PlayerRole, token: Option<Uuid>) -> (PeerHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerHandle { tx, role, token }, rx)
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> serde_json::Value {
        match rx.try_recv().expect("expected a frame") {
            Outbound::Frame(json) => serde_json::from_str(&json).unwrap(),
            Outbound::GoingAway => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_peers_once() {
        let hub = RoomHub::new();
        let room = Uuid::new_v4();
        let (a, mut a_rx) = handle(PlayerRole::White, None);
        let (b, mut b_rx) = handle(PlayerRole::Black, None);
        hub.attach(room, Uuid::new_v4(), a).await;
        hub.attach(room, Uuid::new_v4(), b).await;

        hub.broadcast(room, &ServerFrame::DrawDeclined).await;
        assert_eq!(recv_json(&mut a_rx)["type"], "draw_declined");
        assert_eq!(recv_json(&mut b_rx)["type"], "draw_declined");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_sender() {
        let hub = RoomHub::new();
        let room = Uuid::new_v4();
        let sender_id = Uuid::new_v4();
        let (a, mut a_rx) = handle(PlayerRole::White, None);
        let (b, mut b_rx) = handle(PlayerRole::Spectator, None);
        hub.attach(room, sender_id, a).await;
        hub.attach(room, Uuid::new_v4(), b).await;

        hub.broadcast_except(room, sender_id, &ServerFrame::DrawCancelled).await;
        assert!(a_rx.try_recv().is_err());
        assert_eq!(recv_json(&mut b_rx)["type"], "draw_cancelled");
    }

    #[tokio::test]
    async fn detach_reports_empty_rooms() {
        let hub = RoomHub::new();
        let room = Uuid::new_v4();
        let (a, _a_rx) = handle(PlayerRole::White, None);
        let (b, _b_rx) = handle(PlayerRole::Black, None);
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        hub.attach(room, a_id, a).await;
        hub.attach(room, b_id, b).await;

        let (_, empty) = hub.detach(room, a_id).await.unwrap();
        assert!(!empty);
        let (_, empty) = hub.detach(room, b_id).await.unwrap();
        assert!(empty);
        assert_eq!(hub.room_count().await, 0);
        assert!(hub.detach(room, b_id).await.is_none());
    }

    #[tokio::test]
    async fn refresh_roles_promotes_token_holders() {
        let hub = RoomHub::new();
        let room = Uuid::new_v4();
        let token = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let (peer, _rx) = handle(PlayerRole::Spectator, Some(token));
        hub.attach(room, conn, peer).await;

        let seats = Seats {
            white_token: Uuid::new_v4(),
            black_token: Some(token),
            white_connected: true,
            black_connected: false,
        };
        let changes = hub.refresh_roles(room, &seats).await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old, PlayerRole::Spectator);
        assert_eq!(changes[0].new, PlayerRole::Black);
        assert_eq!(hub.role_of(room, conn).await, PlayerRole::Black);
        assert!(hub.has_role(room, PlayerRole::Black).await);
    }
}
