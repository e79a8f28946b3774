//! Gateway: room hub, per-connection WebSocket loop, protocol dispatcher.

pub mod connection;
pub mod dispatcher;
pub mod hub;

use gambit_session::Lifecycle;
use hub::RoomHub;

/// Everything a connection needs, cheap to clone per socket.
#[derive(Clone)]
pub struct Gateway {
    pub hub: RoomHub,
    pub lifecycle: Lifecycle,
}

impl Gateway {
    pub fn new(hub: RoomHub, lifecycle: Lifecycle) -> Gateway {
        Gateway { hub, lifecycle }
    }
}

pub use connection::handle_connection;
pub use dispatcher::{notify_seats_changed, token_from_cookies};
