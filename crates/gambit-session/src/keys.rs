//! Hot-store key composition.
//!
//! Every key embedding external input goes through a validator first: room
//! ids must be canonical UUIDs and IPs must actually parse, so glob
//! characters, colons, or control bytes can never reach a key.

use std::net::IpAddr;

use uuid::Uuid;

pub const LOBBY_KEY: &str = "lobby:public";

pub fn game_key(id: &Uuid) -> String {
    format!("game:{id}")
}

pub fn seats_key(id: &Uuid) -> String {
    format!("game:{id}:seats")
}

pub fn moves_key(id: &Uuid) -> String {
    format!("game:{id}:moves")
}

pub fn draw_key(id: &Uuid) -> String {
    format!("game:{id}:draw")
}

pub fn rematch_key(id: &Uuid) -> String {
    format!("game:{id}:rematch")
}

pub fn abandon_key(id: &Uuid) -> String {
    format!("game:{id}:abandon")
}

pub fn spectators_key(id: &Uuid) -> String {
    format!("game:{id}:spectators")
}

/// All sub-keys of a room, for TTL refresh and deletion.
pub fn all_keys(id: &Uuid) -> [String; 7] {
    [
        game_key(id),
        seats_key(id),
        moves_key(id),
        draw_key(id),
        rematch_key(id),
        abandon_key(id),
        spectators_key(id),
    ]
}

pub fn ip_games_key(ip: &str) -> String {
    format!("ip:{ip}:games")
}

pub fn rate_limit_key(bucket: &str, ip: &str) -> String {
    format!("rl:{bucket}:{ip}")
}

/// Validate an IP and make it key-safe: IPv6 colons would collide with the
/// key separator, so they are substituted.
pub fn sanitize_ip(ip: &str) -> Option<String> {
    let parsed: IpAddr = ip.parse().ok()?;
    Some(parsed.to_string().replace(':', "_"))
}

/// Extract the room id from a top-level `game:{uuid}` key. Sub-keys and
/// anything that is not a canonical UUID yield `None`, which is how the
/// sweeper skips pattern keys and injection attempts.
pub fn parse_game_key(key: &str) -> Option<Uuid> {
    let rest = key.strip_prefix("game:")?;
    gambit_types::frames::parse_canonical_uuid(rest)
}
