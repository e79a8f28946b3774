//! Environment configuration. Every knob has a default; a value that fails
//! to parse falls back with a warning rather than killing startup.

use std::str::FromStr;

use tracing::warn;

use gambit_session::SessionConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub production: bool,
    /// Allowed WS/HTTP origins. Empty means allow-all in dev and deny-all
    /// in production.
    pub cors_allowed_origins: Vec<String>,
    pub rate_limit_game_create_max: u64,
    pub rate_limit_game_create_window_secs: u64,
    pub rate_limit_ws_connect_max: u64,
    pub rate_limit_ws_connect_window_secs: u64,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Config {
        let session = SessionConfig {
            claim_win_timeout_ms: env_or("CLAIM_WIN_TIMEOUT_SECONDS", 60u64) * 1_000,
            abandonment_timeout_ms: env_or("ABANDONMENT_TIMEOUT_SECONDS", 300u64) * 1_000,
            max_active_games_per_ip: env_or("MAX_ACTIVE_GAMES_PER_IP", 5),
            waiting_game_max_age_ms: env_or("WAITING_GAME_MAX_AGE_MS", 3_600_000),
            sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", 300_000),
        };

        Config {
            host: std::env::var("GAMBIT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("GAMBIT_PORT", 3000),
            db_path: std::env::var("GAMBIT_DB_PATH").unwrap_or_else(|_| "gambit.db".into()),
            production: std::env::var("GAMBIT_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            rate_limit_game_create_max: env_or("RATE_LIMIT_GAME_CREATE_MAX", 10),
            rate_limit_game_create_window_secs: env_or("RATE_LIMIT_GAME_CREATE_WINDOW", 60),
            rate_limit_ws_connect_max: env_or("RATE_LIMIT_WS_CONNECT_MAX", 30),
            rate_limit_ws_connect_window_secs: env_or("RATE_LIMIT_WS_CONNECT_WINDOW", 60),
            session,
        }
    }

    /// Is this Origin header value acceptable for an upgrade?
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            // Non-browser clients send no Origin; the bearer token is the
            // real credential.
            None => true,
            Some(origin) => {
                if self.cors_allowed_origins.is_empty() {
                    !self.production
                } else {
                    self.cors_allowed_origins.iter().any(|o| o == origin)
                }
            }
        }
    }
}

fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("ignoring unparseable {name}={raw:?}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(origins: &[&str], production: bool) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            db_path: ":memory:".into(),
            production,
            cors_allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            rate_limit_game_create_max: 10,
            rate_limit_game_create_window_secs: 60,
            rate_limit_ws_connect_max: 30,
            rate_limit_ws_connect_window_secs: 60,
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn origin_policy() {
        let dev = config(&[], false);
        assert!(dev.origin_allowed(Some("http://anything.example")));
        assert!(dev.origin_allowed(None));

        let prod = config(&[], true);
        assert!(!prod.origin_allowed(Some("http://anything.example")));
        assert!(prod.origin_allowed(None));

        let pinned = config(&["https://chess.example"], true);
        assert!(pinned.origin_allowed(Some("https://chess.example")));
        assert!(!pinned.origin_allowed(Some("https://evil.example")));
    }
}
