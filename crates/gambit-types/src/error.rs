//! Error taxonomy shared by the session store, lifecycle, and dispatcher.
//!
//! Messages double as the user-visible `error` frame text, so they stay
//! short and say what failed, not where.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("Game not found")]
    NotFound,

    #[error("Game is not in progress")]
    NotInProgress,

    #[error("Game is not waiting for players")]
    NotWaiting,

    #[error("Game is already full")]
    AlreadyFull,

    #[error("Game is not finished")]
    NotFinished,

    #[error("Not your turn")]
    NotYourTurn,

    #[error("You are not a player in this game")]
    NotAPlayer,

    #[error("Illegal move")]
    IllegalMove,

    #[error("No pending draw offer to accept")]
    NoDrawOffer,

    #[error("No pending draw offer to cancel")]
    NotYourDrawOffer,

    #[error("No pending rematch offer to accept")]
    NoRematchOffer,

    #[error("No pending rematch offer to cancel")]
    NotYourRematchOffer,

    #[error("Opponent is not disconnected")]
    OpponentStillConnected,

    #[error("Claim deadline has not passed")]
    ClaimTooEarly,

    #[error("Clock has not expired")]
    ClockNotExpired,

    #[error("Too many active games")]
    QuotaExceeded,

    #[error("Rate limited")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid identifier")]
    InvalidId,

    #[error("Corrupt game state: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GameError {
    /// Errors that indicate a caller mistake rather than a server fault;
    /// these are replied to the sender and never logged above debug.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, GameError::Corrupt(_) | GameError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_the_protocol_wording() {
        assert_eq!(GameError::NotFound.to_string(), "Game not found");
        assert_eq!(GameError::NotInProgress.to_string(), "Game is not in progress");
        assert_eq!(GameError::NotYourTurn.to_string(), "Not your turn");
        assert_eq!(
            GameError::NoDrawOffer.to_string(),
            "No pending draw offer to accept"
        );
        assert_eq!(
            GameError::NotAPlayer.to_string(),
            "You are not a player in this game"
        );
    }

    #[test]
    fn severity_split() {
        assert!(GameError::NotYourTurn.is_client_error());
        assert!(GameError::RateLimited { retry_after_ms: 1000 }.is_client_error());
        assert!(!GameError::Corrupt("bad move log".into()).is_client_error());
    }
}
