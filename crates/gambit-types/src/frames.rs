//! Wire frames.
//!
//! Inbound frames go through a strict closed-set validator rather than a
//! permissive serde parse: the raw size is capped, the `type` value is
//! whitelisted, and every other field must be on that type's whitelist.
//! Outbound frames are an internally tagged serde enum.

use gambit_rules::Color;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::game::{GameResult, GameStatus, MoveEntry, PlayerRole};

/// Maximum raw inbound frame size in bytes.
pub const MAX_FRAME_BYTES: usize = 1024;

/// Maximum accepted length of the `type` field.
const MAX_TYPE_LEN: usize = 20;

/// `type` values rejected outright, whatever the rest of the frame says.
const FORBIDDEN_TYPES: &[&str] = &["__proto__", "constructor", "prototype"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    TooLarge,
    #[error("malformed JSON")]
    Malformed,
    #[error("frame is not an object")]
    NotAnObject,
    #[error("missing frame type")]
    MissingType,
    #[error("unknown frame type")]
    UnknownType,
    #[error("unexpected field: {0}")]
    UnexpectedField(String),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// Client → server frames, the closed set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    Join { game_id: Uuid },
    Move { from: String, to: String, promotion: Option<String> },
    Resign,
    DrawOffer,
    DrawAccept,
    DrawDecline,
    DrawCancel,
    RematchOffer,
    RematchAccept,
    RematchCancel,
    Flag,
    ClaimWin,
}

impl ClientFrame {
    /// Validate and parse one raw text frame. Fails closed: unknown types,
    /// unexpected fields, and out-of-domain values are all rejected.
    pub fn parse(raw: &str) -> Result<ClientFrame, FrameError> {
        if raw.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge);
        }
        let value: Value = serde_json::from_str(raw).map_err(|_| FrameError::Malformed)?;
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;

        let frame_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?;
        if frame_type.len() > MAX_TYPE_LEN || FORBIDDEN_TYPES.contains(&frame_type) {
            return Err(FrameError::UnknownType);
        }

        match frame_type {
            "join" => {
                allow_fields(obj, &["type", "gameId"])?;
                let game_id = obj
                    .get("gameId")
                    .and_then(Value::as_str)
                    .ok_or(FrameError::InvalidField("gameId"))?;
                let game_id = parse_canonical_uuid(game_id)
                    .ok_or(FrameError::InvalidField("gameId"))?;
                Ok(ClientFrame::Join { game_id })
            }
            "move" => {
                allow_fields(obj, &["type", "from", "to", "promotion"])?;
                let from = square_field(obj, "from")?;
                let to = square_field(obj, "to")?;
                let promotion = match obj.get("promotion") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) if matches!(s.as_str(), "q" | "r" | "b" | "n") => {
                        Some(s.clone())
                    }
                    Some(_) => return Err(FrameError::InvalidField("promotion")),
                };
                Ok(ClientFrame::Move { from, to, promotion })
            }
            "resign" => bare(obj, ClientFrame::Resign),
            "draw_offer" => bare(obj, ClientFrame::DrawOffer),
            "draw_accept" => bare(obj, ClientFrame::DrawAccept),
            "draw_decline" => bare(obj, ClientFrame::DrawDecline),
            "draw_cancel" => bare(obj, ClientFrame::DrawCancel),
            "rematch_offer" => bare(obj, ClientFrame::RematchOffer),
            "rematch_accept" => bare(obj, ClientFrame::RematchAccept),
            "rematch_cancel" => bare(obj, ClientFrame::RematchCancel),
            "flag" => bare(obj, ClientFrame::Flag),
            "claim_win" => bare(obj, ClientFrame::ClaimWin),
            _ => Err(FrameError::UnknownType),
        }
    }
}

fn bare(obj: &Map<String, Value>, frame: ClientFrame) -> Result<ClientFrame, FrameError> {
    allow_fields(obj, &["type"])?;
    Ok(frame)
}

fn allow_fields(obj: &Map<String, Value>, allowed: &[&str]) -> Result<(), FrameError> {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(FrameError::UnexpectedField(key.clone()));
        }
    }
    Ok(())
}

fn square_field(obj: &Map<String, Value>, name: &'static str) -> Result<String, FrameError> {
    let s = obj
        .get(name)
        .and_then(Value::as_str)
        .ok_or(FrameError::InvalidField(name))?;
    let bytes = s.as_bytes();
    let ok = bytes.len() == 2
        && (b'a'..=b'h').contains(&bytes[0])
        && (b'1'..=b'8').contains(&bytes[1]);
    if !ok {
        return Err(FrameError::InvalidField(name));
    }
    Ok(s.to_string())
}

/// UUIDs are accepted only in canonical lowercase hyphenated form; this is
/// the store-key-injection defense, so parse-then-compare.
pub fn parse_canonical_uuid(s: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(s).ok()?;
    if id.to_string() == s {
        Some(id)
    } else {
        None
    }
}

/// Server → client frames.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    GameState {
        game_id: Uuid,
        status: GameStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<GameResult>,
        fen: String,
        moves: Vec<MoveEntry>,
        your_role: PlayerRole,
        white_connected: bool,
        black_connected: bool,
        spectators: u64,
        time_initial_ms: u64,
        time_increment_ms: u64,
        white_time_ms: u64,
        black_time_ms: u64,
        last_move_at: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        draw_offer: Option<Color>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rematch_offer: Option<Color>,
        #[serde(skip_serializing_if = "Option::is_none")]
        claim_deadline: Option<u64>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        game_state_corrupted: bool,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        san: String,
        fen: String,
        move_number: u32,
        color: Color,
        check: bool,
        white_time_ms: u64,
        black_time_ms: u64,
        last_move_at: u64,
        game_over: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<GameResult>,
    },
    Error {
        message: String,
    },
    Resign {
        color: Color,
        result: GameResult,
    },
    DrawOffer {
        from: Color,
    },
    DrawDeclined,
    DrawAccepted {
        result: GameResult,
    },
    DrawCancelled,
    OpponentConnected {
        color: Color,
    },
    #[serde(rename_all = "camelCase")]
    OpponentDisconnected {
        color: Color,
        #[serde(skip_serializing_if = "Option::is_none")]
        claim_deadline: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionStatus {
        role: PlayerRole,
        white_connected: bool,
        black_connected: bool,
    },
    SpectatorCount {
        count: u64,
    },
    GameUpdate {
        status: GameStatus,
    },
    RematchOffer {
        from: Color,
    },
    #[serde(rename_all = "camelCase")]
    RematchAccepted {
        new_game_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<Uuid>,
    },
    RematchCancelled,
    #[serde(rename_all = "camelCase")]
    Flag {
        result: GameResult,
        white_time_ms: u64,
        black_time_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    ClockSync {
        white_time_ms: u64,
        black_time_ms: u64,
        last_move_at: u64,
    },
    GameAbandoned {
        result: GameResult,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> ServerFrame {
        ServerFrame::Error { message: message.into() }
    }

    /// Serialize once for fan-out.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server frames always serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_round_trip() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"join","gameId":"{id}"}}"#);
        assert_eq!(ClientFrame::parse(&raw), Ok(ClientFrame::Join { game_id: id }));
    }

    #[test]
    fn size_boundary_is_exact() {
        // A syntactically valid frame padded to exactly the limit parses;
        // one byte more is rejected before JSON parsing.
        let id = Uuid::new_v4();
        let base = format!(r#"{{"type":"join","gameId":"{id}"}}"#);
        let pad = MAX_FRAME_BYTES - base.len();
        let exactly = format!(r#"{{"type":"join","gameId":"{id}"{}}}"#, " ".repeat(pad));
        assert_eq!(exactly.len(), MAX_FRAME_BYTES);
        assert!(ClientFrame::parse(&exactly).is_ok());

        let over = format!("{exactly} ");
        assert_eq!(ClientFrame::parse(&over), Err(FrameError::TooLarge));
    }

    #[test]
    fn proto_pollution_types_rejected() {
        for t in ["__proto__", "constructor", "prototype"] {
            let raw = format!(r#"{{"type":"{t}"}}"#);
            assert_eq!(ClientFrame::parse(&raw), Err(FrameError::UnknownType));
        }
    }

    #[test]
    fn unknown_and_overlong_types_rejected() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"shout"}"#),
            Err(FrameError::UnknownType)
        );
        let long = format!(r#"{{"type":"{}"}}"#, "a".repeat(21));
        assert_eq!(ClientFrame::parse(&long), Err(FrameError::UnknownType));
    }

    #[test]
    fn extra_fields_rejected() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"resign","note":"gg"}"#),
            Err(FrameError::UnexpectedField("note".into()))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"move","from":"e2","to":"e4","depth":3}"#),
            Err(FrameError::UnexpectedField("depth".into()))
        );
    }

    #[test]
    fn move_field_domains() {
        let ok = ClientFrame::parse(r#"{"type":"move","from":"e2","to":"e4"}"#).unwrap();
        assert_eq!(
            ok,
            ClientFrame::Move { from: "e2".into(), to: "e4".into(), promotion: None }
        );
        assert!(ClientFrame::parse(r#"{"type":"move","from":"e9","to":"e4"}"#).is_err());
        assert!(ClientFrame::parse(r#"{"type":"move","from":"i2","to":"e4"}"#).is_err());
        assert!(
            ClientFrame::parse(r#"{"type":"move","from":"e7","to":"e8","promotion":"k"}"#)
                .is_err()
        );
        assert!(
            ClientFrame::parse(r#"{"type":"move","from":"e7","to":"e8","promotion":"n"}"#)
                .is_ok()
        );
    }

    #[test]
    fn uuid_must_be_canonical() {
        let id = Uuid::new_v4();
        assert!(parse_canonical_uuid(&id.to_string()).is_some());
        assert!(parse_canonical_uuid(&id.to_string().to_uppercase()).is_none());
        assert!(parse_canonical_uuid(&id.simple().to_string()).is_none());
        assert!(parse_canonical_uuid("game:*").is_none());
    }

    #[test]
    fn malformed_json_and_non_objects() {
        assert_eq!(ClientFrame::parse("not json"), Err(FrameError::Malformed));
        assert_eq!(ClientFrame::parse(r#"["type","join"]"#), Err(FrameError::NotAnObject));
        assert_eq!(ClientFrame::parse(r#"{"kind":"join"}"#), Err(FrameError::MissingType));
    }

    #[test]
    fn outbound_frames_tag_with_snake_case() {
        let frame = ServerFrame::OpponentDisconnected {
            color: Color::Black,
            claim_deadline: Some(123),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(json["type"], "opponent_disconnected");
        assert_eq!(json["color"], "black");
        assert_eq!(json["claimDeadline"], 123);

        let unit = ServerFrame::DrawDeclined.to_json();
        assert_eq!(unit, r#"{"type":"draw_declined"}"#);
    }
}
