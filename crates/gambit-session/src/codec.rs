//! (De)serialization of records to hot-store hash fields.
//!
//! Records are stored as flat string hashes so the atomic scripts can read
//! and write individual fields. A hash that fails to decode is reported as
//! `GameError::Corrupt` and handled by the recovery path, never unwrapped.

use std::collections::HashMap;

use uuid::Uuid;

use gambit_types::{
    frames::parse_canonical_uuid, CreatorColor, GameError, GameRecord, GameResult, GameStatus,
    MoveEntry, Seats,
};

pub fn record_fields(record: &GameRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("status", record.status.as_str().to_string()),
        ("current_fen", record.current_fen.clone()),
        ("is_public", (record.is_public as u8).to_string()),
        ("creator_color", record.creator_color.as_str().to_string()),
        ("time_initial_ms", record.time_initial_ms.to_string()),
        ("time_increment_ms", record.time_increment_ms.to_string()),
        ("white_time_ms", record.white_time_ms.to_string()),
        ("black_time_ms", record.black_time_ms.to_string()),
        ("last_move_at", record.last_move_at.to_string()),
        ("created_at", record.created_at.to_string()),
    ];
    if let Some(result) = record.result {
        fields.push(("result", result.as_str().to_string()));
    }
    if let Some(ip) = &record.creator_ip {
        fields.push(("creator_ip", ip.clone()));
    }
    fields
}

pub fn record_from_fields(
    id: Uuid,
    fields: &HashMap<String, String>,
) -> Result<GameRecord, GameError> {
    let get = |name: &str| -> Result<&String, GameError> {
        fields
            .get(name)
            .ok_or_else(|| GameError::Corrupt(format!("record {id} missing field {name}")))
    };
    let num = |name: &str| -> Result<u64, GameError> {
        get(name)?
            .parse()
            .map_err(|_| GameError::Corrupt(format!("record {id} has non-numeric {name}")))
    };

    let status = GameStatus::parse(get("status")?)
        .ok_or_else(|| GameError::Corrupt(format!("record {id} has unknown status")))?;
    let result = match fields.get("result") {
        Some(raw) => Some(
            GameResult::parse(raw)
                .ok_or_else(|| GameError::Corrupt(format!("record {id} has unknown result")))?,
        ),
        None => None,
    };
    let creator_color = CreatorColor::parse(get("creator_color")?)
        .ok_or_else(|| GameError::Corrupt(format!("record {id} has unknown creator color")))?;

    Ok(GameRecord {
        id,
        status,
        result,
        current_fen: get("current_fen")?.clone(),
        is_public: get("is_public")? == "1",
        creator_color,
        creator_ip: fields.get("creator_ip").cloned(),
        time_initial_ms: num("time_initial_ms")?,
        time_increment_ms: num("time_increment_ms")?,
        white_time_ms: num("white_time_ms")?,
        black_time_ms: num("black_time_ms")?,
        last_move_at: num("last_move_at")?,
        created_at: num("created_at")?,
    })
}

pub fn seats_fields(seats: &Seats) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("white_token", seats.white_token.to_string()),
        ("white_connected", (seats.white_connected as u8).to_string()),
        ("black_connected", (seats.black_connected as u8).to_string()),
    ];
    if let Some(black) = seats.black_token {
        fields.push(("black_token", black.to_string()));
    }
    fields
}

pub fn seats_from_fields(
    id: Uuid,
    fields: &HashMap<String, String>,
) -> Result<Seats, GameError> {
    let white_token = fields
        .get("white_token")
        .and_then(|s| parse_canonical_uuid(s))
        .ok_or_else(|| GameError::Corrupt(format!("seats {id} missing white token")))?;
    let black_token = match fields.get("black_token") {
        Some(raw) => Some(
            parse_canonical_uuid(raw)
                .ok_or_else(|| GameError::Corrupt(format!("seats {id} has bad black token")))?,
        ),
        None => None,
    };
    Ok(Seats {
        white_token,
        black_token,
        white_connected: fields.get("white_connected").map(String::as_str) == Some("1"),
        black_connected: fields.get("black_connected").map(String::as_str) == Some("1"),
    })
}

pub fn encode_move(entry: &MoveEntry) -> String {
    serde_json::to_string(entry).expect("move entries always serialize")
}

/// Decode one stored move-log entry. The caller decides what to do with a
/// corrupt tail; this just reports it.
pub fn decode_move(id: Uuid, raw: &str) -> Result<MoveEntry, GameError> {
    serde_json::from_str(raw)
        .map_err(|e| GameError::Corrupt(format!("move log of {id} has bad entry: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> GameRecord {
        GameRecord {
            id: Uuid::new_v4(),
            status: GameStatus::InProgress,
            result: None,
            current_fen: gambit_rules::INITIAL_FEN.to_string(),
            is_public: true,
            creator_color: CreatorColor::Random,
            creator_ip: Some("127.0.0.1".into()),
            time_initial_ms: 300_000,
            time_increment_ms: 2_000,
            white_time_ms: 300_000,
            black_time_ms: 300_000,
            last_move_at: 42,
            created_at: 7,
        }
    }

    #[test]
    fn record_round_trip() {
        let record = sample_record();
        let fields: HashMap<String, String> = record_fields(&record)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(record_from_fields(record.id, &fields).unwrap(), record);
    }

    #[test]
    fn missing_fields_are_corrupt_not_panics() {
        let id = Uuid::new_v4();
        let err = record_from_fields(id, &HashMap::new()).unwrap_err();
        assert!(matches!(err, GameError::Corrupt(_)));
    }

    #[test]
    fn seats_round_trip_with_and_without_black() {
        let id = Uuid::new_v4();
        let mut seats = Seats {
            white_token: Uuid::new_v4(),
            black_token: None,
            white_connected: true,
            black_connected: false,
        };
        let to_map = |fields: Vec<(&'static str, String)>| -> HashMap<String, String> {
            fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
        };
        assert_eq!(seats_from_fields(id, &to_map(seats_fields(&seats))).unwrap(), seats);

        seats.black_token = Some(Uuid::new_v4());
        assert_eq!(seats_from_fields(id, &to_map(seats_fields(&seats))).unwrap(), seats);
    }

    #[test]
    fn move_entries_round_trip() {
        let id = Uuid::new_v4();
        let entry = MoveEntry {
            move_number: 3,
            san: "Nf3".into(),
            fen: "x".into(),
            created_at_ms: 99,
        };
        let decoded = decode_move(id, &encode_move(&entry)).unwrap();
        assert_eq!(decoded, entry);
        assert!(decode_move(id, "{not json").is_err());
    }
}
