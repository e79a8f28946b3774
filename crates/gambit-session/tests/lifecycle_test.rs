//! End-to-end scenarios through the lifecycle façade.

use std::sync::Arc;

use gambit_archive::Archive;
use gambit_hot::HotStore;
use gambit_rules::Color;
use gambit_session::{
    CreateGameParams, Lifecycle, RematchReply, SessionConfig, SessionStore, StateReply,
};
use gambit_types::{
    CreatorColor, GameError, GameResult, GameStatus, MoveEntry, PlayerRole, ServerFrame,
};
use uuid::Uuid;

fn lifecycle() -> Lifecycle {
    Lifecycle::new(SessionStore::new(
        HotStore::new(),
        Arc::new(Archive::open_in_memory().unwrap()),
        SessionConfig::default(),
    ))
}

fn game(lc: &Lifecycle, time_initial_ms: u64, creator_color: CreatorColor) -> Uuid {
    let params = CreateGameParams {
        is_public: false,
        creator_ip: None,
        time_initial_ms,
        time_increment_ms: 0,
        creator_color,
    };
    let (id, _) = lc.create_game(&params, 1_000).unwrap();
    lc.join_game(id, 1_000).unwrap();
    id
}

#[test]
fn scholars_mate_finishes_and_archives() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    let script = [
        (PlayerRole::White, "e2", "e4"),
        (PlayerRole::Black, "e7", "e5"),
        (PlayerRole::White, "d1", "h5"),
        (PlayerRole::Black, "b8", "c6"),
        (PlayerRole::White, "f1", "c4"),
        (PlayerRole::Black, "g8", "f6"),
    ];
    for (i, (role, from, to)) in script.iter().enumerate() {
        let frame = lc
            .make_move(id, *role, from, to, None, 2_000 + i as u64)
            .unwrap();
        match frame {
            ServerFrame::Move { game_over, .. } => assert!(!game_over),
            other => panic!("expected move frame, got {other:?}"),
        }
    }

    let mate = lc
        .make_move(id, PlayerRole::White, "h5", "f7", None, 9_000)
        .unwrap();
    match mate {
        ServerFrame::Move { san, game_over, result, .. } => {
            assert_eq!(san, "Qxf7#");
            assert!(game_over);
            assert_eq!(result, Some(GameResult::WhiteWins));
        }
        other => panic!("expected move frame, got {other:?}"),
    }

    let record = lc.store().get_game(id, 9_000).unwrap().unwrap();
    assert_eq!(record.status, GameStatus::Finished);
    assert!(lc.store().archive().find_game(&id.to_string()).unwrap().is_some());
}

#[test]
fn move_order_and_turn_enforced() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    assert!(matches!(
        lc.make_move(id, PlayerRole::Black, "e7", "e5", None, 2_000),
        Err(GameError::NotYourTurn)
    ));
    assert!(matches!(
        lc.make_move(id, PlayerRole::Spectator, "e2", "e4", None, 2_000),
        Err(GameError::NotAPlayer)
    ));
    lc.make_move(id, PlayerRole::White, "e2", "e4", None, 2_000).unwrap();
    assert!(matches!(
        lc.make_move(id, PlayerRole::White, "d2", "d4", None, 2_100),
        Err(GameError::NotYourTurn)
    ));
    // Illegal square content.
    assert!(matches!(
        lc.make_move(id, PlayerRole::Black, "e7", "e3", None, 2_200),
        Err(GameError::IllegalMove)
    ));
}

#[test]
fn flag_scenario_with_logical_clock() {
    let lc = lifecycle();
    // 5 seconds initial, no increment; clock starts at join (t=1s).
    let id = game(&lc, 5_000, CreatorColor::White);

    let frame = lc
        .make_move(id, PlayerRole::White, "e2", "e4", None, 3_000)
        .unwrap();
    match frame {
        ServerFrame::Move { white_time_ms, .. } => assert_eq!(white_time_ms, 3_000),
        other => panic!("expected move frame, got {other:?}"),
    }

    // Black sits past its 5s balance (last_move_at = 3s, deadline 8s).
    let too_late = lc
        .make_move(id, PlayerRole::Black, "e7", "e5", None, 8_500)
        .unwrap();
    match too_late {
        ServerFrame::Flag { result, white_time_ms, black_time_ms } => {
            assert_eq!(result, GameResult::WhiteWins);
            assert!(white_time_ms > 0);
            assert_eq!(black_time_ms, 0);
        }
        other => panic!("expected flag frame, got {other:?}"),
    }
    let record = lc.store().get_game(id, 9_000).unwrap().unwrap();
    assert_eq!(record.status, GameStatus::Finished);
    assert_eq!(record.result, Some(GameResult::WhiteWins));
}

#[test]
fn reported_flag_is_verified_not_trusted() {
    let lc = lifecycle();
    let id = game(&lc, 60_000, CreatorColor::White);

    assert!(matches!(
        lc.flag_opponent(id, 2_000),
        Err(GameError::ClockNotExpired)
    ));

    let frame = lc.flag_opponent(id, 1_000 + 60_001).unwrap();
    match frame {
        ServerFrame::Flag { result, .. } => assert_eq!(result, GameResult::BlackWins),
        other => panic!("expected flag frame, got {other:?}"),
    }
}

#[test]
fn game_state_emission_finalizes_a_pending_flag() {
    let lc = lifecycle();
    let id = game(&lc, 5_000, CreatorColor::White);

    let reply = lc
        .game_state(id, PlayerRole::Spectator, 0, 1_000 + 6_000)
        .unwrap();
    match reply {
        StateReply::Flagged(ServerFrame::Flag { result, .. }) => {
            assert_eq!(result, GameResult::BlackWins);
        }
        _ => panic!("expected flag finalization"),
    }
}

#[test]
fn draw_offer_accept_finishes_with_draw() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    let offer = lc.offer_draw(id, PlayerRole::White, 2_000).unwrap();
    assert!(matches!(offer, ServerFrame::DrawOffer { from: Color::White }));

    // Accepting without an outstanding opponent offer fails.
    assert!(matches!(
        lc.accept_draw(id, PlayerRole::White, 2_100),
        Err(GameError::NoDrawOffer)
    ));

    let accepted = lc.accept_draw(id, PlayerRole::Black, 2_200).unwrap();
    assert!(matches!(
        accepted,
        ServerFrame::DrawAccepted { result: GameResult::Draw }
    ));
    let record = lc.store().get_game(id, 2_300).unwrap().unwrap();
    assert_eq!(record.status, GameStatus::Finished);
    assert_eq!(record.result, Some(GameResult::Draw));
    assert!(lc.store().archive().find_game(&id.to_string()).unwrap().is_some());
}

#[test]
fn crossing_draw_offers_accept_implicitly() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    lc.offer_draw(id, PlayerRole::White, 2_000).unwrap();
    let crossing = lc.offer_draw(id, PlayerRole::Black, 2_100).unwrap();
    assert!(matches!(crossing, ServerFrame::DrawAccepted { .. }));
}

#[test]
fn accepted_move_clears_pending_draw_offer() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    lc.offer_draw(id, PlayerRole::Black, 2_000).unwrap();
    lc.make_move(id, PlayerRole::White, "e2", "e4", None, 2_100).unwrap();
    assert_eq!(lc.store().get_draw_offer(id, 2_200), None);
}

#[test]
fn draw_decline_and_cancel_require_the_right_party() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    lc.offer_draw(id, PlayerRole::White, 2_000).unwrap();
    // The offerer cannot decline their own offer.
    assert!(matches!(
        lc.decline_draw(id, PlayerRole::White, 2_100),
        Err(GameError::NoDrawOffer)
    ));
    // The opponent cannot cancel someone else's offer.
    assert!(matches!(
        lc.cancel_draw(id, PlayerRole::Black, 2_200),
        Err(GameError::NotYourDrawOffer)
    ));

    let declined = lc.decline_draw(id, PlayerRole::Black, 2_300).unwrap();
    assert!(matches!(declined, ServerFrame::DrawDeclined));
    assert_eq!(lc.store().get_draw_offer(id, 2_400), None);

    lc.offer_draw(id, PlayerRole::White, 2_500).unwrap();
    let cancelled = lc.cancel_draw(id, PlayerRole::White, 2_600).unwrap();
    assert!(matches!(cancelled, ServerFrame::DrawCancelled));
}

#[test]
fn claim_win_flow() {
    let lc = lifecycle();
    let id = game(&lc, 60_000, CreatorColor::White);
    let store = lc.store();
    let timeout = store.config().claim_win_timeout_ms;

    // Black's peer drops at t=10s; the timer starts.
    store.set_player_connected(id, Color::Black, false, 10_000).unwrap();
    let timer = store
        .set_abandonment_timer(id, Color::Black, timeout, 10_000)
        .unwrap();
    let deadline = timer.deadline_ms;

    // Before the deadline the claim is rejected.
    assert!(matches!(
        lc.claim_win(id, PlayerRole::White, deadline - 1),
        Err(GameError::ClaimTooEarly)
    ));

    let frame = lc.claim_win(id, PlayerRole::White, deadline + 1).unwrap();
    assert!(matches!(
        frame,
        ServerFrame::GameAbandoned { result: GameResult::WhiteWins }
    ));
    let record = store.get_game(id, deadline + 1).unwrap().unwrap();
    assert_eq!(record.status, GameStatus::Abandoned);
    assert!(store.archive().find_game(&id.to_string()).unwrap().is_some());
}

#[test]
fn rematch_swaps_colors_and_deletes_old_room() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    // White resigns; black offers a rematch; white accepts.
    lc.resign(id, PlayerRole::White, 2_000).unwrap();
    let offer = lc.offer_rematch(id, PlayerRole::Black, 2_100).unwrap();
    assert!(matches!(
        offer,
        RematchReply::Offered(ServerFrame::RematchOffer { from: Color::Black })
    ));

    let accept = lc.accept_rematch(id, PlayerRole::White, 2_200).unwrap();
    let new_game = accept.new_game;

    // Old room is gone from the hot store but archived durably.
    assert!(lc.store().get_game(id, 2_300).unwrap().is_none());
    assert!(lc.store().archive().find_game(&id.to_string()).unwrap().is_some());

    // The new room starts in progress at the initial position, both seated.
    let record = lc.store().get_game(new_game.id, 2_300).unwrap().unwrap();
    assert_eq!(record.status, GameStatus::InProgress);
    assert_eq!(record.current_fen, gambit_rules::INITIAL_FEN);
    let seats = lc.store().get_seats(new_game.id, 2_300).unwrap().unwrap();
    assert_eq!(seats.white_token, new_game.white_token);
    assert_eq!(seats.black_token, Some(new_game.black_token));
    assert!(seats.white_connected && seats.black_connected);
    assert_ne!(new_game.white_token, new_game.black_token);
}

#[test]
fn rematch_requires_finished_status() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);
    assert!(matches!(
        lc.offer_rematch(id, PlayerRole::White, 2_000),
        Err(GameError::NotFinished)
    ));
}

#[test]
fn corrupted_move_log_recovers_by_truncation() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);

    let good = lc.make_move(id, PlayerRole::White, "e2", "e4", None, 2_000).unwrap();
    let good_fen = match good {
        ServerFrame::Move { fen, .. } => fen,
        other => panic!("expected move frame, got {other:?}"),
    };

    // Inject garbage and a now-unreachable tail entry behind the store's
    // back, the way a partial write would leave the log.
    lc.store().hot().atomically(2_100, |txn| {
        let key = format!("game:{id}:moves");
        txn.rpush(&key, "{corrupt");
        let tail = MoveEntry {
            move_number: 3,
            san: "Nf3".into(),
            fen: "x".into(),
            created_at_ms: 2_100,
        };
        txn.rpush(&key, &serde_json::to_string(&tail).unwrap());
    });

    let reply = lc.game_state(id, PlayerRole::Spectator, 0, 2_200).unwrap();
    match reply {
        StateReply::State(frame) => match *frame {
            ServerFrame::GameState { moves, game_state_corrupted, fen, .. } => {
                assert!(game_state_corrupted);
                assert_eq!(moves.len(), 1);
                assert_eq!(moves[0].san, "e4");
                assert_eq!(fen, good_fen);
            }
            other => panic!("expected game_state, got {other:?}"),
        },
        StateReply::Flagged(_) => panic!("untimed game cannot flag"),
    }

    // Subsequent moves validate against the truncated position.
    let next = lc.make_move(id, PlayerRole::Black, "e7", "e5", None, 2_300).unwrap();
    match next {
        ServerFrame::Move { move_number, .. } => assert_eq!(move_number, 2),
        other => panic!("expected move frame, got {other:?}"),
    }

    // The room has converged: no corruption reported on the next emission.
    match lc.game_state(id, PlayerRole::Spectator, 0, 2_400).unwrap() {
        StateReply::State(frame) => match *frame {
            ServerFrame::GameState { game_state_corrupted, .. } => {
                assert!(!game_state_corrupted)
            }
            other => panic!("expected game_state, got {other:?}"),
        },
        StateReply::Flagged(_) => panic!("untimed game cannot flag"),
    }
}

#[test]
fn diverged_fen_is_corrected_silently() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);
    lc.make_move(id, PlayerRole::White, "e2", "e4", None, 2_000).unwrap();

    lc.store().correct_fen(id, "8/8/8/8/8/8/8/8 w - - 0 1", 2_100);
    match lc.game_state(id, PlayerRole::White, 0, 2_200).unwrap() {
        StateReply::State(frame) => match *frame {
            ServerFrame::GameState { fen, game_state_corrupted, .. } => {
                assert!(!game_state_corrupted, "divergence is corrected, not corruption");
                assert!(fen.contains("4P3"), "fen rebuilt from the move log");
            }
            other => panic!("expected game_state, got {other:?}"),
        },
        StateReply::Flagged(_) => panic!("untimed game cannot flag"),
    }
}

#[test]
fn resign_rejected_for_spectators_and_finished_games() {
    let lc = lifecycle();
    let id = game(&lc, 0, CreatorColor::White);
    assert!(matches!(
        lc.resign(id, PlayerRole::Spectator, 2_000),
        Err(GameError::NotAPlayer)
    ));
    lc.resign(id, PlayerRole::Black, 2_100).unwrap();
    assert!(matches!(
        lc.resign(id, PlayerRole::White, 2_200),
        Err(GameError::NotInProgress)
    ));
}

#[test]
fn unknown_room_is_not_found() {
    let lc = lifecycle();
    assert!(matches!(
        lc.game_state(Uuid::new_v4(), PlayerRole::Spectator, 0, 0),
        Err(GameError::NotFound)
    ));
}
