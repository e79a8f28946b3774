//! Background sweeper: garbage-collects orphaned, zombie, and stale rooms.
//!
//! Runs at process start and then on an interval. Every per-room step is
//! isolated; a failure is recorded and the sweep moves on.

use std::time::Duration;

use gambit_rules::Color;
use tracing::{info, warn};
use uuid::Uuid;

use gambit_types::{GameStatus, Seats};

use crate::keys;
use crate::store::SessionStore;

const SCAN_PAGE: usize = 100;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted_waiting: usize,
    pub timers_started: usize,
    pub finalized: usize,
    pub archived: usize,
    pub errors: Vec<String>,
}

/// Periodic driver. Sweeps once immediately, then on every tick.
pub async fn run_sweeper(store: SessionStore, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
    loop {
        interval.tick().await;
        let report = sweep_once(&store, gambit_types::now_ms());
        if report.deleted_waiting + report.finalized + report.archived > 0 {
            info!(
                scanned = report.scanned,
                deleted_waiting = report.deleted_waiting,
                timers_started = report.timers_started,
                finalized = report.finalized,
                archived = report.archived,
                "sweep complete"
            );
        }
        for error in &report.errors {
            warn!("sweep step failed: {error}");
        }
    }
}

/// One full sweep over every room key. Pattern keys and sub-keys are
/// filtered out by the canonical-UUID parse.
pub fn sweep_once(store: &SessionStore, now_ms: u64) -> SweepReport {
    let mut report = SweepReport::default();
    let mut cursor = 0;
    loop {
        let (next, page) = store.hot().scan(cursor, "game:", SCAN_PAGE, now_ms);
        for key in &page {
            let Some(id) = keys::parse_game_key(key) else {
                continue;
            };
            report.scanned += 1;
            if let Err(e) = sweep_room(store, id, now_ms, &mut report) {
                report.errors.push(format!("room {id}: {e}"));
            }
        }
        if next == 0 {
            break;
        }
        cursor = next;
    }
    report
}

fn sweep_room(
    store: &SessionStore,
    id: Uuid,
    now_ms: u64,
    report: &mut SweepReport,
) -> Result<(), gambit_types::GameError> {
    let Some(record) = store.get_game(id, now_ms)? else {
        return Ok(());
    };

    match record.status {
        // Pass 1: orphaned WAITING rooms past the age cutoff.
        GameStatus::Waiting => {
            let age = now_ms.saturating_sub(record.created_at);
            if age >= store.config().waiting_game_max_age_ms {
                store.delete_game(id, now_ms)?;
                report.deleted_waiting += 1;
            }
        }

        // Pass 2: zombie IN_PROGRESS rooms where nobody is connected.
        GameStatus::InProgress => {
            let seats = store.get_seats(id, now_ms)?.unwrap_or(Seats {
                white_token: Uuid::nil(),
                black_token: None,
                white_connected: false,
                black_connected: false,
            });
            let deserted = !seats.white_connected && !seats.black_connected;

            match store.get_abandonment_timer(id, now_ms) {
                Some(timer) if timer.deadline_ms <= now_ms => {
                    if store.check_and_process_abandonment(id, now_ms)?.is_some() {
                        report.finalized += 1;
                    }
                }
                None if deserted => {
                    // Canonical tie-break for a double disconnect: charge
                    // white, so the room eventually resolves.
                    store.set_abandonment_timer(
                        id,
                        Color::White,
                        store.config().abandonment_timeout_ms,
                        now_ms,
                    )?;
                    report.timers_started += 1;
                }
                _ => {}
            }
        }

        // Pass 3: terminal rooms nobody is watching any more.
        GameStatus::Finished | GameStatus::Abandoned => {
            let seats = store.get_seats(id, now_ms)?;
            let deserted = seats
                .map(|s| !s.white_connected && !s.black_connected)
                .unwrap_or(true);
            if deserted {
                store.archive_and_delete(id, now_ms)?;
                report.archived += 1;
            }
        }
    }
    Ok(())
}
