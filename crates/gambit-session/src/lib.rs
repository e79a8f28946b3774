//! Session layer: the authoritative game state machine.
//!
//! The session store owns every mutation of the hot game record through
//! atomic scripts; the clock module derives live times; the lifecycle
//! façade turns dispatcher commands into state transitions plus broadcast
//! frames; the sweeper reclaims rooms nobody will come back for.

pub mod clock;
pub mod codec;
pub mod keys;
pub mod lifecycle;
pub mod store;
pub mod sweeper;

pub use lifecycle::{Lifecycle, RematchAccept, RematchReply, StateReply};
pub use store::{
    CreateGameParams, DeductOutcome, JoinOutcome, RematchGame, SessionConfig, SessionStore,
};
pub use sweeper::{run_sweeper, sweep_once, SweepReport};
