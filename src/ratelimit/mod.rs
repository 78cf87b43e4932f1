//! Rate accounting logic and state management.

mod clock;
mod engine;
mod state;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    Decision, EngineConfig, RateAccountingEngine, DEFAULT_SWEEP_INTERVAL, DEFAULT_WINDOW,
    MAX_WINDOW,
};
pub use state::ClientState;
pub use sweeper::spawn_sweeper;
