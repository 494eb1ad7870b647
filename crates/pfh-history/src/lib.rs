//! pfh-history
//!
//! Run pipeline: NORMALIZE -> MATCH -> AGGREGATE -> VALUE -> COMMIT
//!
//! - One event at a time, strictly in timestamp order
//! - Staged state, committed only after the whole event succeeded
//! - Opt-in skip-and-log for insufficient quantity; everything else aborts
//! - Same events + config + prices => identical snapshot sequence

mod engine;
pub mod types;

pub use engine::{replay, HistoryEngine, RunError, RunErrorKind};
pub use types::{EngineConfig, InsufficientPolicy, RunReport, SkippedEvent, Step};
