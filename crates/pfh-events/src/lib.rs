//! pfh-events
//!
//! Event model and normalization for the portfolio history engine.
//! - `RawEvent`: string-typed record as delivered by an external feed parser
//! - `Event`: validated, decimal-typed record with a closed `EventBody` variant
//! - `normalizer`: validation, decimal coercion, and the timestamp ordering policy
//!
//! Pure deterministic logic (no IO, no clock).

mod raw;
mod types;

pub mod normalizer;

pub use normalizer::{
    check_order, normalize, normalize_all, parse_decimal, parse_timestamp, sort_events,
    MalformedEvent, MalformedPolicy, MalformedReason, NormalizeConfig, NormalizeError,
    NormalizedBatch, OrderingPolicy, OutOfOrderInput, QuantitySign,
};
pub use raw::RawEvent;
pub use types::{Event, EventBody, EventKind, Trade};
