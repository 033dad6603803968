//! Question/answer correlation.
//!
//! Public types:
//! - `CorrelationEngine`: the pending-exchange table with dispatch,
//!   resolution, expiry and cancellation.
//! - `ExchangeHandle`: returned to the dispatching caller, resolves to an
//!   `ExchangeOutcome`.

pub mod engine;
pub mod exchange;

pub use engine::{
    CorrelationEngine, Resolution, SweepReport, duration_from_secs, timeout_from_secs,
};
pub use exchange::{
    Answer, ExchangeHandle, ExchangeOutcome, ExchangeState, ExpiryReason, PendingExchange,
    QuestionId,
};
