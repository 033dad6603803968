//! Records and outcomes for dispatched questions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::family::{DeviceId, FamilyId};

pub type QuestionId = String;

/// An answer as received from a device (or the backend identity).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub question_id: QuestionId,
    pub family_id: FamilyId,
    pub device_id: DeviceId,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    TimedOut,
    Cancelled,
}

/// Lifecycle of one exchange. `Answered` and `Expired` are terminal.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExchangeState {
    AwaitingAnswer,
    Answered { answer: Answer },
    Expired { reason: ExpiryReason },
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeState::AwaitingAnswer)
    }
}

/// What the dispatching caller eventually learns.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExchangeOutcome {
    Answered { answer: Answer },
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct PendingExchange {
    pub question_id: QuestionId,
    pub family_id: FamilyId,
    /// `None` means any authorized device of the family may answer.
    pub target: Option<DeviceId>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub state: ExchangeState,
    pub settled_at: Option<DateTime<Utc>>,
    pub(crate) waiter: Option<oneshot::Sender<ExchangeOutcome>>,
}

impl PendingExchange {
    /// Move to a terminal state and notify the waiter. Returns false if the
    /// exchange was already terminal, in which case nothing changes.
    pub(crate) fn settle(&mut self, state: ExchangeState, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let outcome = match &state {
            ExchangeState::Answered { answer } => ExchangeOutcome::Answered {
                answer: answer.clone(),
            },
            ExchangeState::Expired {
                reason: ExpiryReason::TimedOut,
            } => ExchangeOutcome::TimedOut,
            ExchangeState::Expired {
                reason: ExpiryReason::Cancelled,
            } => ExchangeOutcome::Cancelled,
            ExchangeState::AwaitingAnswer => return false,
        };
        self.state = state;
        self.settled_at = Some(now);
        if let Some(waiter) = self.waiter.take() {
            // The caller may have stopped listening; that is fine.
            let _ = waiter.send(outcome);
        }
        true
    }
}

/// Caller-side handle for a dispatched question.
#[derive(Debug)]
pub struct ExchangeHandle {
    pub question_id: QuestionId,
    pub family_id: FamilyId,
    receiver: oneshot::Receiver<ExchangeOutcome>,
}

impl ExchangeHandle {
    pub(crate) fn new(
        question_id: QuestionId,
        family_id: FamilyId,
        receiver: oneshot::Receiver<ExchangeOutcome>,
    ) -> Self {
        Self {
            question_id,
            family_id,
            receiver,
        }
    }

    /// Wait for the exchange to settle. If the engine goes away first the
    /// exchange counts as cancelled.
    pub async fn outcome(self) -> ExchangeOutcome {
        self.receiver.await.unwrap_or(ExchangeOutcome::Cancelled)
    }

    /// Non-blocking poll; `None` while the exchange is still pending.
    pub fn try_outcome(&mut self) -> Option<ExchangeOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(ExchangeOutcome::Cancelled),
        }
    }
}
