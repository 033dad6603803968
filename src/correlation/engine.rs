//! Correlation engine
//!
//! Matches outbound questions with inbound answers. Responsibilities:
//! - register a pending exchange with a deadline when a question is dispatched
//! - resolve it with the first valid answer, exactly once
//! - expire overdue exchanges, either in the periodic sweep or on access
//! - honour cancellation
//!
//! Concurrency and usage notes:
//! - The API is synchronous and meant to sit behind a lock owned by the
//!   gateway. All time-dependent calls take `now` so the sweep and tests
//!   can drive the clock explicitly.
//! - Terminal exchanges stay in the table as tombstones for the retention
//!   window. A late or duplicate answer therefore finds a terminal record
//!   and is discarded; it can never recreate the exchange.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::correlation::exchange::{
    Answer, ExchangeHandle, ExchangeState, ExpiryReason, PendingExchange, QuestionId,
};
use crate::family::{DeviceId, FamilyId};
use crate::utils::{GatewayError, Result};

/// What happened to an inbound answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The answer settled the exchange. Persist it.
    Resolved(Answer),
    /// No exchange with this question id.
    Unknown,
    /// The exchange was already answered or expired.
    AlreadyTerminal,
    /// The deadline had passed; the exchange expired on access.
    ExpiredOnArrival,
    /// The answer came in under another family's topics.
    WrongFamily,
    /// A targeted exchange was answered by a different device.
    WrongDevice,
}

/// Exchanges settled by one sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub expired: Vec<(QuestionId, FamilyId)>,
    pub purged: usize,
}

/// `secs` as a `Duration`, or `None` if chrono cannot represent it.
pub fn duration_from_secs(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// A question timeout in whole seconds. Must be positive.
pub fn timeout_from_secs(secs: u64) -> Result<Duration> {
    duration_from_secs(secs)
        .filter(|timeout| *timeout > Duration::zero())
        .ok_or_else(|| GatewayError::InvalidTimeout(format!("{secs}s")))
}

#[derive(Debug)]
pub struct CorrelationEngine {
    exchanges: HashMap<QuestionId, PendingExchange>,
    default_timeout: Duration,
    retention: Duration,
    accepting: bool,
}

impl CorrelationEngine {
    pub fn new(default_timeout: Duration, retention: Duration) -> Self {
        Self {
            exchanges: HashMap::new(),
            default_timeout,
            retention,
            accepting: true,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Create an exchange in `AwaitingAnswer` under a fresh question id.
    pub fn register(
        &mut self,
        family_id: &str,
        target: Option<DeviceId>,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ExchangeHandle> {
        if !self.accepting {
            return Err(GatewayError::ShuttingDown);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        if timeout <= Duration::zero() {
            return Err(GatewayError::InvalidTimeout(format!(
                "{}s must be positive",
                timeout.num_seconds()
            )));
        }
        let deadline = now.checked_add_signed(timeout).ok_or_else(|| {
            GatewayError::InvalidTimeout(format!("{}s is out of range", timeout.num_seconds()))
        })?;

        let question_id = loop {
            let id = Uuid::new_v4().to_string();
            if !self.exchanges.contains_key(&id) {
                break id;
            }
        };
        let (tx, rx) = oneshot::channel();

        self.exchanges.insert(
            question_id.clone(),
            PendingExchange {
                question_id: question_id.clone(),
                family_id: family_id.to_string(),
                target,
                created_at: now,
                deadline,
                state: ExchangeState::AwaitingAnswer,
                settled_at: None,
                waiter: Some(tx),
            },
        );
        debug!("Registered exchange {question_id} for family {family_id} until {deadline}");

        Ok(ExchangeHandle::new(question_id, family_id.to_string(), rx))
    }

    /// Drop an exchange whose question never made it onto the wire.
    pub fn withdraw(&mut self, question_id: &str) {
        if self.exchanges.remove(question_id).is_some() {
            debug!("Withdrew exchange {question_id}");
        }
    }

    /// Try to settle an exchange with an inbound answer. The caller has
    /// already authorized the answering device for `answer.family_id`.
    pub fn resolve(&mut self, answer: Answer, now: DateTime<Utc>) -> Resolution {
        let Some(exchange) = self.exchanges.get_mut(&answer.question_id) else {
            return Resolution::Unknown;
        };
        if exchange.family_id != answer.family_id {
            return Resolution::WrongFamily;
        }
        if exchange.state.is_terminal() {
            return Resolution::AlreadyTerminal;
        }
        if now > exchange.deadline {
            exchange.settle(
                ExchangeState::Expired {
                    reason: ExpiryReason::TimedOut,
                },
                now,
            );
            info!("Exchange {} expired before its answer arrived", answer.question_id);
            return Resolution::ExpiredOnArrival;
        }
        if let Some(target) = &exchange.target {
            if target != &answer.device_id {
                return Resolution::WrongDevice;
            }
        }

        exchange.settle(
            ExchangeState::Answered {
                answer: answer.clone(),
            },
            now,
        );
        info!(
            "Exchange {} answered by {}",
            answer.question_id, answer.device_id
        );
        Resolution::Resolved(answer)
    }

    /// Cancel a pending exchange. Returns false if it is unknown or
    /// already terminal.
    pub fn cancel(&mut self, question_id: &str, now: DateTime<Utc>) -> bool {
        match self.exchanges.get_mut(question_id) {
            Some(exchange) => {
                let cancelled = exchange.settle(
                    ExchangeState::Expired {
                        reason: ExpiryReason::Cancelled,
                    },
                    now,
                );
                if cancelled {
                    info!("Exchange {question_id} cancelled");
                }
                cancelled
            }
            None => false,
        }
    }

    /// Expire overdue exchanges and purge tombstones older than the
    /// retention window.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for exchange in self.exchanges.values_mut() {
            if exchange.state.is_terminal() || now <= exchange.deadline {
                continue;
            }
            if exchange.settle(
                ExchangeState::Expired {
                    reason: ExpiryReason::TimedOut,
                },
                now,
            ) {
                warn!(
                    "Exchange {} for family {} timed out without an answer",
                    exchange.question_id, exchange.family_id
                );
                report
                    .expired
                    .push((exchange.question_id.clone(), exchange.family_id.clone()));
            }
        }

        let retention = self.retention;
        let before = self.exchanges.len();
        self.exchanges.retain(|_, exchange| match exchange.settled_at {
            Some(settled) => now - settled <= retention,
            None => true,
        });
        report.purged = before - self.exchanges.len();

        report
    }

    /// Refuse new registrations. Pending exchanges still settle normally.
    pub fn shutdown(&mut self) {
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn state(&self, question_id: &str) -> Option<ExchangeState> {
        self.exchanges.get(question_id).map(|e| e.state.clone())
    }

    pub fn get(&self, question_id: &str) -> Option<&PendingExchange> {
        self.exchanges.get(question_id)
    }

    pub fn pending_count(&self) -> usize {
        self.exchanges
            .values()
            .filter(|e| !e.state.is_terminal())
            .count()
    }
}
