use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    UnauthorizedDrops,
    MalformedDrops,
    AnswersResolved,
    AnswersDiscarded,
    ExchangesExpired,
    ExchangesCancelled,
    PersistenceFailures,
}

/// Drop and outcome counters for the inbound path.
#[derive(Debug, Default)]
pub struct GatewayStats {
    unauthorized_drops: AtomicU64,
    malformed_drops: AtomicU64,
    answers_resolved: AtomicU64,
    answers_discarded: AtomicU64,
    exchanges_expired: AtomicU64,
    exchanges_cancelled: AtomicU64,
    persistence_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub unauthorized_drops: u64,
    pub malformed_drops: u64,
    pub answers_resolved: u64,
    pub answers_discarded: u64,
    pub exchanges_expired: u64,
    pub exchanges_cancelled: u64,
    pub persistence_failures: u64,
}

impl GatewayStats {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::UnauthorizedDrops => &self.unauthorized_drops,
            Counter::MalformedDrops => &self.malformed_drops,
            Counter::AnswersResolved => &self.answers_resolved,
            Counter::AnswersDiscarded => &self.answers_discarded,
            Counter::ExchangesExpired => &self.exchanges_expired,
            Counter::ExchangesCancelled => &self.exchanges_cancelled,
            Counter::PersistenceFailures => &self.persistence_failures,
        }
    }

    pub fn bump(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c| self.counter(c).load(Ordering::Relaxed);
        StatsSnapshot {
            unauthorized_drops: get(Counter::UnauthorizedDrops),
            malformed_drops: get(Counter::MalformedDrops),
            answers_resolved: get(Counter::AnswersResolved),
            answers_discarded: get(Counter::AnswersDiscarded),
            exchanges_expired: get(Counter::ExchangesExpired),
            exchanges_cancelled: get(Counter::ExchangesCancelled),
            persistence_failures: get(Counter::PersistenceFailures),
        }
    }
}
