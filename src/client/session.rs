//! Accepted broker connections.
//!
//! A `Session` is opened when the broker's connect hook authenticates a
//! client against a family's credentials. Rotation, family disable and
//! device eviction drain sessions from this table; the caller is then
//! responsible for the forced disconnect.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::family::model::FamilyId;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Session {
    /// Broker client id, which is also the device id for devices.
    pub client_id: String,
    pub family_id: FamilyId,
    pub username: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. A reconnect under the same client id replaces
    /// the previous entry, which is returned.
    pub fn open(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.client_id.clone(), session)
    }

    pub fn close(&mut self, client_id: &str) -> Option<Session> {
        self.sessions.remove(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&Session> {
        self.sessions.get(client_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session opened with `username`.
    pub fn drain_username(&mut self, username: &str) -> Vec<Session> {
        self.drain_where(|s| s.username == username)
    }

    /// Remove every session belonging to `family_id`.
    pub fn drain_family(&mut self, family_id: &str) -> Vec<Session> {
        self.drain_where(|s| s.family_id == family_id)
    }

    fn drain_where(&mut self, pred: impl Fn(&Session) -> bool) -> Vec<Session> {
        let ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| pred(s))
            .map(|s| s.client_id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }
}
