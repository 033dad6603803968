//! The persistence collaborator.
//!
//! The gateway reads family configuration through `FamilyStore` and writes
//! back resolved answers and family mutations. `SledStore` keeps both in an
//! embedded `sled` database; anything relational lives outside this crate.

pub mod sled_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation::{Answer, QuestionId};
use crate::family::{DeviceId, FamilyId, FamilyLookup, FamilyRecord};
use crate::utils::Result;

pub use sled_store::SledStore;

/// A resolved answer as written to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub family_id: FamilyId,
    pub device_id: DeviceId,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl AnswerRecord {
    pub fn from_answer(answer: &Answer, stored_at: DateTime<Utc>) -> Self {
        Self {
            question_id: answer.question_id.clone(),
            family_id: answer.family_id.clone(),
            device_id: answer.device_id.clone(),
            answer: answer.answer.clone(),
            answered_at: answer.answered_at,
            stored_at,
        }
    }
}

pub trait FamilyStore: Send + Sync {
    /// A family's configuration, or `NotEnabled` when it is unknown or has
    /// messaging switched off.
    fn load_family(&self, family_id: &str) -> Result<FamilyLookup>;

    /// Every stored family, enabled or not.
    fn list_families(&self) -> Result<Vec<FamilyRecord>>;

    fn save_family(&self, record: &FamilyRecord) -> Result<()>;

    /// Write-once per question id. Returns false if an answer for the
    /// question was already stored.
    fn record_answer(&self, record: &AnswerRecord) -> Result<bool>;

    fn answers_for(&self, family_id: &str) -> Result<Vec<AnswerRecord>>;
}

#[cfg(test)]
mod tests;
