use sled::{Db, Tree};
use tracing::{debug, warn};

use crate::family::{FamilyLookup, FamilyRecord};
use crate::persistence::{AnswerRecord, FamilyStore};
use crate::utils::Result;

const FAMILIES: &str = "families";
const ANSWERS: &str = "answers";

/// Families keyed by family id and answers keyed by question id, both as
/// JSON values.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    families: Tree,
    answers: Tree,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        let families = db.open_tree(FAMILIES)?;
        let answers = db.open_tree(ANSWERS)?;
        debug!("Opened family store at {path}");
        Ok(Self {
            db,
            families,
            answers,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn get_family(&self, family_id: &str) -> Result<Option<FamilyRecord>> {
        match self.families.get(family_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl FamilyStore for SledStore {
    fn load_family(&self, family_id: &str) -> Result<FamilyLookup> {
        Ok(match self.get_family(family_id)? {
            Some(record) if record.enabled => FamilyLookup::Enabled(record),
            _ => FamilyLookup::NotEnabled,
        })
    }

    fn list_families(&self) -> Result<Vec<FamilyRecord>> {
        let mut records = Vec::new();
        for entry in self.families.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable family record {}: {e}",
                    String::from_utf8_lossy(&key)
                ),
            }
        }
        Ok(records)
    }

    fn save_family(&self, record: &FamilyRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.families.insert(record.family_id.as_bytes(), bytes)?;
        Ok(())
    }

    fn record_answer(&self, record: &AnswerRecord) -> Result<bool> {
        let bytes = serde_json::to_vec(record)?;
        let swapped = self.answers.compare_and_swap(
            record.question_id.as_bytes(),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        match swapped {
            Ok(()) => Ok(true),
            Err(_) => {
                warn!(
                    "Answer for question {} already stored, keeping the first",
                    record.question_id
                );
                Ok(false)
            }
        }
    }

    fn answers_for(&self, family_id: &str) -> Result<Vec<AnswerRecord>> {
        let mut answers = Vec::new();
        for entry in self.answers.iter() {
            let (_, value) = entry?;
            let record: AnswerRecord = serde_json::from_slice(&value)?;
            if record.family_id == family_id {
                answers.push(record);
            }
        }
        answers.sort_by_key(|a| a.answered_at);
        Ok(answers)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
