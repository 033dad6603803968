//! Credential issuance and the per-family access table.
//!
//! Every family that has been issued credentials owns exactly one topic
//! prefix (`{root}/{namespace}`) and one broker username. Both are indexed
//! so inbound topics and connection attempts resolve to a family without a
//! scan. The indexes are rebuilt atomically on rotation: the old prefix and
//! username stop resolving the moment the new ones are issued.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::family::model::{Credentials, FamilyId, FamilyRecord};
use crate::utils::{GatewayError, Result};

#[derive(Debug, Clone, Default)]
pub struct FamilyAccess {
    pub enabled: bool,
    pub credentials: Option<Credentials>,
    pub last_connection: Option<DateTime<Utc>>,
}

/// Outcome of a forced rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub issued: Credentials,
    pub revoked: Option<Credentials>,
}

#[derive(Debug)]
pub struct CredentialManager {
    topic_root: String,
    families: HashMap<FamilyId, FamilyAccess>,
    by_prefix: HashMap<String, FamilyId>,
    by_username: HashMap<String, FamilyId>,
}

impl CredentialManager {
    pub fn new(topic_root: &str) -> Self {
        Self {
            topic_root: topic_root.to_string(),
            families: HashMap::new(),
            by_prefix: HashMap::new(),
            by_username: HashMap::new(),
        }
    }

    /// Index a persisted family. A prefix or username that collides with an
    /// already loaded family is rejected.
    pub fn load(&mut self, record: &FamilyRecord) -> Result<()> {
        if let Some(creds) = &record.credentials {
            if let Some(owner) = self.by_prefix.get(&creds.topic_prefix) {
                if owner != &record.family_id {
                    return Err(GatewayError::Conflict(format!(
                        "topic prefix {} of family {} already owned by {owner}",
                        creds.topic_prefix, record.family_id
                    )));
                }
            }
            if let Some(owner) = self.by_username.get(&creds.username) {
                if owner != &record.family_id {
                    return Err(GatewayError::Conflict(format!(
                        "username {} of family {} already owned by {owner}",
                        creds.username, record.family_id
                    )));
                }
            }
        }

        // Replacing an entry must drop its old index keys.
        self.unindex(&record.family_id);

        if let Some(creds) = &record.credentials {
            self.by_prefix
                .insert(creds.topic_prefix.clone(), record.family_id.clone());
            self.by_username
                .insert(creds.username.clone(), record.family_id.clone());
        }
        self.families.insert(
            record.family_id.clone(),
            FamilyAccess {
                enabled: record.enabled,
                credentials: record.credentials.clone(),
                last_connection: record.last_connection,
            },
        );
        Ok(())
    }

    /// Create an empty, disabled entry if the family is not known yet.
    pub fn ensure_family(&mut self, family_id: &str) {
        self.families.entry(family_id.to_string()).or_default();
    }

    pub fn contains(&self, family_id: &str) -> bool {
        self.families.contains_key(family_id)
    }

    pub fn access(&self, family_id: &str) -> Option<&FamilyAccess> {
        self.families.get(family_id)
    }

    pub fn is_enabled(&self, family_id: &str) -> bool {
        self.families.get(family_id).is_some_and(|f| f.enabled)
    }

    pub fn set_enabled(&mut self, family_id: &str, enabled: bool) -> Result<()> {
        let access = self
            .families
            .get_mut(family_id)
            .ok_or_else(|| GatewayError::FamilyNotFound(family_id.to_string()))?;
        access.enabled = enabled;
        Ok(())
    }

    pub fn credentials(&self, family_id: &str) -> Option<&Credentials> {
        self.families.get(family_id)?.credentials.as_ref()
    }

    pub fn prefix(&self, family_id: &str) -> Option<&str> {
        self.credentials(family_id).map(|c| c.topic_prefix.as_str())
    }

    pub fn family_for_prefix(&self, prefix: &str) -> Option<&FamilyId> {
        self.by_prefix.get(prefix)
    }

    /// Returns the family's credentials, issuing them on first use.
    pub fn issue_credentials(&mut self, family_id: &str) -> Result<Credentials> {
        if let Some(existing) = self.credentials(family_id) {
            return Ok(existing.clone());
        }
        Ok(self.rotate_credentials(family_id)?.issued)
    }

    /// Replace username, password and prefix in one step.
    pub fn rotate_credentials(&mut self, family_id: &str) -> Result<Rotation> {
        if !self.families.contains_key(family_id) {
            return Err(GatewayError::FamilyNotFound(family_id.to_string()));
        }

        let issued = self.generate(family_id);
        let revoked = self.unindex(family_id);

        self.by_prefix
            .insert(issued.topic_prefix.clone(), family_id.to_string());
        self.by_username
            .insert(issued.username.clone(), family_id.to_string());
        if let Some(access) = self.families.get_mut(family_id) {
            access.credentials = Some(issued.clone());
        }

        match &revoked {
            Some(old) => info!(
                "Rotated credentials for family {family_id}: {} -> {}",
                old.topic_prefix, issued.topic_prefix
            ),
            None => info!(
                "Issued credentials for family {family_id} with prefix {}",
                issued.topic_prefix
            ),
        }

        Ok(Rotation { issued, revoked })
    }

    /// Connection check for the broker. Disabled families and unknown
    /// usernames fail the same way as a wrong password.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<FamilyId> {
        let family_id = self
            .by_username
            .get(username)
            .ok_or(GatewayError::InvalidCredentials)?;
        let access = self
            .families
            .get(family_id)
            .ok_or(GatewayError::InvalidCredentials)?;
        let creds = access
            .credentials
            .as_ref()
            .ok_or(GatewayError::InvalidCredentials)?;

        let matches: bool = creds.password.as_bytes().ct_eq(password.as_bytes()).into();
        if !matches {
            warn!("Rejected connection for {username}: wrong password");
            return Err(GatewayError::InvalidCredentials);
        }
        if !access.enabled {
            warn!("Rejected connection for {username}: family {family_id} is disabled");
            return Err(GatewayError::InvalidCredentials);
        }
        Ok(family_id.clone())
    }

    pub fn record_connection(&mut self, family_id: &str, at: DateTime<Utc>) {
        if let Some(access) = self.families.get_mut(family_id) {
            access.last_connection = Some(at);
        }
    }

    fn unindex(&mut self, family_id: &str) -> Option<Credentials> {
        let old = self.families.get(family_id)?.credentials.clone()?;
        self.by_prefix.remove(&old.topic_prefix);
        self.by_username.remove(&old.username);
        Some(old)
    }

    fn generate(&self, family_id: &str) -> Credentials {
        let topic_prefix = loop {
            let namespace = Uuid::new_v4().simple().to_string();
            let candidate = format!("{}/{}", self.topic_root, &namespace[..12]);
            if !self.by_prefix.contains_key(&candidate) {
                break candidate;
            }
        };
        let username = loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let candidate = format!("fam-{family_id}-{}", &suffix[..8]);
            if !self.by_username.contains_key(&candidate) {
                break candidate;
            }
        };
        let password = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

        Credentials {
            username,
            password,
            topic_prefix,
        }
    }
}
