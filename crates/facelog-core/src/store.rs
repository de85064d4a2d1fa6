//! Collaborator contracts: signature storage, identity directory, event sink.
//!
//! The engine only ever talks to these traits. `MemoryStore` is a complete
//! in-process implementation; the daemon provides a SQLite one.

use crate::types::{AttendanceEvent, FeatureVector, Identity, IdentityId, Roster, RosterError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("stored signature for identity {id} is corrupt: {reason}")]
    CorruptSignature { id: IdentityId, reason: String },
    #[error("roster rejected: {0}")]
    Roster(#[from] RosterError),
    #[error("event sink rejected the write: {0}")]
    SinkFailure(String),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("identity {0} already has an enrolled signature")]
    AlreadyEnrolled(IdentityId),
    #[error("identity {0} not found")]
    NotFound(IdentityId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Source of enrolled signatures.
pub trait SignatureStore {
    /// Read every identity with a committed signature, in stable order.
    fn load_roster(&self) -> Result<Roster, StoreError>;

    /// Write the signature of an existing identity that has none yet.
    fn commit_signature(&mut self, id: IdentityId, signature: &FeatureVector) -> Result<(), CommitError>;
}

/// Destination for attendance events.
pub trait EventSink {
    fn record(&mut self, event: &AttendanceEvent) -> Result<(), StoreError>;
}

/// One row of the identity listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub display_name: String,
    pub enrolled: bool,
}

/// Administration of the people known to the store.
pub trait IdentityDirectory {
    /// Add a person without a signature. Returns false if the id is taken.
    fn register_identity(&mut self, id: IdentityId, display_name: &str) -> Result<bool, StoreError>;

    /// Drop the committed signature so the person can be enrolled again.
    /// Returns false if the identity does not exist.
    fn clear_signature(&mut self, id: IdentityId) -> Result<bool, StoreError>;

    fn list_identities(&self) -> Result<Vec<IdentitySummary>, StoreError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    id: IdentityId,
    display_name: String,
    signature: Option<FeatureVector>,
}

/// In-memory store and sink.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    dimension: usize,
    entries: Vec<MemoryEntry>,
    events: Vec<AttendanceEvent>,
    fail_records: bool,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            events: Vec::new(),
            fail_records: false,
        }
    }

    /// Make every subsequent `record` call fail.
    pub fn set_fail_records(&mut self, fail: bool) {
        self.fail_records = fail;
    }

    pub fn events(&self) -> &[AttendanceEvent] {
        &self.events
    }

    pub fn signature(&self, id: IdentityId) -> Option<&FeatureVector> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.signature.as_ref())
    }
}

impl SignatureStore for MemoryStore {
    fn load_roster(&self) -> Result<Roster, StoreError> {
        let identities = self
            .entries
            .iter()
            .filter_map(|e| {
                e.signature.as_ref().map(|signature| Identity {
                    id: e.id,
                    display_name: e.display_name.clone(),
                    signature: signature.clone(),
                })
            })
            .collect();
        Ok(Roster::new(self.dimension, identities)?)
    }

    fn commit_signature(&mut self, id: IdentityId, signature: &FeatureVector) -> Result<(), CommitError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(CommitError::NotFound(id))?;
        if entry.signature.is_some() {
            return Err(CommitError::AlreadyEnrolled(id));
        }
        entry.signature = Some(signature.clone());
        Ok(())
    }
}

impl EventSink for MemoryStore {
    fn record(&mut self, event: &AttendanceEvent) -> Result<(), StoreError> {
        if self.fail_records {
            return Err(StoreError::SinkFailure("memory sink set to fail".into()));
        }
        self.events.push(event.clone());
        Ok(())
    }
}

impl IdentityDirectory for MemoryStore {
    fn register_identity(&mut self, id: IdentityId, display_name: &str) -> Result<bool, StoreError> {
        if self.entries.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        self.entries.push(MemoryEntry {
            id,
            display_name: display_name.to_string(),
            signature: None,
        });
        Ok(true)
    }

    fn clear_signature(&mut self, id: IdentityId) -> Result<bool, StoreError> {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.signature = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_identities(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        Ok(self
            .entries
            .iter()
            .map(|e| IdentitySummary {
                id: e.id,
                display_name: e.display_name.clone(),
                enrolled: e.signature.is_some(),
            })
            .collect())
    }
}
