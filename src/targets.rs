//! Target entity repository seam.
//!
//! Projects, proposals, contacts and categories live in their own stores.
//! The engine only needs versioned reads, a compare-and-swap mutation, a
//! restore for rollback, and a few directory lookups for the strategies.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::action::ProposedAction;
use crate::entity::{EntityState, TargetRef, TargetType, VersionedEntity};
use crate::error::SuggestError;

/// Old and new state of a target after a successful mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub old: VersionedEntity,
    pub new: VersionedEntity,
}

/// Versioned access to the records suggestions point at.
pub trait TargetRepository: Send + Sync {
    fn exists(&self, reference: &TargetRef) -> bool;

    /// Current state and version. `NotFound` when unresolvable.
    fn get(&self, reference: &TargetRef) -> Result<VersionedEntity, SuggestError>;

    /// Apply `action` if the target is still at `expected_version`.
    /// Raises `StaleTarget` on mismatch and leaves the record untouched.
    fn apply_mutation(
        &self,
        reference: &TargetRef,
        action: &ProposedAction,
        expected_version: i64,
    ) -> Result<MutationOutcome, SuggestError>;

    /// Put `prior` back if the target is still at `expected_version`.
    fn restore(
        &self,
        reference: &TargetRef,
        prior: &EntityState,
        expected_version: i64,
    ) -> Result<VersionedEntity, SuggestError>;

    /// Resolve an exact identifier (project code, proposal number).
    fn find_by_identifier(&self, identifier: &str) -> Option<TargetRef>;

    /// Resolve a sender address to a known contact.
    fn find_contact_by_email(&self, email: &str) -> Option<TargetRef>;

    /// All known contacts with display names, for name-based fallback.
    fn contacts(&self) -> Vec<(TargetRef, String)>;
}

/// In-process repository. Backs tests and offline replays.
#[derive(Debug, Default)]
pub struct MemoryTargetRepository {
    entities: RwLock<HashMap<TargetRef, VersionedEntity>>,
    identifiers: RwLock<HashMap<String, TargetRef>>,
    contact_emails: RwLock<HashMap<String, TargetRef>>,
}

impl MemoryTargetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record at version 1.
    pub fn insert(&self, reference: TargetRef, name: &str) {
        let entity = VersionedEntity {
            reference: reference.clone(),
            state: EntityState {
                name: name.to_string(),
                ..Default::default()
            },
            version: 1,
        };
        self.entities.write().insert(reference, entity);
    }

    /// Register an identifier (e.g. `HH-2041`) for a record.
    pub fn add_identifier(&self, identifier: &str, reference: TargetRef) {
        self.identifiers
            .write()
            .insert(identifier.trim().to_uppercase(), reference);
    }

    /// Register a contact's email address.
    pub fn add_contact_email(&self, email: &str, reference: TargetRef) {
        self.contact_emails
            .write()
            .insert(email.trim().to_lowercase(), reference);
    }

    /// Remove a record, as if it were deleted upstream.
    pub fn remove(&self, reference: &TargetRef) {
        self.entities.write().remove(reference);
    }

    /// Edit a field outside the engine, bumping the version.
    pub fn edit_field(&self, reference: &TargetRef, field: &str, value: &str) -> Option<i64> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(reference)?;
        entity
            .state
            .fields
            .insert(field.to_string(), value.to_string());
        entity.version += 1;
        Some(entity.version)
    }
}

impl TargetRepository for MemoryTargetRepository {
    fn exists(&self, reference: &TargetRef) -> bool {
        self.entities.read().contains_key(reference)
    }

    fn get(&self, reference: &TargetRef) -> Result<VersionedEntity, SuggestError> {
        self.entities
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| SuggestError::NotFound(format!("target {}", reference)))
    }

    fn apply_mutation(
        &self,
        reference: &TargetRef,
        action: &ProposedAction,
        expected_version: i64,
    ) -> Result<MutationOutcome, SuggestError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(reference)
            .ok_or_else(|| SuggestError::NotFound(format!("target {}", reference)))?;
        if entity.version != expected_version {
            return Err(SuggestError::StaleTarget {
                target: reference.key(),
                expected: expected_version,
                actual: entity.version,
            });
        }
        let old = entity.clone();
        entity.state = action.apply_to(&entity.state);
        entity.version += 1;
        Ok(MutationOutcome {
            old,
            new: entity.clone(),
        })
    }

    fn restore(
        &self,
        reference: &TargetRef,
        prior: &EntityState,
        expected_version: i64,
    ) -> Result<VersionedEntity, SuggestError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(reference)
            .ok_or_else(|| SuggestError::NotFound(format!("target {}", reference)))?;
        if entity.version != expected_version {
            return Err(SuggestError::StaleTarget {
                target: reference.key(),
                expected: expected_version,
                actual: entity.version,
            });
        }
        entity.state = prior.clone();
        entity.version += 1;
        Ok(entity.clone())
    }

    fn find_by_identifier(&self, identifier: &str) -> Option<TargetRef> {
        self.identifiers
            .read()
            .get(&identifier.trim().to_uppercase())
            .cloned()
    }

    fn find_contact_by_email(&self, email: &str) -> Option<TargetRef> {
        self.contact_emails
            .read()
            .get(&email.trim().to_lowercase())
            .cloned()
    }

    fn contacts(&self) -> Vec<(TargetRef, String)> {
        let mut out: Vec<(TargetRef, String)> = self
            .entities
            .read()
            .values()
            .filter(|e| e.reference.target_type == TargetType::Contact)
            .map(|e| (e.reference.clone(), e.state.name.clone()))
            .collect();
        out.sort();
        out
    }
}
