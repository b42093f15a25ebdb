//! Target references: typed pointers to the structured records a signal can
//! be linked to. Projects and proposals come from the studio's project store,
//! contacts from the people directory, categories from the filing taxonomy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SuggestError;

/// The kind of record a suggestion points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Project,
    Proposal,
    Contact,
    Category,
}

impl TargetType {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Project => "project",
            TargetType::Proposal => "proposal",
            TargetType::Contact => "contact",
            TargetType::Category => "category",
        }
    }

    /// Parse from SQL string. Unknown labels are a validation failure, not a
    /// silent fallback: a mistyped target must never be applied.
    pub fn parse(s: &str) -> Result<Self, SuggestError> {
        match s {
            "project" => Ok(TargetType::Project),
            "proposal" => Ok(TargetType::Proposal),
            "contact" => Ok(TargetType::Contact),
            "category" => Ok(TargetType::Category),
            other => Err(SuggestError::Validation(format!(
                "unknown target type '{}'",
                other
            ))),
        }
    }
}

/// `{type, id}` pointer to a structured business record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub target_type: TargetType,
    pub id: String,
}

impl TargetRef {
    pub fn new(target_type: TargetType, id: impl Into<String>) -> Self {
        Self {
            target_type,
            id: id.into(),
        }
    }

    pub fn project(id: impl Into<String>) -> Self {
        Self::new(TargetType::Project, id)
    }

    pub fn proposal(id: impl Into<String>) -> Self {
        Self::new(TargetType::Proposal, id)
    }

    pub fn contact(id: impl Into<String>) -> Self {
        Self::new(TargetType::Contact, id)
    }

    pub fn category(id: impl Into<String>) -> Self {
        Self::new(TargetType::Category, id)
    }

    /// Stable `type:id` key used for lock stripes and log lines.
    pub fn key(&self) -> String {
        format!("{}:{}", self.target_type.as_str(), self.id)
    }

    pub fn validate(&self) -> Result<(), SuggestError> {
        if self.id.trim().is_empty() {
            return Err(SuggestError::Validation(format!(
                "empty {} id",
                self.target_type.as_str()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type.as_str(), self.id)
    }
}

/// Observable state of a target record, as far as suggestions touch it.
///
/// Ordered collections so two states compare (and serialize) identically
/// regardless of insertion order; rollback exactness is checked by `==`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub linked_signals: BTreeSet<String>,
    #[serde(default)]
    pub categorized_signals: BTreeSet<String>,
}

/// A target record together with its optimistic-concurrency version stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedEntity {
    pub reference: TargetRef,
    pub state: EntityState,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_roundtrip_labels() {
        for t in [
            TargetType::Project,
            TargetType::Proposal,
            TargetType::Contact,
            TargetType::Category,
        ] {
            assert_eq!(TargetType::parse(t.as_str()).unwrap(), t);
        }
        assert!(TargetType::parse("account").is_err());
    }

    #[test]
    fn test_target_key_and_validation() {
        let r = TargetRef::project("p-104");
        assert_eq!(r.key(), "project:p-104");
        assert!(r.validate().is_ok());
        assert!(TargetRef::contact("  ").validate().is_err());
    }
}
