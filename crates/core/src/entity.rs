//! Entity value types.
//!
//! - [`Entity`]: a persisted, versioned record identified by id within a dataset
//! - [`FormEntity`]: the transient mutation extracted from one finalized form instance
//! - [`EntitiesExtra`]: the finalization result handed to the save/sync pipeline
//!
//! These types carry no behaviour beyond validating their own invariants.

use crate::{EntitiesError, EntitiesResult};
use entities_types::DatasetName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A named, opaque string value attached to an entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProperty {
    pub name: String,
    pub value: String,
}

impl EntityProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Divergent edit lineage: the trunk version a branch forked from and the branch id.
///
/// Holding both values in one struct keeps the "both present or both absent" rule structural.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub trunk_version: u64,
    pub branch_id: String,
}

/// A persisted entity record.
///
/// Every save replaces the whole record for its id; there is no partial update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entity {
    id: String,
    label: Option<String>,
    properties: Vec<EntityProperty>,
    version: Option<u64>,
    lineage: Option<Lineage>,
}

impl Entity {
    /// Creates an entity on the trunk with no version.
    ///
    /// # Errors
    ///
    /// Returns [`EntitiesError`] if:
    /// - `id` is blank ([`EntitiesError::InvalidInput`]),
    /// - a property name occurs more than once ([`EntitiesError::DuplicateProperty`]).
    pub fn new(
        id: impl Into<String>,
        label: Option<String>,
        properties: Vec<EntityProperty>,
    ) -> EntitiesResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EntitiesError::InvalidInput("entity id cannot be empty".into()));
        }

        let mut seen = HashSet::new();
        for property in &properties {
            if !seen.insert(property.name.as_str()) {
                return Err(EntitiesError::DuplicateProperty {
                    id,
                    property: property.name.clone(),
                });
            }
        }

        Ok(Self {
            id,
            label,
            properties,
            version: None,
            lineage: None,
        })
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    /// Places the entity on a branch (or back on the trunk with `None`).
    ///
    /// # Errors
    ///
    /// Returns [`EntitiesError::IncompleteLineage`] if the branch id is blank.
    pub fn with_lineage(mut self, lineage: Option<Lineage>) -> EntitiesResult<Self> {
        if lineage
            .as_ref()
            .is_some_and(|l| l.branch_id.trim().is_empty())
        {
            return Err(EntitiesError::IncompleteLineage { id: self.id });
        }
        self.lineage = lineage;
        Ok(self)
    }

    /// Builds lineage from its two stored halves.
    ///
    /// # Errors
    ///
    /// Returns [`EntitiesError::IncompleteLineage`] when exactly one half is present.
    pub fn with_lineage_parts(
        self,
        trunk_version: Option<u64>,
        branch_id: Option<String>,
    ) -> EntitiesResult<Self> {
        match (trunk_version, branch_id) {
            (None, None) => self.with_lineage(None),
            (Some(trunk_version), Some(branch_id)) => self.with_lineage(Some(Lineage {
                trunk_version,
                branch_id,
            })),
            _ => Err(EntitiesError::IncompleteLineage { id: self.id }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn properties(&self) -> &[EntityProperty] {
        &self.properties
    }

    /// Returns the value of a named property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn lineage(&self) -> Option<&Lineage> {
        self.lineage.as_ref()
    }

    pub fn trunk_version(&self) -> Option<u64> {
        self.lineage.as_ref().map(|l| l.trunk_version)
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.lineage.as_ref().map(|l| l.branch_id.as_str())
    }

    /// True when the entity is on the canonical trunk.
    pub fn is_trunk(&self) -> bool {
        self.lineage.is_none()
    }
}

/// What a finalized form asks the store to do with its entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityAction {
    Create,
    Update,
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityAction::Create => f.write_str("create"),
            EntityAction::Update => f.write_str("update"),
        }
    }
}

/// A mutation extracted from one finalized form instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormEntity {
    pub dataset: DatasetName,
    /// `None` when the server assigns identity.
    pub id: Option<String>,
    pub label: Option<String>,
    /// Properties in `saveto` declaration order. Only relevant questions contribute.
    pub properties: Vec<EntityProperty>,
    pub action: EntityAction,
    /// Version of the entity the form was filled against, when the form supplied one.
    pub base_version: Option<u64>,
}

/// Finalization output for a form that declares an entity element.
///
/// An empty list means the form declared an entity but produced no mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitiesExtra {
    pub entities: Vec<FormEntity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Vec<EntityProperty> {
        pairs
            .iter()
            .map(|(name, value)| EntityProperty::new(*name, *value))
            .collect()
    }

    #[test]
    fn test_new_entity_is_on_trunk() {
        let entity = Entity::new("1", Some("Shiv Roy".into()), props(&[("age", "35")]))
            .expect("entity should be valid");
        assert_eq!(entity.id(), "1");
        assert_eq!(entity.label(), Some("Shiv Roy"));
        assert_eq!(entity.property("age"), Some("35"));
        assert_eq!(entity.version(), None);
        assert!(entity.is_trunk());
        assert_eq!(entity.trunk_version(), None);
        assert_eq!(entity.branch_id(), None);
    }

    #[test]
    fn test_new_rejects_blank_id() {
        let err = Entity::new("  ", None, Vec::new()).expect_err("blank id should fail");
        assert!(matches!(err, EntitiesError::InvalidInput(_)));
    }

    #[test]
    fn test_new_rejects_duplicate_properties() {
        let err = Entity::new("1", None, props(&[("age", "35"), ("age", "36")]))
            .expect_err("duplicate property should fail");
        assert!(matches!(
            err,
            EntitiesError::DuplicateProperty { ref property, .. } if property == "age"
        ));
    }

    #[test]
    fn test_lineage_parts_must_be_paired() {
        let base = || Entity::new("1", None, Vec::new()).expect("entity should be valid");

        let branched = base()
            .with_lineage_parts(Some(2), Some("branch-a".into()))
            .expect("complete lineage should succeed");
        assert_eq!(branched.trunk_version(), Some(2));
        assert_eq!(branched.branch_id(), Some("branch-a"));

        assert!(base().with_lineage_parts(None, None).is_ok());
        assert!(matches!(
            base().with_lineage_parts(Some(2), None),
            Err(EntitiesError::IncompleteLineage { .. })
        ));
        assert!(matches!(
            base().with_lineage_parts(None, Some("branch-a".into())),
            Err(EntitiesError::IncompleteLineage { .. })
        ));
        assert!(matches!(
            base().with_lineage_parts(Some(2), Some(" ".into())),
            Err(EntitiesError::IncompleteLineage { .. })
        ));
    }

    #[test]
    fn test_form_entity_json_uses_lowercase_action() {
        let form_entity = FormEntity {
            dataset: DatasetName::new("people").expect("valid dataset"),
            id: Some("1".into()),
            label: None,
            properties: props(&[("age", "35")]),
            action: EntityAction::Update,
            base_version: Some(2),
        };
        let json = serde_json::to_string(&form_entity).expect("serialize should succeed");
        assert!(json.contains(r#""action":"update""#));
        let back: FormEntity = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, form_entity);
    }
}
