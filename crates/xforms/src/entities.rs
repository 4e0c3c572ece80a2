//! Entities namespace extension of the XForm format.
//!
//! A form opts into entities by declaring an `<entity>` element under its `<meta>` section.
//! When it does, the `<model>` element must carry an `entities-version` attribute in the
//! entities namespace, and that version must be one this client understands.
//!
//! Binds may carry a `saveto` attribute in the entities namespace. Each one maps the bound
//! question onto a named entity property. The mapping is collected into [`EntityFormExtra`] in
//! declaration order and the attribute is withheld from the bind's externally visible
//! attributes. `saveto` attributes in any other namespace are left untouched.
//!
//! Namespace matching is done on URIs only; the prefix used by the document is irrelevant.

use crate::instance::{InstanceTree, NodeId};
use crate::namespaces::{ENTITIES, ENTITIES_VERSION_ATTR, SAVETO_ATTR};
use crate::{XFormError, XFormResult};
use entities_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the metadata section of the primary instance.
pub const META_ELEMENT: &str = "meta";

/// Name of the entity-definition element inside `<meta>`.
pub const ENTITY_ELEMENT: &str = "entity";

/// Locates the entity-definition element (`/<root>/meta/entity`) of an instance.
pub fn entity_element(instance: &InstanceTree) -> Option<NodeId> {
    let meta = instance.child(instance.root(), META_ELEMENT)?;
    instance.child(meta, ENTITY_ELEMENT)
}

// ============================================================================
// Version allow-list
// ============================================================================

/// Entities protocol versions this client can process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitiesSpec {
    /// `2022.1`: entity creation.
    V2022_1,
    /// `2023.1`: entity updates.
    V2023_1,
    /// `2024.1`: offline entities (branch/trunk lineage).
    V2024_1,
}

impl EntitiesSpec {
    const ALL: [EntitiesSpec; 3] = [
        EntitiesSpec::V2022_1,
        EntitiesSpec::V2023_1,
        EntitiesSpec::V2024_1,
    ];

    /// The `major.minor` prefix of this protocol version.
    pub fn prefix(self) -> &'static str {
        match self {
            EntitiesSpec::V2022_1 => "2022.1",
            EntitiesSpec::V2023_1 => "2023.1",
            EntitiesSpec::V2024_1 => "2024.1",
        }
    }
}

/// A recognized `entities-version` value: a listed protocol version plus an optional patch level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntitiesVersion {
    pub spec: EntitiesSpec,
    pub patch: Option<u64>,
}

impl FromStr for EntitiesVersion {
    type Err = XFormError;

    /// Accepts `major.minor` or `major.minor.patch` where `major.minor` is on the allow-list
    /// and `patch` is numeric.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognized = || XFormError::UnrecognizedEntityVersion {
            version: s.to_string(),
        };

        let trimmed = s.trim();
        let mut parts = trimmed.splitn(3, '.');
        let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
            return Err(unrecognized());
        };
        let prefix = format!("{major}.{minor}");

        let spec = EntitiesSpec::ALL
            .into_iter()
            .find(|spec| spec.prefix() == prefix)
            .ok_or_else(unrecognized)?;

        let patch = match parts.next() {
            None => None,
            Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                Some(p.parse::<u64>().map_err(|_| unrecognized())?)
            }
            Some(_) => return Err(unrecognized()),
        };

        Ok(Self { spec, patch })
    }
}

impl fmt::Display for EntitiesVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{patch}", self.spec.prefix()),
            None => f.write_str(self.spec.prefix()),
        }
    }
}

// ============================================================================
// Form-level extension data
// ============================================================================

/// One `saveto` declaration: the bound node and the entity property it feeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTo {
    /// Absolute reference of the bound node (`/data/name`).
    pub node_ref: String,
    /// Target entity property name.
    pub property: NonEmptyText,
}

/// Entity metadata attached to a parsed form definition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFormExtra {
    /// `saveto` mappings in declaration order. Duplicate property names are kept as declared.
    pub save_tos: Vec<SaveTo>,
}

/// Element names every entity row already carries.
const RESERVED_PROPERTY_NAMES: [&str; 2] = ["name", "label"];

/// Prefix reserved for system properties (`__version`, `__branchId`, ...).
const RESERVED_PROPERTY_PREFIX: &str = "__";

/// Returns why `name` cannot be an entity property, or `None` when it can.
///
/// Property names become element names in entity secondary instances, so they must be
/// unprefixed XML names and must not collide with the built-in row elements.
fn invalid_property_name(name: &str) -> Option<&'static str> {
    if RESERVED_PROPERTY_NAMES.contains(&name) || name.starts_with(RESERVED_PROPERTY_PREFIX) {
        return Some("reserved property name");
    }

    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !starts_well || !rest_ok || name.to_ascii_lowercase().starts_with("xml") {
        return Some("not a valid XML element name");
    }

    None
}

// ============================================================================
// Parse-time processor
// ============================================================================

/// Collects entity metadata while a form definition is being parsed.
///
/// The form parser feeds it the `<model>` attributes and every bind attribute, then calls
/// [`EntityFormParser::finish`] once the primary instance is known.
#[derive(Debug, Default)]
pub(crate) struct EntityFormParser {
    version: Option<String>,
    save_tos: Vec<SaveTo>,
}

impl EntityFormParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a `<model>` attribute.
    pub(crate) fn model_attribute(&mut self, namespace: Option<&str>, name: &str, value: &str) {
        if namespace == Some(ENTITIES) && name == ENTITIES_VERSION_ATTR {
            self.version = Some(value.to_string());
        }
    }

    /// Offers a bind attribute to the processor.
    ///
    /// Returns `true` when the attribute was consumed and must not be exposed on the bind.
    pub(crate) fn bind_attribute(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        value: &str,
        node_ref: &str,
    ) -> bool {
        if namespace != Some(ENTITIES) || name != SAVETO_ATTR {
            return false;
        }

        let property = match NonEmptyText::new(value) {
            Ok(property) => property,
            Err(_) => {
                tracing::warn!("ignoring blank saveto on bind {}", node_ref);
                return true;
            }
        };

        if let Some(reason) = invalid_property_name(property.as_str()) {
            tracing::warn!(
                "ignoring saveto '{}' on bind {}: {}",
                property,
                node_ref,
                reason
            );
            return true;
        }

        tracing::debug!("saveto {} -> {}", node_ref, property);
        self.save_tos.push(SaveTo {
            node_ref: node_ref.to_string(),
            property,
        });
        true
    }

    /// Validates the collected metadata against the primary instance.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError`] if:
    /// - the instance declares `meta/entity` but `<model>` has no `entities-version`
    ///   ([`XFormError::MissingModelAttribute`]),
    /// - the version is not on the allow-list ([`XFormError::UnrecognizedEntityVersion`]).
    pub(crate) fn finish(
        self,
        main_instance: &InstanceTree,
    ) -> XFormResult<(Option<EntitiesVersion>, EntityFormExtra)> {
        let version = if entity_element(main_instance).is_some() {
            let raw = self
                .version
                .ok_or_else(|| XFormError::MissingModelAttribute {
                    namespace: ENTITIES.to_string(),
                    name: ENTITIES_VERSION_ATTR.to_string(),
                })?;
            let version = raw.parse::<EntitiesVersion>()?;
            tracing::debug!("entities version {} accepted", version);
            Some(version)
        } else {
            None
        };

        Ok((
            version,
            EntityFormExtra {
                save_tos: self.save_tos,
            },
        ))
    }
}
