//! Entity finalization.
//!
//! Turns an answered instance tree into the entity mutation it describes. The processor runs
//! after the instance has been validated and returns its result explicitly; nothing is attached
//! to the form or the instance.
//!
//! Rules:
//! - no `meta/entity` element: `None` (the form does not use entities)
//! - `create` and `update` both truthy, or neither: `Some` with no mutation
//! - a property is emitted only when its node and every ancestor are relevant; a relevant but
//!   unanswered node contributes an empty string
//! - properties follow `saveto` declaration order

use crate::entity::{EntitiesExtra, EntityAction, EntityProperty, FormEntity};
use entities_types::DatasetName;
use xforms::entities::entity_element;
use xforms::{Expression, FormDef, InstanceTree, NodeId};

/// Attribute names on the entity-definition element.
const DATASET_ATTR: &str = "dataset";
const CREATE_ATTR: &str = "create";
const UPDATE_ATTR: &str = "update";
const ID_ATTR: &str = "id";
const BASE_VERSION_ATTR: &str = "baseVersion";
const LABEL_ELEMENT: &str = "label";

/// Extracts entity mutations from finalized instances of one form.
#[derive(Clone, Copy, Debug)]
pub struct EntityFinalizer<'a> {
    form: &'a FormDef,
}

impl<'a> EntityFinalizer<'a> {
    pub fn new(form: &'a FormDef) -> Self {
        Self { form }
    }

    /// Produces the entity mutations for an answered instance.
    ///
    /// # Returns
    ///
    /// `None` when the instance has no entity element, otherwise an [`EntitiesExtra`] holding
    /// zero or one [`FormEntity`].
    pub fn finalize(&self, instance: &InstanceTree) -> Option<EntitiesExtra> {
        let entity = entity_element(instance)?;
        let node = instance.node(entity);

        let dataset = match node.attribute(DATASET_ATTR).map(DatasetName::new) {
            Some(Ok(dataset)) => dataset,
            Some(Err(e)) => {
                tracing::warn!("entity element has an invalid dataset: {}", e);
                return Some(EntitiesExtra::default());
            }
            None => {
                tracing::warn!("entity element has no dataset attribute");
                return Some(EntitiesExtra::default());
            }
        };

        let create = is_truthy(node.attribute(CREATE_ATTR), instance, entity);
        let update = is_truthy(node.attribute(UPDATE_ATTR), instance, entity);
        let action = match (create, update) {
            (true, false) => EntityAction::Create,
            (false, true) => EntityAction::Update,
            (true, true) => {
                tracing::warn!(
                    "entity for dataset {} declares both create and update; no mutation",
                    dataset
                );
                return Some(EntitiesExtra::default());
            }
            (false, false) => {
                tracing::debug!("entity for dataset {} has no action", dataset);
                return Some(EntitiesExtra::default());
            }
        };

        let id = node
            .attribute(ID_ATTR)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let base_version = node
            .attribute(BASE_VERSION_ATTR)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| match v.parse::<u64>() {
                Ok(version) => Some(version),
                Err(_) => {
                    tracing::warn!("ignoring non-numeric baseVersion '{}'", v);
                    None
                }
            });

        let label = instance
            .child(entity, LABEL_ELEMENT)
            .and_then(|label| instance.node(label).value.as_ref())
            .map(ToString::to_string);

        let properties = self.collect_properties(instance);

        Some(EntitiesExtra {
            entities: vec![FormEntity {
                dataset,
                id,
                label,
                properties,
                action,
                base_version,
            }],
        })
    }

    fn collect_properties(&self, instance: &InstanceTree) -> Vec<EntityProperty> {
        let mut properties = Vec::new();

        for save_to in &self.form.entity_extra().save_tos {
            let Some(id) = instance.resolve(&save_to.node_ref) else {
                tracing::warn!("saveto node {} is missing from the instance", save_to.node_ref);
                continue;
            };

            if !all_ancestors_relevant(instance, id) {
                tracing::debug!(
                    "omitting property {}: {} is not relevant",
                    save_to.property,
                    save_to.node_ref
                );
                continue;
            }

            properties.push(EntityProperty::new(
                save_to.property.as_str(),
                instance.node(id).string_value(),
            ));
        }

        properties
    }
}

/// Returns true when `id` and every ancestor up to the root are relevant.
pub fn all_ancestors_relevant(instance: &InstanceTree, id: NodeId) -> bool {
    let mut current = Some(id);
    while let Some(node_id) = current {
        let node = instance.node(node_id);
        if !node.relevant {
            return false;
        }
        current = node.parent;
    }
    true
}

/// Evaluates a `create`/`update` attribute. Absent or unevaluable declarations are falsy.
fn is_truthy(raw: Option<&str>, instance: &InstanceTree, context: NodeId) -> bool {
    let Some(raw) = raw else {
        return false;
    };

    match raw.trim() {
        "1" | "true" | "true()" => true,
        "" | "0" | "false" | "false()" => false,
        source => match Expression::parse(source) {
            Ok(expression) => match expression.evaluate_boolean(instance, context) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("could not evaluate entity action '{}': {}", source, e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("could not parse entity action '{}': {}", source, e);
                false
            }
        },
    }
}
