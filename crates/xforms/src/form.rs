//! Parsed XForm definitions.
//!
//! [`FormDef::parse`] reads an XForm document and extracts what the entity subsystem needs:
//! - the form title and the id/version declared on the primary instance root
//! - the primary instance template, as an [`InstanceTree`]
//! - every `<bind>` with its well-known attributes split out and the rest kept as
//!   [`BindAttribute`]s for external consumers
//! - the entities extension ([`EntityFormExtra`], entities version)
//!
//! A parsed `FormDef` is serialisable, so it can be cached and restored without re-parsing the
//! XML. Restoring must not change how an instance finalizes, so everything entity processing
//! reads lives in serialised fields.

use crate::answer::DataType;
use crate::entities::{self, EntitiesVersion, EntityFormExtra, EntityFormParser};
use crate::instance::{InstanceTree, NodeId};
use crate::namespaces::{XFORMS, XHTML};
use crate::{XFormError, XFormResult};
use serde::{Deserialize, Serialize};

/// A bind attribute passed through to external consumers (UI layers, widgets).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAttribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

/// A `<bind>` element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    /// Absolute reference of the bound node.
    pub nodeset: String,
    /// Raw `type` attribute.
    pub data_type: Option<String>,
    pub relevant: Option<String>,
    pub calculate: Option<String>,
    pub required: Option<String>,
    pub readonly: Option<String>,
    pub constraint: Option<String>,
    /// Every other attribute, in document order.
    pub attributes: Vec<BindAttribute>,
}

impl Bind {
    /// Data type declared by this bind (`string` when absent).
    pub fn data_type(&self) -> DataType {
        self.data_type
            .as_deref()
            .map(DataType::from_bind_type)
            .unwrap_or_default()
    }

    /// Looks up an externally visible attribute by namespace URI and local name.
    pub fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == namespace && a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// A parsed form definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormDef {
    title: Option<String>,
    form_id: Option<String>,
    form_version: Option<String>,
    binds: Vec<Bind>,
    main_instance: InstanceTree,
    entities_version: Option<EntitiesVersion>,
    entity_extra: EntityFormExtra,
}

fn is_xforms_element(node: &roxmltree::Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && matches!(node.tag_name().namespace(), None | Some(XFORMS))
}

impl FormDef {
    /// Parses an XForm document.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError`] if:
    /// - the XML is malformed ([`XFormError::InvalidXml`]),
    /// - there is no `<model>` or primary `<instance>` ([`XFormError::MissingElement`]),
    /// - a bind has no `nodeset`/`ref`,
    /// - the entities extension is invalid ([`XFormError::MissingModelAttribute`],
    ///   [`XFormError::UnrecognizedEntityVersion`]).
    pub fn parse(xml: &str) -> XFormResult<Self> {
        let doc = roxmltree::Document::parse(xml)?;

        let title = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "title" && n.tag_name().namespace() == Some(XHTML))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let model = doc
            .descendants()
            .find(|n| is_xforms_element(n, "model"))
            .ok_or_else(|| XFormError::MissingElement("<model>".into()))?;

        let mut entity_parser = EntityFormParser::new();
        for attribute in model.attributes() {
            entity_parser.model_attribute(attribute.namespace(), attribute.name(), attribute.value());
        }

        let instance = model
            .children()
            .find(|n| is_xforms_element(n, "instance") && n.attribute("id").is_none())
            .or_else(|| model.children().find(|n| is_xforms_element(n, "instance")))
            .ok_or_else(|| XFormError::MissingElement("primary <instance>".into()))?;
        let instance_root = instance
            .children()
            .find(|n| n.is_element())
            .ok_or_else(|| XFormError::MissingElement("primary instance root element".into()))?;
        let main_instance = InstanceTree::from_element(instance_root);

        let mut binds = Vec::new();
        for bind_node in model.descendants().filter(|n| is_xforms_element(n, "bind")) {
            binds.push(parse_bind(bind_node, &mut entity_parser)?);
        }

        let (entities_version, entity_extra) = entity_parser.finish(&main_instance)?;

        let root = main_instance.node(main_instance.root());
        let form_id = root.attribute("id").map(str::to_string);
        let form_version = root.attribute("version").map(str::to_string);

        tracing::debug!(
            "parsed form {:?}: {} binds, {} saveto mappings",
            form_id,
            binds.len(),
            entity_extra.save_tos.len()
        );

        Ok(Self {
            title,
            form_id,
            form_version,
            binds,
            main_instance,
            entities_version,
            entity_extra,
        })
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn form_id(&self) -> Option<&str> {
        self.form_id.as_deref()
    }

    pub fn form_version(&self) -> Option<&str> {
        self.form_version.as_deref()
    }

    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    /// Returns the bind targeting `nodeset`, if any.
    pub fn bind_for(&self, nodeset: &str) -> Option<&Bind> {
        self.binds.iter().find(|b| b.nodeset == nodeset)
    }

    /// The primary instance template (default answers, no submission data).
    pub fn main_instance(&self) -> &InstanceTree {
        &self.main_instance
    }

    /// Creates a blank answerable copy of the primary instance with relevance computed.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError::Expression`] if a `relevant` expression is malformed.
    pub fn new_instance(&self) -> XFormResult<InstanceTree> {
        let mut instance = self.main_instance.clone();
        instance.recompute_relevance(self)?;
        Ok(instance)
    }

    pub fn entities_version(&self) -> Option<EntitiesVersion> {
        self.entities_version
    }

    pub fn entity_extra(&self) -> &EntityFormExtra {
        &self.entity_extra
    }

    /// True when the primary instance declares a `meta/entity` element.
    pub fn declares_entity(&self) -> bool {
        self.entity_element().is_some()
    }

    /// The entity-definition element of the primary instance template.
    pub fn entity_element(&self) -> Option<NodeId> {
        entities::entity_element(&self.main_instance)
    }

    /// Serialises the parsed definition to JSON.
    pub fn to_json(&self) -> XFormResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a definition serialised with [`FormDef::to_json`].
    pub fn from_json(json: &str) -> XFormResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn parse_bind(node: roxmltree::Node<'_, '_>, entity_parser: &mut EntityFormParser) -> XFormResult<Bind> {
    let nodeset = node
        .attribute("nodeset")
        .or_else(|| node.attribute("ref"))
        .map(|s| s.trim().to_string())
        .ok_or_else(|| XFormError::MissingElement("nodeset on <bind>".into()))?;

    let mut bind = Bind {
        nodeset,
        ..Bind::default()
    };

    for attribute in node.attributes() {
        let namespace = attribute.namespace();
        let name = attribute.name();
        let value = attribute.value();

        if namespace.is_none() {
            let slot = match name {
                "nodeset" | "ref" => continue,
                "type" => Some(&mut bind.data_type),
                "relevant" => Some(&mut bind.relevant),
                "calculate" => Some(&mut bind.calculate),
                "required" => Some(&mut bind.required),
                "readonly" => Some(&mut bind.readonly),
                "constraint" => Some(&mut bind.constraint),
                _ => None,
            };
            if let Some(slot) = slot {
                *slot = Some(value.to_string());
                continue;
            }
        }

        if entity_parser.bind_attribute(namespace, name, value, &bind.nodeset) {
            continue;
        }

        bind.attributes.push(BindAttribute {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    Ok(bind)
}
