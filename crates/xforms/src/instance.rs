//! Answered instance trees.
//!
//! An [`InstanceTree`] is a snapshot of a form instance: the element hierarchy of the primary
//! instance, the (typed) answer held by every leaf, the attributes of every element, and the
//! relevance each node computes *for itself* from its bind.
//!
//! Nodes are stored in an arena and addressed by [`NodeId`]; every node knows its parent so that
//! callers can walk upwards (for example to decide whether an enclosing group switched a
//! question off). Inherited relevance is not cached: each node stores only its own flag, and a
//! caller that needs the effective value walks [`InstanceTree::self_and_ancestors`].
//!
//! References use absolute paths (`/data/group/question`). A trailing `@name` step addresses an
//! attribute. When a path matches several nodes (repeats), the first match in document order is
//! used by the single-node helpers.

use crate::answer::{AnswerValue, DataType};
use crate::expr::Expression;
use crate::form::FormDef;
use crate::{XFormError, XFormResult};
use serde::{Deserialize, Serialize};

/// Index of a node inside an [`InstanceTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in document order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// An attribute on an instance element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

/// A single element of an instance tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceNode {
    pub name: String,
    pub namespace: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: Vec<NodeAttribute>,
    pub value: Option<AnswerValue>,
    /// Relevance computed from this node's own bind, ignoring ancestors.
    pub relevant: bool,
}

impl InstanceNode {
    fn new(name: &str, namespace: Option<&str>, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            parent,
            children: Vec::new(),
            attributes: Vec::new(),
            value: None,
            relevant: true,
        }
    }

    /// Returns the value of a no-namespace attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Returns the canonical string of the answer, or `""` when unanswered.
    pub fn string_value(&self) -> String {
        self.value.as_ref().map(ToString::to_string).unwrap_or_default()
    }
}

/// Arena-backed instance tree. `NodeId(0)` is always the root element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceTree {
    nodes: Vec<InstanceNode>,
}

impl InstanceTree {
    /// Creates a tree holding a single root element.
    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![InstanceNode::new(root_name, None, None)],
        }
    }

    /// Builds a tree from an XML element, copying attributes and leaf text verbatim.
    ///
    /// Leaf text becomes an [`AnswerValue::String`]; whitespace-only text is unanswered.
    pub fn from_element(element: roxmltree::Node<'_, '_>) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.push_element(element, None);
        tree
    }

    /// Parses a standalone instance document (for example a submission file).
    pub fn parse(xml: &str) -> XFormResult<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        Ok(Self::from_element(doc.root_element()))
    }

    fn push_element(&mut self, element: roxmltree::Node<'_, '_>, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = InstanceNode::new(
            element.tag_name().name(),
            element.tag_name().namespace(),
            parent,
        );
        node.attributes = element
            .attributes()
            .map(|a| NodeAttribute {
                namespace: a.namespace().map(str::to_string),
                name: a.name().to_string(),
                value: a.value().to_string(),
            })
            .collect();
        self.nodes.push(node);

        let mut has_element_children = false;
        for child in element.children().filter(|c| c.is_element()) {
            has_element_children = true;
            let child_id = self.push_element(child, Some(id));
            self.nodes[id.0].children.push(child_id);
        }

        if !has_element_children {
            let text: String = element
                .children()
                .filter(|c| c.is_text())
                .filter_map(|c| c.text())
                .collect();
            if !text.trim().is_empty() {
                self.nodes[id.0].value = Some(AnswerValue::String(text));
            }
        }

        id
    }

    /// Loads a filled submission against a form definition.
    ///
    /// Values are coerced using the data type of the bind targeting each node, and relevance is
    /// recomputed from the form's `relevant` expressions.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError`] if:
    /// - the XML is malformed,
    /// - the submission root does not match the form's primary instance root,
    /// - a value cannot be coerced to its bind type,
    /// - a `relevant` expression cannot be parsed or evaluated.
    pub fn load_submission(form: &FormDef, xml: &str) -> XFormResult<Self> {
        let mut tree = Self::parse(xml)?;

        let expected = &form.main_instance().node(form.main_instance().root()).name;
        let found = &tree.node(tree.root()).name;
        if expected != found {
            return Err(XFormError::MissingElement(format!(
                "submission root <{found}> does not match form instance root <{expected}>"
            )));
        }

        for bind in form.binds() {
            let data_type = bind.data_type();
            if data_type == DataType::String {
                continue;
            }
            for id in tree.select_all(&bind.nodeset) {
                let raw = tree.node(id).string_value();
                let value = AnswerValue::parse(data_type, &raw).map_err(|message| {
                    XFormError::InvalidAnswer {
                        path: bind.nodeset.clone(),
                        message,
                    }
                })?;
                tree.nodes[id.0].value = value;
            }
        }

        tree.recompute_relevance(form)?;
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &InstanceNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Returns the first child element named `name`.
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].name == name)
    }

    /// Iterates over `id` and then each of its ancestors up to the root.
    pub fn self_and_ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |current| self.parent(*current))
    }

    /// Absolute path of a node (`/data/group/question`).
    pub fn path_of(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = self
            .self_and_ancestors(id)
            .map(|n| self.nodes[n.0].name.as_str())
            .collect();
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Resolves an absolute element path to every matching node, in document order.
    ///
    /// Paths ending in an attribute step (`@name`) match no elements.
    pub fn select_all(&self, path: &str) -> Vec<NodeId> {
        let Some(steps) = split_path(path) else {
            return Vec::new();
        };
        if steps.iter().any(|s| s.starts_with('@')) {
            return Vec::new();
        }

        let root = self.root();
        let mut current = match steps.first() {
            Some(first) if *first == self.nodes[root.0].name => vec![root],
            _ => return Vec::new(),
        };

        for step in &steps[1..] {
            current = current
                .iter()
                .flat_map(|id| self.children(*id).iter().copied())
                .filter(|c| self.nodes[c.0].name == *step)
                .collect();
        }

        current
    }

    /// Resolves an absolute element path to its first matching node.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        self.select_all(path).into_iter().next()
    }

    /// Sets (or clears) the answer of the first node matching `path`.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError::UnknownReference`] if no element matches.
    pub fn set_answer(&mut self, path: &str, value: Option<AnswerValue>) -> XFormResult<()> {
        let id = self
            .resolve(path)
            .ok_or_else(|| XFormError::UnknownReference(path.to_string()))?;
        self.nodes[id.0].value = value;
        Ok(())
    }

    /// Sets a no-namespace attribute on the first node matching `path`.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError::UnknownReference`] if no element matches.
    pub fn set_attribute(&mut self, path: &str, name: &str, value: &str) -> XFormResult<()> {
        let id = self
            .resolve(path)
            .ok_or_else(|| XFormError::UnknownReference(path.to_string()))?;
        let attributes = &mut self.nodes[id.0].attributes;
        match attributes
            .iter_mut()
            .find(|a| a.namespace.is_none() && a.name == name)
        {
            Some(existing) => existing.value = value.to_string(),
            None => attributes.push(NodeAttribute {
                namespace: None,
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    /// Sets (or clears) the answer held by a node.
    pub fn set_value(&mut self, id: NodeId, value: Option<AnswerValue>) {
        self.nodes[id.0].value = value;
    }

    /// Appends a new child element and returns its id.
    pub fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(InstanceNode::new(name, None, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Recomputes each node's own relevance from the form's `relevant` binds.
    ///
    /// Nodes without a `relevant` bind are relevant. Inheritance is not applied here.
    ///
    /// # Errors
    ///
    /// Returns [`XFormError::Expression`] if a `relevant` expression is malformed.
    pub fn recompute_relevance(&mut self, form: &FormDef) -> XFormResult<()> {
        for node in &mut self.nodes {
            node.relevant = true;
        }

        for bind in form.binds() {
            let Some(relevant) = bind.relevant.as_deref() else {
                continue;
            };
            let expression = Expression::parse(relevant)?;
            for id in self.select_all(&bind.nodeset) {
                let result = expression.evaluate_boolean(self, id)?;
                self.nodes[id.0].relevant = result;
            }
        }

        Ok(())
    }
}

/// Splits an absolute path into its steps. Relative paths are rejected.
fn split_path(path: &str) -> Option<Vec<&str>> {
    let rest = path.trim().strip_prefix('/')?;
    let steps: Vec<&str> = rest.split('/').collect();
    if steps.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<data id="f">
        <name>Shiv</name>
        <grp><age>35</age><born/></grp>
        <rep><q>a</q></rep>
        <rep><q>b</q></rep>
        <meta><entity dataset="people" create="1"><label>Shiv</label></entity></meta>
    </data>"#;

    fn tree() -> InstanceTree {
        InstanceTree::parse(XML).expect("instance should parse")
    }

    #[test]
    fn test_parse_builds_hierarchy() {
        let tree = tree();
        let root = tree.root();
        assert_eq!(tree.node(root).name, "data");
        assert_eq!(tree.node(root).attribute("id"), Some("f"));

        let age = tree.resolve("/data/grp/age").expect("age exists");
        assert_eq!(tree.node(age).string_value(), "35");
        assert_eq!(tree.path_of(age), "/data/grp/age");
    }

    #[test]
    fn test_blank_leaf_is_unanswered() {
        let tree = tree();
        let born = tree.resolve("/data/grp/born").expect("born exists");
        assert_eq!(tree.node(born).value, None);
        assert_eq!(tree.node(born).string_value(), "");
    }

    #[test]
    fn test_select_all_returns_repeats_in_order() {
        let tree = tree();
        let matches = tree.select_all("/data/rep/q");
        assert_eq!(matches.len(), 2);
        assert_eq!(tree.node(matches[0]).string_value(), "a");
        assert_eq!(tree.node(matches[1]).string_value(), "b");
    }

    #[test]
    fn test_select_all_rejects_relative_and_attribute_paths() {
        let tree = tree();
        assert!(tree.select_all("data/name").is_empty());
        assert!(tree.select_all("/data/meta/entity/@create").is_empty());
        assert!(tree.select_all("/other/name").is_empty());
        assert!(tree.select_all("/data//name").is_empty());
    }

    #[test]
    fn test_relevance_flag_is_per_node() {
        let mut tree = tree();
        let grp = tree.resolve("/data/grp").expect("grp exists");
        let age = tree.resolve("/data/grp/age").expect("age exists");
        tree.nodes[grp.0].relevant = false;

        assert!(tree.node(age).relevant);
        let chain: Vec<NodeId> = tree.self_and_ancestors(age).collect();
        assert_eq!(chain, [age, grp, tree.root()]);
        assert!(chain.iter().any(|id| !tree.node(*id).relevant));
    }

    #[test]
    fn test_set_answer_and_attribute() {
        let mut tree = tree();
        tree.set_answer("/data/grp/born", Some(AnswerValue::String("England".into())))
            .expect("set_answer should succeed");
        tree.set_attribute("/data/meta/entity", "update", "1")
            .expect("set_attribute should succeed");

        let born = tree.resolve("/data/grp/born").expect("born exists");
        assert_eq!(tree.node(born).string_value(), "England");
        let entity = tree.resolve("/data/meta/entity").expect("entity exists");
        assert_eq!(tree.node(entity).attribute("update"), Some("1"));

        let err = tree
            .set_answer("/data/missing", None)
            .expect_err("unknown path should fail");
        assert!(matches!(err, XFormError::UnknownReference(_)));
    }

    #[test]
    fn test_add_child_links_parent() {
        let mut tree = InstanceTree::new("root");
        let item = tree.add_child(tree.root(), "item");
        let name = tree.add_child(item, "name");
        assert_eq!(tree.parent(name), Some(item));
        assert_eq!(tree.path_of(name), "/root/item/name");
        assert_eq!(tree.len(), 3);
    }
}
