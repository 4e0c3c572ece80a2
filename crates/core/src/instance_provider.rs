//! Entity secondary instances.
//!
//! Forms read entity data through a secondary instance named `<dataset>.csv`. This module builds
//! that instance from a repository:
//!
//! ```text
//! <root>
//!   <item>
//!     <name>1</name>
//!     <label>Shiv Roy</label>
//!     <__version>1</__version>
//!     <__trunkVersion/>
//!     <__branchId/>
//!     <age>35</age>
//!   </item>
//! </root>
//! ```
//!
//! Identity, label and lineage elements are always present; a missing value is an empty element.
//!
//! In partial mode only the first row is materialized, as a schema with no values, and every
//! other row is an empty placeholder. Callers that need a row's data populate it on demand with
//! [`EntityInstanceProvider::populate_row`]. Row multiplicity is the entity's position in
//! repository enumeration order.

use crate::constants::{
    BRANCH_ID_ELEMENT, ENTITY_INSTANCE_SRC_PREFIX, ENTITY_INSTANCE_SUFFIX, ID_ELEMENT,
    INSTANCE_ITEM_ELEMENT, INSTANCE_ROOT_ELEMENT, LABEL_ELEMENT, TRUNK_VERSION_ELEMENT,
    VERSION_ELEMENT,
};
use crate::entity::Entity;
use crate::repositories::EntitiesRepository;
use crate::EntitiesResult;
use entities_types::DatasetName;
use std::sync::Arc;
use xforms::{AnswerValue, InstanceTree};

/// Secondary instance name for a dataset (`people` -> `people.csv`).
pub fn instance_name(dataset: &DatasetName) -> String {
    format!("{}{}", dataset.as_str(), ENTITY_INSTANCE_SUFFIX)
}

/// Extracts the dataset from an instance `src` such as `jr://file-csv/people.csv`.
///
/// Returns `None` for sources that do not name an entity dataset.
pub fn dataset_for_instance_src(src: &str) -> Option<DatasetName> {
    let file = src.trim().strip_prefix(ENTITY_INSTANCE_SRC_PREFIX)?;
    let dataset = file.strip_suffix(ENTITY_INSTANCE_SUFFIX)?;
    DatasetName::new(dataset).ok()
}

/// One element of a populated row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowField {
    pub name: String,
    pub value: Option<String>,
}

/// A row of an entity secondary instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityRow {
    /// Every element with its value.
    Populated {
        multiplicity: usize,
        fields: Vec<RowField>,
    },
    /// Element names only; values have not been loaded.
    SchemaOnly {
        multiplicity: usize,
        names: Vec<String>,
    },
    /// No elements; only the position is known.
    Placeholder { multiplicity: usize },
}

impl EntityRow {
    fn populated(multiplicity: usize, entity: &Entity) -> Self {
        let mut fields = vec![
            RowField {
                name: ID_ELEMENT.into(),
                value: Some(entity.id().to_string()),
            },
            RowField {
                name: LABEL_ELEMENT.into(),
                value: entity.label().map(str::to_string),
            },
            RowField {
                name: VERSION_ELEMENT.into(),
                value: entity.version().map(|v| v.to_string()),
            },
            RowField {
                name: TRUNK_VERSION_ELEMENT.into(),
                value: entity.trunk_version().map(|v| v.to_string()),
            },
            RowField {
                name: BRANCH_ID_ELEMENT.into(),
                value: entity.branch_id().map(str::to_string),
            },
        ];
        fields.extend(entity.properties().iter().map(|p| RowField {
            name: p.name.clone(),
            value: Some(p.value.clone()),
        }));

        EntityRow::Populated {
            multiplicity,
            fields,
        }
    }

    fn schema_only(multiplicity: usize, entity: &Entity) -> Self {
        let names = [
            ID_ELEMENT,
            LABEL_ELEMENT,
            VERSION_ELEMENT,
            TRUNK_VERSION_ELEMENT,
            BRANCH_ID_ELEMENT,
        ]
        .into_iter()
        .map(str::to_string)
        .chain(entity.properties().iter().map(|p| p.name.clone()))
        .collect();

        EntityRow::SchemaOnly {
            multiplicity,
            names,
        }
    }

    pub fn multiplicity(&self) -> usize {
        match self {
            EntityRow::Populated { multiplicity, .. }
            | EntityRow::SchemaOnly { multiplicity, .. }
            | EntityRow::Placeholder { multiplicity } => *multiplicity,
        }
    }

    /// Number of child elements the row renders.
    pub fn child_count(&self) -> usize {
        match self {
            EntityRow::Populated { fields, .. } => fields.len(),
            EntityRow::SchemaOnly { names, .. } => names.len(),
            EntityRow::Placeholder { .. } => 0,
        }
    }

    /// Value of a populated element. Schema-only and placeholder rows have no values.
    pub fn value(&self, name: &str) -> Option<&str> {
        match self {
            EntityRow::Populated { fields, .. } => fields
                .iter()
                .find(|f| f.name == name)
                .and_then(|f| f.value.as_deref()),
            _ => None,
        }
    }

    fn elements(&self) -> Vec<(&str, Option<&str>)> {
        match self {
            EntityRow::Populated { fields, .. } => fields
                .iter()
                .map(|f| (f.name.as_str(), f.value.as_deref()))
                .collect(),
            EntityRow::SchemaOnly { names, .. } => {
                names.iter().map(|n| (n.as_str(), None)).collect()
            }
            EntityRow::Placeholder { .. } => Vec::new(),
        }
    }
}

/// A dataset rendered as a secondary instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryInstance {
    pub instance_id: String,
    pub rows: Vec<EntityRow>,
}

impl SecondaryInstance {
    /// Renders the instance as `<root><item>...</item></root>`.
    pub fn to_xml(&self) -> String {
        let mut xml = format!("<{INSTANCE_ROOT_ELEMENT}>");
        for row in &self.rows {
            let elements = row.elements();
            if elements.is_empty() {
                xml.push_str(&format!("<{INSTANCE_ITEM_ELEMENT}/>"));
                continue;
            }
            xml.push_str(&format!("<{INSTANCE_ITEM_ELEMENT}>"));
            for (name, value) in elements {
                match value {
                    Some(value) if !value.is_empty() => {
                        xml.push_str(&format!("<{name}>{}</{name}>", escape_text(value)));
                    }
                    _ => xml.push_str(&format!("<{name}/>")),
                }
            }
            xml.push_str(&format!("</{INSTANCE_ITEM_ELEMENT}>"));
        }
        xml.push_str(&format!("</{INSTANCE_ROOT_ELEMENT}>"));
        xml
    }

    /// Builds an [`InstanceTree`] the expression evaluator can query.
    pub fn to_instance_tree(&self) -> InstanceTree {
        let mut tree = InstanceTree::new(INSTANCE_ROOT_ELEMENT);
        let root = tree.root();
        for row in &self.rows {
            let item = tree.add_child(root, INSTANCE_ITEM_ELEMENT);
            for (name, value) in row.elements() {
                let child = tree.add_child(item, name);
                tree.set_value(child, value.map(|v| AnswerValue::String(v.to_string())));
            }
        }
        tree
    }
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Serves entity datasets as secondary instances.
#[derive(Clone)]
pub struct EntityInstanceProvider {
    repository: Arc<dyn EntitiesRepository>,
}

impl EntityInstanceProvider {
    pub fn new(repository: Arc<dyn EntitiesRepository>) -> Self {
        Self { repository }
    }

    /// Builds the secondary instance for `dataset`.
    ///
    /// # Arguments
    ///
    /// * `dataset` - Dataset to read.
    /// * `instance_id` - Name the form uses for the instance (normally [`instance_name`]).
    /// * `partial` - Materialize only the first row's schema and leave other rows as placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EntitiesError`] if the repository cannot be read.
    pub fn get(
        &self,
        dataset: &DatasetName,
        instance_id: &str,
        partial: bool,
    ) -> EntitiesResult<SecondaryInstance> {
        let rows = if partial {
            self.partial_rows(dataset)?
        } else {
            self.repository
                .get_all(dataset)?
                .iter()
                .enumerate()
                .map(|(multiplicity, entity)| EntityRow::populated(multiplicity, entity))
                .collect()
        };

        tracing::debug!(
            "instance {} for dataset {}: {} rows (partial: {})",
            instance_id,
            dataset,
            rows.len(),
            partial
        );

        Ok(SecondaryInstance {
            instance_id: instance_id.to_string(),
            rows,
        })
    }

    fn partial_rows(&self, dataset: &DatasetName) -> EntitiesResult<Vec<EntityRow>> {
        let count = self.repository.count(dataset)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(count);
        match self.repository.get_by_index(dataset, 0)? {
            Some(first) => rows.push(EntityRow::schema_only(0, &first)),
            None => rows.push(EntityRow::Placeholder { multiplicity: 0 }),
        }
        rows.extend((1..count).map(|multiplicity| EntityRow::Placeholder { multiplicity }));
        Ok(rows)
    }

    /// Loads the full row at `multiplicity`, for use with partial instances.
    ///
    /// Returns `None` when the position is past the end of the dataset.
    pub fn populate_row(
        &self,
        dataset: &DatasetName,
        multiplicity: usize,
    ) -> EntitiesResult<Option<EntityRow>> {
        Ok(self
            .repository
            .get_by_index(dataset, multiplicity)?
            .map(|entity| EntityRow::populated(multiplicity, &entity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityProperty, Lineage};
    use crate::repositories::{FileEntitiesRepository, InMemoryEntitiesRepository};

    fn people() -> DatasetName {
        DatasetName::new("people").expect("valid dataset")
    }

    fn provider_with(entities: &[Entity]) -> EntityInstanceProvider {
        let repo = InMemoryEntitiesRepository::new();
        repo.save(&people(), entities).expect("save should succeed");
        EntityInstanceProvider::new(Arc::new(repo))
    }

    fn person(id: &str, label: &str, age: &str) -> Entity {
        Entity::new(
            id,
            Some(label.into()),
            vec![
                EntityProperty::new("age", age),
                EntityProperty::new("born", "England"),
            ],
        )
        .expect("valid entity")
    }

    #[test]
    fn test_shiv_roy_scenario() {
        let provider = provider_with(&[person("1", "Shiv Roy", "35")]);
        let instance = provider
            .get(&people(), &instance_name(&people()), false)
            .expect("get should succeed");

        assert_eq!(instance.instance_id, "people.csv");
        assert_eq!(instance.rows.len(), 1);
        let row = &instance.rows[0];
        assert_eq!(row.child_count(), 7);
        assert_eq!(row.value("name"), Some("1"));
        assert_eq!(row.value("label"), Some("Shiv Roy"));
        assert_eq!(row.value("age"), Some("35"));
        assert_eq!(row.value("born"), Some("England"));
        assert_eq!(row.value("__trunkVersion"), None);
    }

    #[test]
    fn test_full_mode_includes_lineage_values() {
        let entity = person("1", "Shiv Roy", "35")
            .with_version(Some(3))
            .with_lineage(Some(Lineage {
                trunk_version: 2,
                branch_id: "b-1".into(),
            }))
            .expect("lineage should be valid");
        let instance = provider_with(&[entity])
            .get(&people(), "people.csv", false)
            .expect("get should succeed");

        let row = &instance.rows[0];
        assert_eq!(row.value("__version"), Some("3"));
        assert_eq!(row.value("__trunkVersion"), Some("2"));
        assert_eq!(row.value("__branchId"), Some("b-1"));
    }

    #[test]
    fn test_partial_mode_shape() {
        let provider = provider_with(&[
            person("1", "Shiv Roy", "35"),
            person("2", "Kendall Roy", "40"),
            person("3", "Roman Roy", "33"),
        ]);
        let instance = provider
            .get(&people(), "people.csv", true)
            .expect("get should succeed");

        assert_eq!(instance.rows.len(), 3);
        assert!(matches!(
            &instance.rows[0],
            EntityRow::SchemaOnly { multiplicity: 0, names } if names.len() == 7
        ));
        assert_eq!(instance.rows[0].value("name"), None);
        for (index, row) in instance.rows.iter().enumerate().skip(1) {
            assert_eq!(row, &EntityRow::Placeholder { multiplicity: index });
            assert_eq!(row.child_count(), 0);
        }

        let populated = provider
            .populate_row(&people(), 2)
            .expect("populate should succeed")
            .expect("row 2 exists");
        assert_eq!(populated.multiplicity(), 2);
        assert_eq!(populated.value("label"), Some("Roman Roy"));
        assert_eq!(
            provider.populate_row(&people(), 3).expect("populate should succeed"),
            None
        );
    }

    #[test]
    fn test_partial_mode_over_file_repository_defers_row_validation() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("people.yaml"),
            "entities:
  - id: \"1\"
    label: Shiv Roy
    version: 1
    properties:
      - name: age
        value: \"35\"
  - id: \"2\"
    label: Kendall Roy
  - id: \"3\"
    version: 2
    trunk_version: 1
",
        )
        .expect("write should succeed");
        let provider = EntityInstanceProvider::new(Arc::new(FileEntitiesRepository::at(
            temp_dir.path(),
        )));

        let instance = provider
            .get(&people(), "people.csv", true)
            .expect("partial get should succeed");
        assert_eq!(instance.rows.len(), 3);
        assert!(matches!(&instance.rows[0], EntityRow::SchemaOnly { multiplicity: 0, .. }));
        assert_eq!(instance.rows[2], EntityRow::Placeholder { multiplicity: 2 });

        let second = provider
            .populate_row(&people(), 1)
            .expect("populate should succeed")
            .expect("row 1 exists");
        assert_eq!(second.value("label"), Some("Kendall Roy"));
        assert!(matches!(
            provider.populate_row(&people(), 2),
            Err(crate::EntitiesError::IncompleteLineage { ref id }) if id == "3"
        ));
        assert!(provider.get(&people(), "people.csv", false).is_err());
    }

    #[test]
    fn test_multiplicity_follows_repository_order() {
        let provider = provider_with(&[person("z", "Zed", "1"), person("a", "Ann", "2")]);
        let instance = provider
            .get(&people(), "people.csv", false)
            .expect("get should succeed");
        let ids: Vec<Option<&str>> = instance.rows.iter().map(|r| r.value("name")).collect();
        assert_eq!(ids, [Some("z"), Some("a")]);
        assert_eq!(instance.rows[1].multiplicity(), 1);
    }

    #[test]
    fn test_empty_dataset_has_no_rows() {
        let provider = provider_with(&[]);
        for partial in [false, true] {
            let instance = provider
                .get(&people(), "people.csv", partial)
                .expect("get should succeed");
            assert!(instance.rows.is_empty());
        }
    }

    #[test]
    fn test_to_xml_renders_empty_elements_and_escapes() {
        let entity = Entity::new("1", Some("Tom & Greg".into()), Vec::new()).expect("valid entity");
        let instance = provider_with(&[entity])
            .get(&people(), "people.csv", false)
            .expect("get should succeed");
        assert_eq!(
            instance.to_xml(),
            "<root><item><name>1</name><label>Tom &amp; Greg</label>\
             <__version/><__trunkVersion/><__branchId/></item></root>"
        );
    }

    #[test]
    fn test_instance_tree_is_queryable() {
        let instance = provider_with(&[person("1", "Shiv Roy", "35"), person("2", "Con", "60")])
            .get(&people(), "people.csv", false)
            .expect("get should succeed");
        let tree = instance.to_instance_tree();

        let items = tree.select_all("/root/item");
        assert_eq!(items.len(), 2);
        let age = tree.select_all("/root/item/age");
        assert_eq!(tree.node(age[1]).string_value(), "60");

        let expression =
            xforms::Expression::parse("count(/root/item) = 2 and /root/item/age = '35'")
                .expect("expression should parse");
        assert!(expression
            .evaluate_boolean(&tree, tree.root())
            .expect("expression should evaluate"));
    }

    #[test]
    fn test_instance_src_naming() {
        assert_eq!(dataset_for_instance_src("jr://file-csv/people.csv"), Some(people()));
        assert_eq!(dataset_for_instance_src("jr://file/people.xml"), None);
        assert_eq!(dataset_for_instance_src("jr://file-csv/.csv"), None);
        assert_eq!(instance_name(&people()), "people.csv");
    }
}
