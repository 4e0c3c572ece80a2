//! File-backed entity repository.
//!
//! Each dataset is a single YAML document at `<entities_data_dir>/datasets/<dataset>.yaml`:
//!
//! ```yaml
//! entities:
//!   - id: "1"
//!     label: Shiv Roy
//!     version: 1
//!     properties:
//!       - name: age
//!         value: "35"
//! ```
//!
//! Writes go to a sibling temporary file which is then renamed over the dataset file, so readers
//! never observe a half-written document. Reads use `serde_path_to_error` so a hand-edited file
//! that no longer matches the schema is reported with the failing field.

use super::{upsert, EntitiesRepository};
use crate::config::CoreConfig;
use crate::entity::{Entity, EntityProperty};
use crate::paths::DatasetFile;
use crate::{EntitiesError, EntitiesResult};
use entities_types::DatasetName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// On-disk representation of one dataset.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetDocument {
    #[serde(default)]
    entities: Vec<EntityRecord>,
}

/// On-disk representation of one entity. Lineage is stored flat and validated on load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityRecord {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trunk_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch_id: Option<String>,
    #[serde(default)]
    properties: Vec<EntityProperty>,
}

impl From<&Entity> for EntityRecord {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id().to_string(),
            label: entity.label().map(str::to_string),
            version: entity.version(),
            trunk_version: entity.trunk_version(),
            branch_id: entity.branch_id().map(str::to_string),
            properties: entity.properties().to_vec(),
        }
    }
}

impl TryFrom<EntityRecord> for Entity {
    type Error = EntitiesError;

    fn try_from(record: EntityRecord) -> Result<Self, Self::Error> {
        Entity::new(record.id, record.label, record.properties)?
            .with_version(record.version)
            .with_lineage_parts(record.trunk_version, record.branch_id)
    }
}

/// Repository storing one YAML file per dataset.
#[derive(Debug)]
pub struct FileEntitiesRepository {
    datasets_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileEntitiesRepository {
    /// Creates a repository rooted at the configured datasets directory.
    ///
    /// The directory is created lazily on the first save.
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self::at(cfg.datasets_dir())
    }

    /// Creates a repository rooted at an explicit directory.
    pub fn at(datasets_dir: impl Into<PathBuf>) -> Self {
        Self {
            datasets_dir: datasets_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    fn dataset_path(&self, dataset: &DatasetName) -> PathBuf {
        self.datasets_dir.join(DatasetFile::file_name(dataset))
    }

    /// Parses the dataset file without validating individual records.
    fn load_records(&self, dataset: &DatasetName) -> EntitiesResult<Vec<EntityRecord>> {
        let path = self.dataset_path(dataset);
        if !path.is_file() {
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(&path).map_err(EntitiesError::FileRead)?;
        let document = parse_document(&path, &text)?;
        tracing::debug!("read {} records from {}", document.entities.len(), path.display());
        Ok(document.entities)
    }

    fn load(&self, dataset: &DatasetName) -> EntitiesResult<Vec<Entity>> {
        self.load_records(dataset)?
            .into_iter()
            .map(Entity::try_from)
            .collect()
    }

    fn store(&self, dataset: &DatasetName, entities: &[Entity]) -> EntitiesResult<()> {
        let path = self.dataset_path(dataset);

        if entities.is_empty() {
            if path.exists() {
                fs::remove_file(&path).map_err(EntitiesError::FileWrite)?;
            }
            return Ok(());
        }

        fs::create_dir_all(&self.datasets_dir).map_err(EntitiesError::StorageDirCreation)?;

        let document = DatasetDocument {
            entities: entities.iter().map(EntityRecord::from).collect(),
        };
        let yaml = serde_yaml::to_string(&document).map_err(EntitiesError::YamlSerialization)?;

        let tmp_path = path.with_extension(format!("{}.tmp", DatasetFile::EXTENSION));
        fs::write(&tmp_path, yaml).map_err(EntitiesError::FileWrite)?;
        fs::rename(&tmp_path, &path).map_err(EntitiesError::FileWrite)?;

        tracing::debug!("wrote {} entities to {}", entities.len(), path.display());
        Ok(())
    }

    fn lock(&self) -> EntitiesResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| EntitiesError::InvalidInput("dataset write lock poisoned".into()))
    }
}

fn parse_document(path: &Path, text: &str) -> EntitiesResult<DatasetDocument> {
    let deserializer = serde_yaml::Deserializer::from_str(text);
    serde_path_to_error::deserialize::<_, DatasetDocument>(deserializer).map_err(|err| {
        let field = err.path().to_string();
        let source = err.into_inner();
        let field = if field.is_empty() || field == "." {
            "<root>".to_string()
        } else {
            field
        };
        EntitiesError::DatasetSchema {
            path: path.to_path_buf(),
            message: format!("schema mismatch at {field}: {source}"),
        }
    })
}

impl EntitiesRepository for FileEntitiesRepository {
    fn save(&self, dataset: &DatasetName, entities: &[Entity]) -> EntitiesResult<()> {
        let _guard = self.lock()?;
        let mut stored = self.load(dataset)?;
        for entity in entities {
            upsert(&mut stored, entity.clone());
        }
        self.store(dataset, &stored)
    }

    fn get(&self, dataset: &DatasetName, id: &str) -> EntitiesResult<Option<Entity>> {
        self.load_records(dataset)?
            .into_iter()
            .find(|record| record.id == id)
            .map(Entity::try_from)
            .transpose()
    }

    fn get_all(&self, dataset: &DatasetName) -> EntitiesResult<Vec<Entity>> {
        self.load(dataset)
    }

    fn get_datasets(&self) -> EntitiesResult<Vec<DatasetName>> {
        if !self.datasets_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut datasets = Vec::new();
        for entry in fs::read_dir(&self.datasets_dir).map_err(EntitiesError::FileRead)? {
            let entry = entry.map_err(EntitiesError::FileRead)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match DatasetFile::dataset_of(&path) {
                Some(dataset) => datasets.push(dataset),
                None => tracing::warn!("ignoring unexpected file {}", path.display()),
            }
        }

        datasets.sort();
        Ok(datasets)
    }

    fn delete(&self, dataset: &DatasetName, id: &str) -> EntitiesResult<bool> {
        let _guard = self.lock()?;
        let mut stored = self.load(dataset)?;
        let before = stored.len();
        stored.retain(|e| e.id() != id);
        if stored.len() == before {
            return Ok(false);
        }
        self.store(dataset, &stored)?;
        Ok(true)
    }

    fn clear(&self) -> EntitiesResult<()> {
        let _guard = self.lock()?;
        if self.datasets_dir.exists() {
            fs::remove_dir_all(&self.datasets_dir).map_err(EntitiesError::FileWrite)?;
        }
        Ok(())
    }

    fn count(&self, dataset: &DatasetName) -> EntitiesResult<usize> {
        Ok(self.load_records(dataset)?.len())
    }

    /// Only the record at `index` is validated, so a malformed row elsewhere in the dataset
    /// does not fail the lookup.
    fn get_by_index(&self, dataset: &DatasetName, index: usize) -> EntitiesResult<Option<Entity>> {
        self.load_records(dataset)?
            .into_iter()
            .nth(index)
            .map(Entity::try_from)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Lineage;
    use tempfile::TempDir;

    fn people() -> DatasetName {
        DatasetName::new("people").expect("valid dataset")
    }

    fn shiv() -> Entity {
        Entity::new(
            "1",
            Some("Shiv Roy".into()),
            vec![
                EntityProperty::new("age", "35"),
                EntityProperty::new("born", "England"),
            ],
        )
        .expect("valid entity")
        .with_version(Some(2))
    }

    #[test]
    fn test_save_and_reload_from_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let branched = shiv()
            .with_lineage(Some(Lineage {
                trunk_version: 1,
                branch_id: "c4a7e0b2".into(),
            }))
            .expect("lineage should be valid");

        FileEntitiesRepository::at(temp_dir.path())
            .save(&people(), &[branched.clone()])
            .expect("save should succeed");

        let reopened = FileEntitiesRepository::at(temp_dir.path());
        let loaded = reopened
            .get(&people(), "1")
            .expect("get should succeed")
            .expect("entity should exist");
        assert_eq!(loaded, branched);
        assert!(temp_dir.path().join("people.yaml").is_file());
        assert!(!temp_dir.path().join("people.yaml.tmp").exists());
    }

    #[test]
    fn test_upsert_keeps_file_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = FileEntitiesRepository::at(temp_dir.path());
        let make = |id: &str| Entity::new(id, None, Vec::new()).expect("valid entity");

        repo.save(&people(), &[make("a"), make("b")]).expect("save should succeed");
        repo.save(&people(), &[make("c"), shiv(), make("a").with_version(Some(5))])
            .expect("save should succeed");

        let all = repo.get_all(&people()).expect("get_all should succeed");
        let ids: Vec<&str> = all.iter().map(Entity::id).collect();
        assert_eq!(ids, ["a", "b", "c", "1"]);
        assert_eq!(all[0].version(), Some(5));
        assert_eq!(
            repo.get_by_index(&people(), 3)
                .expect("get_by_index should succeed")
                .map(|e| e.id().to_string()),
            Some("1".into())
        );
        assert_eq!(repo.count(&people()).expect("count should succeed"), 4);
    }

    #[test]
    fn test_missing_dataset_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = FileEntitiesRepository::at(temp_dir.path().join("datasets"));
        assert!(repo.get_all(&people()).expect("get_all should succeed").is_empty());
        assert!(repo.get_datasets().expect("should list").is_empty());
    }

    #[test]
    fn test_delete_last_entity_removes_dataset() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = FileEntitiesRepository::at(temp_dir.path());
        repo.save(&people(), &[shiv()]).expect("save should succeed");
        assert_eq!(repo.get_datasets().expect("should list"), [people()]);

        assert!(repo.delete(&people(), "1").expect("delete should succeed"));
        assert!(repo.get_datasets().expect("should list").is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = FileEntitiesRepository::at(temp_dir.path().join("datasets"));
        repo.save(&people(), &[shiv()]).expect("save should succeed");
        repo.clear().expect("clear should succeed");
        assert!(repo.get_all(&people()).expect("get_all should succeed").is_empty());
    }

    #[test]
    fn test_schema_mismatch_names_field() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("people.yaml"),
            "entities:\n  - id: \"1\"\n    version: not-a-number\n",
        )
        .expect("write should succeed");

        let err = FileEntitiesRepository::at(temp_dir.path())
            .get_all(&people())
            .expect_err("load should fail");
        match err {
            EntitiesError::DatasetSchema { message, .. } => {
                assert!(message.contains("version"), "unexpected message: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_half_lineage_on_disk_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("people.yaml"),
            "entities:\n  - id: \"1\"\n    version: 2\n    trunk_version: 1\n",
        )
        .expect("write should succeed");

        let err = FileEntitiesRepository::at(temp_dir.path())
            .get_all(&people())
            .expect_err("load should fail");
        assert!(matches!(err, EntitiesError::IncompleteLineage { ref id } if id == "1"));
    }

    #[test]
    fn test_count_and_index_validate_only_the_requested_row() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("people.yaml"),
            "entities:\n  - id: \"1\"\n    version: 1\n  - id: \"2\"\n    version: 2\n    trunk_version: 1\n",
        )
        .expect("write should succeed");

        let repo = FileEntitiesRepository::at(temp_dir.path());
        assert_eq!(repo.count(&people()).expect("count should succeed"), 2);
        assert_eq!(
            repo.get_by_index(&people(), 0)
                .expect("first row is valid")
                .map(|e| e.id().to_string()),
            Some("1".into())
        );
        assert!(repo.get(&people(), "1").expect("get should succeed").is_some());
        assert!(matches!(
            repo.get_by_index(&people(), 1),
            Err(EntitiesError::IncompleteLineage { ref id }) if id == "2"
        ));
        assert_eq!(repo.get_by_index(&people(), 2).expect("past the end is fine"), None);
    }

    #[test]
    fn test_external_rewrite_is_visible() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = FileEntitiesRepository::at(temp_dir.path());
        repo.save(&people(), &[shiv()]).expect("save should succeed");
        assert_eq!(repo.count(&people()).expect("count should succeed"), 1);

        fs::write(
            temp_dir.path().join("people.yaml"),
            "entities:\n  - id: a\n  - id: b\n  - id: c\n",
        )
        .expect("write should succeed");
        assert_eq!(repo.count(&people()).expect("count should succeed"), 3);
        assert_eq!(repo.get(&people(), "1").expect("get should succeed"), None);
    }
}
