//! Entity repositories.
//!
//! A repository is a partitioned store of [`Entity`] records keyed by `(dataset, id)`. Saving
//! replaces the whole record; there is no merge or patch operation. Lineage fields are
//! persisted faithfully so a sync collaborator can detect conflicts later.
//!
//! Enumeration order within a dataset is stable for the lifetime of the repository: new ids are
//! appended and upserts keep their position. The instance provider relies on this to assign
//! positional multiplicity.

pub mod file;
pub mod memory;

pub use file::FileEntitiesRepository;
pub use memory::InMemoryEntitiesRepository;

use crate::entity::Entity;
use crate::EntitiesResult;
use entities_types::DatasetName;

/// Storage interface for entities.
pub trait EntitiesRepository: Send + Sync {
    /// Upserts entities by id within `dataset`.
    fn save(&self, dataset: &DatasetName, entities: &[Entity]) -> EntitiesResult<()>;

    fn get(&self, dataset: &DatasetName, id: &str) -> EntitiesResult<Option<Entity>>;

    /// All entities of a dataset in stable enumeration order.
    fn get_all(&self, dataset: &DatasetName) -> EntitiesResult<Vec<Entity>>;

    /// Names of every dataset holding at least one entity, sorted.
    fn get_datasets(&self) -> EntitiesResult<Vec<DatasetName>>;

    fn delete(&self, dataset: &DatasetName, id: &str) -> EntitiesResult<bool>;

    /// Removes every dataset.
    fn clear(&self) -> EntitiesResult<()>;

    fn count(&self, dataset: &DatasetName) -> EntitiesResult<usize> {
        Ok(self.get_all(dataset)?.len())
    }

    /// The entity at `index` in [`EntitiesRepository::get_all`] order.
    fn get_by_index(&self, dataset: &DatasetName, index: usize) -> EntitiesResult<Option<Entity>> {
        Ok(self.get_all(dataset)?.into_iter().nth(index))
    }
}

/// Upserts `entity` into `entities`, keeping the position of an existing id.
pub(crate) fn upsert(entities: &mut Vec<Entity>, entity: Entity) {
    match entities.iter_mut().find(|e| e.id() == entity.id()) {
        Some(existing) => *existing = entity,
        None => entities.push(entity),
    }
}
