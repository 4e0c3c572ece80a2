//! In-memory entity repository.

use super::{upsert, EntitiesRepository};
use crate::entity::Entity;
use crate::{EntitiesError, EntitiesResult};
use entities_types::DatasetName;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Datasets = BTreeMap<DatasetName, Vec<Entity>>;

/// Repository that keeps every dataset in memory. Used by tests and short-lived tools.
#[derive(Debug, Default)]
pub struct InMemoryEntitiesRepository {
    datasets: RwLock<Datasets>,
}

impl InMemoryEntitiesRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EntitiesResult<RwLockReadGuard<'_, Datasets>> {
        self.datasets
            .read()
            .map_err(|_| EntitiesError::InvalidInput("entity store lock poisoned".into()))
    }

    fn write(&self) -> EntitiesResult<RwLockWriteGuard<'_, Datasets>> {
        self.datasets
            .write()
            .map_err(|_| EntitiesError::InvalidInput("entity store lock poisoned".into()))
    }
}

impl EntitiesRepository for InMemoryEntitiesRepository {
    fn save(&self, dataset: &DatasetName, entities: &[Entity]) -> EntitiesResult<()> {
        let mut datasets = self.write()?;
        let stored = datasets.entry(dataset.clone()).or_default();
        for entity in entities {
            upsert(stored, entity.clone());
        }
        Ok(())
    }

    fn get(&self, dataset: &DatasetName, id: &str) -> EntitiesResult<Option<Entity>> {
        Ok(self
            .read()?
            .get(dataset)
            .and_then(|entities| entities.iter().find(|e| e.id() == id))
            .cloned())
    }

    fn get_all(&self, dataset: &DatasetName) -> EntitiesResult<Vec<Entity>> {
        Ok(self.read()?.get(dataset).cloned().unwrap_or_default())
    }

    fn get_datasets(&self) -> EntitiesResult<Vec<DatasetName>> {
        Ok(self
            .read()?
            .iter()
            .filter(|(_, entities)| !entities.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn delete(&self, dataset: &DatasetName, id: &str) -> EntitiesResult<bool> {
        let mut datasets = self.write()?;
        let Some(entities) = datasets.get_mut(dataset) else {
            return Ok(false);
        };
        let before = entities.len();
        entities.retain(|e| e.id() != id);
        Ok(entities.len() != before)
    }

    fn clear(&self) -> EntitiesResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn count(&self, dataset: &DatasetName) -> EntitiesResult<usize> {
        Ok(self.read()?.get(dataset).map_or(0, Vec::len))
    }

    fn get_by_index(&self, dataset: &DatasetName, index: usize) -> EntitiesResult<Option<Entity>> {
        Ok(self
            .read()?
            .get(dataset)
            .and_then(|entities| entities.get(index))
            .cloned())
    }
}
