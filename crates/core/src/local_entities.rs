//! Applying finalized form entities to the local store.
//!
//! This is the save step that follows [`crate::finalize::EntityFinalizer`]:
//! - `Create` with an id stores a new trunk entity at version 1; without an id, or for an id
//!   that is already stored, it is skipped
//! - `Update` requires an existing entity, overlays the submitted properties, bumps the version
//!   and moves a trunk entity onto a fresh branch
//!
//! Lineage is recorded here but never resolved; conflict handling belongs to sync.

use crate::entity::{EntitiesExtra, Entity, EntityAction, EntityProperty, FormEntity, Lineage};
use crate::repositories::EntitiesRepository;
use crate::{EntitiesError, EntitiesResult};
use serde::Serialize;

/// Version assigned to a newly created entity.
const INITIAL_VERSION: u64 = 1;

/// Outcome counts of [`apply_form_entities`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Writes the mutations of a finalized form into `repository`.
///
/// # Errors
///
/// Returns [`crate::EntitiesError`] if the repository cannot be read or written, or if an
/// updated entity is already at the maximum version.
pub fn apply_form_entities(
    extra: &EntitiesExtra,
    repository: &dyn EntitiesRepository,
) -> EntitiesResult<ApplySummary> {
    let mut summary = ApplySummary::default();

    for form_entity in &extra.entities {
        let applied = match form_entity.action {
            EntityAction::Create => create(form_entity, repository)?,
            EntityAction::Update => update(form_entity, repository)?,
        };

        match (applied, form_entity.action) {
            (false, _) => summary.skipped += 1,
            (true, EntityAction::Create) => summary.created += 1,
            (true, EntityAction::Update) => summary.updated += 1,
        }
    }

    tracing::info!(
        "applied form entities: {} created, {} updated, {} skipped",
        summary.created,
        summary.updated,
        summary.skipped
    );
    Ok(summary)
}

fn create(form_entity: &FormEntity, repository: &dyn EntitiesRepository) -> EntitiesResult<bool> {
    let Some(id) = form_entity.id.as_deref() else {
        tracing::info!(
            "skipping create in dataset {}: no id, server assigns identity",
            form_entity.dataset
        );
        return Ok(false);
    };

    if repository.get(&form_entity.dataset, id)?.is_some() {
        tracing::warn!(
            "skipping create of existing entity {} in dataset {}",
            id,
            form_entity.dataset
        );
        return Ok(false);
    }

    let entity = Entity::new(
        id,
        form_entity.label.clone(),
        dedup_properties(&form_entity.properties),
    )?
    .with_version(Some(INITIAL_VERSION));

    repository.save(&form_entity.dataset, &[entity])?;
    Ok(true)
}

fn update(form_entity: &FormEntity, repository: &dyn EntitiesRepository) -> EntitiesResult<bool> {
    let Some(id) = form_entity.id.as_deref() else {
        tracing::warn!("skipping update in dataset {}: no id", form_entity.dataset);
        return Ok(false);
    };
    let Some(existing) = repository.get(&form_entity.dataset, id)? else {
        tracing::warn!(
            "skipping update of unknown entity {} in dataset {}",
            id,
            form_entity.dataset
        );
        return Ok(false);
    };

    if let Some(base_version) = form_entity.base_version {
        if existing.version() != Some(base_version) {
            tracing::warn!(
                "entity {} in dataset {} was edited from version {} but is at {:?}",
                id,
                form_entity.dataset,
                base_version,
                existing.version()
            );
        }
    }

    let mut properties = existing.properties().to_vec();
    for submitted in dedup_properties(&form_entity.properties) {
        match properties.iter_mut().find(|p| p.name == submitted.name) {
            Some(current) => current.value = submitted.value,
            None => properties.push(submitted),
        }
    }

    let label = form_entity
        .label
        .clone()
        .or_else(|| existing.label().map(str::to_string));
    let current_version = existing.version().unwrap_or(0);
    let next_version = current_version.checked_add(1).ok_or_else(|| {
        EntitiesError::InvalidInput(format!(
            "entity {id} in dataset {} is at the maximum version",
            form_entity.dataset
        ))
    })?;

    let lineage = match existing.lineage() {
        Some(lineage) => lineage.clone(),
        None => Lineage {
            trunk_version: current_version,
            branch_id: uuid::Uuid::new_v4().to_string(),
        },
    };

    let entity = Entity::new(id, label, properties)?
        .with_version(Some(next_version))
        .with_lineage(Some(lineage))?;

    repository.save(&form_entity.dataset, &[entity])?;
    Ok(true)
}

/// Collapses repeated property names, keeping the first position and the last value.
fn dedup_properties(properties: &[EntityProperty]) -> Vec<EntityProperty> {
    let mut result: Vec<EntityProperty> = Vec::with_capacity(properties.len());
    for property in properties {
        match result.iter_mut().find(|p| p.name == property.name) {
            // Several questions saving to one property: the later declaration wins.
            Some(existing) => {
                tracing::warn!(
                    "property {} is saved by more than one question; keeping the later value",
                    property.name
                );
                existing.value = property.value.clone();
            }
            None => result.push(property.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryEntitiesRepository;
    use entities_types::DatasetName;

    fn people() -> DatasetName {
        DatasetName::new("people").expect("valid dataset")
    }

    fn form_entity(
        action: EntityAction,
        id: Option<&str>,
        label: Option<&str>,
        properties: &[(&str, &str)],
    ) -> FormEntity {
        FormEntity {
            dataset: people(),
            id: id.map(str::to_string),
            label: label.map(str::to_string),
            properties: properties
                .iter()
                .map(|(name, value)| EntityProperty::new(*name, *value))
                .collect(),
            action,
            base_version: None,
        }
    }

    fn apply(repo: &InMemoryEntitiesRepository, entities: Vec<FormEntity>) -> ApplySummary {
        apply_form_entities(&EntitiesExtra { entities }, repo).expect("apply should succeed")
    }

    #[test]
    fn test_create_stores_version_one_on_trunk() {
        let repo = InMemoryEntitiesRepository::new();
        let summary = apply(
            &repo,
            vec![form_entity(
                EntityAction::Create,
                Some("1"),
                Some("Shiv Roy"),
                &[("age", "35")],
            )],
        );
        assert_eq!(summary.created, 1);

        let stored = repo
            .get(&people(), "1")
            .expect("get should succeed")
            .expect("entity should exist");
        assert_eq!(stored.version(), Some(1));
        assert!(stored.is_trunk());
        assert_eq!(stored.label(), Some("Shiv Roy"));
    }

    #[test]
    fn test_create_without_id_is_skipped() {
        let repo = InMemoryEntitiesRepository::new();
        let summary = apply(&repo, vec![form_entity(EntityAction::Create, None, None, &[])]);
        assert_eq!(summary, ApplySummary { created: 0, updated: 0, skipped: 1 });
        assert!(repo.get_datasets().expect("should list").is_empty());
    }

    #[test]
    fn test_update_overlays_and_branches_trunk_entity() {
        let repo = InMemoryEntitiesRepository::new();
        apply(
            &repo,
            vec![form_entity(
                EntityAction::Create,
                Some("1"),
                Some("Shiv Roy"),
                &[("age", "35"), ("born", "England")],
            )],
        );

        let summary = apply(
            &repo,
            vec![form_entity(
                EntityAction::Update,
                Some("1"),
                None,
                &[("age", "36"), ("city", "New York")],
            )],
        );
        assert_eq!(summary.updated, 1);

        let stored = repo
            .get(&people(), "1")
            .expect("get should succeed")
            .expect("entity should exist");
        let names: Vec<&str> = stored.properties().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["age", "born", "city"]);
        assert_eq!(stored.property("age"), Some("36"));
        assert_eq!(stored.label(), Some("Shiv Roy"));
        assert_eq!(stored.version(), Some(2));
        assert_eq!(stored.trunk_version(), Some(1));
        assert!(stored.branch_id().is_some_and(|b| !b.is_empty()));
    }

    #[test]
    fn test_update_on_branch_keeps_lineage() {
        let repo = InMemoryEntitiesRepository::new();
        let branched = Entity::new("1", None, Vec::new())
            .expect("valid entity")
            .with_version(Some(4))
            .with_lineage(Some(Lineage {
                trunk_version: 3,
                branch_id: "offline-a".into(),
            }))
            .expect("valid lineage");
        repo.save(&people(), &[branched]).expect("save should succeed");

        let mut update = form_entity(EntityAction::Update, Some("1"), Some("Renamed"), &[]);
        update.base_version = Some(2);
        apply(&repo, vec![update]);

        let stored = repo
            .get(&people(), "1")
            .expect("get should succeed")
            .expect("entity should exist");
        assert_eq!(stored.version(), Some(5));
        assert_eq!(stored.trunk_version(), Some(3));
        assert_eq!(stored.branch_id(), Some("offline-a"));
        assert_eq!(stored.label(), Some("Renamed"));
    }

    #[test]
    fn test_update_of_unknown_entity_is_skipped() {
        let repo = InMemoryEntitiesRepository::new();
        let summary = apply(
            &repo,
            vec![form_entity(EntityAction::Update, Some("missing"), None, &[("a", "b")])],
        );
        assert_eq!(summary.skipped, 1);
        assert_eq!(repo.get(&people(), "missing").expect("get should succeed"), None);
    }

    #[test]
    fn test_create_of_existing_entity_is_skipped() {
        let repo = InMemoryEntitiesRepository::new();
        let branched = Entity::new(
            "1",
            Some("Shiv Roy".into()),
            vec![EntityProperty::new("age", "35")],
        )
        .expect("valid entity")
        .with_version(Some(5))
        .with_lineage(Some(Lineage {
            trunk_version: 4,
            branch_id: "b".into(),
        }))
        .expect("valid lineage");
        repo.save(&people(), &[branched.clone()]).expect("save should succeed");

        let summary = apply(&repo, vec![form_entity(EntityAction::Create, Some("1"), None, &[])]);
        assert_eq!(summary, ApplySummary { created: 0, updated: 0, skipped: 1 });

        let stored = repo
            .get(&people(), "1")
            .expect("get should succeed")
            .expect("entity should exist");
        assert_eq!(stored, branched);
    }

    #[test]
    fn test_update_at_maximum_version_fails() {
        let repo = InMemoryEntitiesRepository::new();
        let maxed = Entity::new("1", None, Vec::new())
            .expect("valid entity")
            .with_version(Some(u64::MAX));
        repo.save(&people(), &[maxed]).expect("save should succeed");

        let err = apply_form_entities(
            &EntitiesExtra {
                entities: vec![form_entity(EntityAction::Update, Some("1"), None, &[("a", "b")])],
            },
            &repo,
        )
        .expect_err("version overflow should fail");
        assert!(matches!(err, EntitiesError::InvalidInput(_)));
        assert_eq!(
            repo.get(&people(), "1")
                .expect("get should succeed")
                .and_then(|e| e.version()),
            Some(u64::MAX)
        );
    }

    #[test]
    fn test_duplicate_saveto_properties_keep_later_value() {
        let repo = InMemoryEntitiesRepository::new();
        apply(
            &repo,
            vec![form_entity(
                EntityAction::Create,
                Some("1"),
                None,
                &[("age", "35"), ("born", "England"), ("age", "36")],
            )],
        );
        let stored = repo
            .get(&people(), "1")
            .expect("get should succeed")
            .expect("entity should exist");
        assert_eq!(stored.properties().len(), 2);
        assert_eq!(stored.property("age"), Some("36"));
    }
}
