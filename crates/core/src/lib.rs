//! # Entities Core
//!
//! Core logic of the entity subsystem of the data-collection client.
//!
//! This crate contains pure data operations and file/folder management:
//! - entity and form-entity value types with their invariants
//! - finalization: turning an answered form instance into an entity mutation
//! - local repositories (in-memory and YAML files under `ENTITIES_DATA_DIR`)
//! - secondary instances that expose stored entities back to forms (full and partial)
//! - applying form mutations to the local store, with trunk/branch lineage
//! - a disk cache of parsed form definitions
//!
//! **No form-format concerns**: XML parsing, the entities namespace and expression evaluation
//! belong in `xforms`. **No process concerns**: environment variables and logging setup belong in
//! the command line crate.

pub mod config;
pub mod constants;
pub mod entity;
pub mod error;
pub mod finalize;
pub mod form_cache;
pub mod instance_provider;
pub mod local_entities;
pub mod paths;
pub mod repositories;

pub use config::CoreConfig;
pub use entity::{EntitiesExtra, Entity, EntityAction, EntityProperty, FormEntity, Lineage};
pub use error::{EntitiesError, EntitiesResult};
pub use finalize::EntityFinalizer;
pub use form_cache::FormDefCache;
pub use instance_provider::{EntityInstanceProvider, EntityRow, SecondaryInstance};
pub use local_entities::{apply_form_entities, ApplySummary};
pub use repositories::{EntitiesRepository, FileEntitiesRepository, InMemoryEntitiesRepository};
