//! Constants used throughout the entities core crate.
//!
//! This module contains all path, filename and element-name constants to ensure
//! consistency across the codebase.

/// Default directory for entity data when no explicit directory is configured.
pub const DEFAULT_ENTITIES_DATA_DIR: &str = "entities_data";

/// Directory name (under the data directory) holding one file per dataset.
pub const DATASETS_DIR_NAME: &str = "datasets";

/// Directory name (under the data directory) holding cached form definitions.
pub const FORM_CACHE_DIR_NAME: &str = "form_cache";

/// Extension of dataset files.
pub const DATASET_FILE_EXTENSION: &str = "yaml";

/// Suffix of cached form definition files.
pub const FORM_CACHE_FILE_SUFFIX: &str = ".formdef.json";

/// Suffix appended to a dataset name to form its secondary instance name.
pub const ENTITY_INSTANCE_SUFFIX: &str = ".csv";

/// URI scheme prefix forms use to reference CSV-style secondary instances.
pub const ENTITY_INSTANCE_SRC_PREFIX: &str = "jr://file-csv/";

/// Root element of an entity secondary instance.
pub const INSTANCE_ROOT_ELEMENT: &str = "root";

/// Row element of an entity secondary instance.
pub const INSTANCE_ITEM_ELEMENT: &str = "item";

/// Element carrying the entity id.
pub const ID_ELEMENT: &str = "name";

/// Element carrying the entity label.
pub const LABEL_ELEMENT: &str = "label";

/// Element carrying the entity version.
pub const VERSION_ELEMENT: &str = "__version";

/// Element carrying the trunk version the entity branched from.
pub const TRUNK_VERSION_ELEMENT: &str = "__trunkVersion";

/// Element carrying the branch id of the entity's lineage.
pub const BRANCH_ID_ELEMENT: &str = "__branchId";
