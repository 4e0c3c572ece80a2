//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Core code never reads process-wide environment variables while
//! handling a form; the command line (or any other host) resolves them and builds a
//! [`CoreConfig`].

use crate::constants::{DEFAULT_ENTITIES_DATA_DIR, FORM_CACHE_DIR_NAME};
use crate::paths::DatasetsDir;
use crate::{EntitiesError, EntitiesResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    entities_data_dir: PathBuf,
    form_cache_dir: PathBuf,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`EntitiesError::InvalidInput`] if either directory is empty.
    pub fn new(entities_data_dir: PathBuf, form_cache_dir: PathBuf) -> EntitiesResult<Self> {
        if entities_data_dir.as_os_str().is_empty() {
            return Err(EntitiesError::InvalidInput(
                "entities_data_dir cannot be empty".into(),
            ));
        }
        if form_cache_dir.as_os_str().is_empty() {
            return Err(EntitiesError::InvalidInput(
                "form_cache_dir cannot be empty".into(),
            ));
        }

        Ok(Self {
            entities_data_dir,
            form_cache_dir,
        })
    }

    pub fn entities_data_dir(&self) -> &Path {
        &self.entities_data_dir
    }

    pub fn datasets_dir(&self) -> PathBuf {
        DatasetsDir::under(&self.entities_data_dir)
    }

    pub fn form_cache_dir(&self) -> &Path {
        &self.form_cache_dir
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the entity data directory from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_ENTITIES_DATA_DIR`].
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    non_blank(value)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENTITIES_DATA_DIR))
}

/// Resolve the form cache directory from an optional string value.
///
/// Falls back to `form_cache/` under the data directory.
pub fn form_cache_dir_from_env_value(value: Option<String>, entities_data_dir: &Path) -> PathBuf {
    non_blank(value)
        .map(PathBuf::from)
        .unwrap_or_else(|| entities_data_dir.join(FORM_CACHE_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_directories() {
        let err = CoreConfig::new(PathBuf::new(), PathBuf::from("cache"))
            .expect_err("empty data dir should be rejected");
        assert!(matches!(err, EntitiesError::InvalidInput(_)));

        let err = CoreConfig::new(PathBuf::from("data"), PathBuf::new())
            .expect_err("empty cache dir should be rejected");
        assert!(matches!(err, EntitiesError::InvalidInput(_)));
    }

    #[test]
    fn test_datasets_dir_is_under_data_dir() {
        let cfg = CoreConfig::new(PathBuf::from("/srv/entities"), PathBuf::from("/tmp/cache"))
            .expect("config should be valid");
        assert_eq!(cfg.datasets_dir(), PathBuf::from("/srv/entities/datasets"));
        assert_eq!(cfg.form_cache_dir(), Path::new("/tmp/cache"));
    }

    #[test]
    fn test_env_value_defaults() {
        assert_eq!(data_dir_from_env_value(None), PathBuf::from("entities_data"));
        assert_eq!(
            data_dir_from_env_value(Some("   ".into())),
            PathBuf::from("entities_data")
        );
        assert_eq!(
            data_dir_from_env_value(Some(" /data ".into())),
            PathBuf::from("/data")
        );
        assert_eq!(
            form_cache_dir_from_env_value(None, Path::new("/data")),
            PathBuf::from("/data/form_cache")
        );
        assert_eq!(
            form_cache_dir_from_env_value(Some("/cache".into()), Path::new("/data")),
            PathBuf::from("/cache")
        );
    }
}
