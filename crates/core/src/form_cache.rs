//! Parsed form definition cache.
//!
//! Parsing a large XForm is comparatively slow, so parsed definitions are stored as JSON under
//! `form_cache_dir/<sha256-hex>.formdef.json`, keyed by the SHA-256 of the form XML. A changed
//! form hashes differently and is simply parsed again.

use crate::config::CoreConfig;
use crate::paths::FormCacheFile;
use crate::{EntitiesError, EntitiesResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xforms::FormDef;

/// Disk cache of parsed [`FormDef`]s.
#[derive(Clone, Debug)]
pub struct FormDefCache {
    cache_dir: PathBuf,
}

impl FormDefCache {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self::at(cfg.form_cache_dir())
    }

    pub fn at(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Hex SHA-256 of a form definition.
    pub fn key_for(xml: &str) -> String {
        hex::encode(Sha256::digest(xml.as_bytes()))
    }

    /// Path of the cache file for a form definition.
    pub fn path_for(&self, xml: &str) -> PathBuf {
        self.cache_dir
            .join(FormCacheFile::file_name(&Self::key_for(xml)))
    }

    /// Returns the cached definition for `xml`, parsing and caching it on a miss.
    ///
    /// A cache file that cannot be read back is logged and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`EntitiesError`] if:
    /// - the form does not parse ([`EntitiesError::XForm`]),
    /// - the cache directory or file cannot be written.
    pub fn get_or_parse(&self, xml: &str) -> EntitiesResult<FormDef> {
        let path = self.path_for(xml);

        if path.is_file() {
            match read_cached(&path) {
                Ok(form) => {
                    tracing::debug!("form cache hit {}", path.display());
                    return Ok(form);
                }
                Err(e) => {
                    tracing::warn!("discarding unreadable form cache {}: {}", path.display(), e);
                }
            }
        }

        let form = FormDef::parse(xml)?;
        fs::create_dir_all(&self.cache_dir).map_err(EntitiesError::StorageDirCreation)?;
        fs::write(&path, form.to_json()?).map_err(EntitiesError::FileWrite)?;
        tracing::debug!("cached parsed form at {}", path.display());
        Ok(form)
    }

    /// Removes every cached form.
    pub fn clear(&self) -> EntitiesResult<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir).map_err(EntitiesError::FileWrite)?;
        }
        Ok(())
    }
}

fn read_cached(path: &Path) -> EntitiesResult<FormDef> {
    let json = fs::read_to_string(path).map_err(EntitiesError::FileRead)?;
    Ok(FormDef::from_json(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FORM: &str = r#"<h:html xmlns="http://www.w3.org/2002/xforms"
        xmlns:h="http://www.w3.org/1999/xhtml"
        xmlns:entities="http://www.opendatakit.org/xforms/entities">
  <h:head>
    <h:title>Trees</h:title>
    <model entities:entities-version="2022.1.0">
      <instance>
        <data id="trees">
          <species/>
          <meta><entity dataset="trees" create="1" id=""><label/></entity></meta>
        </data>
      </instance>
      <bind nodeset="/data/species" type="string" entities:saveto="species"/>
    </model>
  </h:head>
  <h:body/>
</h:html>"#;

    #[test]
    fn test_miss_then_hit() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache = FormDefCache::at(temp_dir.path().join("cache"));

        let parsed = cache.get_or_parse(FORM).expect("parse should succeed");
        assert!(cache.path_for(FORM).is_file());

        let cached = cache.get_or_parse(FORM).expect("cache read should succeed");
        assert_eq!(cached, parsed);
        assert_eq!(cached.entity_extra().save_tos.len(), 1);
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = FormDefCache::key_for("");
        assert_eq!(
            key,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(FormDefCache::key_for(FORM), key);
    }

    #[test]
    fn test_corrupt_cache_file_is_replaced() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache = FormDefCache::at(temp_dir.path());
        fs::write(cache.path_for(FORM), "{not json").expect("write should succeed");

        let form = cache.get_or_parse(FORM).expect("reparse should succeed");
        assert_eq!(form.title(), Some("Trees"));

        let json = fs::read_to_string(cache.path_for(FORM)).expect("cache file should exist");
        assert_eq!(FormDef::from_json(&json).expect("cache should be valid"), form);
    }

    #[test]
    fn test_invalid_form_is_not_cached() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache = FormDefCache::at(temp_dir.path());
        let err = cache.get_or_parse("<not-closed").expect_err("parse should fail");
        assert!(matches!(err, EntitiesError::XForm(_)));
        assert!(!cache.path_for("<not-closed").exists());
    }
}
