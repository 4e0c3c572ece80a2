//! On-disk path definitions for entity data.
//!
//! This module defines relative filesystem paths for stored datasets and cached forms.
//! It contains **no I/O logic** - only typed path construction.
//!
//! ```text
//! <entities_data_dir>/
//!     datasets/
//!         people.yaml
//!         trees.yaml
//!     form_cache/
//!         <sha256-of-form-xml>.formdef.json
//! ```

use crate::constants::{DATASETS_DIR_NAME, DATASET_FILE_EXTENSION, FORM_CACHE_FILE_SUFFIX};
use entities_types::DatasetName;
use std::path::{Path, PathBuf};

/// Directory holding one YAML file per dataset.
#[derive(Debug, Clone, Copy)]
pub struct DatasetsDir;

impl DatasetsDir {
    pub const NAME: &'static str = DATASETS_DIR_NAME;

    /// Resolves the datasets directory under a data directory.
    pub fn under(data_dir: &Path) -> PathBuf {
        data_dir.join(Self::NAME)
    }
}

/// A dataset's YAML file.
#[derive(Debug, Clone, Copy)]
pub struct DatasetFile;

impl DatasetFile {
    pub const EXTENSION: &'static str = DATASET_FILE_EXTENSION;

    /// File name for a dataset (`people.yaml`).
    pub fn file_name(dataset: &DatasetName) -> String {
        format!("{}.{}", dataset.as_str(), Self::EXTENSION)
    }

    /// Recovers the dataset name from a file path, if the path looks like a dataset file.
    pub fn dataset_of(path: &Path) -> Option<DatasetName> {
        if path.extension().and_then(|e| e.to_str()) != Some(Self::EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        DatasetName::new(stem).ok()
    }
}

/// A cached form definition, keyed by the hex SHA-256 of the form XML.
#[derive(Debug, Clone, Copy)]
pub struct FormCacheFile;

impl FormCacheFile {
    pub const SUFFIX: &'static str = FORM_CACHE_FILE_SUFFIX;

    pub fn file_name(hash_hex: &str) -> String {
        format!("{hash_hex}{}", Self::SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_file_name_round_trip() {
        let dataset = DatasetName::new("people").unwrap();
        let name = DatasetFile::file_name(&dataset);
        assert_eq!(name, "people.yaml");
        assert_eq!(DatasetFile::dataset_of(Path::new(&name)), Some(dataset));
    }

    #[test]
    fn test_dataset_of_ignores_other_files() {
        assert_eq!(DatasetFile::dataset_of(Path::new("people.yaml.tmp")), None);
        assert_eq!(DatasetFile::dataset_of(Path::new("notes.txt")), None);
        assert_eq!(DatasetFile::dataset_of(Path::new("bad.name.yaml")), None);
    }
}
