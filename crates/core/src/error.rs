#[derive(Debug, thiserror::Error)]
pub enum EntitiesError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid text: {0}")]
    Text(#[from] entities_types::TextError),

    #[error("form error: {0}")]
    XForm(#[from] xforms::XFormError),

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write dataset file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read dataset file: {0}")]
    FileRead(std::io::Error),

    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error(
        "dataset file {path} does not match the expected schema: {message}",
        path = path.display()
    )]
    DatasetSchema {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("entity '{id}' has an incomplete lineage: trunk version and branch id must both be set or both be absent")]
    IncompleteLineage { id: String },
    #[error("entity '{id}' declares property '{property}' more than once")]
    DuplicateProperty { id: String, property: String },
}

pub type EntitiesResult<T> = std::result::Result<T, EntitiesError>;
