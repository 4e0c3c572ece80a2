//! Validated text types shared across the entities workspace.
//!
//! These newtypes guarantee their invariants once constructed, so downstream crates can accept
//! them without re-validating:
//! - [`NonEmptyText`]: trimmed text with at least one non-whitespace character.
//! - [`DatasetName`]: the partition key under which entities are stored, safe to embed in file
//!   names and secondary instance names (`<dataset>.csv`).

use std::fmt;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is not a usable dataset name
    #[error("invalid dataset name '{name}': {reason}")]
    InvalidDatasetName { name: String, reason: &'static str },
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `TextError::Empty` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Name of an entity dataset (for example `people`).
///
/// Dataset names end up in file names (`datasets/people.yaml`) and in secondary instance names
/// (`people.csv`), so they are restricted to a conservative character set:
/// - ASCII letters, digits, `_` and `-` only (in particular no `.` or path separators)
/// - must not start with `__`, which is reserved for system properties
/// - at most [`DatasetName::MAX_LEN`] characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetName(String);

impl DatasetName {
    /// Maximum accepted length of a dataset name.
    pub const MAX_LEN: usize = 100;

    /// Validates and wraps a dataset name.
    ///
    /// Leading and trailing whitespace is trimmed before validation.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] for blank input and [`TextError::InvalidDatasetName`] when
    /// the name breaks one of the rules above.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let name = input.as_ref().trim();
        if name.is_empty() {
            return Err(TextError::Empty);
        }

        let invalid = |reason| TextError::InvalidDatasetName {
            name: name.to_owned(),
            reason,
        };

        if name.len() > Self::MAX_LEN {
            return Err(invalid("exceeds maximum length"));
        }
        if name.starts_with("__") {
            return Err(invalid("names starting with '__' are reserved"));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(invalid(
                "only ASCII letters, digits, '_' and '-' are allowed",
            ));
        }

        Ok(Self(name.to_owned()))
    }

    /// Returns the dataset name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DatasetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for DatasetName {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for DatasetName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DatasetName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DatasetName::new(&s).map_err(serde::de::Error::custom)
    }
}
