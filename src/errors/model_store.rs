//! Model store error types
//!
//! Covers archive integrity problems, missing collaborators, unresolved
//! tracker lookups and schema violations found while reading records.

use std::fmt;

use thiserror::Error;

/// Category of portable key that failed to resolve during import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Dataset,
    LibraryDataset,
    CollectionInstance,
    CollectionElement,
    Job,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            KeyKind::Dataset => "dataset",
            KeyKind::LibraryDataset => "library dataset",
            KeyKind::CollectionInstance => "collection instance",
            KeyKind::CollectionElement => "collection element",
            KeyKind::Job => "job",
        };
        f.write_str(label)
    }
}

/// Import and export errors for model archives
#[derive(Error, Debug)]
pub enum ModelStoreError {
    /// Archive path is absolute, escapes the archive root or is a symlink
    #[error("Malformed archive contents: {0}")]
    MalformedContents(String),

    /// A referenced row or blob does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// A portable key was never recorded by the import tracker
    #[error("No {kind} found for key '{key}'")]
    MissingKey { kind: KeyKind, key: String },

    /// Record violates the archive schema
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Import options forbid the requested action
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Configuration could not be loaded
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Container packing or unpacking failed
    #[error("Container error: {0}")]
    Container(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelStoreError {
    pub fn missing_key(kind: KeyKind, key: impl Into<String>) -> Self {
        ModelStoreError::MissingKey {
            kind,
            key: key.into(),
        }
    }

    /// Check if the error was caused by the archive or the request rather than the host
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ModelStoreError::MalformedContents(_)
                | ModelStoreError::MissingKey { .. }
                | ModelStoreError::InvalidRecord(_)
                | ModelStoreError::NotAllowed(_)
                | ModelStoreError::Config(_)
                | ModelStoreError::Serialization(_)
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModelStoreError::ObjectNotFound(_) | ModelStoreError::MissingKey { .. }
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            ModelStoreError::MalformedContents(_) => "MALFORMED_CONTENTS",
            ModelStoreError::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            ModelStoreError::MissingKey { .. } => "MISSING_KEY",
            ModelStoreError::InvalidRecord(_) => "INVALID_RECORD",
            ModelStoreError::NotAllowed(_) => "NOT_ALLOWED",
            ModelStoreError::Config(_) => "INVALID_CONFIGURATION",
            ModelStoreError::Container(_) => "CONTAINER_ERROR",
            ModelStoreError::Serialization(_) => "SERIALIZATION_ERROR",
            ModelStoreError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<toml::de::Error> for ModelStoreError {
    fn from(err: toml::de::Error) -> Self {
        ModelStoreError::Config(err.to_string())
    }
}

impl From<zip::result::ZipError> for ModelStoreError {
    fn from(err: zip::result::ZipError) -> Self {
        ModelStoreError::Container(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_contents() {
        let err = ModelStoreError::MalformedContents("datasets/../../x".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed archive contents: datasets/../../x"
        );
        assert!(err.is_client_error());
        assert_eq!(err.error_code(), "MALFORMED_CONTENTS");
    }

    #[test]
    fn test_missing_key() {
        let err = ModelStoreError::missing_key(KeyKind::Job, "f2db41e1fa331b3e");
        assert_eq!(err.to_string(), "No job found for key 'f2db41e1fa331b3e'");
        assert!(err.is_not_found());
        assert_eq!(err.error_code(), "MISSING_KEY");
    }

    #[test]
    fn test_io_error_is_not_client_error() {
        let err = ModelStoreError::from(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ));
        assert!(!err.is_client_error());
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_serialization_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = ModelStoreError::from(json_err);
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
