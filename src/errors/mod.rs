//! Error types for the model store
//!
//! Every failure raised by the export and import stores is a [`ModelStoreError`].
//! The import side never logs-and-continues on integrity errors: they propagate to
//! the caller, which owns the surrounding transaction boundary.
//!
//! # Examples
//!
//! ```rust
//! use modelstore::errors::ModelStoreError;
//!
//! let err = ModelStoreError::MalformedContents("../etc/passwd".to_string());
//! assert_eq!(err.error_code(), "MALFORMED_CONTENTS");
//! assert!(err.is_client_error());
//! ```

pub mod model_store;

pub use model_store::{KeyKind, ModelStoreError};

/// Result type alias for model store operations
pub type ModelStoreResult<T> = Result<T, ModelStoreError>;
