//! Model archive import and export.
//!
//! An archive is a directory of JSON attribute files, one per entity category,
//! plus a `datasets/` directory with payload bytes. [`export::ModelExportStore`]
//! writes it from a live [`crate::model::ModelGraph`], and
//! [`import::ModelImportStore`] rebuilds an equivalent graph from it.
//! [`container`] wraps and unwraps the directory as tar files or bags.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod attrs;
pub mod container;
pub mod export;
pub mod format;
pub mod import;
pub mod serialize;
pub mod tracker;

pub use attrs::*;
pub use container::{open_archive, unpack_to, ExportContainer, ExportTarget, UnpackedArchive};
pub use export::{ExportSummary, ModelExportStore};
pub use format::ArchiveFormat;
pub use import::{ImportOptions, ImportSummary, ModelImportStore};
pub use tracker::{lookup_with_sink, resolve_copied_from, CopiedFrom, ObjectImportTracker, RequiresHid};

pub const ATTRS_FILENAME_EXPORT: &str = "export_attrs.txt";
pub const ATTRS_FILENAME_HISTORY: &str = "history_attrs.txt";
pub const ATTRS_FILENAME_DATASETS: &str = "datasets_attrs.txt";
pub const ATTRS_FILENAME_COLLECTIONS: &str = "collections_attrs.txt";
pub const ATTRS_FILENAME_LIBRARIES: &str = "libraries_attrs.txt";
pub const ATTRS_FILENAME_JOBS: &str = "jobs_attrs.txt";
pub const ATTRS_FILENAME_IMPLICIT_COLLECTION_JOBS: &str = "implicit_collection_jobs_attrs.txt";
pub const PROVENANCE_SUFFIX: &str = ".provenance";
pub const DATASETS_DIR: &str = "datasets";

/// Major version written to `export_attrs.txt`.
pub const ARCHIVE_FORMAT_VERSION: u32 = 23;

/// Marker replacing metadata file references when they are stripped.
pub const STRIPPED_METADATA_FILE: &str = "__stripped_metadata_file__";

/// Timestamp layout used in every record.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Reversible codec between internal ids and opaque public keys.
pub trait IdEncoder: Send + Sync {
    fn encode_id(&self, id: u64) -> String;
    fn decode_id(&self, key: &str) -> Option<u64>;
}

/// Fixed-width hex keys obtained by scrambling the id with a secret.
#[derive(Debug, Clone)]
pub struct KeyedIdEncoder {
    secret: u64,
}

impl KeyedIdEncoder {
    pub fn new(secret: u64) -> Self {
        Self { secret }
    }
}

impl IdEncoder for KeyedIdEncoder {
    fn encode_id(&self, id: u64) -> String {
        format!("{:016x}", id.rotate_left(23) ^ self.secret)
    }

    fn decode_id(&self, key: &str) -> Option<u64> {
        if key.len() != 16 {
            return None;
        }
        u64::from_str_radix(key, 16)
            .ok()
            .map(|value| (value ^ self.secret).rotate_right(23))
    }
}

/// How portable keys are computed for exported objects.
#[derive(Clone, Default)]
pub enum IdentifierPolicy {
    /// The internal id, as a decimal string.
    #[default]
    RawId,
    /// An opaque key produced by an [`IdEncoder`].
    Encoded(Arc<dyn IdEncoder>),
}

impl IdentifierPolicy {
    pub fn encoded(encoder: impl IdEncoder + 'static) -> Self {
        IdentifierPolicy::Encoded(Arc::new(encoder))
    }

    pub fn key_for(&self, id: u64) -> String {
        match self {
            IdentifierPolicy::RawId => id.to_string(),
            IdentifierPolicy::Encoded(encoder) => encoder.encode_id(id),
        }
    }
}

impl fmt::Debug for IdentifierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierPolicy::RawId => f.write_str("RawId"),
            IdentifierPolicy::Encoded(_) => f.write_str("Encoded(..)"),
        }
    }
}

/// Knobs controlling how live entities become records.
#[derive(Debug, Clone)]
pub struct SerializationOptions {
    /// Keep internal ids in records so a collaborator can edit rows in place.
    pub for_edit: bool,
    /// Copy payload bytes into the archive.
    pub serialize_dataset_objects: bool,
    /// Replace metadata file references with [`STRIPPED_METADATA_FILE`].
    pub strip_metadata_files: bool,
    pub identifier_policy: IdentifierPolicy,
}

impl Default for SerializationOptions {
    fn default() -> Self {
        Self {
            for_edit: false,
            serialize_dataset_objects: true,
            strip_metadata_files: true,
            identifier_policy: IdentifierPolicy::RawId,
        }
    }
}

impl SerializationOptions {
    pub fn get_identifier(&self, id: u64) -> String {
        if self.for_edit {
            id.to_string()
        } else {
            self.identifier_policy.key_for(id)
        }
    }
}

/// How payload files reach the archive directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFiles {
    #[default]
    Copy,
    Symlink,
}

/// What to do with dataset records that have no usable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportDiscardedDataType {
    /// Fail when a record in an OK state carries no payload.
    Forbid,
    /// Mark payload-less records discarded.
    #[default]
    Allow,
    /// Discard every payload, present or not.
    Force,
}
