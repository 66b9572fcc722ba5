//! Input-side archive variants.
//!
//! The variant is chosen from the files present in the archive directory.
//! Legacy archives predate `export_attrs.txt`: they key every record by its
//! hid and describe job I/O with a flat `input_mapping` plus an unnamed
//! `output_datasets` list. Current archives key records by `encoded_id` and
//! use the four named mapping tables.

use std::path::Path;

use super::attrs::{CollectionInstanceRecord, DatasetRecord, DatasetReference, JobRecord};
use super::{ATTRS_FILENAME_EXPORT, ATTRS_FILENAME_HISTORY};
use crate::errors::{ModelStoreError, ModelStoreResult};

pub const BAGIT_FILENAME: &str = "bagit.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Legacy,
    Current,
}

impl ArchiveFormat {
    pub fn detect(directory: &Path) -> ArchiveFormat {
        if directory.join(ATTRS_FILENAME_EXPORT).is_file() {
            ArchiveFormat::Current
        } else {
            ArchiveFormat::Legacy
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Legacy => "legacy",
            ArchiveFormat::Current => "current",
        }
    }

    pub fn dataset_key(self, record: &DatasetRecord) -> ModelStoreResult<String> {
        let key = match self {
            ArchiveFormat::Legacy => record.hid.map(|hid| hid.to_string()),
            ArchiveFormat::Current => record
                .encoded_id
                .clone()
                .or_else(|| record.id.map(|id| id.to_string())),
        };
        key.ok_or_else(|| {
            ModelStoreError::InvalidRecord(format!(
                "dataset record '{}' carries no {} key",
                record.name,
                self.as_str()
            ))
        })
    }

    pub fn reference_key(self, reference: &DatasetReference) -> Option<String> {
        match self {
            ArchiveFormat::Legacy => reference.hid.map(|hid| hid.to_string()),
            ArchiveFormat::Current => reference
                .encoded_id
                .clone()
                .or_else(|| reference.id.map(|id| id.to_string())),
        }
    }

    pub fn collection_key(self, record: &CollectionInstanceRecord) -> ModelStoreResult<String> {
        let key = match self {
            ArchiveFormat::Legacy => record.hid.map(|hid| hid.to_string()),
            ArchiveFormat::Current => record
                .encoded_id
                .clone()
                .or_else(|| record.id.map(|id| id.to_string())),
        };
        key.ok_or_else(|| {
            ModelStoreError::InvalidRecord(format!(
                "collection record '{}' carries no {} key",
                record.display_name,
                self.as_str()
            ))
        })
    }

    /// Jobs never had hids; both variants key them by their exported id.
    pub fn job_key(self, record: &JobRecord) -> Option<String> {
        record
            .encoded_id
            .clone()
            .or_else(|| record.id.map(|id| id.to_string()))
    }

    /// Whether a record's own hid may be reused in a brand-new history.
    ///
    /// Legacy archives cannot prove where a hid came from, so every hid is
    /// taken as is. Current archives only keep hids of records that came from
    /// the very history being recreated.
    pub fn trust_hid(self, record_history: Option<&str>, archive_history: Option<&str>) -> bool {
        match self {
            ArchiveFormat::Legacy => true,
            ArchiveFormat::Current => match (record_history, archive_history) {
                (Some(record), Some(archive)) => record == archive,
                _ => false,
            },
        }
    }
}

/// Whether the archive describes a history to recreate.
pub fn defines_history(directory: &Path) -> bool {
    directory.join(ATTRS_FILENAME_HISTORY).is_file()
}

pub fn is_bag(directory: &Path) -> bool {
    directory.join(BAGIT_FILENAME).is_file()
}
