use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{DatasetId, HistoryId, InstanceId, JobId, LibraryDatasetId};

/// Physical state of a dataset's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatasetState {
    New,
    Upload,
    Queued,
    Running,
    #[default]
    Ok,
    Empty,
    Error,
    Paused,
    SettingMetadata,
    FailedMetadata,
    Deferred,
    Discarded,
}

impl DatasetState {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetState::New => "new",
            DatasetState::Upload => "upload",
            DatasetState::Queued => "queued",
            DatasetState::Running => "running",
            DatasetState::Ok => "ok",
            DatasetState::Empty => "empty",
            DatasetState::Error => "error",
            DatasetState::Paused => "paused",
            DatasetState::SettingMetadata => "setting_metadata",
            DatasetState::FailedMetadata => "failed_metadata",
            DatasetState::Deferred => "deferred",
            DatasetState::Discarded => "discarded",
        }
    }
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHash {
    pub hash_function: String,
    pub hash_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files_path: Option<String>,
}

/// Where a dataset's bytes originally came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSource {
    pub source_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Value>,
    #[serde(default)]
    pub hashes: Vec<DatasetHash>,
}

/// The physical dataset shared by every instance that points at it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub id: DatasetId,
    pub state: DatasetState,
    pub deleted: bool,
    pub purged: bool,
    pub file_size: Option<u64>,
    pub total_size: Option<u64>,
    pub object_store_id: Option<String>,
    pub uuid: Uuid,
    pub created_from_basename: Option<String>,
    pub hashes: Vec<DatasetHash>,
    pub sources: Vec<DatasetSource>,
}

impl Dataset {
    pub fn new(state: DatasetState) -> Self {
        Self {
            id: DatasetId::default(),
            state,
            deleted: false,
            purged: false,
            file_size: None,
            total_size: None,
            object_store_id: None,
            uuid: Uuid::new_v4(),
            created_from_basename: None,
            hashes: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Mark the payload as gone; the metadata row stays for provenance.
    pub fn discard(&mut self) {
        self.state = DatasetState::Discarded;
        self.deleted = true;
        self.purged = true;
    }
}

/// Concrete dataset instance subtype, the `model_class` tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstanceKind {
    #[default]
    HistoryDatasetAssociation,
    LibraryDatasetDatasetAssociation,
}

impl InstanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceKind::HistoryDatasetAssociation => "HistoryDatasetAssociation",
            InstanceKind::LibraryDatasetDatasetAssociation => "LibraryDatasetDatasetAssociation",
        }
    }
}

impl FromStr for InstanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HistoryDatasetAssociation" => Ok(InstanceKind::HistoryDatasetAssociation),
            "LibraryDatasetDatasetAssociation" => Ok(InstanceKind::LibraryDatasetDatasetAssociation),
            other => Err(format!("unknown dataset instance model class '{}'", other)),
        }
    }
}

/// A named view of a physical dataset inside a history or a library.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInstance {
    pub id: InstanceId,
    pub kind: InstanceKind,
    pub dataset: DatasetId,
    pub history: Option<HistoryId>,
    pub hid: Option<u32>,
    pub name: String,
    pub info: Option<String>,
    pub blurb: Option<String>,
    pub peek: Option<String>,
    pub extension: String,
    pub designation: Option<String>,
    pub metadata: Map<String, Value>,
    pub visible: bool,
    pub deleted: bool,
    pub tags: Vec<String>,
    pub copied_from: Option<InstanceId>,
    pub creating_job: Option<JobId>,
    pub library_dataset: Option<LibraryDatasetId>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl DatasetInstance {
    pub fn new(kind: InstanceKind, name: impl Into<String>, dataset: DatasetId) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: InstanceId::default(),
            kind,
            dataset,
            history: None,
            hid: None,
            name: name.into(),
            info: None,
            blurb: None,
            peek: None,
            extension: "data".to_string(),
            designation: None,
            metadata: Map::new(),
            visible: true,
            deleted: false,
            tags: Vec::new(),
            copied_from: None,
            creating_job: None,
            library_dataset: None,
            create_time: now,
            update_time: now,
        }
    }

    pub fn new_hda(name: impl Into<String>, dataset: DatasetId) -> Self {
        Self::new(InstanceKind::HistoryDatasetAssociation, name, dataset)
    }

    pub fn new_ldda(name: impl Into<String>, dataset: DatasetId) -> Self {
        Self::new(InstanceKind::LibraryDatasetDatasetAssociation, name, dataset)
    }

    /// A history copy of `source`, sharing its physical dataset.
    pub fn copied_from(source: &DatasetInstance, source_id: InstanceId) -> Self {
        Self {
            id: InstanceId::default(),
            kind: InstanceKind::HistoryDatasetAssociation,
            history: None,
            hid: None,
            copied_from: Some(source_id),
            creating_job: None,
            library_dataset: None,
            ..source.clone()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}
