//! Archive record types, one per attribute file.
//!
//! Records are plain data. Optional fields are omitted when empty so that
//! archives written by older exporters (which lack them) still parse.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::{DatasetHash, DatasetSource, DatasetState, InstanceKind, PopulatedState};

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A portable key that older archives write as a bare number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveKey(pub String);

impl ArchiveKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArchiveKey {
    fn from(value: &str) -> Self {
        ArchiveKey(value.to_string())
    }
}

impl From<u32> for ArchiveKey {
    fn from(value: u32) -> Self {
        ArchiveKey(value.to_string())
    }
}

impl Serialize for ArchiveKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ArchiveKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Unexpected};

        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(ArchiveKey(s)),
            Value::Number(n) => match n.as_u64() {
                Some(v) => Ok(ArchiveKey(v.to_string())),
                None => Err(de::Error::invalid_value(
                    Unexpected::Other("non-integer number"),
                    &"a string key or a non-negative integer",
                )),
            },
            Value::Bool(b) => Err(de::Error::invalid_type(
                Unexpected::Bool(b),
                &"a string key or a non-negative integer",
            )),
            Value::Null => Err(de::Error::invalid_type(
                Unexpected::Unit,
                &"a string key or a non-negative integer",
            )),
            _ => Err(de::Error::invalid_type(
                Unexpected::Other("unexpected type"),
                &"a string key or a non-negative integer",
            )),
        }
    }
}

/// Contents of `export_attrs.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportAttrs {
    #[serde(rename = "galaxy_version")]
    pub format_version: u32,
}

/// Contents of `history_attrs.txt`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub name: String,
    #[serde(default)]
    pub hid_counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome_build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

/// Physical dataset nested inside a dataset instance record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSubRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    #[serde(default)]
    pub state: DatasetState,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub purged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from_basename: Option<String>,
    #[serde(default)]
    pub hashes: Vec<DatasetHash>,
    #[serde(default)]
    pub sources: Vec<DatasetSource>,
}

/// A history or library dataset instance, the rows of `datasets_attrs.txt`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(default)]
    pub model_class: Option<String>,
    /// Internal id, present only in archives written for in-place editing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_encoded_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blurb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peek: Option<String>,
    #[serde(default)]
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dataset: DatasetSubRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files_path: Option<String>,
    #[serde(default = "default_true")]
    pub exported: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copied_from_history_dataset_association_id_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copied_from_library_dataset_dataset_association_id_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl DatasetRecord {
    /// Concrete instance subtype; records without a tag predate library exports.
    pub fn instance_kind(&self) -> Result<InstanceKind, String> {
        match &self.model_class {
            None => Ok(InstanceKind::HistoryDatasetAssociation),
            Some(tag) => tag.parse(),
        }
    }

    /// Copy ancestry, immediate source first. The chain is filed under the
    /// kind of the immediate source, so only one of the two is ever set.
    pub fn copied_from_chain(&self) -> &[String] {
        if self
            .copied_from_history_dataset_association_id_chain
            .is_empty()
        {
            &self.copied_from_library_dataset_dataset_association_id_chain
        } else {
            &self.copied_from_history_dataset_association_id_chain
        }
    }
}

/// Reference from a collection element or library folder to a dataset record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    pub element_index: u32,
    pub element_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hda: Option<DatasetReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_collection: Option<CollectionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    pub collection_type: String,
    #[serde(default)]
    pub populated_state: PopulatedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populated_state_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_count: Option<u32>,
    #[serde(default)]
    pub elements: Vec<ElementRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplicitInputRecord {
    pub name: String,
    pub input_dataset_collection: ArchiveKey,
}

/// A collection placed in a history, the rows of `collections_attrs.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInstanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_encoded_id: Option<String>,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implicit_output_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implicit_input_collections: Vec<ImplicitInputRecord>,
    pub collection: CollectionRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copied_from_history_dataset_collection_association_id_chain: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implicit_collection_jobs_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryDatasetRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<u32>,
    pub ldda: DatasetReference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome_build: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default)]
    pub folders: Vec<FolderRecord>,
    #[serde(default)]
    pub datasets: Vec<LibraryDatasetRecord>,
}

/// The rows of `libraries_attrs.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    pub root_folder: FolderRecord,
}

/// The rows of `jobs_attrs.txt`.
///
/// Current archives fill the four `*_mapping` maps, each name mapping to an
/// ordered list of keys. Legacy archives use `input_mapping` (one key per
/// name) and an unnamed `output_datasets` list instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_stderr: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_dataset_mapping: BTreeMap<String, Vec<ArchiveKey>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_dataset_collection_mapping: BTreeMap<String, Vec<ArchiveKey>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_dataset_mapping: BTreeMap<String, Vec<ArchiveKey>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_dataset_collection_mapping: BTreeMap<String, Vec<ArchiveKey>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, ArchiveKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_datasets: Vec<ArchiveKey>,
}

/// The rows of `implicit_collection_jobs_attrs.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplicitCollectionJobsRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<String>,
    #[serde(default)]
    pub populated_state: PopulatedState,
    pub jobs: Vec<ArchiveKey>,
}
