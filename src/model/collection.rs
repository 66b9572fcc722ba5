use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    CollectionId, CollectionInstanceId, ElementId, HistoryId, ImplicitCollectionJobsId,
    InstanceId, JobId,
};

const COLLECTION_TYPE_SEGMENTS: &[&str] = &["list", "paired", "record", "paired_or_unpaired"];

/// Whether a collection (or grouping of jobs) has received all of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PopulatedState {
    New,
    #[default]
    Ok,
    Failed,
}

/// Check a flat (`list`) or composite (`list:paired`) collection type.
pub fn is_valid_collection_type(collection_type: &str) -> bool {
    !collection_type.is_empty()
        && collection_type
            .split(':')
            .all(|segment| COLLECTION_TYPE_SEGMENTS.contains(&segment))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetCollection {
    pub id: CollectionId,
    pub collection_type: String,
    pub populated_state: PopulatedState,
    pub populated_state_message: Option<String>,
    pub element_count: Option<u32>,
    pub elements: Vec<ElementId>,
}

impl DatasetCollection {
    pub fn new(collection_type: impl Into<String>) -> Self {
        Self {
            id: CollectionId::default(),
            collection_type: collection_type.into(),
            populated_state: PopulatedState::Ok,
            populated_state_message: None,
            element_count: Some(0),
            elements: Vec::new(),
        }
    }

    pub fn populated(&self) -> bool {
        self.populated_state == PopulatedState::Ok
    }
}

/// What an element wraps: a dataset instance or a nested collection, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementObject {
    Dataset(InstanceId),
    Collection(CollectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionElement {
    pub id: ElementId,
    pub collection: CollectionId,
    pub element_index: u32,
    pub element_identifier: String,
    pub object: ElementObject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitInput {
    pub name: String,
    pub input: CollectionInstanceId,
}

/// A collection placed in a history.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInstance {
    pub id: CollectionInstanceId,
    pub history: Option<HistoryId>,
    pub hid: Option<u32>,
    pub name: String,
    pub collection: CollectionId,
    pub visible: bool,
    pub deleted: bool,
    pub implicit_output_name: Option<String>,
    pub implicit_input_collections: Vec<ImplicitInput>,
    pub copied_from: Option<CollectionInstanceId>,
    pub job: Option<JobId>,
    pub implicit_collection_jobs: Option<ImplicitCollectionJobsId>,
    pub tags: Vec<String>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl CollectionInstance {
    pub fn new(name: impl Into<String>, collection: CollectionId) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: CollectionInstanceId::default(),
            history: None,
            hid: None,
            name: name.into(),
            collection,
            visible: true,
            deleted: false,
            implicit_output_name: None,
            implicit_input_collections: Vec::new(),
            copied_from: None,
            job: None,
            implicit_collection_jobs: None,
            tags: Vec::new(),
            create_time: now,
            update_time: now,
        }
    }
}
