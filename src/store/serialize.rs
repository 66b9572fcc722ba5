//! Live entity to archive record conversion.
//!
//! Each entity type owns its field list through [`SerializeModel`]. The only
//! side effect is payload handling, delegated to a [`SerializeFilesHandler`].

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use super::attrs::*;
use super::{SerializationOptions, STRIPPED_METADATA_FILE, TIMESTAMP_FORMAT};
use crate::errors::ModelStoreResult;
use crate::model::{
    AnnotationStore, CollectionId, CollectionInstance, Dataset, DatasetCollection,
    DatasetInstance, ElementObject, History, ImplicitCollectionJobs, InstanceId, InstanceKind,
    ItemRef, Job, Library, LibraryFolder, ModelGraph, UserId,
};

/// Tags of parameter objects that point at a dataset or collection.
pub const REFERENCE_SOURCES: &[&str] = &["hda", "ldda", "hdca", "dce"];

/// Metadata values holding this key reference a metadata file on disk.
pub const METADATA_FILE_KEY: &str = "metadata_file";

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Best effort: unparseable timestamps are dropped.
pub fn parse_timestamp(value: Option<&str>) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value?, TIMESTAMP_FORMAT).ok()
}

/// Places payload bytes into the archive and points the record at them.
pub trait SerializeFilesHandler {
    fn serialize_files(
        &mut self,
        dataset: &Dataset,
        key: &str,
        extension: &str,
        record: &mut DatasetRecord,
    ) -> ModelStoreResult<()>;
}

/// Read-only view shared by every serializer.
pub struct SerializeContext<'a> {
    pub graph: &'a ModelGraph,
    pub options: &'a SerializationOptions,
    /// Owner of annotations to export.
    pub user: Option<UserId>,
    /// Instances represented in the archive by another instance's record.
    pub instance_aliases: Option<&'a HashMap<InstanceId, InstanceId>>,
}

impl<'a> SerializeContext<'a> {
    pub fn new(graph: &'a ModelGraph, options: &'a SerializationOptions) -> Self {
        Self {
            graph,
            options,
            user: None,
            instance_aliases: None,
        }
    }

    pub fn key(&self, id: u64) -> String {
        self.options.get_identifier(id)
    }

    fn edit_id(&self, id: u64) -> Option<u64> {
        self.options.for_edit.then_some(id)
    }

    fn annotation(&self, item: ItemRef) -> Option<String> {
        self.user
            .and_then(|user| self.graph.item_attrs().get_annotation_string(user, item))
    }

    pub fn dataset_reference(&self, instance: InstanceId) -> DatasetReference {
        let instance = self
            .instance_aliases
            .and_then(|aliases| aliases.get(&instance))
            .copied()
            .unwrap_or(instance);
        let row = self.graph.instance(instance);
        DatasetReference {
            model_class: Some(row.kind.as_str().to_string()),
            id: self.edit_id(instance.get()),
            encoded_id: Some(self.key(instance.get())),
            hid: row.hid,
        }
    }

    /// Ancestor keys of a dataset instance, immediate source first.
    pub fn instance_copy_chain(&self, instance: InstanceId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.graph.instance(instance).copied_from;
        while let Some(parent) = current {
            if parent == instance || chain.len() > self.graph.objects().len() {
                break;
            }
            chain.push(self.key(parent.get()));
            current = self.graph.instance(parent).copied_from;
        }
        chain
    }
}

pub trait SerializeModel {
    type Record;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> Self::Record;
}

/// Replace metadata file references with an opaque marker.
pub fn strip_metadata_files(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(name, value)| {
            let is_file = value
                .as_object()
                .map_or(false, |object| object.contains_key(METADATA_FILE_KEY));
            let value = if is_file {
                Value::String(STRIPPED_METADATA_FILE.to_string())
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

/// Rewrite every dataset/collection reference found in `value`.
///
/// `rewrite` receives the reference tag and its current id and returns the
/// replacement, or `None` to leave the reference untouched.
pub fn rewrite_references<F>(value: &mut Value, rewrite: &mut F)
where
    F: FnMut(&str, &Value) -> Option<Value>,
{
    match value {
        Value::Object(object) => {
            let src = object
                .get("src")
                .and_then(Value::as_str)
                .filter(|src| REFERENCE_SOURCES.contains(src))
                .map(str::to_string);
            if let (Some(src), Some(id)) = (src, object.get("id")) {
                if let Some(replacement) = rewrite(&src, id) {
                    object.insert("id".to_string(), replacement);
                }
            }
            for (name, child) in object.iter_mut() {
                if name != "id" {
                    rewrite_references(child, rewrite);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, rewrite);
            }
        }
        _ => {}
    }
}

/// Numeric or string parameter id, as a lookup key.
pub fn reference_key(id: &Value) -> Option<String> {
    match id {
        Value::String(key) => Some(key.clone()),
        Value::Number(number) => number.as_u64().map(|n| n.to_string()),
        _ => None,
    }
}

impl SerializeModel for Dataset {
    type Record = DatasetSubRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> DatasetSubRecord {
        DatasetSubRecord {
            encoded_id: Some(ctx.key(self.id.get())),
            state: self.state,
            deleted: self.deleted,
            purged: self.purged,
            file_size: self.file_size,
            total_size: self.total_size,
            object_store_id: self.object_store_id.clone(),
            uuid: Some(self.uuid),
            created_from_basename: self.created_from_basename.clone(),
            hashes: self.hashes.clone(),
            sources: self.sources.clone(),
        }
    }
}

impl SerializeModel for DatasetInstance {
    type Record = DatasetRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> DatasetRecord {
        let metadata = if ctx.options.strip_metadata_files {
            strip_metadata_files(&self.metadata)
        } else {
            self.metadata.clone()
        };
        let chain = ctx.instance_copy_chain(self.id);
        let source_kind = self.copied_from.map(|parent| ctx.graph.instance(parent).kind);
        let (hda_chain, ldda_chain) = match source_kind {
            Some(InstanceKind::LibraryDatasetDatasetAssociation) => {
                (Vec::new(), chain)
            }
            _ => (chain, Vec::new()),
        };

        DatasetRecord {
            model_class: Some(self.kind.as_str().to_string()),
            id: ctx.edit_id(self.id.get()),
            encoded_id: Some(ctx.key(self.id.get())),
            hid: self.hid,
            history_encoded_id: self.history.map(|h| ctx.key(h.get())),
            name: self.name.clone(),
            info: self.info.clone(),
            blurb: self.blurb.clone(),
            peek: self.peek.clone(),
            extension: self.extension.clone(),
            designation: self.designation.clone(),
            metadata,
            visible: self.visible,
            deleted: self.deleted,
            annotation: ctx.annotation(ItemRef::Dataset(self.id)),
            tags: self.tags.clone(),
            dataset: ctx.graph.dataset(self.dataset).serialize(ctx),
            file_name: None,
            extra_files_path: None,
            exported: true,
            copied_from_history_dataset_association_id_chain: hda_chain,
            copied_from_library_dataset_dataset_association_id_chain: ldda_chain,
            create_time: Some(format_timestamp(&self.create_time)),
            update_time: Some(format_timestamp(&self.update_time)),
        }
    }
}

/// Serialize an instance, handing its payload to `files` when given.
pub fn serialize_dataset(
    ctx: &SerializeContext<'_>,
    instance: InstanceId,
    files: Option<&mut dyn SerializeFilesHandler>,
) -> ModelStoreResult<DatasetRecord> {
    let row = ctx.graph.instance(instance);
    let mut record = row.serialize(ctx);
    match files {
        Some(handler) if ctx.options.serialize_dataset_objects => {
            let key = record.encoded_id.clone().unwrap_or_default();
            handler.serialize_files(ctx.graph.dataset(row.dataset), &key, &row.extension, &mut record)?;
        }
        _ => record.exported = false,
    }
    Ok(record)
}

fn serialize_collection(ctx: &SerializeContext<'_>, collection: CollectionId) -> CollectionRecord {
    ctx.graph.collection(collection).serialize(ctx)
}

impl SerializeModel for DatasetCollection {
    type Record = CollectionRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> CollectionRecord {
        let elements = ctx
            .graph
            .collection_elements(self.id)
            .into_iter()
            .map(|element| {
                let (hda, child_collection) = match element.object {
                    ElementObject::Dataset(instance) => (Some(ctx.dataset_reference(instance)), None),
                    ElementObject::Collection(child) => {
                        (None, Some(serialize_collection(ctx, child)))
                    }
                };
                ElementRecord {
                    encoded_id: Some(ctx.key(element.id.get())),
                    element_index: element.element_index,
                    element_identifier: element.element_identifier.clone(),
                    hda,
                    child_collection,
                }
            })
            .collect();

        CollectionRecord {
            encoded_id: Some(ctx.key(self.id.get())),
            collection_type: self.collection_type.clone(),
            populated_state: self.populated_state,
            populated_state_message: self.populated_state_message.clone(),
            element_count: self.element_count,
            elements,
        }
    }
}

impl SerializeModel for CollectionInstance {
    type Record = CollectionInstanceRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> CollectionInstanceRecord {
        let mut chain = Vec::new();
        let mut current = self.copied_from;
        while let Some(parent) = current {
            if parent == self.id || chain.len() > ctx.graph.objects().len() {
                break;
            }
            chain.push(ctx.key(parent.get()));
            current = ctx.graph.collection_instance(parent).copied_from;
        }

        CollectionInstanceRecord {
            id: ctx.edit_id(self.id.get()),
            encoded_id: Some(ctx.key(self.id.get())),
            hid: self.hid,
            history_encoded_id: self.history.map(|h| ctx.key(h.get())),
            display_name: self.name.clone(),
            visible: self.visible,
            deleted: self.deleted,
            implicit_output_name: self.implicit_output_name.clone(),
            implicit_input_collections: self
                .implicit_input_collections
                .iter()
                .map(|input| ImplicitInputRecord {
                    name: input.name.clone(),
                    input_dataset_collection: ArchiveKey(ctx.key(input.input.get())),
                })
                .collect(),
            collection: serialize_collection(ctx, self.collection),
            copied_from_history_dataset_collection_association_id_chain: chain,
            tags: self.tags.clone(),
            annotation: ctx.annotation(ItemRef::Collection(self.id)),
            implicit_collection_jobs_id: self
                .implicit_collection_jobs
                .map(|icj| ctx.key(icj.get())),
        }
    }
}

impl SerializeModel for LibraryFolder {
    type Record = FolderRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> FolderRecord {
        FolderRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            genome_build: self.genome_build.clone(),
            deleted: self.deleted,
            folders: self
                .folders
                .iter()
                .map(|child| ctx.graph.folder(*child).serialize(ctx))
                .collect(),
            datasets: self
                .datasets
                .iter()
                .map(|id| {
                    let library_dataset = ctx.graph.library_dataset(*id);
                    LibraryDatasetRecord {
                        name: library_dataset.name.clone(),
                        info: library_dataset.info.clone(),
                        order_id: library_dataset.order_id,
                        ldda: ctx.dataset_reference(library_dataset.instance),
                    }
                })
                .collect(),
        }
    }
}

impl SerializeModel for Library {
    type Record = LibraryRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> LibraryRecord {
        LibraryRecord {
            encoded_id: Some(ctx.key(self.id.get())),
            name: self.name.clone(),
            description: self.description.clone(),
            synopsis: self.synopsis.clone(),
            root_folder: ctx.graph.folder(self.root_folder).serialize(ctx),
        }
    }
}

impl SerializeModel for History {
    type Record = HistoryRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> HistoryRecord {
        HistoryRecord {
            name: self.name.clone(),
            hid_counter: self.hid_counter,
            genome_build: self.genome_build.clone(),
            annotation: ctx.annotation(ItemRef::History(self.id)),
            tags: self.tags.clone(),
            encoded_id: Some(ctx.key(self.id.get())),
            create_time: Some(format_timestamp(&self.create_time)),
            update_time: Some(format_timestamp(&self.update_time)),
        }
    }
}

fn group_keys<'i, I>(entries: I) -> BTreeMap<String, Vec<ArchiveKey>>
where
    I: Iterator<Item = (&'i str, String)>,
{
    let mut mapping: BTreeMap<String, Vec<ArchiveKey>> = BTreeMap::new();
    for (name, key) in entries {
        mapping
            .entry(name.to_string())
            .or_default()
            .push(ArchiveKey(key));
    }
    mapping
}

impl SerializeModel for Job {
    type Record = JobRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> JobRecord {
        let mut params = Value::Object(self.params.clone());
        if !ctx.options.for_edit {
            rewrite_references(&mut params, &mut |_: &str, id: &Value| {
                id.as_u64().map(|raw| Value::String(ctx.key(raw)))
            });
        }
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let dataset_key = |instance: InstanceId| ctx.key(instance.get());
        JobRecord {
            id: ctx.edit_id(self.id.get()),
            encoded_id: Some(ctx.key(self.id.get())),
            tool_id: self.tool_id.clone(),
            tool_version: self.tool_version.clone(),
            state: self.state.as_str().to_string(),
            exit_code: self.exit_code,
            command_line: self.command_line.clone(),
            info: self.info.clone(),
            create_time: Some(format_timestamp(&self.create_time)),
            update_time: Some(format_timestamp(&self.update_time)),
            stdout: self.tool_stdout.clone(),
            stderr: self.tool_stderr.clone(),
            tool_stdout: self.tool_stdout.clone(),
            tool_stderr: self.tool_stderr.clone(),
            job_stdout: self.job_stdout.clone(),
            job_stderr: self.job_stderr.clone(),
            params,
            input_dataset_mapping: group_keys(
                self.input_datasets
                    .iter()
                    .map(|a| (a.name.as_str(), dataset_key(a.dataset))),
            ),
            input_dataset_collection_mapping: group_keys(
                self.input_collections
                    .iter()
                    .map(|a| (a.name.as_str(), ctx.key(a.collection.get()))),
            ),
            output_dataset_mapping: group_keys(
                self.output_datasets
                    .iter()
                    .map(|a| (a.name.as_str(), dataset_key(a.dataset))),
            ),
            output_dataset_collection_mapping: group_keys(
                self.output_collections
                    .iter()
                    .map(|a| (a.name.as_str(), ctx.key(a.collection.get()))),
            ),
            input_mapping: BTreeMap::new(),
            output_datasets: Vec::new(),
        }
    }
}

impl SerializeModel for ImplicitCollectionJobs {
    type Record = ImplicitCollectionJobsRecord;

    fn serialize(&self, ctx: &SerializeContext<'_>) -> ImplicitCollectionJobsRecord {
        let mut jobs = self.jobs.clone();
        jobs.sort_by_key(|entry| entry.order_index);
        ImplicitCollectionJobsRecord {
            encoded_id: Some(ctx.key(self.id.get())),
            populated_state: self.populated_state,
            jobs: jobs
                .into_iter()
                .map(|entry| ArchiveKey(ctx.key(entry.job.get())))
                .collect(),
        }
    }
}
