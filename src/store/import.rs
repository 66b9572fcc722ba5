//! Rebuilds a graph from an archive directory.
//!
//! Passes run in a fixed order and each relies on the tracker state left by
//! the ones before it:
//!
//! 1. datasets
//! 2. dataset copy provenance
//! 3. libraries
//! 4. collections
//! 5. implicit input collections
//! 6. collection copy provenance
//! 7. hid block for instances without a trusted hid
//! 8. jobs
//! 9. implicit collection job groupings
//!
//! The session is flushed before the first pass and between passes; rows
//! updated in place are found through [`ModelSession::query`]. Commit and
//! rollback belong to the caller.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::attrs::*;
use super::format::{defines_history, ArchiveFormat};
use super::serialize::{parse_timestamp, reference_key, rewrite_references};
use super::tracker::{resolve_copied_from, CopiedFrom, ObjectImportTracker, RequiresHid};
use super::*;
use crate::common::{list_files, read_json_array_file, read_json_file, resolve_archive_path};
use crate::errors::{KeyKind, ModelStoreError, ModelStoreResult};
use crate::model::{
    AnnotationStore, CollectionId, CollectionInstance, CollectionInstanceId, Dataset,
    DatasetCollection, DatasetId, DatasetInstance, DatasetState, ElementObject, History,
    HistoryId, ImplicitCollectionJobs, ImplicitInput, InstanceId, InstanceKind, ItemRef, Job,
    JobId, JobState, Library, LibraryDataset, LibraryFolder, ModelSession, ObjectKind, ObjectRef,
    PopulatedState, UserId,
};
use crate::model::collection::is_valid_collection_type;
use crate::object_store::ObjectStore;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Records carrying an internal id update that row instead of creating one.
    pub allow_edit: bool,
    pub allow_library_creation: bool,
    /// In the edit path, replace the payload of the existing dataset too.
    pub allow_dataset_object_edit: bool,
    pub discarded_data: ImportDiscardedDataType,
    /// Import into this history instead of creating one from `history_attrs.txt`.
    pub import_history: Option<HistoryId>,
    /// Owner of new histories and imported annotations.
    pub user: Option<UserId>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub format: &'static str,
    pub history: Option<HistoryId>,
    pub new_history: bool,
    pub datasets: usize,
    pub discarded_datasets: usize,
    pub libraries: usize,
    pub collections: usize,
    pub jobs: usize,
    pub implicit_collection_jobs: usize,
    /// First hid of the reserved block, when one was needed.
    pub hid_block_start: Option<u32>,
    #[serde(skip)]
    pub tracker: ObjectImportTracker,
}

/// State of one import operation.
#[derive(Default)]
struct ImportRun {
    tracker: ObjectImportTracker,
    history: Option<HistoryId>,
    new_history: bool,
    /// Key of the recreated history as written by the exporter.
    archive_history_key: Option<String>,
    created_datasets: Vec<(String, InstanceId, Vec<String>)>,
    created_collections: Vec<CreatedCollection>,
    /// Collection instances produced through an implicit-collection-jobs grouping.
    grouped_collections: HashSet<CollectionInstanceId>,
    discarded: usize,
}

struct CreatedCollection {
    key: String,
    instance: CollectionInstanceId,
    chain: Vec<String>,
    implicit_inputs: Vec<ImplicitInputRecord>,
    implicit_collection_jobs: Option<String>,
}

pub struct ModelImportStore<'a, S: ModelSession> {
    session: &'a mut S,
    object_store: &'a mut dyn ObjectStore,
    archive_directory: PathBuf,
    format: ArchiveFormat,
    options: ImportOptions,
}

impl<'a, S: ModelSession> ModelImportStore<'a, S> {
    pub fn new(
        session: &'a mut S,
        object_store: &'a mut dyn ObjectStore,
        archive_directory: impl Into<PathBuf>,
        options: ImportOptions,
    ) -> ModelStoreResult<Self> {
        let archive_directory = archive_directory.into();
        if !archive_directory.is_dir() {
            return Err(ModelStoreError::ObjectNotFound(format!(
                "archive directory {:?} does not exist",
                archive_directory
            )));
        }
        let format = ArchiveFormat::detect(&archive_directory);
        Ok(Self {
            session,
            object_store,
            archive_directory,
            format,
            options,
        })
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn attrs_path(&self, name: &str) -> PathBuf {
        self.archive_directory.join(name)
    }

    /// Editing existing rows needs a live session to look them up in.
    fn edit_enabled(&self) -> bool {
        self.options.allow_edit && !self.session.is_sessionless()
    }

    /// Existing row of `kind` with internal id `id`, as visible to the session.
    fn existing(&self, kind: ObjectKind, id: u64) -> ModelStoreResult<ObjectRef> {
        self.session.query(kind, id).ok_or_else(|| {
            ModelStoreError::ObjectNotFound(format!("{:?} {} does not exist", kind, id))
        })
    }

    pub fn perform_import(mut self) -> ModelStoreResult<ImportSummary> {
        let mut run = ImportRun::default();
        self.session.flush()?;
        self.import_history_record(&mut run)?;

        let mut datasets: Vec<DatasetRecord> =
            read_json_array_file(&self.attrs_path(ATTRS_FILENAME_DATASETS))?;
        let provenance: Vec<DatasetRecord> = read_json_array_file(
            &self.attrs_path(&format!("{}{}", ATTRS_FILENAME_DATASETS, PROVENANCE_SUFFIX)),
        )?;
        datasets.extend(provenance);
        let libraries: Vec<LibraryRecord> =
            read_json_array_file(&self.attrs_path(ATTRS_FILENAME_LIBRARIES))?;
        let collections: Vec<CollectionInstanceRecord> =
            read_json_array_file(&self.attrs_path(ATTRS_FILENAME_COLLECTIONS))?;
        let jobs: Vec<JobRecord> = read_json_array_file(&self.attrs_path(ATTRS_FILENAME_JOBS))?;
        let groupings: Vec<ImplicitCollectionJobsRecord> =
            read_json_array_file(&self.attrs_path(ATTRS_FILENAME_IMPLICIT_COLLECTION_JOBS))?;

        info!(
            directory = ?self.archive_directory,
            format = self.format.as_str(),
            datasets = datasets.len(),
            collections = collections.len(),
            jobs = jobs.len(),
            "importing archive"
        );

        self.import_datasets(&mut run, &datasets)?;
        self.link_dataset_provenance(&mut run);
        self.session.flush()?;

        self.import_libraries(&mut run, &libraries)?;
        self.session.flush()?;

        self.import_collections(&mut run, &collections)?;
        self.link_implicit_inputs(&mut run);
        self.link_collection_provenance(&mut run);
        self.session.flush()?;

        let hid_block_start = self.assign_hid_block(&mut run)?;
        self.session.flush()?;

        self.import_jobs(&mut run, &jobs)?;
        self.session.flush()?;

        self.import_implicit_collection_jobs(&mut run, &groupings)?;
        self.session.flush()?;

        let summary = ImportSummary {
            format: self.format.as_str(),
            history: run.history,
            new_history: run.new_history,
            datasets: datasets.len(),
            discarded_datasets: run.discarded,
            libraries: libraries.len(),
            collections: collections.len(),
            jobs: jobs.len(),
            implicit_collection_jobs: groupings.len(),
            hid_block_start,
            tracker: run.tracker,
        };
        info!(
            history = ?summary.history,
            datasets = summary.datasets,
            discarded = summary.discarded_datasets,
            collections = summary.collections,
            jobs = summary.jobs,
            "import finished"
        );
        Ok(summary)
    }

    fn import_history_record(&mut self, run: &mut ImportRun) -> ModelStoreResult<()> {
        if let Some(history) = self.options.import_history {
            if self.session.graph().get_history(history.get()).is_none() {
                return Err(ModelStoreError::ObjectNotFound(format!(
                    "destination history {} does not exist",
                    history
                )));
            }
            run.history = Some(history);
            return Ok(());
        }
        if !defines_history(&self.archive_directory) {
            return Ok(());
        }

        let record: HistoryRecord = read_json_file(&self.attrs_path(ATTRS_FILENAME_HISTORY))?;
        let mut history = History::new(record.name.clone());
        history.user = self.options.user;
        history.genome_build = record.genome_build.clone();
        history.tags = record.tags.clone();
        if let Some(time) = parse_timestamp(record.create_time.as_deref()) {
            history.create_time = time;
        }
        if let Some(time) = parse_timestamp(record.update_time.as_deref()) {
            history.update_time = time;
        }
        let graph = self.session.graph_mut();
        let id = graph.add_history(history);
        if let (Some(user), Some(annotation)) = (self.options.user, &record.annotation) {
            graph
                .item_attrs_mut()
                .add_annotation(user, ItemRef::History(id), annotation);
        }
        self.session.flush()?;

        debug!(history = %id, name = %record.name, "created history");
        run.history = Some(id);
        run.new_history = true;
        run.archive_history_key = record.encoded_id;
        Ok(())
    }

    /// Use the record's own hid if it can be trusted, queue the instance otherwise.
    fn trusted_hid(
        &self,
        run: &ImportRun,
        hid: Option<u32>,
        record_history: Option<&str>,
    ) -> ModelStoreResult<Option<u32>> {
        if !run.new_history {
            return Ok(None);
        }
        if !self
            .format
            .trust_hid(record_history, run.archive_history_key.as_deref())
        {
            return Ok(None);
        }
        match hid {
            Some(hid) if !History::accepts_hid(hid) => Err(ModelStoreError::InvalidRecord(
                format!("hid {} is out of range", hid),
            )),
            hid => Ok(hid),
        }
    }

    fn import_datasets(
        &mut self,
        run: &mut ImportRun,
        records: &[DatasetRecord],
    ) -> ModelStoreResult<()> {
        for record in records {
            let kind = record
                .instance_kind()
                .map_err(ModelStoreError::InvalidRecord)?;
            let key = self.format.dataset_key(record)?;

            match record.id {
                Some(id) if self.edit_enabled() => {
                    let instance = self.update_dataset(id, record)?;
                    run.tracker.hdas_by_id.insert(id, instance);
                    run.tracker.hdas_by_key.insert(key, instance);
                }
                _ => {
                    let instance = self.create_dataset(run, kind, record)?;
                    if kind == InstanceKind::LibraryDatasetDatasetAssociation {
                        run.tracker.lddas_by_key.insert(key.clone(), instance);
                    }
                    run.tracker.hdas_by_key.insert(key.clone(), instance);
                    run.created_datasets
                        .push((key, instance, record.copied_from_chain().to_vec()));
                }
            }
        }
        info!(
            created = run.created_datasets.len(),
            discarded = run.discarded,
            "dataset pass complete"
        );
        Ok(())
    }

    fn update_dataset(&mut self, id: u64, record: &DatasetRecord) -> ModelStoreResult<InstanceId> {
        let instance = match self.existing(ObjectKind::Instance, id)? {
            ObjectRef::Instance(instance) => instance,
            other => {
                return Err(ModelStoreError::ObjectNotFound(format!(
                    "dataset instance {} resolved to {:?}",
                    id, other
                )))
            }
        };
        let row = self.session.graph_mut().instance_mut(instance);
        row.name = record.name.clone();
        row.info = record.info.clone();
        row.blurb = record.blurb.clone();
        row.peek = record.peek.clone();
        row.extension = record.extension.clone();
        row.designation = record.designation.clone();
        row.metadata = record.metadata.clone();
        row.visible = record.visible;
        row.deleted = record.deleted;
        row.tags = record.tags.clone();
        let dataset = row.dataset;

        if self.options.allow_dataset_object_edit {
            if let Some(file_name) = &record.file_name {
                let path = resolve_archive_path(&self.archive_directory, file_name)?;
                if !path.is_file() {
                    return Err(ModelStoreError::ObjectNotFound(format!(
                        "replacement payload {} is missing from the archive",
                        file_name
                    )));
                }
                self.store_payload(dataset, &path, record.extra_files_path.as_deref())?;
            }
        }
        self.import_annotation(ItemRef::Dataset(instance), record.annotation.as_deref());
        debug!(instance = %instance, "updated existing dataset instance");
        Ok(instance)
    }

    fn create_dataset(
        &mut self,
        run: &mut ImportRun,
        kind: InstanceKind,
        record: &DatasetRecord,
    ) -> ModelStoreResult<InstanceId> {
        let sub = &record.dataset;
        let mut dataset = Dataset::new(sub.state);
        dataset.deleted = sub.deleted;
        dataset.purged = sub.purged;
        dataset.file_size = sub.file_size;
        dataset.total_size = sub.total_size;
        dataset.object_store_id = sub.object_store_id.clone();
        if let Some(uuid) = sub.uuid {
            dataset.uuid = uuid;
        }
        dataset.created_from_basename = sub.created_from_basename.clone();
        dataset.hashes = sub.hashes.clone();
        dataset.sources = sub.sources.clone();

        let graph = self.session.graph_mut();
        let dataset_id = graph.add_dataset(dataset);
        let mut instance = DatasetInstance::new(kind, record.name.clone(), dataset_id);
        instance.info = record.info.clone();
        instance.blurb = record.blurb.clone();
        instance.peek = record.peek.clone();
        if !record.extension.is_empty() {
            instance.extension = record.extension.clone();
        }
        instance.designation = record.designation.clone();
        instance.metadata = record.metadata.clone();
        instance.visible = record.visible;
        instance.deleted = record.deleted;
        instance.tags = record.tags.clone();
        if let Some(time) = parse_timestamp(record.create_time.as_deref()) {
            instance.create_time = time;
        }
        if let Some(time) = parse_timestamp(record.update_time.as_deref()) {
            instance.update_time = time;
        }
        let instance_id = graph.add_instance(instance);

        if kind == InstanceKind::HistoryDatasetAssociation {
            if let Some(history) = run.history {
                let hid =
                    self.trusted_hid(run, record.hid, record.history_encoded_id.as_deref())?;
                self.session
                    .graph_mut()
                    .attach_instance(instance_id, history, hid);
                if hid.is_none() {
                    run.tracker
                        .requires_hid
                        .push(RequiresHid::Dataset(instance_id));
                }
            }
        }
        self.import_annotation(ItemRef::Dataset(instance_id), record.annotation.as_deref());

        if self.resolve_payload(dataset_id, record)? {
            run.discarded += 1;
        }
        Ok(instance_id)
    }

    /// Copy the record's payload into the object store. Returns whether the
    /// dataset ended up discarded.
    fn resolve_payload(
        &mut self,
        dataset: DatasetId,
        record: &DatasetRecord,
    ) -> ModelStoreResult<bool> {
        let file_name = match &record.file_name {
            Some(file_name) => file_name,
            None => return self.handle_missing_payload(dataset, record),
        };
        let path = resolve_archive_path(&self.archive_directory, file_name)?;
        if self.options.discarded_data == ImportDiscardedDataType::Force {
            self.session.graph_mut().dataset_mut(dataset).discard();
            return Ok(true);
        }
        if !path.is_file() {
            warn!(file = %file_name, "payload missing from archive, discarding dataset");
            self.session.graph_mut().dataset_mut(dataset).discard();
            return Ok(true);
        }
        self.store_payload(dataset, &path, record.extra_files_path.as_deref())?;
        Ok(false)
    }

    fn handle_missing_payload(
        &mut self,
        dataset: DatasetId,
        record: &DatasetRecord,
    ) -> ModelStoreResult<bool> {
        let policy = self.options.discarded_data;
        if !record.dataset.sources.is_empty() && policy != ImportDiscardedDataType::Force {
            // Still fetchable from its recorded sources.
            self.session.graph_mut().dataset_mut(dataset).state = DatasetState::Deferred;
            return Ok(false);
        }
        // Provenance-only records were written without a payload on purpose.
        if policy == ImportDiscardedDataType::Forbid
            && record.exported
            && record.dataset.state == DatasetState::Ok
        {
            return Err(ModelStoreError::NotAllowed(format!(
                "dataset '{}' has no payload and discarded data is forbidden",
                record.name
            )));
        }
        self.session.graph_mut().dataset_mut(dataset).discard();
        Ok(true)
    }

    fn store_payload(
        &mut self,
        dataset: DatasetId,
        path: &Path,
        extra_files_path: Option<&str>,
    ) -> ModelStoreResult<()> {
        let row = self.session.graph().dataset(dataset).clone();
        self.object_store
            .update_from_file(&row, path, None, None, true)?;

        if let Some(extra) = extra_files_path {
            let extra_dir = resolve_archive_path(&self.archive_directory, extra)?;
            if extra_dir.is_dir() {
                let dir_name = self.object_store.extra_files_dir_name(&row);
                for relative in list_files(&extra_dir)? {
                    let relative = relative.to_string_lossy().into_owned();
                    let source = resolve_archive_path(&extra_dir, &relative)?;
                    self.object_store.update_from_file(
                        &row,
                        &source,
                        Some(dir_name.as_str()),
                        Some(relative.as_str()),
                        true,
                    )?;
                }
            }
        }

        let file_size = std::fs::metadata(path)?.len();
        let total_size = self.object_store.total_size(&row)?;
        let row = self.session.graph_mut().dataset_mut(dataset);
        row.file_size = Some(file_size);
        row.total_size = Some(total_size);
        Ok(())
    }

    fn import_annotation(&mut self, item: ItemRef, annotation: Option<&str>) {
        if let (Some(user), Some(text)) = (self.options.user, annotation) {
            self.session
                .graph_mut()
                .item_attrs_mut()
                .add_annotation(user, item, text);
        }
    }

    fn link_dataset_provenance(&mut self, run: &mut ImportRun) {
        let mut linked = 0usize;
        for (key, instance, chain) in &run.created_datasets {
            if chain.is_empty() {
                continue;
            }
            let resolved = resolve_copied_from(
                chain,
                key,
                &run.tracker.hdas_by_key,
                &mut run.tracker.hda_copied_from_sinks,
            );
            if let CopiedFrom::Sink { ancestor, .. } = &resolved {
                debug!(key = %key, ancestor = %ancestor, "redirected copy to sink claimant");
            }
            if let Some(source) = resolved.source().filter(|source| source != instance) {
                self.session.graph_mut().instance_mut(*instance).copied_from = Some(source);
                linked += 1;
            }
        }
        info!(
            linked,
            sinks = run.tracker.hda_copied_from_sinks.len(),
            "dataset provenance pass complete"
        );
    }

    fn import_libraries(
        &mut self,
        run: &mut ImportRun,
        records: &[LibraryRecord],
    ) -> ModelStoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        if !self.options.allow_library_creation {
            return Err(ModelStoreError::NotAllowed(
                "archive contains libraries but library creation is not allowed".to_string(),
            ));
        }
        for record in records {
            let root = self.import_folder(run, None, &record.root_folder)?;
            let mut library = Library::new(record.name.clone(), root);
            library.description = record.description.clone();
            library.synopsis = record.synopsis.clone();
            let id = self.session.graph_mut().add_library(library);
            let key = record.encoded_id.clone().unwrap_or_else(|| record.name.clone());
            run.tracker.libraries_by_key.insert(key, id);
        }
        info!(libraries = records.len(), "library pass complete");
        Ok(())
    }

    fn import_folder(
        &mut self,
        run: &ImportRun,
        parent: Option<crate::model::FolderId>,
        record: &FolderRecord,
    ) -> ModelStoreResult<crate::model::FolderId> {
        let mut folder = LibraryFolder::new(record.name.clone());
        folder.description = record.description.clone();
        folder.genome_build = record.genome_build.clone();
        folder.deleted = record.deleted;
        let folder_id = self.session.graph_mut().add_folder(parent, folder);

        for dataset in &record.datasets {
            let key = self.format.reference_key(&dataset.ldda).unwrap_or_default();
            let instance = run
                .tracker
                .lddas_by_key
                .get(&key)
                .or_else(|| run.tracker.hdas_by_key.get(&key))
                .copied()
                .ok_or_else(|| ModelStoreError::missing_key(KeyKind::LibraryDataset, key))?;
            let mut library_dataset = LibraryDataset::new(dataset.name.clone(), instance);
            library_dataset.info = dataset.info.clone();
            library_dataset.order_id = dataset.order_id;
            self.session
                .graph_mut()
                .add_library_dataset(folder_id, library_dataset);
        }
        for child in &record.folders {
            self.import_folder(run, Some(folder_id), child)?;
        }
        Ok(folder_id)
    }

    fn import_collections(
        &mut self,
        run: &mut ImportRun,
        records: &[CollectionInstanceRecord],
    ) -> ModelStoreResult<()> {
        for record in records {
            let key = self.format.collection_key(record)?;
            match record.id {
                Some(id) if self.edit_enabled() => {
                    let instance = self.update_collection_instance(run, id, record)?;
                    if record.implicit_collection_jobs_id.is_some() {
                        run.grouped_collections.insert(instance);
                    }
                    run.tracker.hdcas_by_id.insert(id, instance);
                    run.tracker.hdcas_by_key.insert(key, instance);
                }
                _ => {
                    let collection = self.materialize_collection(run, &record.collection)?;
                    let mut instance =
                        CollectionInstance::new(record.display_name.clone(), collection);
                    instance.visible = record.visible;
                    instance.deleted = record.deleted;
                    instance.implicit_output_name = record.implicit_output_name.clone();
                    instance.tags = record.tags.clone();
                    let instance = self.session.graph_mut().add_collection_instance(instance);

                    if let Some(history) = run.history {
                        let hid = self.trusted_hid(
                            run,
                            record.hid,
                            record.history_encoded_id.as_deref(),
                        )?;
                        self.session
                            .graph_mut()
                            .attach_collection_instance(instance, history, hid);
                        if hid.is_none() {
                            run.tracker
                                .requires_hid
                                .push(RequiresHid::Collection(instance));
                        }
                    }
                    self.import_annotation(
                        ItemRef::Collection(instance),
                        record.annotation.as_deref(),
                    );
                    run.tracker.hdcas_by_key.insert(key.clone(), instance);
                    if record.implicit_collection_jobs_id.is_some() {
                        run.grouped_collections.insert(instance);
                    }
                    run.created_collections.push(CreatedCollection {
                        key,
                        instance,
                        chain: record
                            .copied_from_history_dataset_collection_association_id_chain
                            .clone(),
                        implicit_inputs: record.implicit_input_collections.clone(),
                        implicit_collection_jobs: record.implicit_collection_jobs_id.clone(),
                    });
                }
            }
        }
        info!(
            created = run.created_collections.len(),
            "collection pass complete"
        );
        Ok(())
    }

    fn update_collection_instance(
        &mut self,
        run: &mut ImportRun,
        id: u64,
        record: &CollectionInstanceRecord,
    ) -> ModelStoreResult<CollectionInstanceId> {
        let instance = match self.existing(ObjectKind::CollectionInstance, id)? {
            ObjectRef::CollectionInstance(instance) => instance,
            other => {
                return Err(ModelStoreError::ObjectNotFound(format!(
                    "collection instance {} resolved to {:?}",
                    id, other
                )))
            }
        };
        let row = self.session.graph_mut().collection_instance_mut(instance);
        row.name = record.display_name.clone();
        row.visible = record.visible;
        row.deleted = record.deleted;
        row.tags = record.tags.clone();
        let collection = row.collection;

        if !self.session.graph().collection(collection).populated() {
            self.populate_collection(run, collection, &record.collection)?;
            let row = self.session.graph_mut().collection_mut(collection);
            row.populated_state = PopulatedState::Ok;
            row.populated_state_message = None;
            debug!(collection = %collection, "populated existing collection");
        }
        self.import_annotation(ItemRef::Collection(instance), record.annotation.as_deref());
        Ok(instance)
    }

    fn materialize_collection(
        &mut self,
        run: &mut ImportRun,
        record: &CollectionRecord,
    ) -> ModelStoreResult<CollectionId> {
        if !is_valid_collection_type(&record.collection_type) {
            return Err(ModelStoreError::InvalidRecord(format!(
                "unknown collection type '{}'",
                record.collection_type
            )));
        }
        let mut collection = DatasetCollection::new(record.collection_type.clone());
        collection.populated_state = record.populated_state;
        collection.populated_state_message = record.populated_state_message.clone();
        let id = self.session.graph_mut().add_collection(collection);
        self.populate_collection(run, id, record)?;
        Ok(id)
    }

    /// Add the record's elements depth first, in `element_index` order.
    fn populate_collection(
        &mut self,
        run: &mut ImportRun,
        collection: CollectionId,
        record: &CollectionRecord,
    ) -> ModelStoreResult<()> {
        let mut elements: Vec<&ElementRecord> = record.elements.iter().collect();
        elements.sort_by_key(|element| element.element_index);

        for element in elements {
            let object = match (&element.hda, &element.child_collection) {
                (Some(reference), None) => {
                    ElementObject::Dataset(self.resolve_element_dataset(run, reference)?)
                }
                (None, Some(child)) => {
                    ElementObject::Collection(self.materialize_collection(run, child)?)
                }
                (Some(_), Some(_)) => {
                    return Err(ModelStoreError::InvalidRecord(format!(
                        "element '{}' references both a dataset and a collection",
                        element.element_identifier
                    )))
                }
                (None, None) => {
                    return Err(ModelStoreError::InvalidRecord(format!(
                        "element '{}' references neither a dataset nor a collection",
                        element.element_identifier
                    )))
                }
            };
            let element_id = self.session.graph_mut().add_element(
                collection,
                element.element_identifier.clone(),
                object,
            );
            if let Some(key) = &element.encoded_id {
                run.tracker.dces_by_key.insert(key.clone(), element_id);
            }
        }
        Ok(())
    }

    fn resolve_element_dataset(
        &self,
        run: &ImportRun,
        reference: &DatasetReference,
    ) -> ModelStoreResult<InstanceId> {
        let key = self.format.reference_key(reference);
        let by_key = key
            .as_deref()
            .and_then(|key| run.tracker.hdas_by_key.get(key).copied());
        let by_id = reference
            .id
            .and_then(|id| run.tracker.hdas_by_id.get(&id).copied());
        match by_key.or(by_id) {
            Some(instance) => Ok(instance),
            None => Err(ModelStoreError::missing_key(
                KeyKind::CollectionElement,
                key.unwrap_or_else(|| "<unkeyed>".to_string()),
            )),
        }
    }

    fn link_implicit_inputs(&mut self, run: &mut ImportRun) {
        for created in &run.created_collections {
            for input in &created.implicit_inputs {
                let source_key = input.input_dataset_collection.as_str();
                match run.tracker.hdcas_by_key.get(source_key) {
                    Some(source) => self
                        .session
                        .graph_mut()
                        .collection_instance_mut(created.instance)
                        .implicit_input_collections
                        .push(ImplicitInput {
                            name: input.name.clone(),
                            input: *source,
                        }),
                    None => debug!(
                        key = %source_key,
                        "implicit input collection outside the archive"
                    ),
                }
            }
        }
    }

    fn link_collection_provenance(&mut self, run: &mut ImportRun) {
        let mut linked = 0usize;
        for created in &run.created_collections {
            if created.chain.is_empty() {
                continue;
            }
            let resolved = resolve_copied_from(
                &created.chain,
                &created.key,
                &run.tracker.hdcas_by_key,
                &mut run.tracker.hdca_copied_from_sinks,
            );
            if let Some(source) = resolved.source().filter(|source| *source != created.instance) {
                self.session
                    .graph_mut()
                    .collection_instance_mut(created.instance)
                    .copied_from = Some(source);
                linked += 1;
            }
        }
        debug!(linked, "collection provenance pass complete");
    }

    /// Number every queued instance from one contiguous block.
    fn assign_hid_block(&mut self, run: &mut ImportRun) -> ModelStoreResult<Option<u32>> {
        if run.tracker.requires_hid.is_empty() {
            return Ok(None);
        }
        if self.session.is_sessionless() {
            debug!(
                pending = run.tracker.requires_hid.len(),
                "sessionless import, leaving hids unassigned"
            );
            return Ok(None);
        }
        let history = match run.history {
            Some(history) => history,
            None => return Ok(None),
        };
        let graph = self.session.graph_mut();
        let exhausted = || {
            ModelStoreError::InvalidRecord(format!(
                "history {} has no room for {} more hids",
                history,
                run.tracker.requires_hid.len()
            ))
        };
        let count = u32::try_from(run.tracker.requires_hid.len()).map_err(|_| exhausted())?;
        let start = graph
            .history_mut(history)
            .reserve_hids(count)
            .ok_or_else(exhausted)?;
        for (offset, target) in run.tracker.requires_hid.iter().enumerate() {
            let hid = start + offset as u32;
            match target {
                RequiresHid::Dataset(instance) => graph.instance_mut(*instance).hid = Some(hid),
                RequiresHid::Collection(instance) => {
                    graph.collection_instance_mut(*instance).hid = Some(hid)
                }
            }
        }
        info!(history = %history, start, count, "reserved hid block");
        Ok(Some(start))
    }

    fn import_jobs(&mut self, run: &mut ImportRun, records: &[JobRecord]) -> ModelStoreResult<()> {
        for record in records {
            let job = match record.id {
                Some(id) if self.edit_enabled() => {
                    let job = match self.existing(ObjectKind::Job, id)? {
                        ObjectRef::Job(job) => job,
                        other => {
                            return Err(ModelStoreError::ObjectNotFound(format!(
                                "job {} resolved to {:?}",
                                id, other
                            )))
                        }
                    };
                    self.session.graph_mut().job_mut(job).clear_associations();
                    job
                }
                _ => {
                    let job = self.build_job(run, record);
                    self.session.graph_mut().add_job(job)
                }
            };
            self.wire_job_associations(run, job, record);
            if let Some(key) = self.format.job_key(record) {
                run.tracker.jobs_by_key.insert(key, job);
            }
        }
        info!(jobs = records.len(), "job pass complete");
        Ok(())
    }

    fn build_job(&self, run: &ImportRun, record: &JobRecord) -> Job {
        let mut job = Job::new(record.tool_id.clone());
        job.tool_version = record.tool_version.clone();
        job.state = JobState::coerce_terminal(&record.state);
        job.history = run.history;
        job.user = self.options.user;
        job.command_line = record.command_line.clone();
        job.exit_code = record.exit_code;
        job.info = record.info.clone();
        job.tool_stdout = record.tool_stdout.clone().or_else(|| record.stdout.clone());
        job.tool_stderr = record.tool_stderr.clone().or_else(|| record.stderr.clone());
        job.job_stdout = record.job_stdout.clone();
        job.job_stderr = record.job_stderr.clone();
        if let Some(time) = parse_timestamp(record.create_time.as_deref()) {
            job.create_time = time;
        }
        if let Some(time) = parse_timestamp(record.update_time.as_deref()) {
            job.update_time = time;
        }
        job.params = remap_params(&record.params, &run.tracker);
        job
    }

    fn wire_job_associations(&mut self, run: &ImportRun, job: JobId, record: &JobRecord) {
        let tracker = &run.tracker;
        let graph = self.session.graph_mut();
        match self.format {
            ArchiveFormat::Legacy => {
                for (name, key) in &record.input_mapping {
                    match tracker.find_hda(key.as_str()) {
                        Some(instance) => graph.add_job_input_dataset(job, name.clone(), instance),
                        None => debug!(key = %key, "job input outside the archive"),
                    }
                }
                for key in &record.output_datasets {
                    match tracker.find_hda(key.as_str()) {
                        Some(instance) => graph.add_job_output_dataset(job, "", instance),
                        None => debug!(key = %key, "job output outside the archive"),
                    }
                }
            }
            ArchiveFormat::Current => {
                for (name, keys) in &record.input_dataset_mapping {
                    for key in keys {
                        if let Some(instance) = tracker.find_hda(key.as_str()) {
                            graph.add_job_input_dataset(job, name.clone(), instance);
                        }
                    }
                }
                for (name, keys) in &record.output_dataset_mapping {
                    for key in keys {
                        if let Some(instance) = tracker.find_hda(key.as_str()) {
                            graph.add_job_output_dataset(job, name.clone(), instance);
                        }
                    }
                }
                for (name, keys) in &record.input_dataset_collection_mapping {
                    for key in keys {
                        if let Some(instance) = tracker.find_hdca(key.as_str()) {
                            graph.add_job_input_collection(job, name.clone(), instance);
                        }
                    }
                }
                for (name, keys) in &record.output_dataset_collection_mapping {
                    for key in keys {
                        let instance = match tracker.find_hdca(key.as_str()) {
                            Some(instance) => instance,
                            None => continue,
                        };
                        // Mapped-over outputs belong to their grouping, not to one job.
                        if run.grouped_collections.contains(&instance) {
                            graph.link_job_output_collection(job, name.clone(), instance);
                        } else {
                            graph.add_job_output_collection(job, name.clone(), instance);
                        }
                    }
                }
            }
        }
    }

    fn import_implicit_collection_jobs(
        &mut self,
        run: &mut ImportRun,
        records: &[ImplicitCollectionJobsRecord],
    ) -> ModelStoreResult<()> {
        for record in records {
            let mut grouping = ImplicitCollectionJobs::new(record.populated_state);
            for key in &record.jobs {
                let job = run
                    .tracker
                    .jobs_by_key
                    .get(key.as_str())
                    .copied()
                    .ok_or_else(|| ModelStoreError::missing_key(KeyKind::Job, key.as_str()))?;
                grouping.add_job(job);
            }
            let id = self
                .session
                .graph_mut()
                .add_implicit_collection_jobs(grouping);

            if let Some(key) = &record.encoded_id {
                run.tracker
                    .implicit_collection_jobs_by_key
                    .insert(key.clone(), id);
                for created in &run.created_collections {
                    if created.implicit_collection_jobs.as_deref() == Some(key.as_str()) {
                        self.session
                            .graph_mut()
                            .collection_instance_mut(created.instance)
                            .implicit_collection_jobs = Some(id);
                    }
                }
            }
        }
        debug!(groupings = records.len(), "implicit collection jobs pass complete");
        Ok(())
    }
}

/// Deep copy of job parameters with every reference pointed at the imported
/// entity. References that resolve nowhere are kept verbatim.
pub fn remap_params(params: &Map<String, Value>, tracker: &ObjectImportTracker) -> Map<String, Value> {
    let mut value = Value::Object(params.clone());
    rewrite_references(&mut value, &mut |src: &str, id: &Value| {
        let key = reference_key(id)?;
        let resolved = match src {
            "hda" | "ldda" => tracker.find_hda(&key).map(|i| i.get()),
            "hdca" => tracker.find_hdca(&key).map(|i| i.get()),
            "dce" => tracker.dces_by_key.get(&key).map(|e| e.get()),
            _ => None,
        };
        if resolved.is_none() {
            debug!(src, key = %key, "parameter reference outside the archive");
        }
        resolved.map(Value::from)
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
