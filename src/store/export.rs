//! Writes an archive directory from a live graph.
//!
//! Entities are registered first (`add_dataset`, `export_history`, ...) and
//! written by [`ModelExportStore::finish`]. Callers that build the export in a
//! closure use [`ModelExportStore::run`], which finalizes only when the
//! closure succeeds and leaves the partial directory behind otherwise.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, info};

use super::attrs::{DatasetRecord, ExportAttrs};
use super::serialize::{serialize_dataset, SerializeContext, SerializeFilesHandler, SerializeModel};
use super::*;
use crate::common::{copy_dir, create_path_if_not_exists, write_json_file};
use crate::errors::ModelStoreResult;
use crate::model::{
    CollectionInstanceId, Dataset, DatasetId, HistoryId, ImplicitCollectionJobsId, InstanceId,
    JobId, LibraryId, ModelGraph, UserId,
};
use crate::object_store::ObjectStore;

/// Record counts per attribute file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub datasets: usize,
    pub provenance_datasets: usize,
    pub collections: usize,
    pub libraries: usize,
    pub jobs: usize,
    pub implicit_collection_jobs: usize,
}

/// Copies or links payload files into `datasets/`.
struct ArchiveFilesWriter<'a> {
    object_store: &'a dyn ObjectStore,
    export_directory: &'a Path,
    export_files: ExportFiles,
}

impl ArchiveFilesWriter<'_> {
    fn place(&self, source: &Path, target: &Path) -> ModelStoreResult<()> {
        match self.export_files {
            ExportFiles::Copy => {
                if source.is_dir() {
                    copy_dir(source, target)?;
                } else {
                    fs::copy(source, target)?;
                }
            }
            #[cfg(unix)]
            ExportFiles::Symlink => std::os::unix::fs::symlink(source, target)?,
            #[cfg(not(unix))]
            ExportFiles::Symlink => {
                if source.is_dir() {
                    copy_dir(source, target)?;
                } else {
                    fs::copy(source, target)?;
                }
            }
        }
        Ok(())
    }
}

impl SerializeFilesHandler for ArchiveFilesWriter<'_> {
    fn serialize_files(
        &mut self,
        dataset: &Dataset,
        key: &str,
        extension: &str,
        record: &mut DatasetRecord,
    ) -> ModelStoreResult<()> {
        let datasets_dir = self.export_directory.join(DATASETS_DIR);
        create_path_if_not_exists(&datasets_dir)?;

        if self.object_store.exists(dataset) {
            let source = self.object_store.get_filename(dataset)?;
            let file_name = format!("{}/dataset_{}.{}", DATASETS_DIR, key, extension);
            self.place(&source, &self.export_directory.join(&file_name))?;
            record.file_name = Some(file_name);
        } else {
            debug!(dataset = %dataset.id, "payload missing from object store");
        }

        let extra_source = self.object_store.extra_files_path(dataset);
        if extra_source.is_dir() {
            let extra_name = format!("{}/extra_files_path_{}", DATASETS_DIR, key);
            self.place(&extra_source, &self.export_directory.join(&extra_name))?;
            record.extra_files_path = Some(extra_name);
        }
        Ok(())
    }
}

pub struct ModelExportStore<'a> {
    graph: &'a ModelGraph,
    object_store: &'a dyn ObjectStore,
    export_directory: PathBuf,
    options: SerializationOptions,
    export_files: ExportFiles,
    user: Option<UserId>,
    history: Option<HistoryId>,
    /// Registered instances and whether their payload is included.
    included_datasets: IndexMap<InstanceId, bool>,
    collection_datasets: IndexSet<InstanceId>,
    collections: IndexSet<CollectionInstanceId>,
    libraries: IndexSet<LibraryId>,
    library_datasets_by_physical: HashMap<DatasetId, InstanceId>,
    instance_aliases: HashMap<InstanceId, InstanceId>,
}

impl<'a> ModelExportStore<'a> {
    pub fn new(
        graph: &'a ModelGraph,
        object_store: &'a dyn ObjectStore,
        export_directory: impl Into<PathBuf>,
        options: SerializationOptions,
        export_files: ExportFiles,
    ) -> ModelStoreResult<Self> {
        let export_directory = export_directory.into();
        create_path_if_not_exists(&export_directory)?;
        Ok(Self {
            graph,
            object_store,
            export_directory,
            options,
            export_files,
            user: None,
            history: None,
            included_datasets: IndexMap::new(),
            collection_datasets: IndexSet::new(),
            collections: IndexSet::new(),
            libraries: IndexSet::new(),
            library_datasets_by_physical: HashMap::new(),
            instance_aliases: HashMap::new(),
        })
    }

    /// Export annotations owned by `user`.
    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn export_directory(&self) -> &Path {
        &self.export_directory
    }

    /// Register an instance. Registering again can only upgrade a
    /// provenance-only entry to one with files.
    pub fn add_dataset(&mut self, instance: InstanceId, include_files: bool) {
        let entry = self.included_datasets.entry(instance).or_insert(false);
        *entry |= include_files;
    }

    pub fn add_dataset_collection(&mut self, collection: CollectionInstanceId) {
        self.collections.insert(collection);
    }

    /// Register a collection instance and every dataset below it.
    pub fn export_collection(&mut self, collection: CollectionInstanceId, include_deleted: bool) {
        self.add_dataset_collection(collection);
        let row = self.graph.collection_instance(collection);
        for instance in self.graph.collection_dataset_instances(row.collection) {
            let deleted = self.graph.instance(instance).deleted;
            self.add_dataset(instance, !deleted || include_deleted);
            self.collection_datasets.insert(instance);
        }
    }

    pub fn export_history(
        &mut self,
        history: HistoryId,
        include_hidden: bool,
        include_deleted: bool,
    ) -> ModelStoreResult<()> {
        self.history = Some(history);
        let graph = self.graph;

        for collection in graph.history_collection_instances(history) {
            let row = graph.collection_instance(collection);
            let populated = graph.collection(row.collection).populated();
            if row.deleted || !populated {
                continue;
            }
            self.export_collection(collection, include_deleted);
        }

        let mut registered = 0usize;
        for instance in graph.history_instances(history) {
            let row = graph.instance(instance);
            if graph.dataset(row.dataset).purged {
                continue;
            }
            let mut include_files =
                (row.visible || include_hidden) && (!row.deleted || include_deleted);
            if !row.deleted && self.collection_datasets.contains(&instance) {
                include_files = true;
            }
            if !self.included_datasets.contains_key(&instance) {
                self.add_dataset(instance, include_files);
                registered += 1;
            }
        }
        info!(
            history = %history,
            collections = self.collections.len(),
            datasets = registered,
            "registered history contents"
        );
        Ok(())
    }

    /// Register a library and every dataset in its folder tree.
    ///
    /// Instances are deduplicated on their physical dataset; later instances
    /// sharing it are written as references to the first one's record.
    pub fn export_library(
        &mut self,
        library: LibraryId,
        include_hidden: bool,
        include_deleted: bool,
    ) -> ModelStoreResult<()> {
        let graph = self.graph;
        self.libraries.insert(library);
        let root = graph.library(library).root_folder;
        for library_dataset in graph.folder_library_datasets(root) {
            let instance = graph.library_dataset(library_dataset).instance;
            let row = graph.instance(instance);
            if let Some(first) = self.library_datasets_by_physical.get(&row.dataset) {
                if *first != instance {
                    self.instance_aliases.insert(instance, *first);
                }
                continue;
            }
            self.library_datasets_by_physical.insert(row.dataset, instance);
            let include_files =
                (row.visible || include_hidden) && (!row.deleted || include_deleted);
            self.add_dataset(instance, include_files);
        }
        Ok(())
    }

    /// Run `build` against this store and finalize only if it succeeds.
    pub fn run<F>(mut self, build: F) -> ModelStoreResult<ExportSummary>
    where
        F: FnOnce(&mut Self) -> ModelStoreResult<()>,
    {
        build(&mut self)?;
        self.finish()
    }

    /// Jobs that produced the registered content, plus implicit groupings.
    fn collect_jobs(&self) -> (IndexSet<JobId>, IndexSet<ImplicitCollectionJobsId>) {
        let graph = self.graph;
        let mut jobs = IndexSet::new();
        let mut groupings = IndexSet::new();

        for (instance, include_files) in &self.included_datasets {
            if !include_files {
                continue;
            }
            let root = graph.instance_copy_root(*instance);
            if let Some(job) = graph.instance(root).creating_job {
                jobs.insert(job);
            }
        }

        for collection in &self.collections {
            let root = graph.collection_instance(graph.collection_instance_copy_root(*collection));
            if let Some(job) = root.job {
                jobs.insert(job);
            }
            if let Some(grouping) = root.implicit_collection_jobs {
                if groupings.insert(grouping) {
                    for entry in &graph.implicit_collection_jobs(grouping).jobs {
                        jobs.insert(entry.job);
                    }
                }
            }
        }
        (jobs, groupings)
    }

    /// Write every attribute file.
    pub fn finish(self) -> ModelStoreResult<ExportSummary> {
        let graph = self.graph;
        let mut ctx = SerializeContext::new(graph, &self.options);
        ctx.user = self.user;
        ctx.instance_aliases = Some(&self.instance_aliases);

        let mut files = ArchiveFilesWriter {
            object_store: self.object_store,
            export_directory: &self.export_directory,
            export_files: self.export_files,
        };

        let mut datasets = Vec::new();
        let mut provenance = Vec::new();
        for (instance, include_files) in &self.included_datasets {
            if *include_files {
                datasets.push(serialize_dataset(&ctx, *instance, Some(&mut files))?);
            } else {
                provenance.push(serialize_dataset(&ctx, *instance, None)?);
            }
        }
        let dir = &self.export_directory;
        write_json_file(&dir.join(ATTRS_FILENAME_DATASETS), &datasets)?;
        write_json_file(
            &dir.join(format!("{}{}", ATTRS_FILENAME_DATASETS, PROVENANCE_SUFFIX)),
            &provenance,
        )?;

        if let Some(history) = self.history {
            write_json_file(
                &dir.join(ATTRS_FILENAME_HISTORY),
                &graph.history(history).serialize(&ctx),
            )?;
        }

        let libraries: Vec<_> = self
            .libraries
            .iter()
            .map(|library| graph.library(*library).serialize(&ctx))
            .collect();
        write_json_file(&dir.join(ATTRS_FILENAME_LIBRARIES), &libraries)?;

        let collections: Vec<_> = self
            .collections
            .iter()
            .map(|collection| graph.collection_instance(*collection).serialize(&ctx))
            .collect();
        write_json_file(&dir.join(ATTRS_FILENAME_COLLECTIONS), &collections)?;

        let (job_ids, grouping_ids) = self.collect_jobs();
        let jobs: Vec<_> = job_ids
            .iter()
            .map(|job| graph.job(*job).serialize(&ctx))
            .collect();
        write_json_file(&dir.join(ATTRS_FILENAME_JOBS), &jobs)?;

        let groupings: Vec<_> = grouping_ids
            .iter()
            .map(|grouping| graph.implicit_collection_jobs(*grouping).serialize(&ctx))
            .collect();
        write_json_file(&dir.join(ATTRS_FILENAME_IMPLICIT_COLLECTION_JOBS), &groupings)?;

        write_json_file(
            &dir.join(ATTRS_FILENAME_EXPORT),
            &ExportAttrs {
                format_version: ARCHIVE_FORMAT_VERSION,
            },
        )?;

        let summary = ExportSummary {
            datasets: datasets.len(),
            provenance_datasets: provenance.len(),
            collections: collections.len(),
            libraries: libraries.len(),
            jobs: jobs.len(),
            implicit_collection_jobs: groupings.len(),
        };
        info!(directory = ?dir, ?summary, "export finished");
        Ok(summary)
    }
}
