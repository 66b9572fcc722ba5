#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use modelstore::model::{
    CollectionInstanceId, Dataset, DatasetId, DatasetInstance, DatasetState, HistoryId,
    InstanceId, LiveSession, ModelGraph,
};
use modelstore::object_store::{DiskObjectStore, ObjectStore};
use modelstore::store::{
    ExportFiles, ExportSummary, ImportOptions, ImportSummary, ModelExportStore, ModelImportStore,
    SerializationOptions,
};
use tempfile::TempDir;

/// Source graph plus the blob store holding its payloads.
pub struct Fixture {
    pub scratch: TempDir,
    pub store: DiskObjectStore,
    pub graph: ModelGraph,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let scratch = tempfile::tempdir()?;
        let store = DiskObjectStore::new(scratch.path().join("source-objects"))?;
        Ok(Self {
            scratch,
            store,
            graph: ModelGraph::new(),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.scratch.path().join(name)
    }

    fn stored_dataset(&mut self, content: &str) -> Result<DatasetId> {
        let dataset = self.graph.add_dataset(Dataset::new(DatasetState::Ok));
        let upload = self.scratch.path().join(format!("upload-{}", dataset));
        fs::write(&upload, content)?;
        self.store
            .update_from_file(self.graph.dataset(dataset), &upload, None, None, true)?;
        Ok(dataset)
    }

    /// A new history dataset instance with `content` as its payload.
    pub fn stored_instance(&mut self, name: &str, content: &str) -> Result<InstanceId> {
        let dataset = self.stored_dataset(content)?;
        Ok(self
            .graph
            .add_instance(DatasetInstance::new_hda(name, dataset).with_extension("txt")))
    }

    /// A new library dataset instance with `content` as its payload.
    pub fn stored_library_instance(&mut self, name: &str, content: &str) -> Result<InstanceId> {
        let dataset = self.stored_dataset(content)?;
        Ok(self
            .graph
            .add_instance(DatasetInstance::new_ldda(name, dataset).with_extension("txt")))
    }

    /// Payload currently stored for `instance`.
    pub fn payload(&self, instance: InstanceId) -> Result<String> {
        let dataset = self.graph.dataset(self.graph.instance(instance).dataset);
        Ok(fs::read_to_string(self.store.get_filename(dataset)?)?)
    }

    /// Import `archive` back into the source graph itself.
    pub fn import_in_place(
        &mut self,
        archive: &Path,
        options: ImportOptions,
    ) -> Result<ImportSummary> {
        let mut session = LiveSession::new(&mut self.graph);
        let summary = ModelImportStore::new(&mut session, &mut self.store, archive, options)?
            .perform_import()?;
        Ok(summary)
    }

    /// A history copy of `source`.
    pub fn copy_instance(&mut self, source: InstanceId) -> InstanceId {
        let copy = DatasetInstance::copied_from(self.graph.instance(source), source);
        self.graph.add_instance(copy)
    }

    pub fn export_history(
        &self,
        history: HistoryId,
        directory: &Path,
        include_deleted: bool,
    ) -> Result<ExportSummary> {
        let summary = ModelExportStore::new(
            &self.graph,
            &self.store,
            directory,
            SerializationOptions::default(),
            ExportFiles::Copy,
        )?
        .run(|export| export.export_history(history, false, include_deleted))?;
        Ok(summary)
    }
}

/// Destination graph and blob store for imports.
pub struct Destination {
    pub objects: TempDir,
    pub store: DiskObjectStore,
    pub graph: ModelGraph,
}

impl Destination {
    pub fn new() -> Result<Self> {
        let objects = tempfile::tempdir()?;
        let store = DiskObjectStore::new(objects.path())?;
        Ok(Self {
            objects,
            store,
            graph: ModelGraph::new(),
        })
    }

    pub fn import(&mut self, archive: &Path, options: ImportOptions) -> Result<ImportSummary> {
        let mut session = LiveSession::new(&mut self.graph);
        let summary = ModelImportStore::new(&mut session, &mut self.store, archive, options)?
            .perform_import()?;
        Ok(summary)
    }

    pub fn payload(&self, instance: InstanceId) -> Result<String> {
        let dataset = self.graph.dataset(self.graph.instance(instance).dataset);
        Ok(fs::read_to_string(self.store.get_filename(dataset)?)?)
    }

    pub fn hids(&self, history: HistoryId) -> Vec<Option<u32>> {
        self.graph
            .history_instances(history)
            .into_iter()
            .map(|instance| self.graph.instance(instance).hid)
            .collect()
    }
}

pub fn key(instance: InstanceId) -> String {
    instance.get().to_string()
}

pub fn collection_key(instance: CollectionInstanceId) -> String {
    instance.get().to_string()
}
