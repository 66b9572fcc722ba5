use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ModelStoreError, ModelStoreResult};
use crate::model::{HistoryId, ModelGraph, UserId};
use crate::object_store::ObjectStore;
use crate::store::{
    ExportFiles, ExportSummary, IdentifierPolicy, ImportDiscardedDataType, ImportOptions,
    KeyedIdEncoder, ModelExportStore, SerializationOptions,
};

/// Operator configuration, read from a TOML file.
///
/// ```toml
/// [export]
/// export_files = "symlink"
/// include_hidden = true
///
/// [import]
/// allow_library_creation = true
/// discarded_data = "forbid"
///
/// [identifiers]
/// secret = 4242
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub export: ExportConfig,
    pub import: ImportConfig,
    pub identifiers: IdentifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub serialize_dataset_objects: bool,
    pub strip_metadata_files: bool,
    pub export_files: ExportFiles,
    pub include_hidden: bool,
    pub include_deleted: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            serialize_dataset_objects: true,
            strip_metadata_files: true,
            export_files: ExportFiles::Copy,
            include_hidden: false,
            include_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub allow_edit: bool,
    pub allow_library_creation: bool,
    pub allow_dataset_object_edit: bool,
    pub discarded_data: ImportDiscardedDataType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    /// Secret for the reversible key encoder; raw ids are used without one.
    pub secret: Option<u64>,
}

impl ArchiveConfig {
    pub fn load(path: &Path) -> ModelStoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ModelStoreError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ModelStoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn identifier_policy(&self) -> IdentifierPolicy {
        match self.identifiers.secret {
            Some(secret) => IdentifierPolicy::encoded(KeyedIdEncoder::new(secret)),
            None => IdentifierPolicy::RawId,
        }
    }

    pub fn serialization_options(&self, for_edit: bool) -> SerializationOptions {
        SerializationOptions {
            for_edit,
            serialize_dataset_objects: self.export.serialize_dataset_objects,
            strip_metadata_files: self.export.strip_metadata_files,
            identifier_policy: self.identifier_policy(),
        }
    }

    /// Export store writing to `directory` with the `[export]` and `[identifiers]` settings.
    pub fn export_store<'a>(
        &self,
        graph: &'a ModelGraph,
        object_store: &'a dyn ObjectStore,
        directory: &Path,
    ) -> ModelStoreResult<ModelExportStore<'a>> {
        ModelExportStore::new(
            graph,
            object_store,
            directory,
            self.serialization_options(false),
            self.export.export_files,
        )
    }

    /// Export one history, filtering hidden and deleted datasets as configured.
    pub fn export_history(
        &self,
        graph: &ModelGraph,
        object_store: &dyn ObjectStore,
        history: HistoryId,
        directory: &Path,
    ) -> ModelStoreResult<ExportSummary> {
        let include_hidden = self.export.include_hidden;
        let include_deleted = self.export.include_deleted;
        self.export_store(graph, object_store, directory)?
            .run(|export| export.export_history(history, include_hidden, include_deleted))
    }

    pub fn import_options(
        &self,
        import_history: Option<HistoryId>,
        user: Option<UserId>,
    ) -> ImportOptions {
        ImportOptions {
            allow_edit: self.import.allow_edit,
            allow_library_creation: self.import.allow_library_creation,
            allow_dataset_object_edit: self.import.allow_dataset_object_edit,
            discarded_data: self.import.discarded_data,
            import_history,
            user,
        }
    }
}
