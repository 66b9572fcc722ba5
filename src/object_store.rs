//! Blob storage for dataset payloads.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::{create_path_if_not_exists, dir_size};
use crate::errors::{ModelStoreError, ModelStoreResult};
use crate::model::Dataset;

/// Blob store contract consumed by the model stores.
pub trait ObjectStore {
    fn exists(&self, dataset: &Dataset) -> bool;

    /// Path of the primary payload file.
    fn get_filename(&self, dataset: &Dataset) -> ModelStoreResult<PathBuf>;

    /// Directory holding the dataset's extra files; it may not exist.
    fn extra_files_path(&self, dataset: &Dataset) -> PathBuf;

    /// Name of the extra files directory, as passed to `update_from_file`.
    fn extra_files_dir_name(&self, dataset: &Dataset) -> String {
        format!("dataset_{}_files", dataset.id)
    }

    /// Copy `file_name` into the store. With `extra_dir` the file lands below
    /// that directory under `alt_name` (or its own basename) instead of
    /// replacing the primary payload.
    fn update_from_file(
        &mut self,
        dataset: &Dataset,
        file_name: &Path,
        extra_dir: Option<&str>,
        alt_name: Option<&str>,
        create: bool,
    ) -> ModelStoreResult<()>;

    /// Size of the primary payload plus every extra file.
    fn total_size(&self, dataset: &Dataset) -> ModelStoreResult<u64> {
        let primary = match self.get_filename(dataset) {
            Ok(path) if path.exists() => fs::metadata(path)?.len(),
            _ => 0,
        };
        Ok(primary + dir_size(&self.extra_files_path(dataset))?)
    }
}

/// File-backed store: `<root>/<id / 1000>/dataset_<id>.dat` plus a
/// `dataset_<id>_files` sibling directory for extra files.
#[derive(Debug, Clone)]
pub struct DiskObjectStore {
    root: PathBuf,
}

impl DiskObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> ModelStoreResult<Self> {
        let root = root.into();
        create_path_if_not_exists(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket(&self, dataset: &Dataset) -> PathBuf {
        self.root.join(format!("{:03}", dataset.id.get() / 1000))
    }
}

impl ObjectStore for DiskObjectStore {
    fn exists(&self, dataset: &Dataset) -> bool {
        self.get_filename(dataset)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    fn get_filename(&self, dataset: &Dataset) -> ModelStoreResult<PathBuf> {
        if dataset.id.get() == 0 {
            return Err(ModelStoreError::ObjectNotFound(
                "dataset has not been added to the store".to_string(),
            ));
        }
        Ok(self
            .bucket(dataset)
            .join(format!("dataset_{}.dat", dataset.id)))
    }

    fn extra_files_path(&self, dataset: &Dataset) -> PathBuf {
        self.bucket(dataset).join(self.extra_files_dir_name(dataset))
    }

    fn update_from_file(
        &mut self,
        dataset: &Dataset,
        file_name: &Path,
        extra_dir: Option<&str>,
        alt_name: Option<&str>,
        create: bool,
    ) -> ModelStoreResult<()> {
        if !file_name.is_file() {
            return Err(ModelStoreError::ObjectNotFound(format!(
                "source file {:?} does not exist",
                file_name
            )));
        }
        let destination = match extra_dir {
            Some(dir) => {
                let name = match alt_name {
                    Some(name) => PathBuf::from(name),
                    None => PathBuf::from(file_name.file_name().ok_or_else(|| {
                        ModelStoreError::ObjectNotFound(format!(
                            "source file {:?} has no file name",
                            file_name
                        ))
                    })?),
                };
                self.bucket(dataset).join(dir).join(name)
            }
            None => self.get_filename(dataset)?,
        };
        if let Some(parent) = destination.parent() {
            if !parent.exists() {
                if !create {
                    return Err(ModelStoreError::ObjectNotFound(format!(
                        "object store directory {:?} does not exist",
                        parent
                    )));
                }
                fs::create_dir_all(parent)?;
            }
        }
        fs::copy(file_name, &destination)?;
        debug!(dataset = %dataset.id, destination = ?destination, "stored payload");
        Ok(())
    }
}
