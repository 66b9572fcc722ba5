use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{ModelStoreError, ModelStoreResult};

pub fn create_path_if_not_exists(path: &Path) -> ModelStoreResult<()> {
    if !path.exists() {
        info!("Creating path: {:?}", path);
        fs::create_dir_all(path)?;
    }
    Ok(())
}

pub fn write_string_to_file(path: &Path, content: &str) -> ModelStoreResult<()> {
    if let Some(parent) = path.parent() {
        create_path_if_not_exists(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Write `value` as a single JSON document.
pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> ModelStoreResult<()> {
    if let Some(parent) = path.parent() {
        create_path_if_not_exists(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    debug!("Wrote {:?}", path);
    Ok(())
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> ModelStoreResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Read a JSON array file, treating a missing file as empty.
pub fn read_json_array_file<T: DeserializeOwned>(path: &Path) -> ModelStoreResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_json_file(path)
}

pub fn has_hidden_component(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(value) => value.to_string_lossy().starts_with('.'),
        Component::ParentDir | Component::RootDir | Component::Prefix(_) => true,
        Component::CurDir => false,
    })
}

/// Reject absolute paths and `..` components in an archive-relative path.
pub fn sanitize_relative_path(path: &str) -> ModelStoreResult<PathBuf> {
    let candidate = Path::new(path);
    if candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(ModelStoreError::MalformedContents(format!(
            "Invalid path component in archive entry: {}",
            path
        )));
    }
    Ok(candidate
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}

/// Resolve `relative` inside `root`, refusing symlinks and anything that lands outside it.
pub fn resolve_archive_path(root: &Path, relative: &str) -> ModelStoreResult<PathBuf> {
    let sanitized = sanitize_relative_path(relative)?;
    let mut current = root.to_path_buf();
    for component in sanitized.components() {
        current.push(component);
        if let Ok(meta) = fs::symlink_metadata(&current) {
            if meta.file_type().is_symlink() {
                return Err(ModelStoreError::MalformedContents(format!(
                    "Archive entry {} is a symlink",
                    relative
                )));
            }
        }
    }
    if current.exists() {
        let canonical_root = root.canonicalize()?;
        let canonical = current.canonicalize()?;
        if !canonical.starts_with(&canonical_root) {
            return Err(ModelStoreError::MalformedContents(format!(
                "Archive entry {} escapes the archive root",
                relative
            )));
        }
    }
    Ok(current)
}

/// Total size in bytes of every regular file below `path`.
pub fn dir_size(path: &Path) -> ModelStoreResult<u64> {
    if path.is_file() {
        return Ok(fs::metadata(path)?.len());
    }
    let mut total = 0u64;
    if !path.is_dir() {
        return Ok(total);
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        if entry_path.is_dir() {
            total += dir_size(&entry_path)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Relative paths of every file below `root`, sorted.
pub fn list_files(root: &Path) -> ModelStoreResult<Vec<PathBuf>> {
    fn collect(dir: &Path, root: &Path, acc: &mut Vec<PathBuf>) -> ModelStoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .map_err(|e| ModelStoreError::Container(e.to_string()))?;
            if path.is_dir() {
                collect(&path, root, acc)?;
            } else {
                acc.push(rel.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    if root.is_dir() {
        collect(root, root, &mut files)?;
    }
    files.sort();
    Ok(files)
}

/// Recursively copy the contents of `source` into `target`.
pub fn copy_dir(source: &Path, target: &Path) -> ModelStoreResult<()> {
    create_path_if_not_exists(target)?;
    for rel in list_files(source)? {
        let destination = target.join(&rel);
        if let Some(parent) = destination.parent() {
            create_path_if_not_exists(parent)?;
        }
        fs::copy(source.join(&rel), destination)?;
    }
    Ok(())
}
