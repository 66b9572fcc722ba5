//! Container adapters around the archive directory layout.
//!
//! Export always writes a plain directory first; [`ExportTarget::finish`]
//! wraps it into the requested container. On the input side
//! [`open_archive`] unwraps tar, tar.gz and bag containers into a directory
//! the import store can read.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use super::format::{is_bag, BAGIT_FILENAME};
use crate::common::{
    copy_dir, create_path_if_not_exists, list_files, resolve_archive_path, write_string_to_file,
};
use crate::errors::{ModelStoreError, ModelStoreResult};

pub const BAG_INFO_FILENAME: &str = "bag-info.txt";
pub const BAG_MANIFEST_FILENAME: &str = "manifest-sha256.txt";
pub const BAG_PAYLOAD_DIR: &str = "data";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportContainer {
    Directory,
    Tar { gzip: bool },
    Bag { zip: bool },
}

impl ExportContainer {
    /// Pick a container from the output name: `.tar`, `.tar.gz`/`.tgz`, and
    /// with `bag` set, `.zip` for a zipped bag. Anything else is a directory.
    pub fn for_output(output: &Path, bag: bool) -> ExportContainer {
        let name = output
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if bag {
            return ExportContainer::Bag {
                zip: name.ends_with(".zip"),
            };
        }
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ExportContainer::Tar { gzip: true }
        } else if name.ends_with(".tar") {
            ExportContainer::Tar { gzip: false }
        } else {
            ExportContainer::Directory
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportContainer::Directory => "directory",
            ExportContainer::Tar { gzip: false } => "tar",
            ExportContainer::Tar { gzip: true } => "tar.gz",
            ExportContainer::Bag { zip: false } => "bag",
            ExportContainer::Bag { zip: true } => "bag.zip",
        }
    }

    /// Wrap an archive directory into `output`.
    pub fn wrap(self, source: &Path, output: &Path) -> ModelStoreResult<()> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                create_path_if_not_exists(parent)?;
            }
        }
        match self {
            ExportContainer::Directory => copy_dir(source, output)?,
            ExportContainer::Tar { gzip } => {
                let file = File::create(output)?;
                if gzip {
                    let encoder = write_tar(GzEncoder::new(file, Compression::default()), source)?;
                    encoder.finish()?;
                } else {
                    write_tar(file, source)?;
                }
            }
            ExportContainer::Bag { zip: false } => write_bag(source, output)?,
            ExportContainer::Bag { zip: true } => {
                let staging = TempDir::new()?;
                let bag_root = staging.path().join("bag");
                write_bag(source, &bag_root)?;
                write_zip(&bag_root, output)?;
            }
        }
        info!(container = self.as_str(), output = ?output, "packed archive");
        Ok(())
    }
}

/// Where an export writes its directory, and how it is finally packaged.
pub struct ExportTarget {
    container: ExportContainer,
    output: PathBuf,
    staging: Option<TempDir>,
}

impl ExportTarget {
    pub fn new(container: ExportContainer, output: impl Into<PathBuf>) -> ModelStoreResult<Self> {
        let output = output.into();
        let staging = match container {
            ExportContainer::Directory => {
                create_path_if_not_exists(&output)?;
                None
            }
            _ => Some(TempDir::new()?),
        };
        Ok(Self {
            container,
            output,
            staging,
        })
    }

    /// Directory the export store should write into.
    pub fn directory(&self) -> &Path {
        match &self.staging {
            Some(staging) => staging.path(),
            None => &self.output,
        }
    }

    pub fn container(&self) -> ExportContainer {
        self.container
    }

    /// Package the staged directory and remove the staging area.
    pub fn finish(self) -> ModelStoreResult<PathBuf> {
        if let Some(staging) = self.staging {
            self.container.wrap(staging.path(), &self.output)?;
            staging.close()?;
        }
        Ok(self.output)
    }
}

fn write_tar<W: Write>(writer: W, source: &Path) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    // Symlinked payloads are packed as the files they point at.
    builder.follow_symlinks(true);
    builder.append_dir_all(".", source)?;
    builder.into_inner()
}

fn sha256_file(path: &Path) -> ModelStoreResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lay out `source` as a bag rooted at `bag_root`.
fn write_bag(source: &Path, bag_root: &Path) -> ModelStoreResult<()> {
    let payload = bag_root.join(BAG_PAYLOAD_DIR);
    copy_dir(source, &payload)?;

    let mut manifest = String::new();
    let mut octets = 0u64;
    let files = list_files(&payload)?;
    for relative in &files {
        let path = payload.join(relative);
        octets += fs::metadata(&path)?.len();
        manifest.push_str(&format!(
            "{}  {}/{}\n",
            sha256_file(&path)?,
            BAG_PAYLOAD_DIR,
            archive_name(relative)
        ));
    }
    write_string_to_file(
        &bag_root.join(BAGIT_FILENAME),
        "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
    )?;
    write_string_to_file(
        &bag_root.join(BAG_INFO_FILENAME),
        &format!(
            "Bagging-Date: {}\nPayload-Oxum: {}.{}\n",
            Utc::now().format("%Y-%m-%d"),
            octets,
            files.len()
        ),
    )?;
    write_string_to_file(&bag_root.join(BAG_MANIFEST_FILENAME), &manifest)?;
    debug!(files = files.len(), octets, "wrote bag manifest");
    Ok(())
}

fn write_zip(source: &Path, output: &Path) -> ModelStoreResult<()> {
    let mut zip = ZipWriter::new(File::create(output)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for relative in list_files(source)? {
        zip.start_file(archive_name(&relative), options)?;
        let mut file = File::open(source.join(&relative))?;
        io::copy(&mut file, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

/// Check every payload file of a bag against its sha256 manifest.
pub fn validate_bag(bag_root: &Path) -> ModelStoreResult<()> {
    let manifest_path = bag_root.join(BAG_MANIFEST_FILENAME);
    if !manifest_path.is_file() {
        return Err(ModelStoreError::MalformedContents(format!(
            "bag at {:?} has no {}",
            bag_root, BAG_MANIFEST_FILENAME
        )));
    }
    let manifest = fs::read_to_string(&manifest_path)?;
    let mut listed = 0usize;
    for line in manifest.lines().filter(|line| !line.trim().is_empty()) {
        let (digest, relative) = line.split_once(char::is_whitespace).ok_or_else(|| {
            ModelStoreError::MalformedContents(format!("malformed manifest line '{}'", line))
        })?;
        let path = resolve_archive_path(bag_root, relative.trim())?;
        if !path.is_file() {
            return Err(ModelStoreError::MalformedContents(format!(
                "bag payload {} is missing",
                relative.trim()
            )));
        }
        let actual = sha256_file(&path)?;
        if !actual.eq_ignore_ascii_case(digest) {
            return Err(ModelStoreError::MalformedContents(format!(
                "checksum mismatch for {}",
                relative.trim()
            )));
        }
        listed += 1;
    }
    let present = list_files(&bag_root.join(BAG_PAYLOAD_DIR))?.len();
    if present != listed {
        return Err(ModelStoreError::MalformedContents(format!(
            "bag manifest lists {} files but the payload holds {}",
            listed, present
        )));
    }
    debug!(files = listed, "validated bag");
    Ok(())
}

/// An archive made readable as a directory. Temporary unpack space lives as
/// long as this value.
#[derive(Debug)]
pub struct UnpackedArchive {
    root: PathBuf,
    _staging: Option<TempDir>,
}

impl UnpackedArchive {
    /// Directory holding the attribute files.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Unwrap a directory, bag, tar, tar.gz or zipped bag.
pub fn open_archive(path: &Path) -> ModelStoreResult<UnpackedArchive> {
    if path.is_dir() {
        let root = bag_payload_root(path)?;
        return Ok(UnpackedArchive {
            root,
            _staging: None,
        });
    }
    if !path.is_file() {
        return Err(ModelStoreError::ObjectNotFound(format!(
            "archive {:?} does not exist",
            path
        )));
    }

    let staging = TempDir::new()?;
    let mut magic = [0u8; 4];
    let read = File::open(path)?.read(&mut magic)?;
    if read >= 2 && magic[..2] == GZIP_MAGIC {
        unpack_tar(GzDecoder::new(File::open(path)?), staging.path())?;
    } else if read == 4 && magic == ZIP_MAGIC {
        unpack_zip(path, staging.path())?;
    } else {
        unpack_tar(File::open(path)?, staging.path())?;
    }
    info!(archive = ?path, "unpacked archive");

    let root = bag_payload_root(staging.path())?;
    Ok(UnpackedArchive {
        root,
        _staging: Some(staging),
    })
}

/// Unwrap `archive` into `target` as a plain archive directory.
pub fn unpack_to(archive: &Path, target: &Path) -> ModelStoreResult<PathBuf> {
    let unpacked = open_archive(archive)?;
    copy_dir(unpacked.root(), target)?;
    Ok(target.to_path_buf())
}

fn bag_payload_root(directory: &Path) -> ModelStoreResult<PathBuf> {
    if is_bag(directory) {
        validate_bag(directory)?;
        Ok(directory.join(BAG_PAYLOAD_DIR))
    } else {
        Ok(directory.to_path_buf())
    }
}

fn unpack_tar<R: Read>(reader: R, target: &Path) -> ModelStoreResult<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            return Err(ModelStoreError::MalformedContents(format!(
                "archive entry {:?} is a link",
                entry.path()?
            )));
        }
        // unpack_in refuses entries that would land outside the target.
        if !entry.unpack_in(target)? {
            return Err(ModelStoreError::MalformedContents(format!(
                "archive entry {:?} escapes the archive root",
                entry.path()?
            )));
        }
    }
    Ok(())
}

fn unpack_zip(path: &Path, target: &Path) -> ModelStoreResult<()> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let relative = file.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            ModelStoreError::MalformedContents(format!(
                "zip entry '{}' escapes the archive root",
                file.name()
            ))
        })?;
        let destination = target.join(relative);
        if file.is_dir() {
            create_path_if_not_exists(&destination)?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            create_path_if_not_exists(parent)?;
        }
        let mut out = File::create(&destination)?;
        io::copy(&mut file, &mut out)?;
    }
    Ok(())
}
