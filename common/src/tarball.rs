//! Gzip-compressed tar archives
//!
//! Whether a file is an archive is decided by its name alone. Extraction validates the source,
//! prepares the destination and unpacks the entries, all inside one transaction gate
//! acquisition.

use std::path::Path;

use tracing::instrument;

use crate::entity::PathEntity;
use crate::error::{Error, IoResultExt};
use crate::gate::TransactionGate;
use crate::summary::Summary;

const ARCHIVE_EXTENSION: &str = "tgz";
const ARCHIVE_SUFFIX: &str = ".tar.gz";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tarball {
    entity: PathEntity,
}

impl Tarball {
    pub fn new(path: impl Into<PathEntity>) -> Self {
        Self {
            entity: path.into(),
        }
    }

    pub fn entity(&self) -> &PathEntity {
        &self.entity
    }

    /// True for a regular file named `*.tgz` or `*.tar.gz`. The contents are never inspected.
    #[instrument(skip(self), fields(path = ?self.entity.given_path()))]
    pub async fn is_tarball(&self, resolve_symlink: bool) -> Result<bool, Error> {
        if !self.entity.is_file(resolve_symlink).await? {
            return Ok(false);
        }
        Ok(has_archive_name(&self.entity))
    }

    /// Unpacks the archive into `into`, creating it (and its parents) when missing.
    #[instrument(skip(self, gate, into), fields(path = ?self.entity.given_path()))]
    pub async fn extract_into(
        &self,
        gate: &TransactionGate,
        into: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Summary, Error> {
        let into = into.into();
        gate.transaction(move || async move {
            if !self.entity.exists(resolve_symlink).await? {
                return Err(Error::not_found(self.entity.given_path()));
            }
            if !self.is_tarball(resolve_symlink).await? {
                return Err(Error::archive_invalid(&self.entity.absolute_path()));
            }
            into.create_directory(true, None).await?;
            let source = self.entity.absolute_path();
            let destination = into.absolute_path();
            tracing::debug!("extracting {:?} into {:?}", &source, &destination);
            let _open_file_guard = throttle::open_file_permit().await;
            tokio::task::spawn_blocking(move || unpack(&source, &destination))
                .await
                .map_err(Error::join)?
        })
        .await
    }
}

impl From<PathEntity> for Tarball {
    fn from(entity: PathEntity) -> Self {
        Self { entity }
    }
}

fn has_archive_name(entity: &PathEntity) -> bool {
    if entity.ext_name().as_deref() == Some(ARCHIVE_EXTENSION) {
        return true;
    }
    entity
        .base_name()
        .is_some_and(|name| name.len() > ARCHIVE_SUFFIX.len() && name.ends_with(ARCHIVE_SUFFIX))
}

fn unpack(source: &Path, destination: &Path) -> Result<Summary, Error> {
    let file = std::fs::File::open(source)
        .io_context(|| format!("cannot open {:?} for reading", source))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut summary = Summary::default();
    let entries = archive
        .entries()
        .io_context(|| format!("failed reading archive {:?}", source))?;
    for entry in entries {
        let mut entry = entry
            .io_context(|| format!("failed reading archive {:?}", source))
            .map_err(|err| err.with_summary(summary))?;
        let entry_type = entry.header().entry_type();
        let size = entry.size();
        let unpacked = entry
            .unpack_in(destination)
            .io_context(|| format!("failed unpacking {:?} into {:?}", source, destination))
            .map_err(|err| err.with_summary(summary))?;
        if !unpacked {
            // entries escaping the destination are skipped by the codec
            tracing::info!("skipped an archive entry outside of {:?}", destination);
            continue;
        }
        if entry_type.is_dir() {
            summary.directories_created += 1;
        } else if entry_type.is_symlink() {
            summary.symlinks_created += 1;
        } else if entry_type.is_file() {
            summary.files_copied += 1;
            summary.bytes_copied += size;
        }
    }
    if summary == Summary::default() {
        tracing::debug!("archive {:?} was empty", source);
    }
    Ok(summary)
}
