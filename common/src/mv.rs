//! Relocating trees
//!
//! A move is a rename whenever the file system allows it. Only when source and destination
//! live on different devices does a node fall back to copy-then-remove, and for a directory the
//! fallback recurses so every child gets its own chance at a plain rename.

use std::path::Path;

use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::Settings;
use crate::copy::{self, CopyOptions};
use crate::entity::{ensure_parent, node_metadata};
use crate::error::{Error, IoResultExt};
use crate::fanout;
use crate::policy::ConflictPolicy;
use crate::summary::Summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MoveOptions {
    /// Required to move a directory.
    pub recursive: bool,
    pub policy: ConflictPolicy,
    /// Move what a top-level source symlink points to (as a copy) and remove the link.
    pub resolve_symlink: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            policy: ConflictPolicy::Stop,
            resolve_symlink: false,
        }
    }
}

fn moved(md: &std::fs::Metadata) -> Summary {
    let mut summary = Summary::default();
    if md.is_dir() {
        summary.directories_moved = 1;
    } else if md.is_symlink() {
        summary.symlinks_moved = 1;
    } else {
        summary.files_moved = 1;
    }
    summary
}

fn is_cross_device(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(libc::EXDEV)
}

/// Moves the node at `src` so that it appears at `dst`.
#[instrument]
#[async_recursion]
pub async fn mv(
    src: &Path,
    dst: &Path,
    options: &MoveOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    let src_metadata = match node_metadata(src, false).await? {
        Some(md) => md,
        None => return Err(Error::not_found(src)),
    };
    if src_metadata.is_symlink() && options.resolve_symlink {
        let link = tokio::fs::canonicalize(src)
            .await
            .io_context(|| format!("failed resolving symlink {:?}", src))?;
        tracing::debug!("moving the referent {:?} of the symlink", &link);
        let copy_options = CopyOptions {
            recursive: options.recursive,
            policy: options.policy,
            resolve_symlink: false,
        };
        let copied = copy::copy(&link, dst, &copy_options, settings).await?;
        tokio::fs::remove_file(src)
            .await
            .io_context(|| format!("failed removing symlink {:?}", src))
            .map_err(|err| err.with_summary(copied))?;
        return Ok(copied
            + Summary {
                symlinks_removed: 1,
                ..Default::default()
            });
    }
    let file_type = src_metadata.file_type();
    if !(file_type.is_file() || file_type.is_dir() || file_type.is_symlink()) {
        return Err(Error::type_mismatch(format!(
            "cannot move {:?}: unsupported file type {:?}",
            src, file_type
        )));
    }
    if src_metadata.is_dir() && !options.recursive {
        return Err(Error::type_mismatch(format!(
            "cannot move directory {:?} without recursive",
            src
        )));
    }
    options.policy.check_destination(src, dst).await?;
    ensure_parent(dst).await?;
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(moved(&src_metadata)),
        Err(error) if is_cross_device(&error) => {
            tracing::info!("{:?} and {:?} are on different devices, copying instead", src, dst);
            move_across_devices(src, dst, &src_metadata, options, settings).await
        }
        Err(error) => Err(Error::io(
            error,
            format!("failed moving {:?} to {:?}", src, dst),
        )),
    }
}

async fn move_across_devices(
    src: &Path,
    dst: &Path,
    src_metadata: &std::fs::Metadata,
    options: &MoveOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    if src_metadata.is_dir() {
        tokio::fs::create_dir(dst)
            .await
            .io_context(|| format!("cannot create directory {:?}", dst))?;
        let created = Summary {
            directories_created: 1,
            ..Default::default()
        };
        let children = move_children(src, dst, options, settings)
            .await
            .map_err(|err| {
                let summary = created + err.summary;
                err.with_summary(summary)
            })?;
        let done = created + children;
        tokio::fs::set_permissions(dst, src_metadata.permissions())
            .await
            .io_context(|| format!("cannot set permissions on {:?}", dst))
            .map_err(|err| err.with_summary(done))?;
        tokio::fs::remove_dir(src)
            .await
            .io_context(|| format!("failed removing directory {:?}", src))
            .map_err(|err| err.with_summary(done))?;
        return Ok(done
            + Summary {
                directories_removed: 1,
                ..Default::default()
            });
    }
    let (copied, removed) = if src_metadata.is_symlink() {
        let copied = copy::copy_symlink(src, dst, options.policy).await?;
        (
            copied,
            Summary {
                symlinks_removed: 1,
                ..Default::default()
            },
        )
    } else {
        let copied = copy::copy_file(src, dst, options.policy).await?;
        (
            copied,
            Summary {
                files_removed: 1,
                ..Default::default()
            },
        )
    };
    tokio::fs::remove_file(src)
        .await
        .io_context(|| format!("failed removing {:?}", src))
        .map_err(|err| err.with_summary(copied))?;
    Ok(copied + removed)
}

/// Moves every child of the directory `src` into the directory `into`, creating `into` when it
/// is missing. `src` itself stays in place, emptied.
#[instrument]
pub async fn move_directory_contents(
    src: &Path,
    into: &Path,
    options: &MoveOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    let src_metadata = match node_metadata(src, options.resolve_symlink).await? {
        Some(md) => md,
        None => return Err(Error::not_found(src)),
    };
    if !src_metadata.is_dir() {
        return Err(Error::type_mismatch(format!("{:?} is not a directory", src)));
    }
    let created = copy::ensure_directory(into).await?;
    move_children(src, into, options, settings)
        .await
        .map(|children| created + children)
        .map_err(|err| {
            let summary = created + err.summary;
            err.with_summary(summary)
        })
}

async fn move_children(
    src: &Path,
    dst: &Path,
    options: &MoveOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    let child_options = MoveOptions {
        resolve_symlink: false,
        ..*options
    };
    let settings = *settings;
    fanout::for_each_child(src, settings.max_width, move |entry_path, entry_name| {
        let dst_path = dst.join(entry_name);
        async move { mv(&entry_path, &dst_path, &child_options, &settings).await }
    })
    .await
}
