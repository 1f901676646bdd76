use std::path::Path;

use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::Settings;
use crate::entity::node_metadata;
use crate::error::{Error, IoResultExt};
use crate::fanout;
use crate::summary::Summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeleteOptions {
    /// Required to delete a directory that has children.
    pub recursive: bool,
    /// Delete what a top-level symlink points to instead of the link itself.
    pub resolve_symlink: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            resolve_symlink: false,
        }
    }
}

/// Removes the node at `path`. A missing path is an error.
#[instrument]
pub async fn rm(
    path: &Path,
    options: &DeleteOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    let metadata = match node_metadata(path, false).await? {
        Some(md) => md,
        None => return Err(Error::not_found(path)),
    };
    if metadata.is_symlink() && options.resolve_symlink {
        let link = tokio::fs::canonicalize(path)
            .await
            .io_context(|| format!("failed resolving symlink {:?}", path))?;
        tracing::debug!("removing the referent {:?}", &link);
        return remove_node(&link, options.recursive, settings).await;
    }
    remove_node(path, options.recursive, settings).await
}

#[async_recursion]
async fn remove_node(path: &Path, recursive: bool, settings: &Settings) -> Result<Summary, Error> {
    tracing::debug!("remove: {:?}", path);
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .io_context(|| format!("failed reading metadata from {:?}", path))?;
    if !metadata.is_dir() {
        tokio::fs::remove_file(path)
            .await
            .io_context(|| format!("failed removing {:?}", path))?;
        return Ok(if metadata.is_symlink() {
            Summary {
                symlinks_removed: 1,
                ..Default::default()
            }
        } else {
            Summary {
                files_removed: 1,
                ..Default::default()
            }
        });
    }
    let children = if recursive {
        let settings = *settings;
        fanout::for_each_child(path, settings.max_width, move |entry_path, _| async move {
            remove_node(&entry_path, true, &settings).await
        })
        .await?
    } else {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .io_context(|| format!("cannot open directory {:?} for reading", path))?;
        let first = entries
            .next_entry()
            .await
            .io_context(|| format!("failed traversing directory {:?}", path))?;
        if first.is_some() {
            return Err(Error::type_mismatch(format!(
                "cannot remove {:?}: directory not empty",
                path
            )));
        }
        Summary::default()
    };
    tokio::fs::remove_dir(path)
        .await
        .io_context(|| format!("failed removing directory {:?}", path))
        .map_err(|err| err.with_summary(children))?;
    tracing::debug!("remove: {:?} succeeded!", path);
    Ok(children
        + Summary {
            directories_removed: 1,
            ..Default::default()
        })
}
