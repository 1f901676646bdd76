use std::path::Path;

use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::Settings;
use crate::entity::{ensure_parent, node_metadata};
use crate::error::{Error, IoResultExt};
use crate::fanout;
use crate::policy::ConflictPolicy;
use crate::summary::Summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CopyOptions {
    /// Required to copy a directory.
    pub recursive: bool,
    pub policy: ConflictPolicy,
    /// Copy what a source symlink points to instead of recreating the link. Only the source
    /// itself is resolved, symlinks found below it are recreated as links.
    pub resolve_symlink: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            policy: ConflictPolicy::Stop,
            resolve_symlink: false,
        }
    }
}

/// Copies the regular file `src` to `dst`, streaming its bytes and carrying over its
/// permissions.
#[instrument]
pub async fn copy_file(src: &Path, dst: &Path, policy: ConflictPolicy) -> Result<Summary, Error> {
    let _open_file_guard = throttle::open_file_permit().await;
    let src_metadata = tokio::fs::metadata(src)
        .await
        .io_context(|| format!("failed reading metadata from {:?}", src))?;
    policy.check_destination(src, dst).await?;
    ensure_parent(dst).await?;
    tracing::debug!("opening 'src' for reading and 'dst' for writing");
    let mut reader = tokio::fs::File::open(src)
        .await
        .io_context(|| format!("cannot open {:?} for reading", src))?;
    // create_new closes the window between the conflict check and the create
    let mut writer = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await
        .io_context(|| format!("cannot create {:?}", dst))?;
    tracing::debug!("copying data");
    let bytes = tokio::io::copy(&mut reader, &mut writer)
        .await
        .io_context(|| format!("failed copying {:?} to {:?}", src, dst))?;
    tracing::debug!("setting permissions");
    tokio::fs::set_permissions(dst, src_metadata.permissions())
        .await
        .io_context(|| format!("cannot set permissions on {:?}", dst))
        .map_err(|err| {
            err.with_summary(Summary {
                bytes_copied: bytes,
                files_copied: 1,
                ..Default::default()
            })
        })?;
    Ok(Summary {
        bytes_copied: bytes,
        files_copied: 1,
        ..Default::default()
    })
}

/// Recreates the symlink `src` at `dst` with the same, possibly relative, target.
#[instrument]
pub async fn copy_symlink(
    src: &Path,
    dst: &Path,
    policy: ConflictPolicy,
) -> Result<Summary, Error> {
    let target = tokio::fs::read_link(src)
        .await
        .io_context(|| format!("failed reading symlink {:?}", src))?;
    policy.check_destination(src, dst).await?;
    ensure_parent(dst).await?;
    tokio::fs::symlink(&target, dst)
        .await
        .io_context(|| format!("failed creating symlink {:?} -> {:?}", dst, &target))?;
    Ok(Summary {
        symlinks_created: 1,
        ..Default::default()
    })
}

/// Copies the tree rooted at `src` so that it appears at `dst`.
#[instrument]
#[async_recursion]
pub async fn copy(
    src: &Path,
    dst: &Path,
    options: &CopyOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    tracing::debug!("reading source metadata");
    let src_metadata = match node_metadata(src, false).await? {
        Some(md) => md,
        None => return Err(Error::not_found(src)),
    };
    if src_metadata.is_symlink() {
        if options.resolve_symlink {
            let link = tokio::fs::canonicalize(src)
                .await
                .io_context(|| format!("failed resolving symlink {:?}", src))?;
            tracing::debug!("following symlink to {:?}", &link);
            return copy(&link, dst, options, settings).await;
        }
        return copy_symlink(src, dst, options.policy).await;
    }
    if src_metadata.is_file() {
        return copy_file(src, dst, options.policy).await;
    }
    if !src_metadata.is_dir() {
        return Err(Error::type_mismatch(format!(
            "cannot copy {:?}: unsupported file type {:?}",
            src,
            src_metadata.file_type()
        )));
    }
    if !options.recursive {
        return Err(Error::type_mismatch(format!(
            "cannot copy directory {:?} without recursive",
            src
        )));
    }
    options.policy.check_destination(src, dst).await?;
    ensure_parent(dst).await?;
    tokio::fs::create_dir(dst)
        .await
        .io_context(|| format!("cannot create directory {:?}", dst))?;
    let created = Summary {
        directories_created: 1,
        ..Default::default()
    };
    let children = copy_children(src, dst, options, settings)
        .await
        .map_err(|err| {
            let summary = created + err.summary;
            err.with_summary(summary)
        })?;
    tracing::debug!("set 'dst' directory permissions");
    tokio::fs::set_permissions(dst, src_metadata.permissions())
        .await
        .io_context(|| format!("cannot set permissions on {:?}", dst))
        .map_err(|err| err.with_summary(created + children))?;
    Ok(created + children)
}

/// Copies every child of the directory `src` into the directory `into`, creating `into` when it
/// is missing. No directory level named after `src` is created.
#[instrument]
pub async fn copy_directory_contents(
    src: &Path,
    into: &Path,
    options: &CopyOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    let src_metadata = match node_metadata(src, options.resolve_symlink).await? {
        Some(md) => md,
        None => return Err(Error::not_found(src)),
    };
    if !src_metadata.is_dir() {
        return Err(Error::type_mismatch(format!("{:?} is not a directory", src)));
    }
    let created = ensure_directory(into).await?;
    copy_children(src, into, options, settings)
        .await
        .map(|children| created + children)
        .map_err(|err| {
            let summary = created + err.summary;
            err.with_summary(summary)
        })
}

/// Makes sure `path` is a directory; reports whether one had to be created.
pub(crate) async fn ensure_directory(path: &Path) -> Result<Summary, Error> {
    match node_metadata(path, true).await? {
        Some(md) if md.is_dir() => Ok(Summary::default()),
        Some(_) => Err(Error::type_mismatch(format!(
            "{:?} exists and is not a directory",
            path
        ))),
        None => {
            tokio::fs::create_dir_all(path)
                .await
                .io_context(|| format!("cannot create directory {:?}", path))?;
            Ok(Summary {
                directories_created: 1,
                ..Default::default()
            })
        }
    }
}

async fn copy_children(
    src: &Path,
    dst: &Path,
    options: &CopyOptions,
    settings: &Settings,
) -> Result<Summary, Error> {
    tracing::debug!("process contents of 'src' directory");
    let child_options = CopyOptions {
        resolve_symlink: false,
        ..*options
    };
    let settings = *settings;
    fanout::for_each_child(src, settings.max_width, move |entry_path, entry_name| {
        let dst_path = dst.join(entry_name);
        async move { copy(&entry_path, &dst_path, &child_options, &settings).await }
    })
    .await
}


#[cfg(test)]
mod copy_properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Node {
        File(Vec<u8>),
        Link(String),
        Dir(Vec<Node>),
    }

    fn node_strategy() -> impl Strategy<Value = Node> {
        let leaf = prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Node::File),
            "[a-z]{1,8}".prop_map(Node::Link),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(Node::Dir)
        })
    }

    fn materialize(path: &Path, children: &[Node]) -> std::io::Result<()> {
        std::fs::create_dir(path)?;
        for (idx, child) in children.iter().enumerate() {
            let child_path = path.join(format!("n{}", idx));
            match child {
                Node::File(data) => std::fs::write(&child_path, data)?,
                Node::Link(target) => std::os::unix::fs::symlink(target, &child_path)?,
                Node::Dir(grandchildren) => materialize(&child_path, grandchildren)?,
            }
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn recursive_copy_reproduces_the_tree(children in proptest::collection::vec(node_strategy(), 0..5)) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let tmp_dir = crate::testutils::create_temp_dir().await.unwrap();
                let src = tmp_dir.join("src");
                materialize(&src, &children).unwrap();
                let dst = tmp_dir.join("dst");
                copy(&src, &dst, &CopyOptions::default(), &Settings { max_width: 2 })
                    .await
                    .unwrap();
                crate::testutils::check_dirs_identical(&src, &dst).await.unwrap();
            });
        }
    }
}
