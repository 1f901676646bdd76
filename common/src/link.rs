//! Symlink creation
//!
//! Links always store the absolute path of their source, so they stay valid wherever the link
//! itself ends up. Linking a directory creates a single link node and never recurses.

use std::path::Path;

use tracing::instrument;

use crate::config::Settings;
use crate::copy;
use crate::entity::{PathEntity, ensure_parent, node_metadata};
use crate::error::{Error, IoResultExt};
use crate::fanout;
use crate::policy::ConflictPolicy;
use crate::summary::Summary;

/// Creates a symlink at `link` pointing at `src`, which must exist.
#[instrument]
pub async fn symlink(src: &Path, link: &Path, policy: ConflictPolicy) -> Result<Summary, Error> {
    if node_metadata(src, false).await?.is_none() {
        return Err(Error::not_found(src));
    }
    let target = PathEntity::new(src).absolute_path();
    policy.check_destination(&target, link).await?;
    ensure_parent(link).await?;
    tokio::fs::symlink(&target, link)
        .await
        .io_context(|| format!("failed creating symlink {:?} -> {:?}", link, &target))?;
    tracing::debug!("linked {:?} -> {:?}", link, &target);
    Ok(Summary {
        symlinks_created: 1,
        ..Default::default()
    })
}

/// Creates `into/<base name of src>` pointing at `src`.
#[instrument]
pub async fn symlink_into(
    src: &Path,
    into: &Path,
    policy: ConflictPolicy,
) -> Result<Summary, Error> {
    let name = PathEntity::new(src)
        .base_name()
        .ok_or_else(|| Error::illegal_argument(format!("{:?} has no base name", src)))?;
    symlink(src, &into.join(name), policy).await
}

/// Creates one link inside `into` for every child of the directory `src`.
#[instrument]
pub async fn symlink_directory_contents_into(
    src: &Path,
    into: &Path,
    policy: ConflictPolicy,
    settings: &Settings,
) -> Result<Summary, Error> {
    let src_metadata = match node_metadata(src, true).await? {
        Some(md) => md,
        None => return Err(Error::not_found(src)),
    };
    if !src_metadata.is_dir() {
        return Err(Error::type_mismatch(format!("{:?} is not a directory", src)));
    }
    let created = copy::ensure_directory(into).await?;
    fanout::for_each_child(src, settings.max_width, move |entry_path, entry_name| {
        let link_path = into.join(entry_name);
        async move { symlink(&entry_path, &link_path, policy).await }
    })
    .await
    .map(|links| created + links)
    .map_err(|err| {
        let summary = created + err.summary;
        err.with_summary(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use crate::ErrorKind;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn link_points_at_absolute_source() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.join("foo").join("0.txt");
        let into = tmp_dir.join("links");
        let summary = symlink_into(&src, &into, ConflictPolicy::Stop).await?;
        assert_eq!(summary.symlinks_created, 1);
        let link = into.join("0.txt");
        assert_eq!(tokio::fs::read_link(&link).await?, src);
        assert_eq!(tokio::fs::read_to_string(&link).await?, "0");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn directory_link_is_a_single_node() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.join("foo").join("bar");
        let link = tmp_dir.join("bar-link");
        let summary = symlink(&src, &link, ConflictPolicy::Stop).await?;
        assert_eq!(summary.symlinks_created, 1);
        assert!(tokio::fs::symlink_metadata(&link).await?.is_symlink());
        assert_eq!(tokio::fs::read_to_string(link.join("1.txt")).await?, "1");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn occupied_link_path_is_a_conflict() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.join("foo").join("0.txt");
        let occupied = tmp_dir.join("foo").join("bar").join("1.txt");
        let error = symlink(&src, &occupied, ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(tokio::fs::symlink_metadata(&occupied).await?.is_file());
        assert_eq!(tokio::fs::read_to_string(&occupied).await?, "1");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_source_is_not_found() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let error = symlink(
            &tmp_dir.join("missing"),
            &tmp_dir.join("link"),
            ConflictPolicy::Stop,
        )
        .await
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(tokio::fs::symlink_metadata(tmp_dir.join("link")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn contents_get_one_link_each() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.join("foo").join("bar");
        let into = tmp_dir.join("farm");
        let summary =
            symlink_directory_contents_into(&src, &into, ConflictPolicy::Stop, &Settings::default())
                .await?;
        assert_eq!(summary.symlinks_created, 3);
        assert_eq!(summary.directories_created, 1);
        for name in ["1.txt", "2.txt", "3.txt"] {
            assert_eq!(tokio::fs::read_link(into.join(name)).await?, src.join(name));
        }
        Ok(())
    }
}
