//! The single decision point for destination conflicts
//!
//! Copy, move and symlink creation all call [`ConflictPolicy::check_destination`] right before
//! they create a node, so every algorithm reacts to an occupied destination the same way.

use tracing::instrument;

use crate::entity::node_metadata;
use crate::error::Error;

/// What to do when a tree operation finds its destination already occupied.
///
/// Only [`ConflictPolicy::Stop`] has defined behavior. The enum is non-exhaustive so that
/// overwrite or merge modes can be added without breaking callers.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    clap::ValueEnum,
    serde::Serialize,
    serde::Deserialize,
)]
#[non_exhaustive]
pub enum ConflictPolicy {
    /// Refuse to touch the existing node and fail that sub-operation with a conflict.
    /// Siblings already processed are kept.
    #[default]
    Stop,
}

impl ConflictPolicy {
    /// Decides whether `src` may be placed at `dst`.
    pub fn resolve(
        self,
        src: &std::path::Path,
        dst: &std::path::Path,
        destination_exists: bool,
    ) -> Result<(), Error> {
        match self {
            ConflictPolicy::Stop if destination_exists => {
                tracing::debug!("destination exists, stopping");
                Err(Error::conflict(src, dst))
            }
            ConflictPolicy::Stop => Ok(()),
        }
    }

    /// Looks at `dst` without following a final symlink (a dangling link still occupies the
    /// destination) and applies [`ConflictPolicy::resolve`].
    #[instrument]
    pub async fn check_destination(
        self,
        src: &std::path::Path,
        dst: &std::path::Path,
    ) -> Result<(), Error> {
        let destination_exists = node_metadata(dst, false).await?.is_some();
        self.resolve(src, dst, destination_exists)
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConflictPolicy::Stop => f.write_str("stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::path::Path;

    #[test]
    fn stop_refuses_existing_destination() {
        let error = ConflictPolicy::Stop
            .resolve(Path::new("/a"), Path::new("/b"), true)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Conflict);
        let message = format!("{:#}", error);
        assert!(message.contains("\"/a\"") && message.contains("\"/b\""), "{}", message);
    }

    #[test]
    fn stop_allows_fresh_destination() {
        assert!(
            ConflictPolicy::Stop
                .resolve(Path::new("/a"), Path::new("/b"), false)
                .is_ok()
        );
    }

    #[test]
    fn stop_is_the_default() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Stop);
    }

    #[tokio::test]
    async fn dangling_symlink_counts_as_existing() -> Result<(), anyhow::Error> {
        let tmp_dir = crate::testutils::create_temp_dir().await?;
        let dst = tmp_dir.join("dangling");
        tokio::fs::symlink(tmp_dir.join("nowhere"), &dst).await?;
        let error = ConflictPolicy::Stop
            .check_destination(&tmp_dir.join("src"), &dst)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Conflict);
        ConflictPolicy::Stop
            .check_destination(&tmp_dir.join("src"), &tmp_dir.join("fresh"))
            .await?;
        Ok(())
    }
}
