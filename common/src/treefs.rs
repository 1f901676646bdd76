//! The asynchronous tree-operation facade
//!
//! [`TreeFs`] pairs a [`TransactionGate`] handle with the shared [`Settings`]. Every operation
//! that changes the tree holds the gate for its whole duration; queries and scans run without
//! it. Path-shaped arguments accept anything convertible into a [`PathEntity`].

use tracing::instrument;

use crate::config::Settings;
use crate::copy::{self, CopyOptions};
use crate::entity::{PathEntity, node_metadata};
use crate::error::Error;
use crate::finder::{FileFinder, PatternSource, ScanResult};
use crate::gate::TransactionGate;
use crate::link;
use crate::mv::{self, MoveOptions};
use crate::policy::ConflictPolicy;
use crate::rm::{self, DeleteOptions};
use crate::summary::Summary;
use crate::tarball::Tarball;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    File,
    Directory,
    Symlink,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NodeKind::File => f.write_str("regular file"),
            NodeKind::Directory => f.write_str("directory"),
            NodeKind::Symlink => f.write_str("symbolic link"),
        }
    }
}

/// Fails with NotFound when the node is absent and TypeMismatch when it is of another kind.
async fn expect_kind(
    entity: &PathEntity,
    expected: NodeKind,
    resolve_symlink: bool,
) -> Result<(), Error> {
    let md = node_metadata(&entity.absolute_path(), resolve_symlink)
        .await?
        .ok_or_else(|| Error::not_found(entity.given_path()))?;
    let matches = match expected {
        NodeKind::File => md.is_file(),
        NodeKind::Directory => md.is_dir(),
        NodeKind::Symlink => md.is_symlink(),
    };
    if !matches {
        return Err(Error::type_mismatch(format!(
            "{:?} is not a {}",
            entity.given_path(),
            expected
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TreeFs {
    gate: TransactionGate,
    settings: Settings,
}

impl Default for TreeFs {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl TreeFs {
    /// Uses the process-wide gate, see [`TransactionGate::shared`].
    pub fn new(settings: Settings) -> Self {
        Self::with_gate(TransactionGate::shared(), settings)
    }

    pub fn with_gate(gate: TransactionGate, settings: Settings) -> Self {
        Self { gate, settings }
    }

    pub fn gate(&self) -> &TransactionGate {
        &self.gate
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // queries

    pub async fn exists(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        path.into().exists(resolve_symlink).await
    }

    pub async fn is_file(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        path.into().is_file(resolve_symlink).await
    }

    pub async fn is_directory(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        path.into().is_directory(resolve_symlink).await
    }

    pub async fn is_symbolic_link(&self, path: impl Into<PathEntity>) -> Result<bool, Error> {
        path.into().is_symbolic_link().await
    }

    pub async fn is_directory_empty(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        path.into().is_directory_empty(resolve_symlink).await
    }

    pub async fn read_directory(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Vec<PathEntity>, Error> {
        path.into().read_directory(resolve_symlink).await
    }

    pub async fn read_file(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Vec<u8>, Error> {
        path.into().read_file(resolve_symlink).await
    }

    pub async fn read_to_string(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<String, Error> {
        path.into().read_to_string(resolve_symlink).await
    }

    pub async fn create_read_stream(
        &self,
        path: impl Into<PathEntity>,
    ) -> Result<tokio::fs::File, Error> {
        path.into().create_read_stream().await
    }

    pub async fn create_write_stream(
        &self,
        path: impl Into<PathEntity>,
        append: bool,
    ) -> Result<tokio::fs::File, Error> {
        path.into().create_write_stream(append).await
    }

    // single-node writes

    pub async fn create_directory(
        &self,
        path: impl Into<PathEntity>,
        create_parents: bool,
        mode: Option<u32>,
    ) -> Result<PathEntity, Error> {
        let path = path.into();
        let _permit = self.gate.acquire().await?;
        path.create_directory(create_parents, mode).await
    }

    pub async fn create_file(
        &self,
        path: impl Into<PathEntity>,
        create_parents: bool,
    ) -> Result<PathEntity, Error> {
        let path = path.into();
        let _permit = self.gate.acquire().await?;
        path.create_file(create_parents).await
    }

    pub async fn write_file(
        &self,
        path: impl Into<PathEntity>,
        data: &[u8],
        resolve_symlink: bool,
    ) -> Result<(), Error> {
        let path = path.into();
        let _permit = self.gate.acquire().await?;
        path.write_file(data, resolve_symlink).await
    }

    // copy

    #[instrument(skip(self, src, dst))]
    pub async fn copy(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        options: &CopyOptions,
    ) -> Result<Summary, Error> {
        let (src, dst) = (src.into(), dst.into());
        let _permit = self.gate.acquire().await?;
        copy::copy(&src.absolute_path(), &dst.absolute_path(), options, &self.settings).await
    }

    /// Copies a regular file, or what a symlink to one points at.
    pub async fn copy_file(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, dst) = (src.into(), dst.into());
        let _permit = self.gate.acquire().await?;
        expect_kind(&src, NodeKind::File, true).await?;
        copy::copy_file(&src.absolute_path(), &dst.absolute_path(), policy).await
    }

    /// Copies a directory so that it appears at `dst`. Like [`TreeFs::copy_file`], a symlink
    /// to a directory is accepted and the directory it points at is copied.
    pub async fn copy_directory(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, dst) = (src.into(), dst.into());
        let _permit = self.gate.acquire().await?;
        expect_kind(&src, NodeKind::Directory, true).await?;
        let options = CopyOptions {
            policy,
            resolve_symlink: true,
            ..Default::default()
        };
        copy::copy(
            &src.absolute_path(),
            &dst.absolute_path(),
            &options,
            &self.settings,
        )
        .await
    }

    /// Copies the children of `src` into `into` without adding a level named after `src`.
    pub async fn copy_directory_contents(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, into) = (src.into(), into.into());
        let _permit = self.gate.acquire().await?;
        let options = CopyOptions {
            policy,
            ..Default::default()
        };
        copy::copy_directory_contents(
            &src.absolute_path(),
            &into.absolute_path(),
            &options,
            &self.settings,
        )
        .await
    }

    /// Recreates the symlink `src` at `dst` with the same target.
    pub async fn copy_symlink(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, dst) = (src.into(), dst.into());
        let _permit = self.gate.acquire().await?;
        expect_kind(&src, NodeKind::Symlink, false).await?;
        copy::copy_symlink(&src.absolute_path(), &dst.absolute_path(), policy).await
    }

    // move

    #[instrument(skip(self, src, dst))]
    pub async fn mv(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        options: &MoveOptions,
    ) -> Result<Summary, Error> {
        let (src, dst) = (src.into(), dst.into());
        let _permit = self.gate.acquire().await?;
        mv::mv(&src.absolute_path(), &dst.absolute_path(), options, &self.settings).await
    }

    async fn move_kind(
        &self,
        src: PathEntity,
        dst: PathEntity,
        expected: NodeKind,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let _permit = self.gate.acquire().await?;
        expect_kind(&src, expected, false).await?;
        let options = MoveOptions {
            policy,
            ..Default::default()
        };
        mv::mv(
            &src.absolute_path(),
            &dst.absolute_path(),
            &options,
            &self.settings,
        )
        .await
    }

    /// Moves a regular file. Move variants check the node itself without following symlinks,
    /// a link is moved with [`TreeFs::move_symlink`].
    pub async fn move_file(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        self.move_kind(src.into(), dst.into(), NodeKind::File, policy).await
    }

    pub async fn move_directory(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        self.move_kind(src.into(), dst.into(), NodeKind::Directory, policy).await
    }

    pub async fn move_symlink(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        self.move_kind(src.into(), dst.into(), NodeKind::Symlink, policy).await
    }

    /// Moves the children of `src` into `into`; `src` itself is left behind, empty.
    pub async fn move_directory_contents(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, into) = (src.into(), into.into());
        let _permit = self.gate.acquire().await?;
        let options = MoveOptions {
            policy,
            ..Default::default()
        };
        mv::move_directory_contents(
            &src.absolute_path(),
            &into.absolute_path(),
            &options,
            &self.settings,
        )
        .await
    }

    // delete

    /// Deleting a path that does not exist fails with NotFound.
    #[instrument(skip(self, path))]
    pub async fn delete(
        &self,
        path: impl Into<PathEntity>,
        options: &DeleteOptions,
    ) -> Result<Summary, Error> {
        let path = path.into();
        let _permit = self.gate.acquire().await?;
        rm::rm(&path.absolute_path(), options, &self.settings).await
    }

    pub async fn delete_file(&self, path: impl Into<PathEntity>) -> Result<Summary, Error> {
        let path = path.into();
        let _permit = self.gate.acquire().await?;
        expect_kind(&path, NodeKind::File, false).await?;
        rm::rm(
            &path.absolute_path(),
            &DeleteOptions::default(),
            &self.settings,
        )
        .await
    }

    pub async fn delete_directory(
        &self,
        path: impl Into<PathEntity>,
        recursive: bool,
    ) -> Result<Summary, Error> {
        let path = path.into();
        let _permit = self.gate.acquire().await?;
        expect_kind(&path, NodeKind::Directory, false).await?;
        let options = DeleteOptions {
            recursive,
            ..Default::default()
        };
        rm::rm(&path.absolute_path(), &options, &self.settings).await
    }

    // symlinks

    /// Creates `link` pointing at the absolute path of `src`.
    pub async fn symlink(
        &self,
        src: impl Into<PathEntity>,
        link: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, link) = (src.into(), link.into());
        let _permit = self.gate.acquire().await?;
        link::symlink(&src.absolute_path(), &link.absolute_path(), policy).await
    }

    /// Creates `into/<base name of src>` pointing at `src`.
    pub async fn symlink_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, into) = (src.into(), into.into());
        let _permit = self.gate.acquire().await?;
        link::symlink_into(&src.absolute_path(), &into.absolute_path(), policy).await
    }

    pub async fn symlink_file_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, into) = (src.into(), into.into());
        let _permit = self.gate.acquire().await?;
        expect_kind(&src, NodeKind::File, true).await?;
        link::symlink_into(&src.absolute_path(), &into.absolute_path(), policy).await
    }

    /// Links the directory itself; its contents are not visited.
    pub async fn symlink_directory_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, into) = (src.into(), into.into());
        let _permit = self.gate.acquire().await?;
        expect_kind(&src, NodeKind::Directory, true).await?;
        link::symlink_into(&src.absolute_path(), &into.absolute_path(), policy).await
    }

    pub async fn symlink_directory_contents_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (src, into) = (src.into(), into.into());
        let _permit = self.gate.acquire().await?;
        link::symlink_directory_contents_into(
            &src.absolute_path(),
            &into.absolute_path(),
            policy,
            &self.settings,
        )
        .await
    }

    // scanning and archives

    /// Builds a [`FileFinder`] with this facade's settings and scans `roots`.
    pub async fn find<M, MP, I, IP, R, P>(
        &self,
        match_patterns: M,
        ignore_patterns: I,
        roots: R,
    ) -> Result<ScanResult, Error>
    where
        M: IntoIterator<Item = MP>,
        MP: Into<PatternSource>,
        I: IntoIterator<Item = IP>,
        IP: Into<PatternSource>,
        R: IntoIterator<Item = P>,
        P: Into<PathEntity>,
    {
        let roots: Vec<PathEntity> = roots.into_iter().map(Into::into).collect();
        FileFinder::with_settings(match_patterns, ignore_patterns, self.settings)?
            .scan(roots)
            .await
    }

    pub async fn is_tarball(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        Tarball::new(path).is_tarball(resolve_symlink).await
    }

    /// Extracts under this facade's gate; the tarball takes the gate itself.
    pub async fn extract_into(
        &self,
        archive: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Summary, Error> {
        Tarball::new(archive)
            .extract_into(&self.gate, into, resolve_symlink)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use crate::ErrorKind;
    use tracing_test::traced_test;

    fn isolated() -> TreeFs {
        TreeFs::with_gate(TransactionGate::new(), Settings::default())
    }

    #[tokio::test]
    #[traced_test]
    async fn strings_and_entities_are_interchangeable() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_hello_world_dir().await?;
        let fs = isolated();
        let as_string = tmp_dir.join("a").to_string_lossy().to_string();
        let as_entity = PathEntity::new(tmp_dir.join("a"));
        assert!(fs.is_directory(as_string.as_str(), false).await?);
        assert!(fs.is_directory(&as_entity, false).await?);
        assert!(fs.is_directory(as_entity, false).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn typed_variants_check_the_source_kind() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let fs = isolated();
        let foo = tmp_dir.join("foo");
        let error = fs
            .copy_file(&foo, tmp_dir.join("x"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        let error = fs
            .copy_directory(foo.join("0.txt"), tmp_dir.join("x"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        let error = fs
            .copy_symlink(foo.join("0.txt"), tmp_dir.join("x"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        let error = fs
            .move_symlink(foo.join("bar"), tmp_dir.join("x"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        let error = fs.delete_file(foo.join("bar")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        let error = fs
            .symlink_directory_into(foo.join("0.txt"), tmp_dir.join("x"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        let error = fs
            .move_file(foo.join("missing"), tmp_dir.join("x"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(!fs.exists(tmp_dir.join("x"), false).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn typed_copies_follow_a_source_symlink() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let fs = isolated();
        let foo = tmp_dir.join("foo");
        let dir_link = tmp_dir.join("dir-link");
        tokio::fs::symlink(&foo, &dir_link).await?;
        let summary = fs
            .copy_directory(&dir_link, tmp_dir.join("copied"), ConflictPolicy::Stop)
            .await?;
        assert_eq!(summary.directories_created, 3);
        assert!(tokio::fs::symlink_metadata(tmp_dir.join("copied")).await?.is_dir());
        testutils::check_dirs_identical(&foo, &tmp_dir.join("copied")).await?;
        fs.copy_file(
            foo.join("baz").join("5.txt"),
            tmp_dir.join("two.txt"),
            ConflictPolicy::Stop,
        )
        .await?;
        assert!(tokio::fs::symlink_metadata(tmp_dir.join("two.txt")).await?.is_file());
        // moves relocate the link itself, so a link is not a directory to them
        let error = fs
            .move_directory(&dir_link, tmp_dir.join("moved"), ConflictPolicy::Stop)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn stop_never_mutates_existing_nodes() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let fs = isolated();
        let foo = tmp_dir.join("foo");
        let occupied = foo.join("bar").join("1.txt");
        for error in [
            fs.copy_file(foo.join("0.txt"), &occupied, ConflictPolicy::Stop)
                .await
                .unwrap_err(),
            fs.move_file(foo.join("0.txt"), &occupied, ConflictPolicy::Stop)
                .await
                .unwrap_err(),
            fs.symlink(foo.join("0.txt"), &occupied, ConflictPolicy::Stop)
                .await
                .unwrap_err(),
            fs.copy_symlink(foo.join("baz").join("5.txt"), &occupied, ConflictPolicy::Stop)
                .await
                .unwrap_err(),
        ] {
            assert_eq!(error.kind(), ErrorKind::Conflict);
        }
        assert!(fs.is_file(&occupied, false).await?);
        assert_eq!(fs.read_to_string(&occupied, true).await?, "1");
        assert_eq!(fs.read_to_string(foo.join("0.txt"), true).await?, "0");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn mutations_wait_for_the_gate() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_hello_world_dir().await?;
        let fs = isolated();
        let held = fs.gate().acquire().await?;
        let copy = {
            let fs = fs.clone();
            let src = tmp_dir.join("a");
            let dst = tmp_dir.join("b");
            tokio::spawn(async move { fs.copy(src, dst, &CopyOptions::default()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // queries are not gated
        assert!(!fs.exists(tmp_dir.join("b"), false).await?);
        drop(held);
        copy.await??;
        assert!(fs.exists(tmp_dir.join("b").join("x.txt"), false).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn directory_queries() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let fs = isolated();
        let empty = fs
            .create_directory(tmp_dir.join("e").join("f"), true, None)
            .await?;
        assert!(fs.is_directory_empty(&empty, false).await?);
        assert!(!fs.is_directory_empty(tmp_dir.join("foo"), false).await?);
        let mut names: Vec<_> = fs
            .read_directory(tmp_dir.join("foo"), true)
            .await?
            .iter()
            .filter_map(PathEntity::base_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["0.txt", "bar", "baz"]);
        assert!(fs.is_symbolic_link(tmp_dir.join("foo").join("baz").join("5.txt")).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn write_then_read_back() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let fs = isolated();
        let file = fs.create_file(tmp_dir.join("new").join("f.txt"), true).await?;
        fs.write_file(&file, b"contents", true).await?;
        assert_eq!(fs.read_file(&file, true).await?, b"contents");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn find_uses_facade_settings() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_hello_world_dir().await?;
        let fs = TreeFs::with_gate(TransactionGate::new(), Settings { max_width: 1 });
        let found = fs
            .find([r".*\.txt$"], ["sub"], [tmp_dir.join("a")])
            .await?;
        assert_eq!(found.len(), 1);
        Ok(())
    }
}
