//! The synchronous facade
//!
//! [`BlockingTreeFs`] mirrors every [`TreeFs`] operation. Each call is spawned onto a shared
//! multi-threaded runtime built on first use, and the calling thread waits for the result. It
//! works from plain threads as well as from code already running inside another tokio runtime.

use std::sync::LazyLock;

use crate::config::Settings;
use crate::copy::CopyOptions;
use crate::entity::PathEntity;
use crate::error::{Error, ErrorKind};
use crate::finder::{FileFinder, PatternSource, ScanResult};
use crate::gate::TransactionGate;
use crate::mv::MoveOptions;
use crate::policy::ConflictPolicy;
use crate::rm::DeleteOptions;
use crate::summary::Summary;
use crate::treefs::TreeFs;

static RUNTIME: LazyLock<std::io::Result<tokio::runtime::Runtime>> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name("treefs-blocking")
        .enable_all()
        .build()
});

/// Runs `future` to completion on the shared runtime and returns its result.
pub fn run<F, T>(future: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let runtime = RUNTIME.as_ref().map_err(|error| {
        Error::new(
            ErrorKind::IoFailure,
            anyhow::anyhow!("failed to start the blocking runtime: {}", error),
            Default::default(),
        )
    })?;
    let handle = runtime.spawn(future);
    futures::executor::block_on(handle).map_err(Error::join)?
}

#[derive(Debug, Clone, Default)]
pub struct BlockingTreeFs {
    inner: TreeFs,
}

impl From<TreeFs> for BlockingTreeFs {
    fn from(inner: TreeFs) -> Self {
        Self { inner }
    }
}

impl BlockingTreeFs {
    pub fn new(settings: Settings) -> Self {
        TreeFs::new(settings).into()
    }

    pub fn with_gate(gate: TransactionGate, settings: Settings) -> Self {
        TreeFs::with_gate(gate, settings).into()
    }

    /// The asynchronous facade sharing this one's gate and settings.
    pub fn as_async(&self) -> &TreeFs {
        &self.inner
    }

    pub fn exists(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.exists(path, resolve_symlink).await })
    }

    pub fn is_file(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.is_file(path, resolve_symlink).await })
    }

    pub fn is_directory(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.is_directory(path, resolve_symlink).await })
    }

    pub fn is_symbolic_link(&self, path: impl Into<PathEntity>) -> Result<bool, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.is_symbolic_link(path).await })
    }

    pub fn is_directory_empty(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.is_directory_empty(path, resolve_symlink).await })
    }

    pub fn read_directory(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Vec<PathEntity>, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.read_directory(path, resolve_symlink).await })
    }

    pub fn read_file(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Vec<u8>, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.read_file(path, resolve_symlink).await })
    }

    pub fn read_to_string(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<String, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.read_to_string(path, resolve_symlink).await })
    }

    pub fn create_read_stream(&self, path: impl Into<PathEntity>) -> Result<std::fs::File, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move {
            let file = fs.create_read_stream(path).await?;
            Ok::<_, Error>(file.into_std().await)
        })
    }

    pub fn create_write_stream(
        &self,
        path: impl Into<PathEntity>,
        append: bool,
    ) -> Result<std::fs::File, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move {
            let file = fs.create_write_stream(path, append).await?;
            Ok::<_, Error>(file.into_std().await)
        })
    }

    pub fn create_directory(
        &self,
        path: impl Into<PathEntity>,
        create_parents: bool,
        mode: Option<u32>,
    ) -> Result<PathEntity, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.create_directory(path, create_parents, mode).await })
    }

    pub fn create_file(
        &self,
        path: impl Into<PathEntity>,
        create_parents: bool,
    ) -> Result<PathEntity, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.create_file(path, create_parents).await })
    }

    pub fn write_file(
        &self,
        path: impl Into<PathEntity>,
        data: &[u8],
        resolve_symlink: bool,
    ) -> Result<(), Error> {
        let (fs, path, data) = (self.inner.clone(), path.into(), data.to_vec());
        run(async move { fs.write_file(path, &data, resolve_symlink).await })
    }

    pub fn copy(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        options: &CopyOptions,
    ) -> Result<Summary, Error> {
        let (fs, src, dst, options) = (self.inner.clone(), src.into(), dst.into(), *options);
        run(async move { fs.copy(src, dst, &options).await })
    }

    pub fn copy_file(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, dst) = (self.inner.clone(), src.into(), dst.into());
        run(async move { fs.copy_file(src, dst, policy).await })
    }

    pub fn copy_directory(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, dst) = (self.inner.clone(), src.into(), dst.into());
        run(async move { fs.copy_directory(src, dst, policy).await })
    }

    pub fn copy_directory_contents(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, into) = (self.inner.clone(), src.into(), into.into());
        run(async move { fs.copy_directory_contents(src, into, policy).await })
    }

    pub fn copy_symlink(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, dst) = (self.inner.clone(), src.into(), dst.into());
        run(async move { fs.copy_symlink(src, dst, policy).await })
    }

    pub fn mv(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        options: &MoveOptions,
    ) -> Result<Summary, Error> {
        let (fs, src, dst, options) = (self.inner.clone(), src.into(), dst.into(), *options);
        run(async move { fs.mv(src, dst, &options).await })
    }

    pub fn move_file(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, dst) = (self.inner.clone(), src.into(), dst.into());
        run(async move { fs.move_file(src, dst, policy).await })
    }

    pub fn move_directory(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, dst) = (self.inner.clone(), src.into(), dst.into());
        run(async move { fs.move_directory(src, dst, policy).await })
    }

    pub fn move_symlink(
        &self,
        src: impl Into<PathEntity>,
        dst: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, dst) = (self.inner.clone(), src.into(), dst.into());
        run(async move { fs.move_symlink(src, dst, policy).await })
    }

    pub fn move_directory_contents(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, into) = (self.inner.clone(), src.into(), into.into());
        run(async move { fs.move_directory_contents(src, into, policy).await })
    }

    pub fn delete(
        &self,
        path: impl Into<PathEntity>,
        options: &DeleteOptions,
    ) -> Result<Summary, Error> {
        let (fs, path, options) = (self.inner.clone(), path.into(), *options);
        run(async move { fs.delete(path, &options).await })
    }

    pub fn delete_file(&self, path: impl Into<PathEntity>) -> Result<Summary, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.delete_file(path).await })
    }

    pub fn delete_directory(
        &self,
        path: impl Into<PathEntity>,
        recursive: bool,
    ) -> Result<Summary, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.delete_directory(path, recursive).await })
    }

    pub fn symlink(
        &self,
        src: impl Into<PathEntity>,
        link: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, link) = (self.inner.clone(), src.into(), link.into());
        run(async move { fs.symlink(src, link, policy).await })
    }

    pub fn symlink_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, into) = (self.inner.clone(), src.into(), into.into());
        run(async move { fs.symlink_into(src, into, policy).await })
    }

    pub fn symlink_file_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, into) = (self.inner.clone(), src.into(), into.into());
        run(async move { fs.symlink_file_into(src, into, policy).await })
    }

    pub fn symlink_directory_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, into) = (self.inner.clone(), src.into(), into.into());
        run(async move { fs.symlink_directory_into(src, into, policy).await })
    }

    pub fn symlink_directory_contents_into(
        &self,
        src: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        policy: ConflictPolicy,
    ) -> Result<Summary, Error> {
        let (fs, src, into) = (self.inner.clone(), src.into(), into.into());
        run(async move { fs.symlink_directory_contents_into(src, into, policy).await })
    }

    pub fn find<M, MP, I, IP, R, P>(
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
        let finder =
            FileFinder::with_settings(match_patterns, ignore_patterns, *self.inner.settings())?;
        let roots: Vec<PathEntity> = roots.into_iter().map(Into::into).collect();
        run(async move { finder.scan(roots).await })
    }

    pub fn is_tarball(
        &self,
        path: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<bool, Error> {
        let (fs, path) = (self.inner.clone(), path.into());
        run(async move { fs.is_tarball(path, resolve_symlink).await })
    }

    pub fn extract_into(
        &self,
        archive: impl Into<PathEntity>,
        into: impl Into<PathEntity>,
        resolve_symlink: bool,
    ) -> Result<Summary, Error> {
        let (fs, archive, into) = (self.inner.clone(), archive.into(), into.into());
        run(async move { fs.extract_into(archive, into, resolve_symlink).await })
    }
}
