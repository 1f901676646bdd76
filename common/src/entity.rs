//! Path locators and the non-destructive operations on them
//!
//! A [`PathEntity`] remembers the path exactly as the caller gave it and re-resolves it
//! against the current working directory every time it is used. It never holds a file handle,
//! so an entity may outlive the node it names; queries on such a stale entity report the node
//! as absent.

use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::error::{Error, IoResultExt};

#[derive(Debug, Clone)]
pub struct PathEntity {
    given: PathBuf,
}

impl PathEntity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { given: path.into() }
    }

    /// The path as originally supplied.
    pub fn given_path(&self) -> &Path {
        &self.given
    }

    /// The given path resolved against the current working directory, with `.` and `..`
    /// folded lexically. Symlinks are not resolved.
    pub fn absolute_path(&self) -> PathBuf {
        let absolute = std::path::absolute(&self.given).unwrap_or_else(|_| self.given.clone());
        normalize(&absolute)
    }

    /// Final component of the absolute path, `None` for the root.
    pub fn base_name(&self) -> Option<String> {
        self.absolute_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// Extension of the base name without the leading dot, e.g. `tgz` for `pkg.tgz`.
    pub fn ext_name(&self) -> Option<String> {
        self.absolute_path()
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
    }

    pub fn parent_path(&self) -> Option<PathEntity> {
        self.absolute_path().parent().map(PathEntity::new)
    }

    /// Appends `segment` below this path. A leading root on `segment` is ignored, so joining
    /// `/b` onto `/a` gives `/a/b`.
    pub fn join(&self, segment: impl AsRef<Path>) -> PathEntity {
        let mut joined = self.absolute_path();
        for component in segment.as_ref().components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {}
                other => joined.push(other.as_os_str()),
            }
        }
        PathEntity::new(normalize(&joined))
    }

    /// Joins all segments onto the first one, see [`PathEntity::join`].
    pub fn join_paths<I, P>(segments: I) -> Result<PathEntity, Error>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathEntity>,
    {
        let mut segments = segments.into_iter().map(Into::into);
        let first = segments
            .next()
            .ok_or_else(|| Error::illegal_argument("join_paths requires at least one path"))?;
        Ok(segments.fold(first, |acc, segment| acc.join(segment.given_path())))
    }

    /// Resolves the segments in order like a sequence of `cd` commands: an absolute segment
    /// discards everything before it.
    pub fn resolve_paths<I, P>(segments: I) -> Result<PathEntity, Error>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathEntity>,
    {
        let mut resolved: Option<PathBuf> = None;
        for segment in segments {
            let segment = segment.into();
            resolved = Some(match resolved {
                Some(base) => base.join(segment.given_path()),
                None => segment.absolute_path(),
            });
        }
        resolved
            .map(|path| PathEntity::new(normalize(&path)))
            .ok_or_else(|| Error::illegal_argument("resolve_paths requires at least one path"))
    }

    /// Path that leads from `self` to `other`, e.g. `../c` from `/a/b` to `/a/c`.
    pub fn relative_path(&self, other: &PathEntity) -> PathBuf {
        let from = self.absolute_path();
        let to = other.absolute_path();
        let from_components: Vec<_> = from.components().collect();
        let to_components: Vec<_> = to.components().collect();
        let common = from_components
            .iter()
            .zip(&to_components)
            .take_while(|(a, b)| a == b)
            .count();
        let mut relative = PathBuf::new();
        for _ in common..from_components.len() {
            relative.push("..");
        }
        for component in &to_components[common..] {
            relative.push(component.as_os_str());
        }
        relative
    }

    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn exists(&self, resolve_symlink: bool) -> Result<bool, Error> {
        Ok(node_metadata(&self.absolute_path(), resolve_symlink)
            .await?
            .is_some())
    }

    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn is_file(&self, resolve_symlink: bool) -> Result<bool, Error> {
        Ok(node_metadata(&self.absolute_path(), resolve_symlink)
            .await?
            .is_some_and(|md| md.is_file()))
    }

    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn is_directory(&self, resolve_symlink: bool) -> Result<bool, Error> {
        Ok(node_metadata(&self.absolute_path(), resolve_symlink)
            .await?
            .is_some_and(|md| md.is_dir()))
    }

    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn is_symbolic_link(&self) -> Result<bool, Error> {
        Ok(node_metadata(&self.absolute_path(), false)
            .await?
            .is_some_and(|md| md.is_symlink()))
    }

    /// Fails with `TypeMismatch` unless the node is a directory.
    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn is_directory_empty(&self, resolve_symlink: bool) -> Result<bool, Error> {
        let path = self.require_directory(resolve_symlink).await?;
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .io_context(|| format!("cannot open directory {:?} for reading", &path))?;
        let first = entries
            .next_entry()
            .await
            .io_context(|| format!("failed traversing directory {:?}", &path))?;
        Ok(first.is_none())
    }

    /// Lists the immediate children. With `resolve_symlink` a symlink to a directory is listed
    /// as that directory.
    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn read_directory(&self, resolve_symlink: bool) -> Result<Vec<PathEntity>, Error> {
        let path = self.require_directory(resolve_symlink).await?;
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .io_context(|| format!("cannot open directory {:?} for reading", &path))?;
        let mut children = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .io_context(|| format!("failed traversing directory {:?}", &path))?
        {
            children.push(PathEntity::new(entry.path()));
        }
        Ok(children)
    }

    /// Ensures a directory exists at this path. An existing directory is left as is.
    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn create_directory(
        &self,
        create_parents: bool,
        mode: Option<u32>,
    ) -> Result<PathEntity, Error> {
        let path = self.absolute_path();
        if let Some(md) = node_metadata(&path, true).await? {
            if md.is_dir() {
                tracing::debug!("directory already exists");
                return Ok(self.clone());
            }
            return Err(Error::type_mismatch(format!(
                "cannot create directory {:?}: a non-directory node exists there",
                &path
            )));
        }
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(create_parents);
        if let Some(mode) = mode {
            builder.mode(mode);
        }
        builder
            .create(&path)
            .await
            .io_context(|| format!("cannot create directory {:?}", &path))?;
        Ok(self.clone())
    }

    /// Ensures a regular file exists at this path. An existing file is left untouched.
    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn create_file(&self, create_parents: bool) -> Result<PathEntity, Error> {
        let path = self.absolute_path();
        if let Some(md) = node_metadata(&path, true).await? {
            if md.is_file() {
                tracing::debug!("file already exists");
                return Ok(self.clone());
            }
            return Err(Error::type_mismatch(format!(
                "cannot create file {:?}: a non-file node exists there",
                &path
            )));
        }
        if create_parents {
            ensure_parent(&path).await?;
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .io_context(|| format!("cannot create file {:?}", &path))?;
        Ok(self.clone())
    }

    pub async fn create_read_stream(&self) -> Result<tokio::fs::File, Error> {
        let path = self.absolute_path();
        tokio::fs::File::open(&path)
            .await
            .io_context(|| format!("cannot open {:?} for reading", &path))
    }

    /// Opens the file for writing, creating it if needed. Without `append` the existing
    /// contents are truncated.
    pub async fn create_write_stream(&self, append: bool) -> Result<tokio::fs::File, Error> {
        let path = self.absolute_path();
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .io_context(|| format!("cannot open {:?} for writing", &path))
    }

    #[instrument(skip(self), fields(path = ?self.given))]
    pub async fn read_file(&self, resolve_symlink: bool) -> Result<Vec<u8>, Error> {
        let path = self.require_file(resolve_symlink).await?;
        let _open_file_guard = throttle::open_file_permit().await;
        tokio::fs::read(&path)
            .await
            .io_context(|| format!("failed reading {:?}", &path))
    }

    pub async fn read_to_string(&self, resolve_symlink: bool) -> Result<String, Error> {
        let bytes = self.read_file(resolve_symlink).await?;
        String::from_utf8(bytes).map_err(|error| {
            Error::new(
                crate::ErrorKind::IoFailure,
                anyhow::Error::new(error)
                    .context(format!("{:?} is not valid UTF-8", self.absolute_path())),
                Default::default(),
            )
        })
    }

    /// Replaces the file contents with `data`, creating the file if it does not exist.
    #[instrument(skip(self, data), fields(path = ?self.given))]
    pub async fn write_file(&self, data: &[u8], resolve_symlink: bool) -> Result<(), Error> {
        let path = self.absolute_path();
        if let Some(md) = node_metadata(&path, resolve_symlink).await? {
            if !md.is_file() {
                return Err(Error::type_mismatch(format!(
                    "cannot write {:?}: not a regular file",
                    &path
                )));
            }
        }
        let _open_file_guard = throttle::open_file_permit().await;
        let mut file = self.create_write_stream(false).await?;
        file.write_all(data)
            .await
            .io_context(|| format!("failed writing {:?}", &path))?;
        file.flush()
            .await
            .io_context(|| format!("failed writing {:?}", &path))
    }

    async fn require_directory(&self, resolve_symlink: bool) -> Result<PathBuf, Error> {
        let path = self.absolute_path();
        match node_metadata(&path, resolve_symlink).await? {
            Some(md) if md.is_dir() => Ok(path),
            Some(_) => Err(Error::type_mismatch(format!(
                "{:?} is not a directory",
                &path
            ))),
            None => Err(Error::not_found(&path)),
        }
    }

    async fn require_file(&self, resolve_symlink: bool) -> Result<PathBuf, Error> {
        let path = self.absolute_path();
        match node_metadata(&path, resolve_symlink).await? {
            Some(md) if md.is_file() => Ok(path),
            Some(_) => Err(Error::type_mismatch(format!(
                "{:?} is not a regular file",
                &path
            ))),
            None => Err(Error::not_found(&path)),
        }
    }
}

impl PartialEq for PathEntity {
    fn eq(&self, other: &Self) -> bool {
        self.absolute_path() == other.absolute_path()
    }
}

impl Eq for PathEntity {}

impl std::hash::Hash for PathEntity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.absolute_path().hash(state);
    }
}

impl std::fmt::Display for PathEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.given.display())
    }
}

impl From<&str> for PathEntity {
    fn from(path: &str) -> Self {
        PathEntity::new(path)
    }
}

impl From<String> for PathEntity {
    fn from(path: String) -> Self {
        PathEntity::new(path)
    }
}

impl From<&String> for PathEntity {
    fn from(path: &String) -> Self {
        PathEntity::new(path)
    }
}

impl From<&Path> for PathEntity {
    fn from(path: &Path) -> Self {
        PathEntity::new(path)
    }
}

impl From<PathBuf> for PathEntity {
    fn from(path: PathBuf) -> Self {
        PathEntity::new(path)
    }
}

impl From<&PathBuf> for PathEntity {
    fn from(path: &PathBuf) -> Self {
        PathEntity::new(path)
    }
}

impl From<&PathEntity> for PathEntity {
    fn from(entity: &PathEntity) -> Self {
        entity.clone()
    }
}

/// Folds `.` and `..` components without touching the file system.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn is_absent(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
    )
}

/// Reads node metadata, mapping "does not exist" to `None` and every other failure to an error.
pub(crate) async fn node_metadata(
    path: &Path,
    resolve_symlink: bool,
) -> Result<Option<std::fs::Metadata>, Error> {
    let result = if resolve_symlink {
        tokio::fs::metadata(path).await
    } else {
        tokio::fs::symlink_metadata(path).await
    };
    match result {
        Ok(md) => Ok(Some(md)),
        Err(error) if is_absent(&error) => Ok(None),
        Err(error) => Err(Error::io(
            error,
            format!("failed reading metadata from {:?}", path),
        )),
    }
}

/// Creates the missing parent directories of `path`.
pub(crate) async fn ensure_parent(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .io_context(|| format!("cannot create parent directories of {:?}", path))?;
    }
    Ok(())
}
