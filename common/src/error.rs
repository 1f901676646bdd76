use anyhow::anyhow;

use crate::summary::Summary;

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// the source, or a path component the operation needed, does not exist
    NotFound,
    /// the destination node already exists and the conflict policy refused to touch it
    Conflict,
    /// found a file where a directory was required (or vice versa), or a directory was given
    /// to a non-recursive operation
    TypeMismatch,
    /// the node failed the tarball check
    ArchiveInvalid,
    /// any other failure reported by the operating system or the archive codec
    IoFailure,
    /// the call itself was malformed
    IllegalArgument,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::ArchiveInvalid => "invalid archive",
            ErrorKind::IoFailure => "i/o failure",
            ErrorKind::IllegalArgument => "illegal argument",
        };
        f.write_str(name)
    }
}

/// Error returned by every tree operation.
///
/// Carries the [`ErrorKind`], the full context chain of the failure and the summary of the
/// work that completed before it. Nothing is rolled back, so the summary describes what is
/// left on disk.
///
/// # Logging Convention
/// The Display implementation shows the full error chain, so `{}` and `{:#}` print the same:
/// ```ignore
/// tracing::error!("copy failed: {:#}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    pub kind: ErrorKind,
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, source: anyhow::Error, summary: Summary) -> Self {
        Error {
            kind,
            source,
            summary,
        }
    }

    pub fn not_found(path: &std::path::Path) -> Self {
        Self::new(
            ErrorKind::NotFound,
            anyhow!("{:?} does not exist", path),
            Default::default(),
        )
    }

    pub fn conflict(src: &std::path::Path, dst: &std::path::Path) -> Self {
        Self::new(
            ErrorKind::Conflict,
            anyhow!(
                "cannot place {:?} at {:?}: destination already exists",
                src,
                dst
            ),
            Default::default(),
        )
    }

    pub fn type_mismatch(message: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::TypeMismatch,
            anyhow!("{}", message),
            Default::default(),
        )
    }

    pub fn archive_invalid(path: &std::path::Path) -> Self {
        Self::new(
            ErrorKind::ArchiveInvalid,
            anyhow!("{:?} is not a tarball", path),
            Default::default(),
        )
    }

    pub fn illegal_argument(message: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::IllegalArgument,
            anyhow!("{}", message),
            Default::default(),
        )
    }

    /// Wraps an operating system error, classifying "no such file" as [`ErrorKind::NotFound`]
    /// and "already exists" as [`ErrorKind::Conflict`].
    pub fn io(error: std::io::Error, context: impl std::fmt::Display) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::Conflict,
            _ => ErrorKind::IoFailure,
        };
        let context = context.to_string();
        Self::new(kind, anyhow::Error::new(error).context(context), Default::default())
    }

    pub(crate) fn join(error: tokio::task::JoinError) -> Self {
        Self::new(
            ErrorKind::IoFailure,
            anyhow::Error::new(error).context("tree operation task failed"),
            Default::default(),
        )
    }

    #[must_use]
    pub fn with_summary(mut self, summary: Summary) -> Self {
        self.summary = summary;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Attaches context to `std::io` results the way `anyhow::Context` does, producing an
/// [`Error`] classified by the underlying I/O error kind.
pub trait IoResultExt<T> {
    fn io_context<C, F>(self, context: F) -> Result<T, Error>
    where
        C: std::fmt::Display,
        F: FnOnce() -> C;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<C, F>(self, context: F) -> Result<T, Error>
    where
        C: std::fmt::Display,
        F: FnOnce() -> C,
    {
        self.map_err(|error| Error::io(error, context()))
    }
}
