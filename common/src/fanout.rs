//! Bounded fan-out over the children of one directory
//!
//! Children are spawned onto a `JoinSet`, at most `max_width` at a time. After the first
//! failure no new children are started, but the ones already running are awaited rather than
//! aborted, and their results still count toward the accumulated total.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::entity::PathEntity;
use crate::error::{Error, IoResultExt};
use crate::summary::Summary;

/// Results that can be merged across concurrently processed children.
pub(crate) trait Accumulate: Default + Send + 'static {
    fn absorb(&mut self, other: Self);

    /// Folds in whatever a failed child reports about the work it did complete.
    fn absorb_failed(&mut self, _error: &Error) {}

    /// Attaches the accumulated total to the error returned to the caller.
    fn attach(self, error: Error) -> Error {
        error
    }
}

impl Accumulate for Summary {
    fn absorb(&mut self, other: Self) {
        *self += other;
    }

    fn absorb_failed(&mut self, error: &Error) {
        *self += error.summary;
    }

    fn attach(self, error: Error) -> Error {
        error.with_summary(self)
    }
}

impl Accumulate for HashSet<PathEntity> {
    fn absorb(&mut self, other: Self) {
        self.extend(other);
    }
}

pub(crate) struct FanOut<T: Accumulate> {
    join_set: tokio::task::JoinSet<Result<T, Error>>,
    max_width: usize,
    total: T,
    first_error: Option<Error>,
}

impl<T: Accumulate> FanOut<T> {
    pub fn new(max_width: usize) -> Self {
        Self {
            join_set: tokio::task::JoinSet::new(),
            max_width: max_width.max(1),
            total: T::default(),
            first_error: None,
        }
    }

    pub fn has_failed(&self) -> bool {
        self.first_error.is_some()
    }

    /// Spawns `task` once there is room for it. Does nothing once a failure was recorded.
    pub async fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = Result<T, Error>> + Send + 'static,
    {
        // the ops-throttle never deadlocks, so it is safe to await before spawning
        throttle::get_ops_token().await;
        while let Some(res) = self.join_set.try_join_next() {
            self.record(res.map_err(Error::join).and_then(|res| res));
        }
        while !self.has_failed() && self.join_set.len() >= self.max_width {
            match self.join_set.join_next().await {
                Some(res) => self.record(res.map_err(Error::join).and_then(|res| res)),
                None => break,
            }
        }
        if self.has_failed() {
            tracing::debug!("not starting new work after a failure");
            return;
        }
        self.join_set.spawn(task);
    }

    /// Records a failure that happened outside of a spawned child.
    pub fn fail(&mut self, error: Error) {
        self.record(Err(error));
    }

    fn record(&mut self, result: Result<T, Error>) {
        match result {
            Ok(partial) => self.total.absorb(partial),
            Err(error) => {
                self.total.absorb_failed(&error);
                if self.first_error.is_none() {
                    tracing::error!("{:#}", &error);
                    self.first_error = Some(error);
                } else {
                    tracing::error!("additional failure after the first one: {:#}", &error);
                }
            }
        }
    }

    /// Waits for every started child and returns the merged total, or the first failure with
    /// the total attached.
    pub async fn finish(mut self) -> Result<T, Error> {
        while let Some(res) = self.join_set.join_next().await {
            self.record(res.map_err(Error::join).and_then(|res| res));
        }
        match self.first_error.take() {
            Some(error) => Err(self.total.attach(error)),
            None => Ok(self.total),
        }
    }
}

/// Streams the entries of `dir` and runs `visit(child_path, child_name)` for each of them,
/// summing the resulting summaries.
pub(crate) async fn for_each_child<F, Fut>(
    dir: &Path,
    max_width: usize,
    mut visit: F,
) -> Result<Summary, Error>
where
    F: FnMut(PathBuf, std::ffi::OsString) -> Fut,
    Fut: std::future::Future<Output = Result<Summary, Error>> + Send + 'static,
{
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .io_context(|| format!("cannot open directory {:?} for reading", dir))?;
    let mut fan_out = FanOut::<Summary>::new(max_width);
    while !fan_out.has_failed() {
        match entries
            .next_entry()
            .await
            .io_context(|| format!("failed traversing directory {:?}", dir))
        {
            Ok(Some(entry)) => fan_out.spawn(visit(entry.path(), entry.file_name())).await,
            Ok(None) => break,
            Err(error) => fan_out.fail(error),
        }
    }
    // ReadDir holds a file descriptor, release it before waiting on the children
    drop(entries);
    fan_out.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn width_is_respected() -> Result<(), anyhow::Error> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut fan_out = FanOut::<Summary>::new(3);
        for _ in 0..20 {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            fan_out
                .spawn(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(Summary {
                        files_copied: 1,
                        ..Default::default()
                    })
                })
                .await;
        }
        let total = fan_out.finish().await?;
        assert_eq!(total.files_copied, 20);
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_keeps_partial_summary_and_drains_started_children()
    -> Result<(), anyhow::Error> {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut fan_out = FanOut::<Summary>::new(8);
        for idx in 0..4 {
            let finished = finished.clone();
            fan_out
                .spawn(async move {
                    if idx == 0 {
                        return Err(Error::illegal_argument("child failed").with_summary(
                            Summary {
                                files_copied: 1,
                                ..Default::default()
                            },
                        ));
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(Summary {
                        files_copied: 1,
                        ..Default::default()
                    })
                })
                .await;
        }
        let error = fan_out.finish().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::IllegalArgument);
        // started siblings run to completion and are counted
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(error.summary.files_copied, 4);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn no_new_children_after_failure() -> Result<(), anyhow::Error> {
        let started = Arc::new(AtomicUsize::new(0));
        let mut fan_out = FanOut::<Summary>::new(1);
        fan_out
            .spawn(async { Err(Error::illegal_argument("first child failed")) })
            .await;
        for _ in 0..5 {
            let started = started.clone();
            fan_out
                .spawn(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    Ok(Summary::default())
                })
                .await;
        }
        assert!(fan_out.finish().await.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn finished_failure_stops_spawning_below_width() -> Result<(), anyhow::Error> {
        let started = Arc::new(AtomicUsize::new(0));
        let mut fan_out = FanOut::<Summary>::new(64);
        fan_out
            .spawn(async { Err(Error::illegal_argument("first child failed")) })
            .await;
        // let the failing child complete while the set is far from full
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        for _ in 0..5 {
            let started = started.clone();
            fan_out
                .spawn(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    Ok(Summary::default())
                })
                .await;
        }
        assert!(fan_out.has_failed());
        assert!(fan_out.finish().await.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
