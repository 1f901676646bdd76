//! Path tree operations with a synchronous and an asynchronous surface
//!
//! The crate covers existence and type queries, recursive copy, move, delete and symlink
//! creation, streamed reads and writes, a pattern-driven file finder and gated tarball
//! extraction.
//!
//! # Conflicts
//!
//! Every operation that creates a destination node consults a [`ConflictPolicy`] right before
//! creating it. The only policy, [`ConflictPolicy::Stop`], fails that sub-operation with
//! [`ErrorKind::Conflict`] and leaves the existing node untouched. Siblings already processed are
//! not rolled back.
//!
//! # Serialization
//!
//! Mutating operations issued through a [`TreeFs`] (or [`BlockingTreeFs`]) hold its
//! [`TransactionGate`] for their full duration, so two of them never interleave. Queries and
//! scans do not take the gate and observe the tree as it is at the time of the call.
//!
//! # Concurrency
//!
//! Children of a directory are processed concurrently, at most [`Settings::max_width`] at a
//! time. The first failing child stops new children from being started; children already
//! running finish and their work is reported in the error's [`Summary`].
//!
//! # Error handling
//!
//! All operations return [`Error`], which carries an [`ErrorKind`], the context chain of the
//! failure and the summary of the work done before it. Its `Display` shows the full chain:
//! ```ignore
//! tracing::error!("operation failed: {:#}", &error);
//! ```

pub mod blocking;
pub mod config;
pub mod copy;
pub mod entity;
pub mod error;
mod fanout;
pub mod finder;
pub mod gate;
pub mod link;
pub mod mv;
pub mod policy;
pub mod rm;
pub mod summary;
pub mod tarball;
pub mod treefs;

#[cfg(test)]
mod testutils;

pub use blocking::BlockingTreeFs;
pub use config::{OutputConfig, RuntimeConfig, Settings, ThrottleConfig};
pub use copy::CopyOptions;
pub use entity::PathEntity;
pub use error::{Error, ErrorKind};
pub use finder::{FileFinder, PatternList, PatternSource, ScanResult};
pub use gate::{GatePermit, TransactionGate};
pub use mv::MoveOptions;
pub use policy::ConflictPolicy;
pub use rm::DeleteOptions;
pub use summary::Summary;
pub use tarball::Tarball;
pub use treefs::TreeFs;

fn init_logging(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::new(output.log_filter());
    // a second runner in the same process keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_max_open_files() -> usize {
    match nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE) {
        Ok((soft, _hard)) => {
            let limit = usize::try_from(soft).unwrap_or(usize::MAX);
            limit / 10 * 8
        }
        Err(error) => {
            tracing::info!("cannot read RLIMIT_NOFILE ({}), not limiting open files", error);
            0
        }
    }
}

/// Sets up logging, the tokio runtime and resource throttling, then drives `func` to
/// completion. The summary is printed on success when requested; the error is logged on failure
/// unless `quiet` is set. Returns `None` when anything failed.
pub fn run<Fut, S, E>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle: ThrottleConfig,
    func: impl FnOnce() -> Fut,
) -> Option<S>
where
    S: std::fmt::Display,
    E: std::fmt::Display,
    Fut: std::future::Future<Output = Result<S, E>>,
{
    init_logging(&output);
    if let Err(error) = throttle.validate() {
        tracing::error!("{}", error);
        return None;
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            tracing::error!("failed to start the tokio runtime: {:#}", error);
            return None;
        }
    };
    let max_open_files = throttle
        .max_open_files
        .unwrap_or_else(default_max_open_files);
    throttle::set_max_open_files(max_open_files);
    let res = tokio_runtime.block_on(async move {
        if throttle.ops_throttle > 0 {
            throttle::init_ops_tokens(throttle.ops_throttle);
            tokio::spawn(throttle::run_ops_replenish_thread(
                std::time::Duration::from_secs(1),
            ));
        }
        func().await
    });
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{}", &summary);
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                tracing::error!("{:#}", &error);
            }
            None
        }
    }
}
