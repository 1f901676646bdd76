//! Process-wide resource limits for tree operations
//!
//! The recursive copy, move and delete algorithms fan out over directory children, so a large
//! tree can easily try to hold thousands of file descriptors at once. This crate provides two
//! knobs those algorithms consult before touching the file system:
//!
//! 1. **Open files limit** - caps the number of files held open simultaneously
//! 2. **Operations throttle** - caps the number of tree nodes visited per interval
//!
//! Both limits are disabled until configured, in which case every call returns immediately.
//!
//! # Open files limit
//!
//! ```rust,no_run
//! use throttle::{open_file_permit, set_max_open_files};
//!
//! # async fn example() {
//! set_max_open_files(1024);
//! let _guard = open_file_permit().await;
//! // open the file here - the permit is returned when the guard is dropped
//! # }
//! ```
//!
//! # Operations throttle
//!
//! Tokens are consumed one per visited node and topped back up by a background task:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use throttle::{get_ops_token, init_ops_tokens, run_ops_replenish_thread};
//!
//! # async fn example() {
//! // 10 tokens every 100ms = 100 nodes per second
//! init_ops_tokens(10);
//! tokio::spawn(run_ops_replenish_thread(Duration::from_millis(100)));
//! get_ops_token().await;
//! # }
//! ```

mod semaphore;

static OPEN_FILES_LIMIT: semaphore::Semaphore = semaphore::Semaphore::new();
static OPS_THROTTLE: semaphore::Semaphore = semaphore::Semaphore::new();

/// Limits the number of simultaneously open files, 0 removes the limit.
pub fn set_max_open_files(max_open_files: usize) {
    tracing::debug!("max open files: {}", max_open_files);
    OPEN_FILES_LIMIT.setup(max_open_files);
}

/// Held while a file is open; releases its slot on drop.
pub struct OpenFileGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn open_file_permit() -> OpenFileGuard {
    OpenFileGuard {
        _permit: OPEN_FILES_LIMIT.acquire().await,
    }
}

pub fn init_ops_tokens(ops_tokens: usize) {
    tracing::debug!("ops tokens: {}", ops_tokens);
    OPS_THROTTLE.setup(ops_tokens);
}

pub async fn get_ops_token() {
    OPS_THROTTLE.consume().await;
}

/// Refills the ops tokens to the amount given to [`init_ops_tokens`] once per `interval`.
/// Runs forever unless the throttle is disabled, so spawn it.
pub async fn run_ops_replenish_thread(interval: std::time::Duration) {
    OPS_THROTTLE.refill(interval).await;
}
