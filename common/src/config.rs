//! Configuration types for tree operations, the runtime and the process runner

use crate::error::Error;

/// Settings shared by every recursive tree algorithm and the file finder
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Maximum number of children of one directory processed concurrently
    pub max_width: usize,
}

impl Settings {
    pub const DEFAULT_MAX_WIDTH: usize = 64;

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_width == 0 {
            return Err(Error::illegal_argument("max_width must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_width: Self::DEFAULT_MAX_WIDTH,
        }
    }
}

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Throttling configuration for resource control
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleConfig {
    /// Maximum number of open files (None = 80% of system limit, Some(0) = no limit)
    pub max_open_files: Option<usize>,
    /// Operations per second throttle (0 = no throttle)
    pub ops_throttle: usize,
}

impl ThrottleConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.ops_throttle > 1_000_000_000 {
            return Err(format!(
                "ops_throttle of {} per second is not supported",
                self.ops_throttle
            ));
        }
        Ok(())
    }
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    pub(crate) fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "off";
        }
        match self.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
