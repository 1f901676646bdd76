use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tfs",
    version,
    about = "Copy, move, remove, link, scan and extract path trees",
    long_about = "`tfs` runs tree operations over local paths. Operations that create a
destination never overwrite an existing node: they stop with a conflict error instead.

EXAMPLES:
    # Copy a directory so that it appears at /backup/project
    tfs copy /src/project /backup/project --summary

    # List every Rust file under two roots, skipping build output
    tfs find /src/a /src/b --match '\\.rs$' --ignore '/target/'

    # Unpack an archive into a directory, creating it if needed
    tfs extract release.tgz /opt/release"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Maximum number of children of one directory processed concurrently
    #[arg(
        long,
        default_value_t = common::Settings::DEFAULT_MAX_WIDTH,
        value_name = "N",
        global = true,
        help_heading = "Performance & throttling"
    )]
    max_width: usize,

    /// Maximum number of open files, 0 means no limit, leaving unspecified means using 80% of max open files system limit
    #[arg(long, value_name = "N", global = true, help_heading = "Performance & throttling")]
    max_open_files: Option<usize>,

    /// Throttle the number of operations per second, 0 means no throttle
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Performance & throttling"
    )]
    ops_throttle: usize,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Copy SRC so that it appears at DST
    Copy {
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
        /// Copy the children of SRC into DST instead of SRC itself
        #[arg(long)]
        contents: bool,
        /// Refuse to copy directories
        #[arg(long)]
        no_recursive: bool,
        /// Copy what a top-level SRC symlink points to instead of the link
        #[arg(short = 'L', long)]
        resolve_symlink: bool,
        /// What to do when a destination node already exists
        #[arg(long, value_enum, default_value_t)]
        policy: common::ConflictPolicy,
    },
    /// Move SRC so that it appears at DST
    Move {
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
        /// Move the children of SRC into DST, leaving SRC empty
        #[arg(long)]
        contents: bool,
        /// Refuse to move directories
        #[arg(long)]
        no_recursive: bool,
        /// Move a copy of what a top-level SRC symlink points to and remove the link
        #[arg(short = 'L', long)]
        resolve_symlink: bool,
        /// What to do when a destination node already exists
        #[arg(long, value_enum, default_value_t)]
        policy: common::ConflictPolicy,
    },
    /// Remove paths; a path that does not exist is an error
    Remove {
        #[arg(required = true)]
        paths: Vec<std::path::PathBuf>,
        /// Only remove files, symlinks and empty directories
        #[arg(long)]
        no_recursive: bool,
        /// Remove what a top-level symlink points to instead of the link
        #[arg(short = 'L', long)]
        resolve_symlink: bool,
    },
    /// Create a symlink at DST pointing at the absolute path of SRC
    Link {
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
        /// Treat DST as a directory and create DST/<name of SRC>
        #[arg(long, conflicts_with = "contents")]
        into: bool,
        /// Create one link inside DST for every child of the directory SRC
        #[arg(long)]
        contents: bool,
        /// What to do when a destination node already exists
        #[arg(long, value_enum, default_value_t)]
        policy: common::ConflictPolicy,
    },
    /// Print every file under ROOTS whose absolute path matches a pattern
    Find {
        #[arg(required = true)]
        roots: Vec<std::path::PathBuf>,
        /// Regular expression a file's absolute path must match (can be specified multiple times)
        #[arg(long = "match", value_name = "REGEX", action = clap::ArgAction::Append, required = true)]
        match_patterns: Vec<String>,
        /// Regular expression of paths to skip without descending (can be specified multiple times)
        #[arg(long = "ignore", value_name = "REGEX", action = clap::ArgAction::Append)]
        ignore_patterns: Vec<String>,
        /// Print the result as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Extract a .tgz / .tar.gz archive into a directory
    Extract {
        archive: std::path::PathBuf,
        into: std::path::PathBuf,
        /// Accept an archive reached through a symlink
        #[arg(short = 'L', long)]
        resolve_symlink: bool,
    },
    /// Print whether PATH is a regular file with an archive name
    IsArchive {
        path: std::path::PathBuf,
        /// Follow a symlink at PATH
        #[arg(short = 'L', long)]
        resolve_symlink: bool,
    },
}

#[instrument]
async fn async_main(args: Args) -> Result<common::Summary> {
    let settings = common::Settings {
        max_width: args.max_width,
    };
    settings.validate()?;
    let fs = common::TreeFs::new(settings);
    let summary = match args.command {
        Command::Copy {
            src,
            dst,
            contents,
            no_recursive,
            resolve_symlink,
            policy,
        } => {
            if contents {
                fs.copy_directory_contents(src, dst, policy).await?
            } else {
                let options = common::CopyOptions {
                    recursive: !no_recursive,
                    policy,
                    resolve_symlink,
                };
                fs.copy(src, dst, &options).await?
            }
        }
        Command::Move {
            src,
            dst,
            contents,
            no_recursive,
            resolve_symlink,
            policy,
        } => {
            if contents {
                fs.move_directory_contents(src, dst, policy).await?
            } else {
                let options = common::MoveOptions {
                    recursive: !no_recursive,
                    policy,
                    resolve_symlink,
                };
                fs.mv(src, dst, &options).await?
            }
        }
        Command::Remove {
            paths,
            no_recursive,
            resolve_symlink,
        } => {
            let options = common::DeleteOptions {
                recursive: !no_recursive,
                resolve_symlink,
            };
            let mut summary = common::Summary::default();
            for path in paths {
                summary += fs.delete(path, &options).await?;
            }
            summary
        }
        Command::Link {
            src,
            dst,
            into,
            contents,
            policy,
        } => {
            if contents {
                fs.symlink_directory_contents_into(src, dst, policy).await?
            } else if into {
                fs.symlink_into(src, dst, policy).await?
            } else {
                fs.symlink(src, dst, policy).await?
            }
        }
        Command::Find {
            roots,
            match_patterns,
            ignore_patterns,
            json,
        } => {
            let found = fs.find(match_patterns, ignore_patterns, roots).await?;
            let mut paths: Vec<String> = found
                .iter()
                .map(|entity| entity.absolute_path().display().to_string())
                .collect();
            paths.sort();
            if json {
                println!("{}", serde_json::to_string(&paths)?);
            } else {
                for path in paths {
                    println!("{}", path);
                }
            }
            common::Summary::default()
        }
        Command::Extract {
            archive,
            into,
            resolve_symlink,
        } => fs.extract_into(archive, into, resolve_symlink).await?,
        Command::IsArchive {
            path,
            resolve_symlink,
        } => {
            println!("{}", fs.is_tarball(path, resolve_symlink).await?);
            common::Summary::default()
        }
    };
    Ok(summary)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_open_files: args.max_open_files,
        ops_throttle: args.ops_throttle,
    };
    let res = common::run(output, runtime, throttle, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
