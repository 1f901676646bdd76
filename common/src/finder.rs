//! Pattern-driven recursive file scanning
//!
//! Patterns are regular expressions searched (not anchored) in the absolute form of each
//! visited path. Ignore patterns are applied before anything else, so an ignored directory is
//! never entered. Symlinks are followed, except into a directory that is already being walked
//! higher up the same branch. The scan is read-only and never takes the transaction gate.

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;

use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::Settings;
use crate::entity::{PathEntity, node_metadata};
use crate::error::Error;
use crate::fanout::FanOut;

/// Every matching file found by one scan.
pub type ScanResult = HashSet<PathEntity>;

/// `(dev, ino)` of a directory, the same whichever path leads to it.
type DirId = (u64, u64);

/// A single pattern, given either as regex source text or already compiled.
#[derive(Debug, Clone)]
pub enum PatternSource {
    Literal(String),
    Compiled(regex::Regex),
}

impl From<&str> for PatternSource {
    fn from(source: &str) -> Self {
        PatternSource::Literal(source.to_string())
    }
}

impl From<String> for PatternSource {
    fn from(source: String) -> Self {
        PatternSource::Literal(source)
    }
}

impl From<regex::Regex> for PatternSource {
    fn from(regex: regex::Regex) -> Self {
        PatternSource::Compiled(regex)
    }
}

/// An unordered set of patterns; a path matches the list when it matches any member.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<regex::Regex>,
}

impl PatternList {
    pub fn new<I, P>(sources: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = P>,
        P: Into<PatternSource>,
    {
        let patterns = sources
            .into_iter()
            .map(|source| match source.into() {
                PatternSource::Compiled(regex) => Ok(regex),
                PatternSource::Literal(text) => regex::Regex::new(&text).map_err(|error| {
                    Error::illegal_argument(format!("invalid pattern {:?}: {}", text, error))
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_match(&self, path: &std::path::Path) -> bool {
        let text = path.to_string_lossy();
        self.patterns.iter().any(|pattern| pattern.is_match(&text))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug)]
struct Patterns {
    matches: PatternList,
    ignores: PatternList,
    settings: Settings,
}

#[derive(Debug, Clone)]
pub struct FileFinder {
    patterns: Arc<Patterns>,
}

impl FileFinder {
    /// Compiles both pattern lists; a literal that is not a valid regular expression is an
    /// `IllegalArgument`.
    pub fn new<M, MP, I, IP>(match_patterns: M, ignore_patterns: I) -> Result<Self, Error>
    where
        M: IntoIterator<Item = MP>,
        MP: Into<PatternSource>,
        I: IntoIterator<Item = IP>,
        IP: Into<PatternSource>,
    {
        Self::with_settings(match_patterns, ignore_patterns, Settings::default())
    }

    pub fn with_settings<M, MP, I, IP>(
        match_patterns: M,
        ignore_patterns: I,
        settings: Settings,
    ) -> Result<Self, Error>
    where
        M: IntoIterator<Item = MP>,
        MP: Into<PatternSource>,
        I: IntoIterator<Item = IP>,
        IP: Into<PatternSource>,
    {
        settings.validate()?;
        Ok(Self {
            patterns: Arc::new(Patterns {
                matches: PatternList::new(match_patterns)?,
                ignores: PatternList::new(ignore_patterns)?,
                settings,
            }),
        })
    }

    /// Walks every root concurrently and collects the matching files. Any failure fails the whole
    /// scan and no partial result is returned.
    #[instrument(skip_all)]
    pub async fn scan<R, P>(&self, roots: R) -> Result<ScanResult, Error>
    where
        R: IntoIterator<Item = P>,
        P: Into<PathEntity>,
    {
        let roots: Vec<PathEntity> = roots.into_iter().map(Into::into).collect();
        if roots.is_empty() {
            return Err(Error::illegal_argument("scan requires at least one root path"));
        }
        tracing::debug!("scanning {} root(s)", roots.len());
        let mut fan_out = FanOut::<ScanResult>::new(self.patterns.settings.max_width);
        for root in roots {
            if fan_out.has_failed() {
                break;
            }
            fan_out.spawn(scan_path(self.patterns.clone(), root, Vec::new())).await;
        }
        let found = fan_out.finish().await?;
        tracing::debug!("scan matched {} file(s)", found.len());
        Ok(found)
    }
}

#[async_recursion]
async fn scan_path(
    patterns: Arc<Patterns>,
    path: PathEntity,
    mut ancestors: Vec<DirId>,
) -> Result<ScanResult, Error> {
    let absolute = path.absolute_path();
    if patterns.ignores.is_match(&absolute) {
        tracing::debug!("ignoring {:?}", &absolute);
        return Ok(ScanResult::new());
    }
    let Some(md) = node_metadata(&absolute, true).await? else {
        // vanished, or a dangling symlink
        return Ok(ScanResult::new());
    };
    if md.is_dir() {
        let id = (md.dev(), md.ino());
        if ancestors.contains(&id) {
            tracing::debug!("{:?} leads back into a directory being scanned", &absolute);
            return Ok(ScanResult::new());
        }
        ancestors.push(id);
        let children = path.read_directory(true).await?;
        let mut fan_out = FanOut::<ScanResult>::new(patterns.settings.max_width);
        for child in children {
            if fan_out.has_failed() {
                break;
            }
            fan_out.spawn(scan_path(patterns.clone(), child, ancestors.clone())).await;
        }
        return fan_out.finish().await;
    }
    let mut found = ScanResult::new();
    if md.is_file() && patterns.matches.is_match(&absolute) {
        found.insert(path);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use crate::ErrorKind;
    use tracing_test::traced_test;

    fn names(found: &ScanResult) -> Vec<String> {
        let mut names: Vec<String> = found.iter().filter_map(|e| e.base_name()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    #[traced_test]
    async fn ignore_wins_over_match() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_hello_world_dir().await?;
        let finder = FileFinder::new([r".*\.txt$"], ["sub"])?;
        let found = finder.scan([tmp_dir.join("a")]).await?;
        assert_eq!(found.len(), 1);
        assert!(found.contains(&PathEntity::new(tmp_dir.join("a").join("x.txt"))));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn symlinked_files_and_directories_are_followed() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let finder = FileFinder::new([r"/baz/"], Vec::<&str>::new())?;
        let found = finder.scan([tmp_dir.join("foo")]).await?;
        assert_eq!(names(&found), vec!["4.txt", "5.txt", "6.txt"]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn symlink_cycles_are_not_reentered() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::create_temp_dir().await?;
        tokio::fs::write(tmp_dir.join("f.txt"), "f").await?;
        tokio::fs::symlink(".", tmp_dir.join("a")).await?;
        tokio::fs::symlink(".", tmp_dir.join("b")).await?;
        tokio::fs::create_dir(tmp_dir.join("sub")).await?;
        tokio::fs::write(tmp_dir.join("sub").join("g.txt"), "g").await?;
        tokio::fs::symlink("..", tmp_dir.join("sub").join("up")).await?;
        let finder = FileFinder::new([r"\.txt$"], Vec::<&str>::new())?;
        let found = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            finder.scan([tmp_dir.clone()]),
        )
        .await??;
        assert_eq!(names(&found), vec!["f.txt", "g.txt"]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn compiled_and_literal_patterns_mix() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let finder = FileFinder::new(
            [
                PatternSource::from(regex::Regex::new(r"0\.txt$")?),
                PatternSource::from(r"1\.txt$"),
            ],
            Vec::<&str>::new(),
        )?;
        let found = finder.scan([tmp_dir.join("foo")]).await?;
        assert_eq!(names(&found), vec!["0.txt", "1.txt"]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn overlapping_roots_do_not_duplicate() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let finder = FileFinder::new([r"bar/\d\.txt$"], Vec::<&str>::new())?;
        let foo = tmp_dir.join("foo");
        let found = finder.scan([foo.clone(), foo.join("bar")]).await?;
        assert_eq!(names(&found), vec!["1.txt", "2.txt", "3.txt"]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn vanished_root_contributes_nothing() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let finder = FileFinder::new([".*"], Vec::<&str>::new())?;
        let found = finder
            .scan([tmp_dir.join("gone"), tmp_dir.join("foo").join("bar")])
            .await?;
        assert_eq!(found.len(), 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn empty_roots_are_rejected() -> Result<(), anyhow::Error> {
        let finder = FileFinder::new([".*"], Vec::<&str>::new())?;
        let error = finder.scan(Vec::<PathEntity>::new()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::IllegalArgument);
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let error = FileFinder::new(["("], Vec::<&str>::new()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::IllegalArgument);
    }

    #[test]
    fn pattern_list_matches_any() -> Result<(), anyhow::Error> {
        let list = PatternList::new(["^/nope", r"\.rs$"])?;
        assert_eq!(list.len(), 2);
        assert!(list.is_match(std::path::Path::new("/src/lib.rs")));
        assert!(!list.is_match(std::path::Path::new("/src/lib.py")));
        assert!(!PatternList::default().is_match(std::path::Path::new("/x")));
        Ok(())
    }
}
