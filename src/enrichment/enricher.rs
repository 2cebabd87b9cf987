use crate::cache::TtlCache;
use crate::enrichment::git;
use crate::enrichment::process::ProcessInvoker;
use crate::enrichment::vhost::VhostLocator;
use crate::error::{EnrichmentField, EnrichmentFieldFailure};
use crate::events::{BlameInfo, ErrorDetail, ErrorTrace, UNKNOWN_REMOTE};
use log::{debug, error, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Lifetime of git root, remote and blame entries
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

const ROOT_CACHE_CAPACITY: usize = 1000;
const REMOTE_CACHE_CAPACITY: usize = 1000;
const BLAME_CACHE_CAPACITY: usize = 5000;

/// `in <path> on line <N>` as written by PHP error messages
pub const LOCATION_PATTERN: &str = r"\bin (.+?) on line (\d+)";

// Constant pattern, compilation is checked in tests
static LOCATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LOCATION_PATTERN).expect("location pattern is a valid regex"));

/// Extract the file and line an error points at
///
/// The first `in <path> on line <N>` occurrence wins; a line number of zero
/// or one that does not fit in `u32` means no location.
pub fn extract_location(text: &str) -> Option<(PathBuf, u32)> {
    let captures = LOCATION_REGEX.captures(text)?;
    let path = captures.get(1)?.as_str().trim();
    let line: u32 = captures.get(2)?.as_str().parse().ok()?;
    if path.is_empty() || line == 0 {
        return None;
    }
    Some((PathBuf::from(path), line))
}

/// Result of enriching one trace
///
/// Field failures are reported here for logging; they never prevent the
/// detail from being produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub detail: ErrorDetail,
    pub failures: Vec<EnrichmentFieldFailure>,
}

/// Derives file, vhost and version-control context for error traces
///
/// Every lookup is cached: vhost results for the lifetime of the enricher
/// (or until the vhost directory changes), git root, remote and blame for
/// [`DEFAULT_CACHE_TTL`]. Each field degrades independently.
pub struct MetadataEnricher {
    invoker: Box<dyn ProcessInvoker>,
    vhost_locator: Box<dyn VhostLocator>,
    vhost_dir: PathBuf,
    vhost_cache: TtlCache<PathBuf, Option<PathBuf>>,
    root_cache: TtlCache<PathBuf, Option<PathBuf>>,
    remote_cache: TtlCache<PathBuf, String>,
    blame_cache: TtlCache<(PathBuf, u32), Option<BlameInfo>>,
}

impl MetadataEnricher {
    /// Create an enricher with the default one hour TTL
    ///
    /// # Arguments
    ///
    /// * `invoker` - Runs `git`
    /// * `vhost_locator` - Searches the vhost directory
    /// * `vhost_dir` - Directory holding virtual-host definitions
    pub fn new(
        invoker: Box<dyn ProcessInvoker>,
        vhost_locator: Box<dyn VhostLocator>,
        vhost_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_ttl(invoker, vhost_locator, vhost_dir, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(
        invoker: Box<dyn ProcessInvoker>,
        vhost_locator: Box<dyn VhostLocator>,
        vhost_dir: impl Into<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            invoker,
            vhost_locator,
            vhost_dir: vhost_dir.into(),
            vhost_cache: TtlCache::unbounded(),
            root_cache: TtlCache::new(ttl, ROOT_CACHE_CAPACITY),
            remote_cache: TtlCache::new(ttl, REMOTE_CACHE_CAPACITY),
            blame_cache: TtlCache::new(ttl, BLAME_CACHE_CAPACITY),
        }
    }

    pub fn vhost_dir(&self) -> &Path {
        &self.vhost_dir
    }

    /// Point vhost resolution at a different directory
    ///
    /// Cached vhost results are dropped when the directory actually changes.
    /// Returns whether it changed.
    pub fn set_vhost_dir(&mut self, vhost_dir: &Path) -> bool {
        if self.vhost_dir == vhost_dir {
            return false;
        }
        debug!(
            target: "logwatch::enricher",
            "Vhost directory changed old={} new={}",
            self.vhost_dir.display(),
            vhost_dir.display()
        );
        self.vhost_dir = vhost_dir.to_path_buf();
        self.vhost_cache.clear();
        true
    }

    /// Warn when the configured vhost directory is missing
    ///
    /// Returns whether the directory exists. Vhost lookups still run either
    /// way and simply find nothing.
    pub fn check_vhost_dir(&self) -> bool {
        let available = self.vhost_dir.is_dir();
        if !available {
            warn!(
                target: "logwatch::enricher",
                "Vhost directory does not exist path={}",
                self.vhost_dir.display()
            );
        }
        available
    }

    /// Check for the git executable and log if it is missing
    ///
    /// Not fatal; without git only the remote and blame fields degrade.
    pub fn check_dependencies(&self) -> bool {
        let args = vec!["--version".to_string()];
        match self.invoker.run("git", &args, Path::new("/")) {
            Ok(version) => {
                debug!(target: "logwatch::enricher", "Found {}", version);
                true
            }
            Err(e) => {
                error!(
                    target: "logwatch::enricher",
                    "Git is not installed or not in PATH error={}",
                    e
                );
                false
            }
        }
    }

    /// Enrich `trace` using the current time for cache bookkeeping
    pub fn enrich(&mut self, trace: &ErrorTrace) -> Enrichment {
        self.enrich_at(trace, Instant::now())
    }

    /// Enrich `trace` as of `now`
    pub fn enrich_at(&mut self, trace: &ErrorTrace, now: Instant) -> Enrichment {
        let Some((file, line)) = extract_location(&trace.text()) else {
            debug!(target: "logwatch::enricher", "No file location in trace");
            return Enrichment {
                detail: ErrorDetail::unlocated(),
                failures: Vec::new(),
            };
        };

        let mut failures = Vec::new();
        let mut detail = ErrorDetail {
            file: Some(file.clone()),
            line: Some(line),
            ..ErrorDetail::unlocated()
        };

        if !file.is_absolute() {
            failures.push(EnrichmentFieldFailure::new(
                EnrichmentField::GitRoot,
                format!("{} is not an absolute path", file.display()),
            ));
            return Enrichment { detail, failures };
        }

        detail.vhost = self.resolve_vhost(&file, now, &mut failures);

        if let Some(root) = self.resolve_root(&file, now, &mut failures) {
            detail.git_remote = self.resolve_remote(&root, now, &mut failures);
            detail.blame = self.resolve_blame(&root, &file, line, now, &mut failures);
        }

        Enrichment { detail, failures }
    }

    fn resolve_vhost(
        &mut self,
        file: &Path,
        now: Instant,
        failures: &mut Vec<EnrichmentFieldFailure>,
    ) -> Option<PathBuf> {
        let locator = &self.vhost_locator;
        let vhost_dir = &self.vhost_dir;

        let result = self
            .vhost_cache
            .get_or_try_insert_with(file.to_path_buf(), now, || locator.locate(vhost_dir, file));

        match result {
            Ok(vhost) => vhost,
            Err(e) => {
                failures.push(EnrichmentFieldFailure::new(
                    EnrichmentField::Vhost,
                    format!("{}: {}", vhost_dir.display(), e),
                ));
                None
            }
        }
    }

    fn resolve_root(
        &mut self,
        file: &Path,
        now: Instant,
        failures: &mut Vec<EnrichmentFieldFailure>,
    ) -> Option<PathBuf> {
        let dir = file.parent().unwrap_or(file).to_path_buf();
        let mut computed = false;

        let root = self.root_cache.get_or_insert_with(dir.clone(), now, || {
            computed = true;
            git::find_repository_root(&dir)
        });

        if root.is_none() && computed {
            failures.push(EnrichmentFieldFailure::new(
                EnrichmentField::GitRoot,
                format!("no repository found above {}", dir.display()),
            ));
        }
        root
    }

    fn resolve_remote(
        &mut self,
        root: &Path,
        now: Instant,
        failures: &mut Vec<EnrichmentFieldFailure>,
    ) -> String {
        let invoker = self.invoker.as_ref();

        self.remote_cache
            .get_or_insert_with(root.to_path_buf(), now, || {
                match git::resolve_remote(invoker, root) {
                    Ok(remote) => remote,
                    Err(failure) => {
                        failures.push(failure);
                        UNKNOWN_REMOTE.to_string()
                    }
                }
            })
    }

    fn resolve_blame(
        &mut self,
        root: &Path,
        file: &Path,
        line: u32,
        now: Instant,
        failures: &mut Vec<EnrichmentFieldFailure>,
    ) -> Option<BlameInfo> {
        let invoker = self.invoker.as_ref();

        self.blame_cache
            .get_or_insert_with((file.to_path_buf(), line), now, || {
                match git::resolve_blame(invoker, root, file, line) {
                    Ok(blame) => Some(blame),
                    Err(failure) => {
                        failures.push(failure);
                        None
                    }
                }
            })
    }
}
