use crate::debounce::CoalesceMode;
use crate::error::{IndexerError, Result};
use crate::filter::{is_glob, ExclusionFilter};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const DEFAULT_DEBOUNCE_MS: i64 = 500;
pub const DEFAULT_MAX_BATCH_WAIT_MS: i64 = 3_000;

/// Raw watch settings as they come from a config file or a caller.
///
/// Numbers are signed on purpose: a negative debounce is reported as a
/// validation message instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    /// Substring, `.name` (whole component), `a/b` (joined path) or glob
    /// patterns; see [`ExclusionFilter`](crate::ExclusionFilter).
    pub exclude: Vec<String>,
    pub batch_size: i64,
    pub debounce_ms: i64,
    pub max_batch_wait_ms: i64,
    pub coalesce: CoalesceMode,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            exclude: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_batch_wait_ms: DEFAULT_MAX_BATCH_WAIT_MS,
            coalesce: CoalesceMode::default(),
        }
    }
}

impl WatchSettings {
    pub fn new<P: Into<PathBuf>>(roots: impl IntoIterator<Item = P>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Every problem with these settings; empty when they are valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.roots.is_empty() {
            errors.push("No watch paths specified".to_string());
        }
        if self.roots.iter().any(|r| r.as_os_str().is_empty()) {
            errors.push("Watch path must not be empty".to_string());
        }
        if self.batch_size <= 0 {
            errors.push(format!("Batch size must be positive (got {})", self.batch_size));
        }
        if self.debounce_ms < 0 {
            errors.push(format!(
                "Debounce time cannot be negative (got {}ms)",
                self.debounce_ms
            ));
        }
        if self.max_batch_wait_ms <= 0 {
            errors.push(format!(
                "Max batch wait must be positive (got {}ms)",
                self.max_batch_wait_ms
            ));
        }
        for pattern in &self.exclude {
            if pattern.trim().is_empty() {
                errors.push("Exclusion pattern must not be blank".to_string());
            } else if is_glob(pattern.trim()) {
                if let Err(e) = Glob::new(pattern.trim()) {
                    errors.push(format!("Invalid exclusion pattern '{pattern}': {e}"));
                }
            }
        }
        errors
    }
}

/// Validated, immutable watch configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    roots: Vec<PathBuf>,
    recursive: bool,
    exclude: Vec<String>,
    filter: ExclusionFilter,
    batch_size: usize,
    debounce: Duration,
    max_batch_wait: Duration,
    coalesce: CoalesceMode,
}

impl TryFrom<WatchSettings> for WatchConfig {
    type Error = IndexerError;

    fn try_from(settings: WatchSettings) -> Result<Self> {
        let errors = settings.validate();
        if !errors.is_empty() {
            return Err(IndexerError::InvalidWatchConfig(errors));
        }

        let filter = ExclusionFilter::new(&settings.exclude)?;
        let roots = settings
            .roots
            .iter()
            .map(|root| absolute(root))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            roots,
            recursive: settings.recursive,
            exclude: settings.exclude.iter().map(|p| p.trim().to_string()).collect(),
            filter,
            batch_size: usize::try_from(settings.batch_size).unwrap_or(usize::MAX),
            debounce: Duration::from_millis(settings.debounce_ms.unsigned_abs()),
            max_batch_wait: Duration::from_millis(settings.max_batch_wait_ms.unsigned_abs()),
            coalesce: settings.coalesce,
        })
    }
}

impl WatchConfig {
    /// Validate and build a configuration. Fails with every violated rule.
    pub fn new<P: Into<PathBuf>>(
        roots: impl IntoIterator<Item = P>,
        recursive: bool,
        exclude: &[&str],
        batch_size: i64,
        debounce_ms: i64,
    ) -> Result<Self> {
        Self::try_from(WatchSettings {
            roots: roots.into_iter().map(Into::into).collect(),
            recursive,
            exclude: exclude.iter().map(|p| (*p).to_string()).collect(),
            batch_size,
            debounce_ms,
            ..WatchSettings::default()
        })
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    #[must_use]
    pub const fn recursive(&self) -> bool {
        self.recursive
    }

    #[must_use]
    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        self.debounce
    }

    #[must_use]
    pub const fn max_batch_wait(&self) -> Duration {
        self.max_batch_wait
    }

    #[must_use]
    pub const fn coalesce(&self) -> CoalesceMode {
        self.coalesce
    }

    /// The most specific root containing `path`.
    #[must_use]
    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    /// Exclusion pattern matching `path`, evaluated relative to its root so
    /// that a root living under e.g. `build/` is still watchable.
    #[must_use]
    pub fn exclusion_match(&self, path: &Path) -> Option<&str> {
        let relative = self
            .root_for(path)
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        self.filter.matching_pattern(relative)
    }

    /// Whether `path` lies where this configuration watches: anywhere under a
    /// root when recursive, otherwise only directly inside one.
    #[must_use]
    pub fn in_scope(&self, path: &Path) -> bool {
        if self.recursive {
            self.root_for(path).is_some()
        } else {
            path.parent()
                .is_some_and(|parent| self.roots.iter().any(|root| root == parent))
        }
    }

    #[must_use]
    pub fn admits(&self, path: &Path) -> bool {
        self.in_scope(path) && self.exclusion_match(path).is_none()
    }
}

fn absolute(root: &Path) -> Result<PathBuf> {
    if root.is_absolute() {
        return Ok(root.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(root))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStats {
    pub watched_paths: usize,
    pub exclusion_patterns: usize,
    pub batch_size: usize,
    pub debounce_ms: u64,
    pub max_batch_wait_ms: u64,
    pub recursive: bool,
}

#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn get_incremental_stats(config: &WatchConfig) -> WatchStats {
    WatchStats {
        watched_paths: config.roots.len(),
        exclusion_patterns: config.exclude.len(),
        batch_size: config.batch_size,
        debounce_ms: config.debounce.as_millis() as u64,
        max_batch_wait_ms: config.max_batch_wait.as_millis() as u64,
        recursive: config.recursive,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    pub status: &'static str,
    pub roots: Vec<RootStatus>,
    pub recursive: bool,
    pub exclusion_patterns: Vec<String>,
}

impl WatchStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

/// Check the roots on disk: the watch is ready only when every root is an
/// existing directory.
#[must_use]
pub fn check_watch_status(config: &WatchConfig) -> WatchStatus {
    let roots: Vec<RootStatus> = config
        .roots
        .iter()
        .map(|path| RootStatus {
            path: path.clone(),
            exists: path.exists(),
            is_dir: path.is_dir(),
        })
        .collect();
    let ready = roots.iter().all(|r| r.is_dir);
    WatchStatus {
        status: if ready { "ready" } else { "missing_roots" },
        roots,
        recursive: config.recursive,
        exclusion_patterns: config.exclude.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = WatchSettings::new(["/workspace"]);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.debounce_ms, 500);
        assert!(settings.recursive);
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn collects_every_violation() {
        let settings = WatchSettings {
            batch_size: 0,
            debounce_ms: -5,
            max_batch_wait_ms: 0,
            exclude: vec!["  ".to_string()],
            ..WatchSettings::default()
        };
        let errors = settings.validate();
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert_eq!(errors[0], "No watch paths specified");
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: WatchSettings = serde_json::from_str(
            r#"{"roots": ["/w"], "exclude": ["target"], "debounce_ms": 0}"#,
        )
        .unwrap();
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.debounce_ms, 0);
        assert_eq!(settings.coalesce, CoalesceMode::LastWriterWins);
    }

    #[test]
    fn relative_roots_become_absolute() {
        let config = WatchConfig::new(["some/dir"], true, &[], 10, 0).unwrap();
        assert!(config.roots()[0].is_absolute());
        assert!(config.roots()[0].ends_with("some/dir"));
    }

    #[test]
    fn exclusion_is_relative_to_root() {
        let config = WatchConfig::new(["/home/build/project"], true, &["build"], 10, 0).unwrap();
        assert!(config.admits(Path::new("/home/build/project/src/a.rs")));
        assert!(!config.admits(Path::new("/home/build/project/build/out.o")));
    }

    #[test]
    fn non_recursive_scope_is_direct_children_only() {
        let config = WatchConfig::new(["/w"], false, &[], 10, 0).unwrap();
        assert!(config.in_scope(Path::new("/w/a.rs")));
        assert!(!config.in_scope(Path::new("/w/src/a.rs")));
        assert!(!config.in_scope(Path::new("/elsewhere/a.rs")));
    }
}
