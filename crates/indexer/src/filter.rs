use crate::error::{IndexerError, Result};
use globset::{Glob, GlobMatcher};
use std::path::{Component, Path};

/// Path exclusion rules evaluated against every path component.
///
/// Plain patterns match when any component contains them (`__pycache__`
/// excludes everything beneath such a directory, `cache` also catches
/// `.cache`). Dot-prefixed plain patterns name hidden entries and must equal
/// a whole component, so `.git` leaves `.github/` and `.gitignore` alone.
/// Patterns containing `/` are matched against the whole `/`-joined path
/// instead. Patterns with glob metacharacters (`*?[{`) are
/// compiled with globset and tested against each component and the whole path.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<ExclusionPattern>,
}

#[derive(Debug, Clone)]
enum ExclusionPattern {
    Substring(String),
    Component(String),
    Glob { raw: String, matcher: GlobMatcher },
}

impl ExclusionPattern {
    fn raw(&self) -> &str {
        match self {
            Self::Substring(raw) | Self::Component(raw) | Self::Glob { raw, .. } => raw,
        }
    }

    fn matches(&self, components: &[String], joined: &str) -> bool {
        match self {
            Self::Substring(needle) if needle.contains('/') => joined.contains(needle.as_str()),
            Self::Substring(needle) => components.iter().any(|c| c.contains(needle.as_str())),
            Self::Component(name) => components.iter().any(|c| c == name),
            Self::Glob { matcher, .. } => {
                matcher.is_match(joined) || components.iter().any(|c| matcher.is_match(c))
            }
        }
    }
}

impl ExclusionFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p.as_ref().trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The first pattern that excludes `path`, if any.
    #[must_use]
    pub fn matching_pattern(&self, path: &Path) -> Option<&str> {
        if self.patterns.is_empty() {
            return None;
        }
        let components: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let joined = components.join("/");

        self.patterns
            .iter()
            .find(|p| p.matches(&components, &joined))
            .map(ExclusionPattern::raw)
    }

    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.matching_pattern(path).is_some()
    }
}

pub(crate) fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn compile(pattern: &str) -> Result<ExclusionPattern> {
    if !is_glob(pattern) {
        if pattern.starts_with('.') && !pattern.contains('/') {
            return Ok(ExclusionPattern::Component(pattern.to_string()));
        }
        return Ok(ExclusionPattern::Substring(pattern.to_string()));
    }
    let matcher = Glob::new(pattern)
        .map_err(|e| IndexerError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?
        .compile_matcher();
    Ok(ExclusionPattern::Glob {
        raw: pattern.to_string(),
        matcher,
    })
}
