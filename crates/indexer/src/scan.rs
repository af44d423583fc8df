use crate::config::WatchConfig;
use crate::event::ChangeEvent;
use ignore::WalkBuilder;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Metadata of one file about to be indexed.
///
/// The checksum starts out empty and can be set exactly once.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_unix_ms: u64,
    checksum: OnceCell<String>,
}

impl ScannedFile {
    /// Stat `path`. `Ok(None)` for anything that is not a regular file.
    pub async fn stat(root: &Path, path: &Path) -> std::io::Result<Option<Self>> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Ok(None);
        }
        #[allow(clippy::cast_possible_truncation)]
        let modified_unix_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as u64);

        Ok(Some(Self {
            path: path.to_path_buf(),
            relative_path: relative_path(root, path),
            size_bytes: metadata.len(),
            modified_unix_ms,
            checksum: OnceCell::new(),
        }))
    }

    #[must_use]
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.get().map(String::as_str)
    }

    /// Hash the file's current content, once. Later calls return the first value.
    pub async fn compute_checksum(&self) -> std::io::Result<&str> {
        if let Some(existing) = self.checksum.get() {
            return Ok(existing.as_str());
        }
        let bytes = tokio::fs::read(&self.path).await?;
        let digest = sha256_hex(&bytes);
        Ok(self.checksum.get_or_init(|| digest).as_str())
    }
}

/// `path` relative to `root`, `/`-separated; the full path when outside it.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Every admitted file under the configured roots, as `Created` events.
///
/// Honors `.gitignore` files like the rest of the ecosystem's walkers, plus
/// the configuration's own exclusions and recursion setting. Blocking; run it
/// off the async workers.
#[must_use]
pub fn initial_scan(config: &WatchConfig) -> Vec<ChangeEvent> {
    let depth = if config.recursive() { None } else { Some(1) };
    let events: Vec<ChangeEvent> = config
        .roots()
        .iter()
        .flat_map(|root| admitted_files(root, depth, config))
        .map(ChangeEvent::created)
        .collect();
    debug!("Initial scan found {} files", events.len());
    events
}

/// Admitted regular files below `dir`, walked the same way as the initial
/// scan. Blocking.
#[must_use]
pub fn admitted_files(dir: &Path, max_depth: Option<usize>, config: &WatchConfig) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(dir);
    builder.hidden(false).follow_links(false).max_depth(max_depth);

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Walk of {} skipped an entry: {err}", dir.display());
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if config.admits(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files
}
