use crate::config::WatchConfig;
use crate::error::{IndexerError, Result};
use crate::event::{now_unix_ms, ChangeEvent};
use log::{debug, warn};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const NOTIFY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Filtered change events from one native watch subscription.
///
/// The stream ends once the subscription is cancelled and buffered events are
/// consumed.
pub struct WatchStream {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl WatchStream {
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    #[must_use]
    pub fn into_receiver(self) -> mpsc::Receiver<ChangeEvent> {
        self.rx
    }
}

/// Start watching every root of `config`.
///
/// Fails when a root cannot be watched (for example because it does not
/// exist). The native watcher lives until `cancel` fires.
pub fn watch(config: Arc<WatchConfig>, cancel: CancellationToken) -> Result<WatchStream> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    watch_into(config, tx, cancel)?;
    Ok(WatchStream { rx })
}

/// Like [`watch`], but delivers into an existing channel so that other
/// producers (an initial scan, for one) can share it.
pub fn watch_into(
    config: Arc<WatchConfig>,
    sender: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let watcher = create_fs_watcher(Arc::clone(&config), sender)?;
    tokio::spawn(async move {
        cancel.cancelled().await;
        drop(watcher);
        debug!("Stopped watching {} root(s)", config.roots().len());
    });
    Ok(())
}

fn create_fs_watcher(
    config: Arc<WatchConfig>,
    sender: mpsc::Sender<ChangeEvent>,
) -> Result<RecommendedWatcher> {
    let filter = Arc::clone(&config);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in map_notify_event(event, now_unix_ms()) {
                    if let Some(change) = filter_event(change, &filter) {
                        if sender.blocking_send(change).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(err) => warn!("Watcher error: {err}"),
        },
        NotifyConfig::default().with_poll_interval(NOTIFY_POLL_INTERVAL),
    )
    .map_err(|e| IndexerError::Watcher(format!("watcher init failed: {e}")))?;

    let mode = if config.recursive() {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    for root in config.roots() {
        watcher.watch(root, mode).map_err(|e| {
            IndexerError::Watcher(format!("failed to watch {}: {e}", root.display()))
        })?;
    }
    Ok(watcher)
}

/// Translate one native notification into change events.
pub(crate) fn map_notify_event(event: Event, timestamp: u64) -> Vec<ChangeEvent> {
    let paths = event.paths;
    let each = |make: fn(PathBuf, u64) -> ChangeEvent| -> Vec<ChangeEvent> {
        paths.iter().cloned().map(|p| make(p, timestamp)).collect()
    };

    match event.kind {
        EventKind::Create(_) => each(|path, timestamp| ChangeEvent::Created { path, timestamp }),
        EventKind::Remove(_) => each(|path, timestamp| ChangeEvent::Deleted { path, timestamp }),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            vec![ChangeEvent::Moved {
                from: paths[0].clone(),
                path: paths[1].clone(),
                timestamp,
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            each(|path, timestamp| ChangeEvent::Deleted { path, timestamp })
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            each(|path, timestamp| ChangeEvent::Created { path, timestamp })
        }
        // Backends that cannot tell which side of a rename they saw.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                let path = p.clone();
                if p.exists() {
                    ChangeEvent::Created { path, timestamp }
                } else {
                    ChangeEvent::Deleted { path, timestamp }
                }
            })
            .collect(),
        EventKind::Modify(_) => each(|path, timestamp| ChangeEvent::Modified { path, timestamp }),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Apply scope and exclusion rules. A move across the filter boundary turns
/// into the half that is still visible.
pub(crate) fn filter_event(event: ChangeEvent, config: &WatchConfig) -> Option<ChangeEvent> {
    match event {
        ChangeEvent::Moved {
            from,
            path,
            timestamp,
        } => match (config.admits(&from), config.admits(&path)) {
            (true, true) => Some(ChangeEvent::Moved {
                from,
                path,
                timestamp,
            }),
            (false, true) => Some(ChangeEvent::Created { path, timestamp }),
            (true, false) => Some(ChangeEvent::Deleted {
                path: from,
                timestamp,
            }),
            (false, false) => None,
        },
        other => config.admits(other.path()).then_some(other),
    }
}
