use crate::config::WatchConfig;
use crate::event::{ChangeEvent, ChangeKind};
use crate::queue::QueueSender;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Decides what a path's pending slot holds when another event for the same
/// path arrives inside the debounce window.
pub trait CoalescePolicy: Send + Sync {
    /// `None` empties the slot: nothing is released for the path.
    fn coalesce(&self, pending: ChangeEvent, incoming: ChangeEvent) -> Option<ChangeEvent>;
}

/// Keep the newest event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl CoalescePolicy for LastWriterWins {
    fn coalesce(&self, _pending: ChangeEvent, incoming: ChangeEvent) -> Option<ChangeEvent> {
        Some(incoming)
    }
}

/// Collapse short-lived files: created-then-deleted releases nothing,
/// created-then-modified stays a creation, deleted-then-created is a modification.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseCreateDelete;

impl CoalescePolicy for CollapseCreateDelete {
    fn coalesce(&self, pending: ChangeEvent, incoming: ChangeEvent) -> Option<ChangeEvent> {
        match (pending.kind(), incoming.kind()) {
            (ChangeKind::Created, ChangeKind::Deleted) => None,
            (ChangeKind::Created, ChangeKind::Modified) => {
                Some(incoming.with_kind(ChangeKind::Created))
            }
            (ChangeKind::Deleted, ChangeKind::Created) => {
                Some(incoming.with_kind(ChangeKind::Modified))
            }
            _ => Some(incoming),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalesceMode {
    #[default]
    LastWriterWins,
    CollapseCreateDelete,
}

impl CoalesceMode {
    #[must_use]
    pub fn policy(self) -> Box<dyn CoalescePolicy> {
        match self {
            Self::LastWriterWins => Box::new(LastWriterWins),
            Self::CollapseCreateDelete => Box::new(CollapseCreateDelete),
        }
    }
}

struct PendingSlot {
    event: ChangeEvent,
    deadline: Instant,
    seq: u64,
}

/// Per-path debounce slots plus the currently open batch.
///
/// Pure state machine driven by explicit instants; `run_debouncer` supplies
/// the clock and the channels.
pub struct DebounceState {
    debounce: Duration,
    batch_size: usize,
    max_batch_wait: Duration,
    policy: Box<dyn CoalescePolicy>,
    pending: HashMap<PathBuf, PendingSlot>,
    batch: Vec<ChangeEvent>,
    batch_opened: Option<Instant>,
    seq: u64,
    absorbed: u64,
}

impl DebounceState {
    pub fn new(debounce: Duration, batch_size: usize, max_batch_wait: Duration) -> Self {
        Self {
            debounce,
            batch_size: batch_size.max(1),
            max_batch_wait,
            policy: Box::new(LastWriterWins),
            pending: HashMap::new(),
            batch: Vec::new(),
            batch_opened: None,
            seq: 0,
            absorbed: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.debounce(), config.batch_size(), config.max_batch_wait())
            .with_policy(config.coalesce().policy())
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn CoalescePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Paths waiting for their debounce window to expire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Released events not yet dispatched.
    #[must_use]
    pub fn open_batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Events merged into an existing slot instead of getting their own.
    #[must_use]
    pub const fn absorbed(&self) -> u64 {
        self.absorbed
    }

    /// Take in one event. Returns batches that are ready right away, which is
    /// only ever the case with a zero debounce window.
    pub fn record(&mut self, event: ChangeEvent, now: Instant) -> Vec<Vec<ChangeEvent>> {
        if self.debounce.is_zero() {
            return vec![vec![event]];
        }

        let key = event.path().to_path_buf();
        let merged = match self.pending.remove(&key) {
            Some(slot) => {
                self.absorbed += 1;
                self.policy.coalesce(slot.event, event)
            }
            None => Some(event),
        };
        match merged {
            Some(event) => {
                self.seq += 1;
                self.pending.insert(
                    key,
                    PendingSlot {
                        event,
                        deadline: now + self.debounce,
                        seq: self.seq,
                    },
                );
            }
            None => debug!("Change for {} coalesced away", key.display()),
        }
        Vec::new()
    }

    /// Release expired slots and close batches that are full or have been
    /// open for too long.
    pub fn poll(&mut self, now: Instant) -> Vec<Vec<ChangeEvent>> {
        let mut due: Vec<(Instant, u64, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(path, slot)| (slot.deadline, slot.seq, path.clone()))
            .collect();
        due.sort();

        let mut ready = Vec::new();
        for (_, _, path) in due {
            if let Some(slot) = self.pending.remove(&path) {
                self.push(slot.event, now, &mut ready);
            }
        }
        if self
            .batch_opened
            .is_some_and(|opened| opened + self.max_batch_wait <= now)
        {
            ready.push(self.take_batch());
        }
        ready
    }

    /// Release everything, regardless of deadlines.
    pub fn flush(&mut self, now: Instant) -> Vec<Vec<ChangeEvent>> {
        let mut slots: Vec<PendingSlot> = self.pending.drain().map(|(_, slot)| slot).collect();
        slots.sort_by_key(|slot| (slot.deadline, slot.seq));

        let mut ready = Vec::new();
        for slot in slots {
            self.push(slot.event, now, &mut ready);
        }
        if !self.batch.is_empty() {
            ready.push(self.take_batch());
        }
        ready
    }

    /// Earliest instant at which `poll` would release something.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let slot_deadline = self.pending.values().map(|slot| slot.deadline).min();
        let batch_deadline = self.batch_opened.map(|opened| opened + self.max_batch_wait);
        match (slot_deadline, batch_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn push(&mut self, event: ChangeEvent, now: Instant, ready: &mut Vec<Vec<ChangeEvent>>) {
        self.batch_opened.get_or_insert(now);
        self.batch.push(event);
        if self.batch.len() >= self.batch_size {
            ready.push(self.take_batch());
        }
    }

    fn take_batch(&mut self) -> Vec<ChangeEvent> {
        self.batch_opened = None;
        std::mem::take(&mut self.batch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DebounceReport {
    pub received: u64,
    pub coalesced: u64,
    pub released: u64,
    pub batches: u64,
    /// Pending events discarded by cancellation.
    pub dropped: u64,
}

/// Drive a [`DebounceState`] from `input`, forwarding released batches to
/// `output` event by event.
///
/// When `input` closes, everything pending is flushed before returning, which
/// drops `output` and closes the downstream queue. `stop` closes `input` from
/// this side: events already buffered are still taken, then the same flush
/// runs. Cancellation returns without flushing.
pub async fn run_debouncer(
    mut state: DebounceState,
    mut input: mpsc::Receiver<ChangeEvent>,
    output: QueueSender<ChangeEvent>,
    stop: CancellationToken,
    cancel: CancellationToken,
) -> DebounceReport {
    let mut report = DebounceReport::default();
    let mut stopping = false;

    loop {
        let next_deadline = state.next_deadline();

        let ready = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                report.dropped = (state.pending() + state.open_batch_len()) as u64;
                debug!("Debouncer cancelled with {} events pending", report.dropped);
                break;
            }
            () = stop.cancelled(), if !stopping => {
                debug!("Debouncer stopping; draining buffered events");
                stopping = true;
                input.close();
                Vec::new()
            }
            () = async {
                if let Some(deadline) = next_deadline {
                    time::sleep_until(deadline).await;
                }
            }, if next_deadline.is_some() => state.poll(Instant::now()),
            event = input.recv() => match event {
                Some(event) => {
                    report.received += 1;
                    state.record(event, Instant::now())
                }
                None => {
                    let ready = state.flush(Instant::now());
                    dispatch(ready, &output, &cancel, &mut report).await;
                    break;
                }
            },
        };

        if !dispatch(ready, &output, &cancel, &mut report).await {
            break;
        }
    }

    report.coalesced = state.absorbed();
    info!(
        "Debouncer stopped: {} events in, {} released in {} batches",
        report.received, report.released, report.batches
    );
    report
}

async fn dispatch(
    batches: Vec<Vec<ChangeEvent>>,
    output: &QueueSender<ChangeEvent>,
    cancel: &CancellationToken,
    report: &mut DebounceReport,
) -> bool {
    for batch in batches {
        debug!("Dispatching batch of {} events", batch.len());
        report.batches += 1;
        for event in batch {
            if let Err(err) = output.send(event, cancel).await {
                debug!("Debouncer output unavailable: {err}");
                return false;
            }
            report.released += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use std::path::Path;

    const MS: Duration = Duration::from_millis(1);

    fn at(base: Instant, ms: u64) -> Instant {
        base + MS * u32::try_from(ms).unwrap()
    }

    fn modified(path: &str, timestamp: u64) -> ChangeEvent {
        ChangeEvent::Modified {
            path: PathBuf::from(path),
            timestamp,
        }
    }

    fn paths(batch: &[ChangeEvent]) -> Vec<&Path> {
        batch.iter().map(ChangeEvent::path).collect()
    }

    #[test]
    fn burst_on_one_path_releases_last_event() {
        let base = Instant::now();
        let mut state = DebounceState::new(MS * 100, 10, MS * 1_000);
        for i in 0..5 {
            assert!(state.record(modified("/w/a", i), at(base, i * 10)).is_empty());
        }
        assert_eq!(state.pending(), 1);
        // Each event restarted the window: last at 40ms, so due at 140ms.
        assert!(state.poll(at(base, 139)).is_empty());
        assert_eq!(state.next_deadline(), Some(at(base, 140)));

        assert!(state.poll(at(base, 140)).is_empty(), "batch still open");
        let batches = state.flush(at(base, 141));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![modified("/w/a", 4)]);
        assert_eq!(state.absorbed(), 4);
    }

    #[test]
    fn zero_debounce_releases_single_event_batches() {
        let base = Instant::now();
        let mut state = DebounceState::new(Duration::ZERO, 100, MS * 1_000);
        let first = state.record(modified("/w/a", 1), base);
        let second = state.record(modified("/w/a", 2), base);
        assert_eq!(first, vec![vec![modified("/w/a", 1)]]);
        assert_eq!(second, vec![vec![modified("/w/a", 2)]]);
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn batch_closes_at_batch_size() {
        let base = Instant::now();
        let mut state = DebounceState::new(MS * 10, 2, MS * 1_000);
        for (i, p) in ["/w/a", "/w/b", "/w/c"].iter().enumerate() {
            state.record(modified(p, i as u64), base);
        }
        let batches = state.poll(at(base, 10));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(state.open_batch_len(), 1);
    }

    #[test]
    fn max_batch_wait_flushes_underfull_batch() {
        let base = Instant::now();
        let mut state = DebounceState::new(MS * 10, 100, MS * 50);
        state.record(modified("/w/a", 1), base);
        assert!(state.poll(at(base, 10)).is_empty());
        assert_eq!(state.next_deadline(), Some(at(base, 60)));

        let batches = state.poll(at(base, 60));
        assert_eq!(batches.len(), 1);
        assert_eq!(paths(&batches[0]), vec![Path::new("/w/a")]);
        assert_eq!(state.next_deadline(), None);
    }

    #[test]
    fn release_order_follows_deadlines() {
        let base = Instant::now();
        let mut state = DebounceState::new(MS * 10, 100, MS * 1_000);
        state.record(modified("/w/b", 1), base);
        state.record(modified("/w/a", 2), at(base, 1));
        state.record(modified("/w/b", 3), at(base, 2));
        let batches = state.flush(at(base, 100));
        assert_eq!(paths(&batches[0]), vec![Path::new("/w/a"), Path::new("/w/b")]);
    }

    #[test]
    fn collapse_policy_drops_short_lived_files() {
        let base = Instant::now();
        let mut state = DebounceState::new(MS * 10, 100, MS * 1_000)
            .with_policy(CoalesceMode::CollapseCreateDelete.policy());
        state.record(
            ChangeEvent::Created {
                path: PathBuf::from("/w/tmp"),
                timestamp: 1,
            },
            base,
        );
        state.record(
            ChangeEvent::Deleted {
                path: PathBuf::from("/w/tmp"),
                timestamp: 2,
            },
            base,
        );
        assert_eq!(state.pending(), 0);
        assert!(state.flush(at(base, 20)).is_empty());

        state.record(
            ChangeEvent::Created {
                path: PathBuf::from("/w/new"),
                timestamp: 3,
            },
            base,
        );
        state.record(modified("/w/new", 4), base);
        let batches = state.flush(at(base, 20));
        assert_eq!(batches[0][0].kind(), ChangeKind::Created);
        assert_eq!(batches[0][0].timestamp(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn run_debouncer_releases_after_quiet_period() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, out_rx) = queue::bounded("debounced", 16);
        let cancel = CancellationToken::new();
        let state = DebounceState::new(MS * 100, 1, MS * 1_000);
        let task = tokio::spawn(run_debouncer(
            state,
            rx,
            out_tx,
            CancellationToken::new(),
            cancel.clone(),
        ));

        let started = Instant::now();
        tx.send(modified("/w/a", 1)).await.unwrap();
        tx.send(modified("/w/a", 2)).await.unwrap();

        let released = out_rx.recv().await.unwrap();
        assert_eq!(released, modified("/w/a", 2));
        assert!(started.elapsed() >= MS * 100);

        drop(tx);
        let report = task.await.unwrap();
        assert_eq!(report.received, 2);
        assert_eq!(report.released, 1);
        assert_eq!(report.coalesced, 1);
        assert!(out_rx.recv().await.is_none(), "output closes after input");
    }

    #[tokio::test(start_paused = true)]
    async fn input_close_flushes_pending() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, out_rx) = queue::bounded("debounced", 16);
        let state = DebounceState::new(Duration::from_secs(60), 100, Duration::from_secs(60));
        let task = tokio::spawn(run_debouncer(
            state,
            rx,
            out_tx,
            CancellationToken::new(),
            CancellationToken::new(),
        ));

        tx.send(modified("/w/a", 1)).await.unwrap();
        tx.send(modified("/w/b", 2)).await.unwrap();
        drop(tx);

        let report = task.await.unwrap();
        assert_eq!(report.released, 2);
        assert_eq!(out_rx.recv().await, Some(modified("/w/a", 1)));
        assert_eq!(out_rx.recv().await, Some(modified("/w/b", 2)));
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drops_pending() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, out_rx) = queue::bounded("debounced", 16);
        let cancel = CancellationToken::new();
        let state = DebounceState::new(Duration::from_secs(60), 100, Duration::from_secs(60));
        let task = tokio::spawn(run_debouncer(
            state,
            rx,
            out_tx,
            CancellationToken::new(),
            cancel.clone(),
        ));

        tx.send(modified("/w/a", 1)).await.unwrap();
        time::sleep(MS * 10).await;
        cancel.cancel();

        let report = task.await.unwrap();
        assert_eq!(report.released, 0);
        assert_eq!(report.dropped, 1);
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_pending_and_closes_input() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, out_rx) = queue::bounded("debounced", 16);
        let stop = CancellationToken::new();
        let state = DebounceState::new(Duration::from_secs(60), 100, Duration::from_secs(60));
        let task = tokio::spawn(run_debouncer(
            state,
            rx,
            out_tx,
            stop.clone(),
            CancellationToken::new(),
        ));

        tx.send(modified("/w/a", 1)).await.unwrap();
        time::sleep(MS * 10).await;
        stop.cancel();

        let report = task.await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.dropped, 0);
        assert!(tx.is_closed());
        assert_eq!(out_rx.recv().await, Some(modified("/w/a", 1)));
        assert_eq!(out_rx.recv().await, None);
    }
}
