use log::error;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An item a stage gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub stage: String,
    pub item: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at_unix_ms: u64,
}

/// Shared collector of failed items. Cloning shares the same log.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterSink {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, letter: DeadLetter) {
        error!(
            "[{}] giving up on {} after {} attempt(s): {}",
            letter.stage, letter.item, letter.attempts, letter.error
        );
        self.lock().push(letter);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeadLetter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
