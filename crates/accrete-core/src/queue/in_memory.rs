use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::models::{EngineError, EngineErrorKind, QueuedItem};
use crate::queue::{ItemQueue, QueueResult};

/// Process-local FIFO queue per task name. Suitable for tests and for
/// hosts that drive delivery in the same process.
#[derive(Clone, Default)]
pub struct InMemoryItemQueue {
    inner: Arc<Mutex<HashMap<String, VecDeque<QueuedItem>>>>,
}

impl InMemoryItemQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(
        &self,
    ) -> QueueResult<std::sync::MutexGuard<'_, HashMap<String, VecDeque<QueuedItem>>>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::new(EngineErrorKind::Internal, "queue mutex poisoned"))
    }
}

impl ItemQueue for InMemoryItemQueue {
    fn enqueue(&self, task_name: &str, item: QueuedItem) -> QueueResult<()> {
        self.locked()?
            .entry(task_name.to_string())
            .or_default()
            .push_back(item);
        Ok(())
    }

    fn pending_count(&self, task_name: &str) -> QueueResult<usize> {
        Ok(self
            .locked()?
            .get(task_name)
            .map(VecDeque::len)
            .unwrap_or(0))
    }

    fn claim(&self, task_name: &str) -> QueueResult<Option<QueuedItem>> {
        Ok(self
            .locked()?
            .get_mut(task_name)
            .and_then(VecDeque::pop_front))
    }

    fn purge(&self, task_name: &str) -> QueueResult<()> {
        self.locked()?.remove(task_name);
        Ok(())
    }
}
