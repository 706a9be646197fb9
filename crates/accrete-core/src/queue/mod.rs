pub mod delivery;
pub mod in_memory;

pub use delivery::DeliveryRuntime;
pub use in_memory::InMemoryItemQueue;

use crate::models::{EngineError, QueuedItem};

pub type QueueResult<T> = Result<T, EngineError>;

/// Queue collaborator. The engine assumes at-least-once, roughly-ordered
/// delivery and nothing stronger; items for one task must never be
/// delivered concurrently.
pub trait ItemQueue: Send + Sync {
    fn enqueue(&self, task_name: &str, item: QueuedItem) -> QueueResult<()>;

    fn pending_count(&self, task_name: &str) -> QueueResult<usize>;

    /// Take the next pending item for a task, if any.
    fn claim(&self, task_name: &str) -> QueueResult<Option<QueuedItem>>;

    fn purge(&self, task_name: &str) -> QueueResult<()>;
}
