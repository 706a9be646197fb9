use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::assembler::Assembler;
use crate::models::{EngineError, EngineErrorKind};
use crate::queue::ItemQueue;

/// Drives queued items into an assembler, one at a time per task name.
///
/// A per-name async mutex guarantees that two deliveries for the same task
/// never overlap; the engine performs no locking of its own and relies on
/// this. Writes are blocking file and registry I/O, so each one runs on the
/// blocking pool.
pub struct DeliveryRuntime {
    queue: Arc<dyn ItemQueue>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeliveryRuntime {
    pub fn new(queue: Arc<dyn ItemQueue>) -> Self {
        Self {
            queue,
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn name_lock(&self, task_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        locks
            .entry(task_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Deliver every pending item for the assembler's task. Items that fail
    /// are reported and skipped; the row stays unfinished and the remaining
    /// items still run. Returns the number of successful deliveries.
    pub async fn drain(&self, assembler: Arc<Assembler>) -> Result<usize, EngineError> {
        let task_name = assembler.task_name().to_string();
        let lock = self.name_lock(&task_name).await;
        let _guard = lock.lock().await;

        let mut delivered = 0;
        loop {
            let Some(item) = self.queue.claim(&task_name)? else {
                break;
            };

            let worker = assembler.clone();
            let outcome = tokio::task::spawn_blocking(move || worker.deliver(&item))
                .await
                .map_err(|join_error| {
                    EngineError::new(
                        EngineErrorKind::Internal,
                        format!("delivery join failure: {join_error}"),
                    )
                    .for_task(task_name.clone())
                })?;

            match outcome {
                Ok(_) => delivered += 1,
                Err(error) => {
                    tracing::error!(
                        task = %task_name,
                        kind = ?error.kind,
                        message = %error.message,
                        "item delivery failed; continuing with remaining items"
                    );
                }
            }
        }

        Ok(delivered)
    }
}
