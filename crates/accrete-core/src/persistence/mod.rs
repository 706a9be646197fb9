use std::path::Path;
use std::time::SystemTime;

use crate::models::{EngineError, FileRow, RowId};

pub type PersistenceResult<T> = Result<T, EngineError>;

/// Durable registry of file rows. Every row-returning operation is scoped
/// by task name; callers never read another task's rows through it.
pub trait RowStore: Send + Sync {
    /// Insert an unfinished row and return its id. Implementations must
    /// fail rather than hand back an absent or zero id.
    fn insert(&self, task_name: &str, target_path: &Path, queued: bool)
    -> PersistenceResult<RowId>;

    fn get(&self, task_name: &str, id: RowId) -> PersistenceResult<Option<FileRow>>;

    fn list_by_name(&self, task_name: &str) -> PersistenceResult<Vec<FileRow>>;

    fn delete(&self, task_name: &str, id: RowId) -> PersistenceResult<()>;

    fn mark_finished(&self, id: RowId, at: SystemTime) -> PersistenceResult<()>;

    /// Delete every finished row targeting `target_path` except `keep`,
    /// regardless of task name. Returns the number of rows removed.
    fn merge_finished_duplicates(&self, target_path: &Path, keep: RowId)
    -> PersistenceResult<usize>;

    /// Distinct task names known to the registry. With both flags false,
    /// only names that still have unfinished queued rows are returned.
    fn task_names(
        &self,
        include_finished: bool,
        include_non_queued: bool,
    ) -> PersistenceResult<Vec<String>>;
}
