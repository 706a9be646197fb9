use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;

use crate::fsops;
use crate::handlers::{HandlerContext, HandlerRegistry, Phase};
use crate::models::{EngineError, EngineErrorKind, FileRow, ItemStatus, QueuedItem, RowId};
use crate::persistence::RowStore;
use crate::queue::ItemQueue;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Clone, Copy, Debug)]
pub struct AddOptions {
    /// Open the working file in append mode for every handler call, or
    /// truncate it on each open.
    pub append: bool,
    /// Surface current file content to handlers via the context.
    pub read: bool,
    /// Deliver items through the queue; false means the caller drives the
    /// row manually through `run`.
    pub queued: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            append: true,
            read: true,
            queued: true,
        }
    }
}

/// Per-task-name handle over the file assembly life cycle: row registry,
/// item writes through handler phases, atomic finalization, and
/// registry/filesystem reconciliation.
///
/// The engine assumes the queue collaborator never overlaps two deliveries
/// for the same row; hosts with parallel workers must add per-row mutual
/// exclusion before calling in.
pub struct Assembler {
    task_name: String,
    store: Arc<dyn RowStore>,
    queue: Arc<dyn ItemQueue>,
    handlers: Arc<HandlerRegistry>,
    // Row list cache, invalidated on every registry mutation.
    row_cache: Mutex<Option<HashMap<RowId, FileRow>>>,
}

impl Assembler {
    /// Construction runs one reconciliation pass. An empty task name is a
    /// programmer error and fails immediately.
    pub fn new(
        task_name: impl Into<String>,
        store: Arc<dyn RowStore>,
        queue: Arc<dyn ItemQueue>,
        handlers: Arc<HandlerRegistry>,
    ) -> EngineResult<Self> {
        let task_name = task_name.into();
        if task_name.trim().is_empty() {
            return Err(EngineError::new(
                EngineErrorKind::InvalidArgument,
                "task name must be a non-empty string",
            ));
        }

        let assembler = Self {
            task_name,
            store,
            queue,
            handlers,
            row_cache: Mutex::new(None),
        };
        assembler.sync()?;
        Ok(assembler)
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Register a new file under construction and, for queued rows, derive
    /// and enqueue one item per batch element with its positional status.
    pub fn add(
        &self,
        target_path: impl Into<PathBuf>,
        items: Vec<Value>,
        options: AddOptions,
    ) -> EngineResult<RowId> {
        let target_path = target_path.into();
        if target_path.as_os_str().is_empty() {
            return Err(self.invalid_argument("target path must not be empty"));
        }
        if options.queued && items.is_empty() {
            return Err(self.invalid_argument("a queued task requires at least one item"));
        }

        let id = self
            .store
            .insert(&self.task_name, &target_path, options.queued)?;
        self.invalidate_cache();

        if options.queued {
            let count = items.len();
            for (index, payload) in items.into_iter().enumerate() {
                self.queue.enqueue(
                    &self.task_name,
                    QueuedItem {
                        row_id: id,
                        status: ItemStatus::at_position(index + 1, count),
                        append: options.append,
                        read: options.read,
                        payload,
                    },
                )?;
            }
        }

        Ok(id)
    }

    /// Manual runner for rows added with `queued = false`. Always carries
    /// the manual flag; a queued row rejects it outright.
    pub fn run(
        &self,
        row_id: RowId,
        item: &Value,
        status: ItemStatus,
        append: bool,
        read: bool,
    ) -> EngineResult<bool> {
        self.write(row_id, item, append, read, status.with_manual())
    }

    /// Queue delivery callback: the queue collaborator hands each claimed
    /// item here.
    pub fn deliver(&self, item: &QueuedItem) -> EngineResult<bool> {
        self.write(
            item.row_id,
            &item.payload,
            item.append,
            item.read,
            item.status,
        )
    }

    pub fn file(&self, row_id: RowId) -> EngineResult<Option<FileRow>> {
        Ok(self.rows()?.get(&row_id).cloned())
    }

    pub fn files(&self) -> EngineResult<Vec<FileRow>> {
        let mut rows: Vec<FileRow> = self.rows()?.into_values().collect();
        rows.sort_by_key(|row| row.id.0);
        Ok(rows)
    }

    /// Remove a row and its backing file (temp copy while unfinished, final
    /// file once finished). Returns false when the file could not be
    /// removed or the row does not exist; the next sync pass retries.
    pub fn delete(&self, row_id: RowId) -> EngineResult<bool> {
        let Some(row) = self.file(row_id)? else {
            return Ok(false);
        };

        let path = if row.is_finished() {
            row.target_path.clone()
        } else {
            fsops::working_path(&row.target_path)
        };

        match fsops::remove_if_exists(&path) {
            Ok(_) => {
                self.store.delete(&self.task_name, row_id)?;
                self.invalidate_cache();
                Ok(true)
            }
            Err(error) => {
                tracing::warn!(
                    task = %self.task_name,
                    row = row_id.0,
                    path = %path.display(),
                    %error,
                    "could not remove file for row"
                );
                Ok(false)
            }
        }
    }

    /// Delete every row of this task, optionally only the finished ones.
    /// Returns true when all targeted rows were removed.
    pub fn delete_all(&self, finished_only: bool) -> EngineResult<bool> {
        let mut all_removed = true;
        for row in self.files()? {
            if finished_only && !row.is_finished() {
                continue;
            }
            all_removed &= self.delete(row.id)?;
        }
        Ok(all_removed)
    }

    pub fn pending_items(&self) -> EngineResult<usize> {
        self.queue.pending_count(&self.task_name)
    }

    pub fn purge_queue(&self) -> EngineResult<()> {
        self.queue.purge(&self.task_name)
    }

    /// Reconcile registry rows against queue and filesystem reality.
    ///
    /// Deletes rows that can never finish (queued, unfinished, queue
    /// drained) and finished rows whose file was removed externally. Only
    /// ever deletes; unfinished non-queued rows are left alone since a
    /// manual driver may still be mid-flight. Idempotent and safe to
    /// re-run; rows it fails to delete are left for the next pass.
    pub fn sync(&self) -> EngineResult<()> {
        let rows = self.files()?;
        let pending = self.queue.pending_count(&self.task_name)?;

        if rows.is_empty() && pending > 0 {
            self.queue.purge(&self.task_name)?;
            return Ok(());
        }

        for row in rows {
            let orphaned = !row.is_finished() && row.queued && pending == 0;
            let stale = row.is_finished() && !row.target_path.exists();
            if !(orphaned || stale) {
                continue;
            }

            match self.delete(row.id) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        task = %self.task_name,
                        row = row.id.0,
                        "sync could not remove row; leaving it for the next pass"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        task = %self.task_name,
                        row = row.id.0,
                        kind = ?error.kind,
                        message = %error.message,
                        "sync failed to delete row; leaving it for the next pass"
                    );
                }
            }
        }

        Ok(())
    }

    /// One item through the engine: resolve the row, prepare the working
    /// file, drive the handler phases, and finalize on the terminal item.
    fn write(
        &self,
        row_id: RowId,
        item: &Value,
        append: bool,
        read: bool,
        status: ItemStatus,
    ) -> EngineResult<bool> {
        let Some(row) = self.file(row_id)? else {
            return Err(self.invalid_invocation(row_id, "row not found"));
        };
        if row.queued && status.is_manual {
            return Err(
                self.invalid_invocation(row_id, "manual run is not valid for a queued row")
            );
        }

        // The working copy is always temp-suffixed during construction,
        // manual runs included; only finalization produces the final path.
        let working = fsops::working_path(&row.target_path);
        fsops::prepare_parent_dir(&working).map_err(|error| {
            self.io_failure(
                row_id,
                format!(
                    "could not prepare directory for '{}': {error}",
                    working.display()
                ),
            )
        })?;

        let mut context = HandlerContext {
            row_id,
            status,
            content: if read { self.snapshot(&working) } else { None },
            finished_content: if read {
                self.snapshot(&row.target_path)
            } else {
                None
            },
        };

        if status.is_first {
            self.invoke_phase(Phase::First, &working, item, append, read, &mut context);
        }

        if self.handlers.handlers(&self.task_name, Phase::Main).is_empty() {
            // A task with zero registered handlers is valid, if useless;
            // finalization still proceeds on the terminal item.
            tracing::warn!(
                task = %self.task_name,
                row = row_id.0,
                kind = ?EngineErrorKind::NoHandlers,
                "no handlers registered for the main phase"
            );
        } else {
            self.invoke_phase(Phase::Main, &working, item, append, read, &mut context);
        }

        if status.is_last {
            self.invoke_phase(Phase::Last, &working, item, append, read, &mut context);

            if !self.finish(row_id)? {
                return Ok(false);
            }
            self.sync()?;
            self.run_finished_handlers(row_id, &row.target_path, read, status);
        }

        Ok(true)
    }

    /// Run one handler set in registration order. Each handler gets a fresh
    /// handle; between calls the on-disk content is re-read so direct
    /// handle writes are visible to the next handler, not just returned
    /// strings. Failures of a single handler never abort the rest of the
    /// set.
    fn invoke_phase(
        &self,
        phase: Phase,
        working: &Path,
        item: &Value,
        append: bool,
        read: bool,
        context: &mut HandlerContext,
    ) {
        for handler in self.handlers.handlers(&self.task_name, phase) {
            let mut file = match fsops::open_working(working, append) {
                Ok(file) => file,
                Err(error) => {
                    tracing::warn!(
                        task = %self.task_name,
                        phase = ?phase,
                        path = %working.display(),
                        %error,
                        "could not open working file; skipping handler"
                    );
                    continue;
                }
            };

            match handler.handle(item, &mut file, context) {
                Ok(Some(text)) if !text.is_empty() => {
                    if let Err(error) = file.write_all(text.as_bytes()) {
                        tracing::warn!(
                            task = %self.task_name,
                            phase = ?phase,
                            path = %working.display(),
                            %error,
                            "could not write handler output"
                        );
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        task = %self.task_name,
                        phase = ?phase,
                        row = context.row_id.0,
                        %error,
                        "handler failed"
                    );
                }
            }
            drop(file);

            if read {
                context.content = self.snapshot(working);
            }
        }
    }

    /// Promote the working copy to the final path, collapse finished
    /// duplicates at that path, and stamp the row finished. A failed rename
    /// leaves the row and temp file in place for a retry.
    fn finish(&self, row_id: RowId) -> EngineResult<bool> {
        let Some(row) = self.file(row_id)? else {
            return Err(self.invalid_invocation(row_id, "row disappeared before finalization"));
        };

        let working = fsops::working_path(&row.target_path);
        if let Err(error) = fsops::promote(&working, &row.target_path) {
            tracing::error!(
                task = %self.task_name,
                row = row_id.0,
                from = %working.display(),
                to = %row.target_path.display(),
                %error,
                "could not promote working file; row left unfinished"
            );
            return Ok(false);
        }

        // Only the newest write at a path stays authoritative.
        self.store
            .merge_finished_duplicates(&row.target_path, row_id)?;
        self.store.mark_finished(row_id, SystemTime::now())?;
        self.invalidate_cache();
        Ok(true)
    }

    /// Finished handlers observe the durably finished row; their failures
    /// are reported and never undo finalization.
    fn run_finished_handlers(&self, row_id: RowId, target: &Path, read: bool, status: ItemStatus) {
        let handlers = self.handlers.finished_handlers(&self.task_name);
        if handlers.is_empty() {
            return;
        }

        let context = HandlerContext {
            row_id,
            status,
            content: if read { self.snapshot(target) } else { None },
            finished_content: None,
        };

        for handler in handlers {
            if let Err(error) = handler.on_finished(&context) {
                tracing::warn!(
                    task = %self.task_name,
                    row = row_id.0,
                    %error,
                    "finished handler failed"
                );
            }
        }
    }

    fn snapshot(&self, path: &Path) -> Option<String> {
        match fsops::read_snapshot(path) {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!(
                    task = %self.task_name,
                    path = %path.display(),
                    %error,
                    "could not read file snapshot"
                );
                None
            }
        }
    }

    fn rows(&self) -> EngineResult<HashMap<RowId, FileRow>> {
        let mut cache = self
            .row_cache
            .lock()
            .map_err(|_| EngineError::new(EngineErrorKind::Internal, "row cache mutex poisoned"))?;
        if let Some(rows) = cache.as_ref() {
            return Ok(rows.clone());
        }

        let fetched: HashMap<RowId, FileRow> = self
            .store
            .list_by_name(&self.task_name)?
            .into_iter()
            .map(|row| (row.id, row))
            .collect();
        *cache = Some(fetched.clone());
        Ok(fetched)
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.row_cache.lock() {
            *cache = None;
        }
    }

    fn invalid_argument(&self, message: impl Into<String>) -> EngineError {
        EngineError::new(EngineErrorKind::InvalidArgument, message).for_task(&self.task_name)
    }

    fn invalid_invocation(&self, row_id: RowId, message: impl Into<String>) -> EngineError {
        EngineError::new(EngineErrorKind::InvalidInvocation, message)
            .for_task(&self.task_name)
            .for_row(row_id)
    }

    fn io_failure(&self, row_id: RowId, message: impl Into<String>) -> EngineError {
        EngineError::new(EngineErrorKind::IoFailure, message)
            .for_task(&self.task_name)
            .for_row(row_id)
    }
}

/// Reconcile every task name the registry knows about, finished and
/// non-queued rows included. Each name gets the same pass `Assembler::new`
/// runs at construction.
pub fn synchronize_all(
    store: Arc<dyn RowStore>,
    queue: Arc<dyn ItemQueue>,
    handlers: Arc<HandlerRegistry>,
) -> EngineResult<()> {
    for name in store.task_names(true, true)? {
        Assembler::new(name, store.clone(), queue.clone(), handlers.clone())?;
    }
    Ok(())
}
