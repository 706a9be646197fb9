use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::sync::Arc;

use serde_json::Value;

use crate::models::{ItemStatus, RowId};

/// Points in an item's lifecycle at which a distinct handler set runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    First,
    Main,
    Last,
}

/// Per-call context handed to every handler invocation.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub row_id: RowId,
    pub status: ItemStatus,
    /// On-disk content of the file under construction. Refreshed from disk
    /// between handler calls when reads were requested, so writes made
    /// directly through the handle are visible to the next handler.
    pub content: Option<String>,
    /// Content of a previously finished file already sitting at the target
    /// path, when one exists. Lets handlers merge against old output.
    pub finished_content: Option<String>,
}

/// A handler may write through the file handle, return text to append, or
/// do both.
pub trait ItemHandler: Send + Sync {
    fn handle(
        &self,
        item: &Value,
        file: &mut File,
        context: &HandlerContext,
    ) -> io::Result<Option<String>>;
}

/// Runs after a row is durably finished. Failures are reported but can
/// never roll finalization back.
pub trait FinishedHandler: Send + Sync {
    fn on_finished(&self, context: &HandlerContext) -> io::Result<()>;
}

/// Ordered handler sets per (task name, phase), populated by explicit
/// registration at process start.
#[derive(Default)]
pub struct HandlerRegistry {
    item_handlers: HashMap<(String, Phase), Vec<Arc<dyn ItemHandler>>>,
    finished_handlers: HashMap<String, Vec<Arc<dyn FinishedHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_name: impl Into<String>,
        phase: Phase,
        handler: Arc<dyn ItemHandler>,
    ) {
        self.item_handlers
            .entry((task_name.into(), phase))
            .or_default()
            .push(handler);
    }

    pub fn register_finished(
        &mut self,
        task_name: impl Into<String>,
        handler: Arc<dyn FinishedHandler>,
    ) {
        self.finished_handlers
            .entry(task_name.into())
            .or_default()
            .push(handler);
    }

    /// Handlers for a phase in registration order; empty when none were
    /// registered.
    pub fn handlers(&self, task_name: &str, phase: Phase) -> &[Arc<dyn ItemHandler>] {
        self.item_handlers
            .get(&(task_name.to_string(), phase))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn finished_handlers(&self, task_name: &str) -> &[Arc<dyn FinishedHandler>] {
        self.finished_handlers
            .get(task_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
