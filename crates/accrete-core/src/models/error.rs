use crate::models::RowId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EngineErrorKind {
    InvalidArgument,
    InvalidInvocation,
    StorageFailure,
    IoFailure,
    NoHandlers,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct EngineError {
    pub task_name: Option<String>,
    pub row: Option<RowId>,
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_name: None,
            row: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    pub fn for_row(mut self, row: RowId) -> Self {
        self.row = Some(row);
        self
    }
}
