use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RowId(pub u64);

/// One durable registry record describing a file under construction or
/// already finished.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileRow {
    pub id: RowId,
    pub task_name: String,
    pub target_path: PathBuf,
    /// True when the row's items are delivered through the queue rather
    /// than driven by manual runs.
    pub queued: bool,
    pub finished_at: Option<SystemTime>,
    pub created_at: SystemTime,
}

impl FileRow {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
