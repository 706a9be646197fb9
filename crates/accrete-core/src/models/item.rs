use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ItemStatus, RowId};

/// One unit of queued work. Items live only inside the queue collaborator;
/// the registry never persists them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedItem {
    pub row_id: RowId,
    pub status: ItemStatus,
    /// Open the working file in append mode (true) or truncate it on every
    /// handler open (false).
    pub append: bool,
    /// Expose the current on-disk content to handlers via the context.
    pub read: bool,
    pub payload: Value,
}
