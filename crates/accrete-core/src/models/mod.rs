pub mod error;
pub mod item;
pub mod row;
pub mod status;

pub use error::{EngineError, EngineErrorKind};
pub use item::QueuedItem;
pub use row::{FileRow, RowId};
pub use status::ItemStatus;
