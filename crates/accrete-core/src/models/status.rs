use serde::{Deserialize, Serialize};

/// Positional classification of one delivered item. The three flags are
/// independent: a single-item batch is both first and last, and `is_manual`
/// combines with either.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ItemStatus {
    pub is_first: bool,
    pub is_last: bool,
    pub is_manual: bool,
}

impl ItemStatus {
    pub fn normal() -> Self {
        Self::default()
    }

    /// Classification computed once, at enqueue time. `index` is 1-based
    /// within a batch of `count` items.
    pub fn at_position(index: usize, count: usize) -> Self {
        Self {
            is_first: index == 1,
            is_last: index == count,
            is_manual: false,
        }
    }

    pub fn manual(is_first: bool, is_last: bool) -> Self {
        Self {
            is_first,
            is_last,
            is_manual: true,
        }
    }

    pub fn with_manual(mut self) -> Self {
        self.is_manual = true;
        self
    }
}
