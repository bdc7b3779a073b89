//! The in-process transaction buffer.

use dynarecord_model::types::TransactWriteItem;

/// Writes collected while transaction mode is on.
///
/// The buffer never talks to the store itself; [`RecordContext`] swaps the
/// operations out with [`take`](Self::take) and issues them as one request.
///
/// [`RecordContext`]: crate::context::RecordContext
#[derive(Debug, Default)]
pub struct PendingTransaction {
    active: bool,
    operations: Vec<TransactWriteItem>,
}

impl PendingTransaction {
    /// Switch transaction mode on. Already buffered operations are kept.
    pub fn begin(&mut self) {
        self.active = true;
    }

    /// `true` while writes are being deferred.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Append a write. Returns it back when transaction mode is off.
    pub fn push(&mut self, operation: TransactWriteItem) -> Result<(), TransactWriteItem> {
        if !self.active {
            return Err(operation);
        }
        self.operations.push(operation);
        Ok(())
    }

    /// Number of buffered writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Swap the buffered writes out and reset. `None` when transaction mode
    /// was off.
    pub fn take(&mut self) -> Option<Vec<TransactWriteItem>> {
        if !self.active {
            return None;
        }
        self.active = false;
        Some(std::mem::take(&mut self.operations))
    }

    /// Drop every buffered write and switch transaction mode off.
    pub fn reset(&mut self) -> usize {
        self.active = false;
        let dropped = self.operations.len();
        self.operations.clear();
        dropped
    }
}
