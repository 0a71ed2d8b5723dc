use tracing::{debug, instrument, warn};

use crate::store::{PrefsStore, StoreError};

/// A write held in memory until the queue is flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub key: String,
    /// Canonical text of the value.
    pub value: String,
}

/// Ordered buffer of writes not yet visible in the backing store.
///
/// Duplicate keys are kept in arrival order; flushing applies them front to back so the
/// last occurrence of a key wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingWrites {
    entries: Vec<PendingWrite>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(PendingWrite {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.entries.iter()
    }

    /// Apply every pending write to `store` as one batch, then clear.
    ///
    /// All or nothing: on error the store has applied none of the batch and the queue
    /// is left exactly as it was, ready for a retry.
    #[instrument(skip_all, fields(pending = self.entries.len()))]
    pub async fn flush<S: PrefsStore + ?Sized>(&mut self, store: &S) -> Result<(), StoreError> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let batch: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|write| (write.key.clone(), write.value.clone()))
            .collect();

        match store.put_all(&batch).await {
            Ok(()) => {
                debug!(applied = batch.len(), "flushed pending writes");
                self.entries.clear();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "flush failed; pending writes retained");
                Err(err)
            }
        }
    }
}
