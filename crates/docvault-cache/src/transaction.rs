//! Deferred cache writes tied to a backing-store transaction.

use crate::facade::CacheFacade;
use crate::Result;
use docvault_core::CacheNamespace;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug)]
enum PendingOp {
    Put {
        namespace: CacheNamespace,
        key: String,
        value: Value,
    },
    Evict {
        namespace: CacheNamespace,
        key: String,
    },
}

/// Buffered cache mutations.
///
/// Nothing reaches the cache until [`commit`](Self::commit) runs, which
/// callers do only after the backing-store transaction committed. Rolling
/// back, or dropping the transaction without committing, discards every
/// buffered operation.
///
/// ```ignore
/// let mut tx = cache.begin();
/// tx.put(CacheNamespace::Documents, &doc.id, &doc)?;
/// tx.evict(CacheNamespace::SearchResults, "q=report");
/// db_tx.commit().await?;
/// tx.commit().await?;
/// ```
#[must_use = "buffered cache writes are discarded unless committed"]
#[derive(Debug)]
pub struct CacheTransaction<'a> {
    facade: &'a CacheFacade,
    ops: Vec<PendingOp>,
}

impl<'a> CacheTransaction<'a> {
    pub(crate) fn new(facade: &'a CacheFacade) -> Self {
        Self {
            facade,
            ops: Vec::new(),
        }
    }

    /// Buffer a write. The value is serialized now so a commit never sees
    /// a later mutation of the caller's data.
    pub fn put<T: Serialize + ?Sized>(
        &mut self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if value.is_null() {
            return Ok(());
        }
        self.ops.push(PendingOp::Put {
            namespace,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Buffer an eviction.
    pub fn evict(&mut self, namespace: CacheNamespace, key: &str) {
        self.ops.push(PendingOp::Evict {
            namespace,
            key: key.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every buffered operation in order.
    ///
    /// All operations are attempted even if one fails; the first error is
    /// returned.
    pub async fn commit(mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.ops);
        let count = ops.len();
        let mut first_error = None;

        for op in ops {
            let result = match op {
                PendingOp::Put {
                    namespace,
                    key,
                    value,
                } => self.facade.put_value(namespace, &key, value).await,
                PendingOp::Evict { namespace, key } => self.facade.evict(namespace, &key).await,
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        debug!(operations = count, "Cache transaction committed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard every buffered operation.
    pub fn rollback(mut self) {
        let discarded = std::mem::take(&mut self.ops).len();
        debug!(operations = discarded, "Cache transaction rolled back");
    }
}

impl Drop for CacheTransaction<'_> {
    fn drop(&mut self) {
        if !self.ops.is_empty() {
            debug!(
                operations = self.ops.len(),
                "Cache transaction dropped without commit, discarding writes"
            );
        }
    }
}
