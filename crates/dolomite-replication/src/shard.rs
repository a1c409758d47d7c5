//! Local shard access and the scoped operation guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dolomite_types::ShardId;

use crate::error::{ReplicationError, Result};

/// Node-local shard lookup. The store resolves a shard id to the live shard
/// instance, failing with [`ReplicationError::ShardNotFound`] (or
/// `ShardClosed`) when the copy is not on this node anymore.
pub trait ShardStore: Send + Sync {
    fn shard(&self, shard_id: &ShardId) -> Result<Arc<dyn IndexShard>>;
}

/// One local shard copy, as the write path sees it.
///
/// The operation counter keeps the shard from closing under an in-flight
/// write; `fail_shard` asks the shard to take itself out of service after
/// an unrecoverable local failure.
pub trait IndexShard: Send + Sync {
    fn increment_operations(&self);
    fn decrement_operations(&self);
    fn fail_shard(&self, reason: &str, cause: &ReplicationError);
}

/// Scoped reservation on a shard's operation counter.
///
/// Acquiring increments the counter; releasing decrements it exactly once,
/// no matter how many times `release` is called or whether the guard is
/// simply dropped. Whichever phase currently owns liveness of the in-flight
/// write holds the guard, and every success and failure path releases it.
pub struct ShardGuard {
    shard: Arc<dyn IndexShard>,
    released: AtomicBool,
}

impl ShardGuard {
    pub fn acquire(shard: Arc<dyn IndexShard>) -> Self {
        shard.increment_operations();
        Self {
            shard,
            released: AtomicBool::new(false),
        }
    }

    pub fn shard(&self) -> &Arc<dyn IndexShard> {
        &self.shard
    }

    /// Releases the reservation. Idempotent.
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.shard.decrement_operations();
        }
    }
}

impl Drop for ShardGuard {
    fn drop(&mut self) {
        self.release();
    }
}
