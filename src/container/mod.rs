//! Concurrent containers with lazy cross-context cloning
//!
//! Values live as [`serde_json::Value`] trees tagged with the context that
//! owns them. A reader in the owning context gets the stored handle back
//! without copying; a reader in any other context first deep-clones the
//! value and becomes its new owner. Writes move values into neutral storage,
//! detached from every context.
//!
//! Shape changes (growing, removing, clearing) take the container's write
//! lock; reads and in-place updates of existing slots only take the read
//! lock plus the slot's own mutex, so distinct slots never contend.

mod array;
mod hash;

pub use array::ConcurrentArray;
pub use hash::ConcurrentHash;
pub use serde_json::Value;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pool::context::ContextId;

/// Counters that make the lazy cloning observable.
#[derive(Debug, Default)]
pub struct CloneStats {
    native_hits: AtomicUsize,
    cross_context_clones: AtomicUsize,
}

impl CloneStats {
    /// Reads served from the reader's own copy.
    pub fn native_hits(&self) -> usize {
        self.native_hits.load(Ordering::Relaxed)
    }

    /// Deep clones made because the slot was owned elsewhere.
    pub fn cross_context_clones(&self) -> usize {
        self.cross_context_clones.load(Ordering::Relaxed)
    }

    #[inline]
    fn record_hit(&self) {
        self.native_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_clone(&self) {
        self.cross_context_clones.fetch_add(1, Ordering::Relaxed);
    }
}

/// One stored value plus the context that owns it.
#[derive(Debug)]
struct Element {
    owner: ContextId,
    value: Arc<Value>,
}

impl Element {
    fn neutral(value: Value) -> Self {
        Self {
            owner: ContextId::NEUTRAL,
            value: Arc::new(value),
        }
    }

    /// Make `context` the owner, deep-cloning if it was not already.
    fn adopt(
        &mut self,
        context: ContextId,
        stats: &CloneStats,
    ) {
        if self.owner == context {
            stats.record_hit();
            return;
        }
        self.value = Arc::new(Value::clone(&self.value));
        self.owner = context;
        stats.record_clone();
    }

    fn read(
        &mut self,
        context: ContextId,
        stats: &CloneStats,
    ) -> Arc<Value> {
        self.adopt(context, stats);
        Arc::clone(&self.value)
    }

    /// Mutate in place. Handles already returned to readers keep their value.
    fn update<R>(
        &mut self,
        context: ContextId,
        stats: &CloneStats,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        self.adopt(context, stats);
        f(Arc::make_mut(&mut self.value))
    }

    /// Detached copy; ownership is left untouched.
    fn detached(&self) -> Value {
        Value::clone(&self.value)
    }

    fn into_value(self) -> Value {
        Arc::try_unwrap(self.value).unwrap_or_else(|shared| Value::clone(&shared))
    }
}

fn encode<T: Serialize>(
    slot: impl FnOnce() -> String,
    value: T,
) -> Result<Value> {
    serde_json::to_value(value).map_err(|source| Error::ContainerTypeMismatch {
        slot: slot(),
        source,
    })
}

fn decode<T: DeserializeOwned>(
    slot: impl FnOnce() -> String,
    value: &Value,
) -> Result<T> {
    T::deserialize(value).map_err(|source| Error::ContainerTypeMismatch {
        slot: slot(),
        source,
    })
}

#[cfg(test)]
mod tests;
