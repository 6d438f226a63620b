use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{decode, encode, CloneStats, Element, Value};
use crate::error::Result;
use crate::pool::context::current_context_id;

/// String-keyed container shared between worker contexts. Keys keep
/// insertion order.
#[derive(Debug, Default)]
pub struct ConcurrentHash {
    slots: RwLock<IndexMap<String, Mutex<Element>>>,
    stats: CloneStats,
}

impl ConcurrentHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn stats(&self) -> &CloneStats {
        &self.stats
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Value under `key`, native to the calling context.
    pub fn get(
        &self,
        key: &str,
    ) -> Option<Arc<Value>> {
        let context = current_context_id();
        let slots = self.slots.read();
        let slot = slots.get(key)?;
        let value = slot.lock().read(context, &self.stats);
        Some(value)
    }

    pub fn get_as<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => decode(|| format!("{:?}", key), &value).map(Some),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`.
    pub fn set<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<()> {
        self.insert(key, value).map(|_| ())
    }

    /// Store `value` under `key`, returning a detached copy of the value it
    /// replaced.
    pub fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>> {
        let key = key.into();
        let element = Element::neutral(encode(|| format!("{:?}", key), value)?);
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(&key) {
                let previous = std::mem::replace(&mut *slot.lock(), element);
                return Ok(Some(previous.into_value()));
            }
        }
        let previous = self.slots.write().insert(key, Mutex::new(element));
        Ok(previous.map(|slot| slot.into_inner().into_value()))
    }

    /// Mutate the value under `key` in place, adopting it into the calling
    /// context first. `None` if the key is absent.
    pub fn update<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Option<R> {
        let context = current_context_id();
        let slots = self.slots.read();
        let slot = slots.get(key)?;
        let result = slot.lock().update(context, &self.stats, f);
        Some(result)
    }

    /// Remove `key`, keeping the order of the remaining keys.
    pub fn remove(
        &self,
        key: &str,
    ) -> Option<Value> {
        let slot = self.slots.write().shift_remove(key)?;
        Some(slot.into_inner().into_value())
    }

    /// Detached copies of every entry, in insertion order.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.slots
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.lock().detached()))
            .collect()
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }
}
