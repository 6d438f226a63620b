use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{decode, encode, CloneStats, Element, Value};
use crate::error::Result;
use crate::pool::context::current_context_id;

/// Index-addressed container shared between worker contexts.
///
/// Writing past the end grows the array, filling the gap with `null`.
#[derive(Debug, Default)]
pub struct ConcurrentArray {
    slots: RwLock<Vec<Mutex<Element>>>,
    stats: CloneStats,
}

impl ConcurrentArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// `len` slots, all `null`.
    pub fn with_len(len: usize) -> Self {
        let array = Self::new();
        array.resize(len);
        array
    }

    /// Build from serializable values, in order.
    pub fn from_values<T, I>(values: I) -> Result<Self>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let slots = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let value = encode(|| slot_name(index), value)?;
                Ok(Mutex::new(Element::neutral(value)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            slots: RwLock::new(slots),
            stats: CloneStats::default(),
        })
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

    /// Value at `index`, native to the calling context.
    pub fn get(
        &self,
        index: usize,
    ) -> Option<Arc<Value>> {
        let context = current_context_id();
        let slots = self.slots.read();
        let slot = slots.get(index)?;
        let value = slot.lock().read(context, &self.stats);
        Some(value)
    }

    /// Value at `index` converted to `T`.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        index: usize,
    ) -> Result<Option<T>> {
        match self.get(index) {
            Some(value) => decode(|| slot_name(index), &value).map(Some),
            None => Ok(None),
        }
    }

    /// Store `value` at `index`, replacing whatever was there.
    ///
    /// Pass a reference to keep the caller's own copy.
    pub fn set<T: Serialize>(
        &self,
        index: usize,
        value: T,
    ) -> Result<()> {
        let element = Element::neutral(encode(|| slot_name(index), value)?);
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(index) {
                *slot.lock() = element;
                return Ok(());
            }
        }
        let mut slots = self.slots.write();
        if slots.len() <= index {
            slots.resize_with(index + 1, || Mutex::new(Element::neutral(Value::Null)));
        }
        *slots[index].get_mut() = element;
        Ok(())
    }

    /// Append `value`, returning its index.
    pub fn push<T: Serialize>(
        &self,
        value: T,
    ) -> Result<usize> {
        let mut slots = self.slots.write();
        let index = slots.len();
        let element = Element::neutral(encode(|| slot_name(index), value)?);
        slots.push(Mutex::new(element));
        Ok(index)
    }

    /// Mutate the value at `index` in place, adopting it into the calling
    /// context first. `None` if the slot does not exist.
    pub fn update<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Option<R> {
        let context = current_context_id();
        let slots = self.slots.read();
        let slot = slots.get(index)?;
        let result = slot.lock().update(context, &self.stats, f);
        Some(result)
    }

    /// Detached copies of every slot. Ownership is not changed.
    pub fn snapshot(&self) -> Vec<Value> {
        self.slots
            .read()
            .iter()
            .map(|slot| slot.lock().detached())
            .collect()
    }

    /// Every slot converted to `T`.
    pub fn to_vec_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.snapshot()
            .iter()
            .enumerate()
            .map(|(index, value)| decode(|| slot_name(index), value))
            .collect()
    }

    /// Grow with `null` or truncate to `len` slots.
    pub fn resize(
        &self,
        len: usize,
    ) {
        self.slots
            .write()
            .resize_with(len, || Mutex::new(Element::neutral(Value::Null)));
    }

    pub fn pop(&self) -> Option<Value> {
        let slot = self.slots.write().pop()?;
        Some(slot.into_inner().into_value())
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

fn slot_name(index: usize) -> String {
    format!("[{}]", index)
}
