//! Worker contexts
//!
//! A [`WorkerContext`] is the isolated execution environment hosted by one
//! pool thread: its identity, the library paths and capabilities it has
//! loaded, and any per-context state capability loaders installed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::manifest::{resolve_require, Manifest, CAPABILITIES};
use crate::error::{Error, Result};
use crate::scheduler::task::panic_message;

/// Identity of an execution context.
///
/// Every thread that touches a container gets its own id on first use;
/// [`ContextId::NEUTRAL`] marks values detached from all contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    /// Owner of values held in a container's neutral storage.
    pub const NEUTRAL: ContextId = ContextId(0);

    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT_CONTEXT_ID: ContextId =
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
}

/// Id of the context the calling thread belongs to.
pub fn current_context_id() -> ContextId {
    CURRENT_CONTEXT_ID.with(|id| *id)
}

/// Isolated execution environment of one pool worker.
pub struct WorkerContext {
    index: usize,
    id: ContextId,
    lib_paths: Vec<PathBuf>,
    loaded: IndexSet<String>,
    required: IndexMap<String, PathBuf>,
    state: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("index", &self.index)
            .field("id", &self.id)
            .field("lib_paths", &self.lib_paths)
            .field("loaded", &self.loaded)
            .field("required", &self.required)
            .field("state_entries", &self.state.len())
            .finish()
    }
}

impl WorkerContext {
    /// Must be called on the thread that will host the context.
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            id: current_context_id(),
            lib_paths: Vec::new(),
            loaded: IndexSet::new(),
            required: IndexMap::new(),
            state: HashMap::new(),
        }
    }

    /// Position of this context in the pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn lib_paths(&self) -> &[PathBuf] {
        &self.lib_paths
    }

    /// Loaded capabilities, in load order.
    pub fn loaded_capabilities(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    pub fn is_loaded(
        &self,
        name: &str,
    ) -> bool {
        self.loaded.contains(name)
    }

    /// Where a require-form path was resolved, if it has been.
    pub fn required_path(
        &self,
        require: &str,
    ) -> Option<&Path> {
        self.required.get(require).map(PathBuf::as_path)
    }

    /// Install per-context state, returning the previous value of that type.
    pub fn insert_state<T: Any + Send>(
        &mut self,
        value: T,
    ) -> Option<T> {
        self.state
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn state<T: Any + Send>(&self) -> Option<&T> {
        self.state
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn state_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.state
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Replay a manifest: lib paths, then capabilities, then requires.
    ///
    /// Idempotent; entries already present are skipped.
    pub(crate) fn bootstrap(
        &mut self,
        manifest: &Manifest,
    ) -> Result<()> {
        for path in manifest.lib() {
            if !self.lib_paths.contains(path) {
                self.lib_paths.push(path.clone());
            }
        }
        for name in manifest.modules() {
            self.load_capability(name)?;
        }
        for require in manifest.requires() {
            self.resolve(require)?;
        }
        debug!(
            worker = self.index,
            manifest = manifest.id(),
            capabilities = self.loaded.len(),
            "worker context bootstrapped"
        );
        Ok(())
    }

    fn load_capability(
        &mut self,
        name: &str,
    ) -> Result<()> {
        if self.loaded.contains(name) {
            return Ok(());
        }
        // Copy the loader out so the registry lock is not held while it runs.
        let loader = CAPABILITIES
            .read()
            .get(name)
            .ok_or_else(|| self.failure(format!("unknown capability '{}'", name)))?;
        // A panicking loader must not take the worker thread down with it.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| loader(self)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(self.failure(format!("capability '{}' failed to load: {:#}", name, err)));
            }
            Err(payload) => {
                return Err(self.failure(format!(
                    "capability '{}' panicked while loading: {}",
                    name,
                    panic_message(&*payload)
                )));
            }
        }
        self.loaded.insert(name.to_string());
        Ok(())
    }

    fn resolve(
        &mut self,
        require: &str,
    ) -> Result<()> {
        if self.required.contains_key(require) {
            return Ok(());
        }
        let path = resolve_require(&self.lib_paths, require).map_err(|reason| self.failure(reason))?;
        self.required.insert(require.to_string(), path);
        Ok(())
    }

    fn failure(
        &self,
        reason: String,
    ) -> Error {
        Error::bootstrap(format!("worker {}", self.index), reason)
    }
}
