//! Bootstrap manifests and the capability registry
//!
//! A [`Manifest`] is the ordered list a worker context replays before it
//! accepts tasks: library search paths, capabilities, and require-form paths.
//! The engine does not interpret capabilities; it looks each name up in the
//! process-wide [`CapabilityRegistry`] and runs the registered loader on the
//! worker that needs it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::context::WorkerContext;
use crate::config::ContextConfig;
use crate::error::{Error, Result};

/// Loader run on a worker context when a capability is first required there.
pub type Loader = fn(&mut WorkerContext) -> anyhow::Result<()>;

/// Process-wide capability registry.
pub static CAPABILITIES: Lazy<RwLock<CapabilityRegistry>> =
    Lazy::new(|| RwLock::new(CapabilityRegistry::new()));

/// Capabilities registered when the library was first engaged.
static ENGAGED: Lazy<Vec<String>> = Lazy::new(|| CAPABILITIES.read().names());

/// Register a capability in the process-wide registry.
///
/// Returns the loader previously registered under `name`, if any.
pub fn register_capability(
    name: impl Into<String>,
    loader: Loader,
) -> Option<Loader> {
    CAPABILITIES.write().register(name, loader)
}

/// Named capability loaders, in registration order.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    loaders: IndexMap<String, Loader>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            loaders: IndexMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        loader: Loader,
    ) -> Option<Loader> {
        self.loaders.insert(name.into(), loader)
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<Loader> {
        self.loaders.get(name).copied()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.loaders.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.loaders.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

/// Ordered bootstrap list for worker contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    id: u64,
    lib: Vec<PathBuf>,
    modules: Vec<String>,
    requires: Vec<String>,
}

impl Manifest {
    pub fn new(
        lib: Vec<PathBuf>,
        modules: Vec<String>,
        requires: Vec<String>,
    ) -> Self {
        Self {
            id: fingerprint(&lib, &modules, &requires),
            lib,
            modules,
            requires,
        }
    }

    /// Manifest described by a context configuration.
    pub fn from_config(config: &ContextConfig) -> Self {
        let modules = config.modules.clone().unwrap_or_else(|| ENGAGED.clone());
        Self::new(config.lib.clone(), modules, config.requires.clone())
    }

    /// Content fingerprint; workers use it to skip replays, so equal
    /// manifests share one entry.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lib(&self) -> &[PathBuf] {
        &self.lib
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// Check on the caller's side that every capability is registered and
    /// every require resolves, without running any loader.
    pub fn validate(&self) -> Result<()> {
        {
            let registry = CAPABILITIES.read();
            if let Some(missing) = self.modules.iter().find(|name| !registry.contains(name)) {
                return Err(Error::bootstrap(
                    "caller",
                    format!("unknown capability '{}'", missing),
                ));
            }
        }
        for require in &self.requires {
            resolve_require(&self.lib, require).map_err(|reason| Error::bootstrap("caller", reason))?;
        }
        Ok(())
    }
}

fn fingerprint(
    lib: &[PathBuf],
    modules: &[String],
    requires: &[String],
) -> u64 {
    let mut hasher = DefaultHasher::new();
    lib.hash(&mut hasher);
    modules.hash(&mut hasher);
    requires.hash(&mut hasher);
    hasher.finish()
}

/// Find `require` under the first library path that contains it.
pub(crate) fn resolve_require(
    lib: &[PathBuf],
    require: &str,
) -> std::result::Result<PathBuf, String> {
    let relative = Path::new(require);
    let well_formed = !require.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !well_formed {
        return Err(format!("malformed require '{}'", require));
    }
    lib.iter()
        .map(|dir| dir.join(relative))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            format!(
                "require '{}' not found in {} library path(s)",
                require,
                lib.len()
            )
        })
}
