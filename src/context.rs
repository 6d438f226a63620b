//! Caller-facing entry point
//!
//! A [`Context`] pairs the process-wide worker pool with one manifest. The
//! first `Context` of a process creates the pool; later ones reuse it and
//! only add their own manifest, which every worker replays before it runs a
//! leaf of that context's calls.

use std::sync::Arc;

use crate::body::{Body, ForWork, ReduceBody, ReduceWork};
use crate::config::ContextConfig;
use crate::error::Result;
use crate::pool::context::ContextId;
use crate::pool::manifest::Manifest;
use crate::pool::WorkerPool;
use crate::range::Range;
use crate::scheduler::{self, StatsSnapshot};

/// Handle for running data-parallel algorithms on the worker pool.
#[derive(Debug, Clone)]
pub struct Context {
    pool: &'static WorkerPool,
    manifest: Arc<Manifest>,
    config: ContextConfig,
}

impl Context {
    /// Validate the manifest described by `config` and attach to the worker
    /// pool, creating it if this is the first context of the process.
    pub fn new(config: ContextConfig) -> Result<Self> {
        let manifest = Arc::new(Manifest::from_config(&config));
        manifest.validate()?;
        let pool = WorkerPool::global(&config, &manifest)?;
        Ok(Self {
            pool,
            manifest,
            config,
        })
    }

    /// Context built from defaults plus environment overrides.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ContextConfig::from_env()?)
    }

    /// Number of worker contexts in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Context ids of the pool workers, by worker index.
    pub fn worker_ids(&self) -> &[ContextId] {
        self.pool.context_ids()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Scheduler and steal counters of the pool.
    pub fn stats(&self) -> StatsSnapshot {
        self.pool.stats()
    }

    /// Run `body` over every leaf of `range`.
    ///
    /// Returns once every leaf has run or been skipped. On failure the first
    /// error is returned; leaves that completed keep their effects.
    pub fn parallel_for<B: Body>(
        &self,
        range: Range,
        body: &B,
    ) -> Result<()> {
        scheduler::run(
            self.pool,
            Arc::clone(&self.manifest),
            range,
            ForWork(body.clone()),
        )
    }

    /// Map every leaf of `range` with `body` and merge the partials.
    pub fn parallel_reduce<B: ReduceBody>(
        &self,
        range: Range,
        body: &B,
    ) -> Result<B::Output> {
        body.reset();
        let output = scheduler::run(
            self.pool,
            Arc::clone(&self.manifest),
            range,
            ReduceWork(body.clone()),
        )?;
        body.finish(&output);
        Ok(output)
    }
}
