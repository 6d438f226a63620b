//! isotask: work-stealing data parallelism over isolated worker contexts
//!
//! A fixed pool of worker threads, each hosting its own bootstrapped
//! [`WorkerContext`](pool::WorkerContext), runs `parallel_for` and
//! `parallel_reduce` over integer ranges. Ranges are split recursively down to
//! a grain size; idle workers steal the oldest pending halves from busy ones.
//! Data shared across contexts lives in [`ConcurrentArray`] and
//! [`ConcurrentHash`], which clone values lazily into the reading context.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use isotask::{reduce_int_array_func, ConcurrentArray, Context, ContextConfig, Range};
//!
//! fn main() -> isotask::Result<()> {
//!     let context = Context::new(ContextConfig::default())?;
//!     let data = Arc::new(ConcurrentArray::from_values(1..=100)?);
//!     let body = reduce_int_array_func(
//!         Arc::clone(&data),
//!         |array, range| {
//!             let mut sum = 0i64;
//!             for i in range.indices() {
//!                 sum += array.get_as::<i64>(i as usize)?.unwrap_or(0);
//!             }
//!             Ok(sum)
//!         },
//!         |left, right| Ok(left + right.unwrap_or(0)),
//!     );
//!     let total = context.parallel_reduce(Range::new(0, 100, 10)?, &body)?;
//!     assert_eq!(total, 5050);
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod body;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod logger;
pub mod pool;
pub mod range;
pub mod scheduler;

pub use body::{
    for_int_array_func, for_int_hash_func, for_int_method, reduce_int_array_func,
    reduce_int_hash_func, Body, BoundMethod, ContainerFunc, ContainerReducer, ReduceBody,
};
pub use config::ContextConfig;
pub use container::{CloneStats, ConcurrentArray, ConcurrentHash, Value};
pub use context::Context;
pub use error::{ConfigError, Error, Result};
pub use pool::{current_context_id, register_capability, ContextId, Manifest, WorkerContext};
pub use range::Range;
pub use scheduler::{StatsSnapshot, StealStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
