//! Field resolution without N+1 round trips.
//!
//! Relations between entities are described by join predicates. At schema-build
//! time each predicate is [factorized](factorize) into an outer key, an inner key
//! and an inner residual. At request time a [`ResolutionTree`](batching::ResolutionTree)
//! collects every outer row of a tick, issues one grouped query per relation and
//! projection, and hands each outer row its [`Grouping`](source::Grouping) of
//! partially materialized [proxies](projection::Proxy).

pub mod batching;
mod config;
mod error;
pub mod factorize;
pub mod projection;
pub mod resolver;
mod runtime;
pub mod source;

pub use config::BatchingConfig;
pub use error::{BatchError, BatchResult, ConfigurationError, ConfigurationResult, SourceError, TreeError};
pub use runtime::{NoopRuntime, Runtime};
