//! Coordination-store client with a lazily refreshed cluster state cache.
//!
//! - [`CoordClient`]: path-addressed CRUD and watches over a session to a
//!   hierarchical, versioned store, with retries across transient
//!   connection loss, a node size limit, per-path serialization and
//!   per-operation metrics.
//! - [`ClusterStateCache`]: per-category snapshots of cluster state,
//!   re-fetched only when marked dirty and published by atomic swap.
//! - [`CacheChangeListener`]: turns watch events into dirty flags.
//!
//! [`MemoryStore`] provides an in-process store implementing
//! [`ConnectionFactory`].

mod cache;
mod client;
mod config;
mod constants;
mod errors;
mod events;
mod metrics;
mod model;
mod serializer;
mod store;
pub mod utils;

pub use cache::*;
pub use client::*;
pub use config::*;
pub use constants::*;
pub use errors::*;
pub use events::*;
pub use metrics::*;
pub use model::*;
pub use serializer::*;
pub use store::*;
pub use utils::*;
