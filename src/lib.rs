//! Sharded near-duplicate lookup for simhash fingerprints.
//!
//! The 64-bit hash space is split into a fixed number of equal shards. A
//! [`Coordinator`] assigns shards to registered workers, rebalancing as they
//! join and leave, and fans client operations out to the owning workers.
//! Each [`Worker`] keeps a near-duplicate index per shard it hosts.
//!
//! Near-duplicates tend to agree on most bits but may differ in the
//! high-order bits used for routing. Every stored hash is therefore written
//! to the shards of all its routing keys (the hash with its top
//! `differing_bits` bits flipped through every combination), so that a query
//! routed on its own value finds it.
//!
//! ```
//! use {simhash_cluster::{Coordinator, Worker}, std::sync::Arc};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let coordinator = Coordinator::builder().build().unwrap();
//! // 1024 shards, at most 256 per worker.
//! for i in 0..4 {
//!     let id = format!("10.0.0.{i}:8080");
//!     coordinator.register(id.as_str(), Arc::new(Worker::new(id.as_str()))).await.unwrap();
//! }
//! assert!(coordinator.unassigned().is_empty());
//!
//! coordinator.insert(0b101010101010).await.unwrap();
//! assert_eq!(
//!     coordinator.find_first(0b101010101011).await,
//!     Ok(Some(0b101010101010))
//! );
//! # });
//! ```

mod builder;
mod config;
mod coordinator;
mod corpus;
mod error;
mod fanout;
mod handle;
mod node;
mod range;
mod rebalance;
mod space;
mod worker;

pub use {
    builder::CoordinatorBuilder,
    config::{ClusterOptions, CoordinatorConfig, OptionMap},
    coordinator::{Assignment, ClusterStats, Coordinator, RebalanceReport},
    corpus::{Corpus, CorpusFactory, SimhashCorpus, SimhashCorpusFactory},
    error::{ClusterError, ClusterResult},
    handle::{Batch, RoutedHash, WorkerHandle, WorkerStats},
    node::WorkerId,
    range::{Range, RangeIndex},
    rebalance::{Move, RebalancePlan, Snapshot},
    space::{MAX_DIFFERING_BITS, ShardSpace},
    worker::Worker,
};
