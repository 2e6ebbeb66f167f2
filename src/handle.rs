use {
    super::{ClusterOptions, ClusterResult, Range, WorkerId},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

/// A write addressed to the shard owning `key`.
///
/// `key` only selects the shard; `hash` is the value stored (or removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutedHash {
    pub key: u64,
    pub hash: u64,
}

/// Diagnostics reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker: WorkerId,
    /// Number of ranges loaded.
    pub ranges: usize,
    /// Number of hashes stored, summed over all loaded ranges.
    pub hashes: usize,
}

/// Result of a grouped sub-request: the request as a whole may fail, or it
/// yields one result per item, in request order.
pub type Batch<T> = ClusterResult<Vec<ClusterResult<T>>>;

/// The coordinator's view of a worker.
///
/// Implemented by transport clients talking to remote workers, and directly
/// by [`Worker`](crate::Worker) for in-process clusters. Every call may fail
/// or stall independently of the others.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Start serving a range with an empty near-duplicate index.
    async fn load(&self, range: Range) -> ClusterResult<()>;

    /// Stop serving exactly the given range.
    async fn unload(&self, range: Range) -> ClusterResult<()>;

    /// Accept updated cluster options.
    async fn config(&self, options: ClusterOptions) -> ClusterResult<()>;

    /// Report diagnostics.
    async fn stats(&self) -> ClusterResult<WorkerStats>;

    /// First near-duplicate of each hash, routed on the hash itself.
    async fn find_first(&self, hashes: Vec<u64>) -> Batch<Option<u64>>;

    /// All near-duplicates of each hash, routed on the hash itself.
    async fn find_all(&self, hashes: Vec<u64>) -> Batch<Vec<u64>>;

    /// Store each hash in the shard owning its routing key.
    async fn insert(&self, writes: Vec<RoutedHash>) -> Batch<()>;

    /// Remove each hash from the shard owning its routing key.
    ///
    /// Yields whether the hash was stored there; absence is not an error.
    async fn remove(&self, writes: Vec<RoutedHash>) -> Batch<bool>;
}
