#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// No worker owns the range containing the routing key.
    #[error("Range unassigned for key {key:#018x}")]
    RangeUnassigned { key: u64 },

    /// Range removal named a start with a different (or no) stored end.
    #[error("Range mismatch at {start}: expected end {end}, found {found:?}")]
    RangeMismatch {
        start: u64,
        end: u64,
        found: Option<u64>,
    },

    /// Worker does not currently host a shard containing the key.
    #[error("No such shard for key {key:#018x}")]
    NoSuchShard { key: u64 },

    /// Hash is not stored in the shard it was removed from.
    #[error("Hash {hash:#018x} not found")]
    HashNotFound { hash: u64 },

    /// Unrecognized configuration option.
    #[error("Unknown configuration option: {0}")]
    UnknownOption(String),

    /// Recognized configuration option with an unusable value.
    #[error("Invalid value for configuration option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    /// Shard space parameters cannot describe a valid partition.
    #[error("Invalid shard space: {0}")]
    InvalidSpace(String),

    /// Worker is not registered with the coordinator.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// Worker with the same identity is already registered.
    #[error("Worker already registered: {0}")]
    DuplicateWorker(String),

    /// Worker RPC failed.
    #[error("Transport error talking to {worker}: {reason}")]
    Transport { worker: String, reason: String },

    /// Worker RPC did not complete in time.
    #[error("Request to {worker} timed out after {timeout_ms}ms")]
    Timeout { worker: String, timeout_ms: u64 },

    /// No more indices available in the worker registry.
    #[error("Out of worker indices")]
    OutOfIndices,
}

impl ClusterError {
    /// Whether the condition is operational, so the caller may retry the
    /// affected hashes later (possibly after a rebalance settles).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RangeUnassigned { .. }
                | Self::NoSuchShard { .. }
                | Self::Transport { .. }
                | Self::Timeout { .. }
        )
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
