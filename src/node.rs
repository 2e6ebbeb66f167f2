use {
    super::{ClusterError, ClusterResult},
    rapidhash::RapidBuildHasher,
    serde::{Deserialize, Serialize},
    std::{
        collections::{HashMap, VecDeque},
        fmt,
    },
};

/// Compact handle of a registered worker.
///
/// Owner entries of the coordinator's range index store this index rather
/// than the worker identity.
pub(crate) type WorkerIdx = u16;

/// Identity of a worker node, normally its `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Registered workers.
///
/// The collection assigns each worker an index, which serves as a handle
/// throughout the rest of the coordinator -- this way the range index stores
/// a two byte `u16` per shard instead of a hostname. Registration order is
/// remembered: it is the deterministic tie-break used by rebalancing.
pub(crate) struct Workers<W> {
    /// Stored workers, along with their identities.
    workers: HashMap<WorkerIdx, (WorkerId, W), RapidBuildHasher>,

    /// Reverse lookup from identity to index.
    ids: HashMap<WorkerId, WorkerIdx, RapidBuildHasher>,

    /// Worker indices, in the order the workers registered.
    order: Vec<WorkerIdx>,

    /// Next index that will be assigned to a worker.
    ///
    /// If the free list is not empty, the next index will be taken from it.
    next_idx: WorkerIdx,

    /// Indices of deregistered workers, reused before new ones are minted.
    free_list: VecDeque<WorkerIdx>,
}

impl<W> Default for Workers<W> {
    fn default() -> Self {
        Self {
            workers: HashMap::default(),
            ids: HashMap::default(),
            order: Vec::new(),
            next_idx: 0,
            free_list: VecDeque::new(),
        }
    }
}

impl<W> Workers<W> {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns index of the worker with given id.
    pub fn idx(&self, id: &WorkerId) -> Option<WorkerIdx> {
        self.ids.get(id).copied()
    }

    /// Adds a worker to the registry.
    ///
    /// Returns the index of the worker. Identities must be unique.
    pub fn insert(&mut self, id: WorkerId, worker: W) -> ClusterResult<WorkerIdx> {
        if self.idx(&id).is_some() {
            return Err(ClusterError::DuplicateWorker(id.to_string()));
        }

        let idx = match self.free_list.pop_front() {
            Some(idx) => idx,
            None => {
                let idx = self.next_idx;
                self.next_idx = idx.checked_add(1).ok_or(ClusterError::OutOfIndices)?;
                idx
            }
        };

        self.ids.insert(id.clone(), idx);
        self.workers.insert(idx, (id, worker));
        self.order.push(idx);
        Ok(idx)
    }

    /// Removes and returns (if existed) the worker with given index.
    pub fn remove(&mut self, idx: WorkerIdx) -> Option<(WorkerId, W)> {
        let removed = self.workers.remove(&idx)?;
        self.ids.remove(&removed.0);
        self.order.retain(|i| *i != idx);
        self.free_list.push_back(idx);
        Some(removed)
    }

    /// Returns a reference to the worker with given index.
    pub fn get(&self, idx: WorkerIdx) -> Option<&W> {
        self.workers.get(&idx).map(|(_, worker)| worker)
    }

    /// Returns the identity of the worker with given index.
    pub fn id(&self, idx: WorkerIdx) -> Option<&WorkerId> {
        self.workers.get(&idx).map(|(id, _)| id)
    }

    /// Iterator over the workers, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (WorkerIdx, &WorkerId, &W)> {
        self.order.iter().filter_map(|idx| {
            self.workers
                .get(idx)
                .map(|(id, worker)| (*idx, id, worker))
        })
    }

    /// Worker indices, in registration order.
    pub fn indexes(&self) -> impl Iterator<Item = WorkerIdx> {
        self.order.iter().copied()
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod tests;
