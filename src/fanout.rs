//! Fan-out of bulk requests into per-worker sub-requests, and fan-in of
//! their results back onto the caller's queries.

use {
    super::{
        ClusterError,
        ClusterResult,
        RangeIndex,
        WorkerHandle,
        WorkerId,
        node::{WorkerIdx, Workers},
    },
    rapidhash::RapidBuildHasher,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
    tracing::debug,
};

/// Items bound for a single worker.
pub(crate) struct Route<T> {
    pub worker: WorkerId,
    pub handle: Arc<dyn WorkerHandle>,
    /// Position of the originating query for every item.
    pub positions: Vec<usize>,
    pub items: Vec<T>,
}

/// Sub-requests of a bulk operation, grouped by destination.
pub(crate) struct Dispatch<T> {
    pub routes: Vec<Route<T>>,
    /// Queries (by position) with a routing key nobody owns.
    pub unrouted: Vec<(usize, ClusterError)>,
}

impl<T> Dispatch<T> {
    /// Groups `(position, routing key, item)` triples by the worker owning the
    /// routing key.
    ///
    /// A query with any routing key nobody owns is not dispatched at all:
    /// none of its items reach a worker. Destinations keep the order in which
    /// they are first encountered.
    pub fn group(
        ranges: &RangeIndex<Option<WorkerIdx>>,
        workers: &Workers<Arc<dyn WorkerHandle>>,
        items: impl IntoIterator<Item = (usize, u64, T)>,
    ) -> Self {
        let mut resolved = Vec::new();
        let mut unrouted = Vec::new();
        let mut fatal: HashSet<usize, RapidBuildHasher> = HashSet::default();

        for (position, key, item) in items {
            let owner = ranges
                .find(key)
                .copied()
                .flatten()
                .filter(|idx| workers.get(*idx).is_some());
            match owner {
                Some(idx) => resolved.push((position, idx, item)),
                None => {
                    debug!(key, "no owner for routing key");
                    if fatal.insert(position) {
                        unrouted.push((position, ClusterError::RangeUnassigned { key }));
                    }
                }
            }
        }

        let mut routes: Vec<Route<T>> = Vec::new();
        let mut slots: HashMap<WorkerIdx, usize, RapidBuildHasher> = HashMap::default();
        for (position, idx, item) in resolved {
            if fatal.contains(&position) {
                continue;
            }
            let (Some(id), Some(handle)) = (workers.id(idx), workers.get(idx)) else {
                continue;
            };

            let slot = *slots.entry(idx).or_insert_with(|| {
                routes.push(Route {
                    worker: id.clone(),
                    handle: handle.clone(),
                    positions: Vec::new(),
                    items: Vec::new(),
                });
                routes.len() - 1
            });
            routes[slot].positions.push(position);
            routes[slot].items.push(item);
        }

        Self { routes, unrouted }
    }
}

/// Collects per-item results back onto the queries they belong to.
///
/// A query may receive several results (one per routing key); they are folded
/// with `combine`, and any error wins over success.
pub(crate) struct FanIn<R> {
    slots: Vec<Option<ClusterResult<R>>>,
}

impl<R> FanIn<R> {
    pub fn new(queries: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(queries).collect(),
        }
    }

    /// Records one result for the query at `position`.
    pub fn merge(&mut self, position: usize, result: ClusterResult<R>, combine: impl Fn(R, R) -> R) {
        let slot = &mut self.slots[position];
        *slot = Some(match (slot.take(), result) {
            (None, result) => result,
            (Some(Err(e)), _) | (Some(Ok(_)), Err(e)) => Err(e),
            (Some(Ok(a)), Ok(b)) => Ok(combine(a, b)),
        });
    }

    /// Records the outcome of a whole sub-request.
    ///
    /// If the sub-request failed, or answered with the wrong number of items,
    /// every item it carried fails with the same error.
    pub fn merge_batch(
        &mut self,
        worker: &WorkerId,
        positions: &[usize],
        batch: ClusterResult<Vec<ClusterResult<R>>>,
        combine: impl Fn(R, R) -> R,
    ) {
        let error = match batch {
            Ok(results) if results.len() == positions.len() => {
                for (position, result) in positions.iter().zip(results) {
                    self.merge(*position, result, &combine);
                }
                return;
            }
            Ok(results) => ClusterError::Transport {
                worker: worker.to_string(),
                reason: format!("expected {} results, got {}", positions.len(), results.len()),
            },
            Err(e) => e,
        };

        for position in positions {
            self.merge(*position, Err(error.clone()), &combine);
        }
    }

    /// Results in query order.
    ///
    /// Every query receives at least one result when it is routed, so an
    /// empty slot only occurs for a query that expanded to no routing keys;
    /// it resolves to `empty`.
    pub fn finish(self, empty: impl Fn() -> ClusterResult<R>) -> Vec<ClusterResult<R>> {
        self.slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(&empty))
            .collect()
    }
}
