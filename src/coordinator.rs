use {
    super::{
        Batch,
        ClusterError,
        ClusterOptions,
        ClusterResult,
        CoordinatorBuilder,
        CoordinatorConfig,
        OptionMap,
        Range,
        RangeIndex,
        RebalancePlan,
        RoutedHash,
        ShardSpace,
        Snapshot,
        WorkerHandle,
        WorkerId,
        WorkerStats,
        config::millis,
        fanout::{Dispatch, FanIn, Route},
        node::{WorkerIdx, Workers},
        rebalance::Move,
    },
    futures::future::join_all,
    parking_lot::RwLock,
    serde::Serialize,
    std::{future::Future, sync::Arc, time::Duration},
    tracing::{debug, info, warn},
};

/// Ownership state: the range index and the workers its entries point to.
struct Routing {
    ranges: RangeIndex<Option<WorkerIdx>>,
    workers: Workers<Arc<dyn WorkerHandle>>,
}

/// A range changing hands, by worker identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub range: Range,
    pub from: Option<WorkerId>,
    pub to: Option<WorkerId>,
}

/// Outcome of a registration or deregistration.
///
/// Membership changes never fail because a worker misbehaved while ranges
/// were moving; such failures are collected here instead, and the affected
/// ranges stay with their previous owner or become unassigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Worker that joined or left.
    pub worker: WorkerId,

    /// Moves that took effect, in application order.
    pub applied: Vec<Assignment>,

    /// Moves that did not take effect, along with the reason.
    pub failed: Vec<(Assignment, ClusterError)>,

    /// Failure to deliver cluster options to a joining worker.
    pub config_error: Option<ClusterError>,
}

impl RebalanceReport {
    fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            applied: Vec::new(),
            failed: Vec::new(),
            config_error: None,
        }
    }

    /// Whether every planned step succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.config_error.is_none()
    }
}

/// Point-in-time summary of shard ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    /// Total number of shards.
    pub shards: usize,
    /// Shards nobody owns.
    pub unassigned: usize,
    /// Shards held by every worker, in registration order.
    pub workers: Vec<(WorkerId, usize)>,
}

/// Cluster coordinator.
///
/// Owns the assignment of the shard space to registered workers, rebalances
/// it as workers join and leave, and fans client operations out to the
/// owning workers.
///
/// Membership changes are serialized with respect to each other. Client
/// operations never wait for them: a query racing a rebalance may observe a
/// range as unassigned, or reach a worker that has not loaded it yet, and
/// fails with a retryable error.
pub struct Coordinator {
    space: ShardSpace,
    default_timeout: Duration,
    routing: RwLock<Routing>,
    membership: tokio::sync::Mutex<()>,
    options: RwLock<ClusterOptions>,
}

impl Coordinator {
    /// Coordinator builder.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Creates a coordinator with every shard unassigned.
    pub fn new(config: CoordinatorConfig) -> ClusterResult<Self> {
        Self::with_options(config, ClusterOptions::default())
    }

    pub(crate) fn with_options(config: CoordinatorConfig, options: ClusterOptions) -> ClusterResult<Self> {
        if config.request_timeout_ms == 0 {
            return Err(ClusterError::InvalidOption {
                key: "request_timeout_ms".into(),
                reason: "timeout must be positive".into(),
            });
        }
        let space = config.space()?;
        let ranges = space.ranges().map(|range| (range, None)).collect();

        Ok(Self {
            space,
            default_timeout: config.request_timeout(),
            routing: RwLock::new(Routing {
                ranges,
                workers: Workers::new(),
            }),
            membership: tokio::sync::Mutex::new(()),
            options: RwLock::new(options),
        })
    }

    /// Shard space the coordinator partitions.
    pub fn space(&self) -> &ShardSpace {
        &self.space
    }

    /// Timeout applied to every worker request.
    ///
    /// The `request_timeout_ms` cluster option takes precedence over the
    /// configured default.
    pub fn request_timeout(&self) -> Duration {
        self.options
            .read()
            .request_timeout_ms
            .map_or(self.default_timeout, Duration::from_millis)
    }

    /// Current cluster options.
    pub fn options(&self) -> ClusterOptions {
        self.options.read().clone()
    }

    /// Registers a worker and hands it its share of the shard space.
    ///
    /// Ranges nobody owns are handed out first, the rest is taken from the
    /// busiest workers. Every taken range is unloaded from its donor before
    /// the joining worker loads it, and ownership only moves once the load
    /// is acknowledged. Finally the worker receives the cluster options.
    pub async fn register(
        &self,
        id: impl Into<WorkerId>,
        handle: Arc<dyn WorkerHandle>,
    ) -> ClusterResult<RebalanceReport> {
        let id = id.into();
        let _membership = self.membership.lock().await;

        let (plan, workers) = {
            let mut routing = self.routing.write();
            let snapshot = Snapshot::capture(&routing.ranges, routing.workers.indexes());
            let idx = routing.workers.insert(id.clone(), handle.clone())?;
            let plan = RebalancePlan::join(&self.space, &snapshot, idx);
            (plan, routing.workers.len())
        };
        info!(worker = %id, workers, moves = plan.len(), "registering worker");

        let mut report = RebalanceReport::new(id.clone());
        for mv in plan {
            self.apply(mv, &mut report).await;
        }

        let options = self.options();
        if let Err(e) = self.call(&id, handle.config(options)).await {
            warn!(worker = %id, error = %e, "failed to push options");
            report.config_error = Some(e);
        }

        Ok(report)
    }

    /// Removes a worker, redistributing its ranges among the survivors.
    ///
    /// The leaving worker is not contacted. Its ranges become unassigned
    /// at once, then survivors are topped up in registration order; whatever
    /// does not fit stays unassigned.
    pub async fn deregister(&self, id: &WorkerId) -> ClusterResult<RebalanceReport> {
        let _membership = self.membership.lock().await;

        let plan = {
            let mut guard = self.routing.write();
            let routing = &mut *guard;
            let idx = routing
                .workers
                .idx(id)
                .ok_or_else(|| ClusterError::UnknownWorker(id.to_string()))?;
            routing.workers.remove(idx);

            let freed: Vec<Range> = routing
                .ranges
                .iter()
                .filter(|(_, owner)| **owner == Some(idx))
                .map(|(range, _)| range)
                .collect();
            for range in &freed {
                routing.ranges.insert(*range, None);
            }

            let snapshot = Snapshot::capture(&routing.ranges, routing.workers.indexes());
            RebalancePlan::leave(&self.space, &snapshot, &freed)
        };
        info!(worker = %id, moves = plan.len(), "deregistering worker");

        let mut report = RebalanceReport::new(id.clone());
        for mv in plan {
            self.apply(mv, &mut report).await;
        }

        Ok(report)
    }

    /// Carries out a single move.
    async fn apply(&self, mv: Move<WorkerIdx>, report: &mut RebalanceReport) {
        let (from, to) = {
            let routing = self.routing.read();
            let resolve = |idx: Option<WorkerIdx>| {
                idx.and_then(|idx| {
                    let id = routing.workers.id(idx)?.clone();
                    let handle = routing.workers.get(idx)?.clone();
                    Some((idx, id, handle))
                })
            };
            (resolve(mv.from), resolve(mv.to))
        };
        let range = mv.range;
        let assignment = Assignment {
            range,
            from: from.as_ref().map(|(_, id, _)| id.clone()),
            to: to.as_ref().map(|(_, id, _)| id.clone()),
        };

        if let Some((_, donor, handle)) = &from {
            if let Err(e) = self.call(donor, handle.unload(range)).await {
                warn!(worker = %donor, %range, error = %e, "failed to unload range");
                report.failed.push((assignment, e));
                return;
            }
            self.set_owner(range, None);
        }

        let Some((idx, id, handle)) = to else {
            self.set_owner(range, None);
            info!(%range, "range left unassigned");
            report.applied.push(assignment);
            return;
        };

        match self.call(&id, handle.load(range)).await {
            Ok(()) => {
                self.set_owner(range, Some(idx));
                info!(worker = %id, %range, "range assigned");
                report.applied.push(assignment);
            }
            Err(e) => {
                self.set_owner(range, None);
                warn!(worker = %id, %range, error = %e, "failed to load range");
                report.failed.push((assignment, e));
            }
        }
    }

    fn set_owner(&self, range: Range, owner: Option<WorkerIdx>) {
        self.routing.write().ranges.insert(range, owner);
    }

    /// Validates, stores and pushes cluster options to every worker.
    ///
    /// Invalid options are rejected before anything is stored. Delivery is
    /// reported per worker.
    pub async fn config(
        &self,
        options: &OptionMap,
    ) -> ClusterResult<Vec<(WorkerId, ClusterResult<()>)>> {
        let options = ClusterOptions::from_map(options)?;
        let _membership = self.membership.lock().await;

        *self.options.write() = options.clone();
        info!(?options, "updated cluster options");

        let pushes = self.handles().into_iter().map(|(id, handle)| {
            let options = options.clone();
            async move {
                let result = self.call(&id, handle.config(options)).await;
                if let Err(e) = &result {
                    warn!(worker = %id, error = %e, "failed to push options");
                }
                (id, result)
            }
        });
        Ok(join_all(pushes).await)
    }

    /// Registered workers, in registration order.
    pub fn workers(&self) -> Vec<WorkerId> {
        self.routing
            .read()
            .workers
            .iter()
            .map(|(_, id, _)| id.clone())
            .collect()
    }

    fn handles(&self) -> Vec<(WorkerId, Arc<dyn WorkerHandle>)> {
        self.routing
            .read()
            .workers
            .iter()
            .map(|(_, id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    /// Worker owning the range that contains `key`.
    pub fn owner(&self, key: u64) -> ClusterResult<WorkerId> {
        let routing = self.routing.read();
        routing
            .ranges
            .find(key)
            .copied()
            .flatten()
            .and_then(|idx| routing.workers.id(idx))
            .cloned()
            .ok_or(ClusterError::RangeUnassigned { key })
    }

    /// Every shard range along with its owner, in ascending order.
    pub fn assignments(&self) -> Vec<(Range, Option<WorkerId>)> {
        let routing = self.routing.read();
        routing
            .ranges
            .iter()
            .map(|(range, owner)| {
                let owner = owner.and_then(|idx| routing.workers.id(idx)).cloned();
                (range, owner)
            })
            .collect()
    }

    /// Ranges owned by the given worker.
    pub fn held(&self, id: &WorkerId) -> ClusterResult<Vec<Range>> {
        let routing = self.routing.read();
        let idx = routing
            .workers
            .idx(id)
            .ok_or_else(|| ClusterError::UnknownWorker(id.to_string()))?;
        Ok(routing
            .ranges
            .iter()
            .filter(|(_, owner)| **owner == Some(idx))
            .map(|(range, _)| range)
            .collect())
    }

    /// Ranges nobody owns.
    pub fn unassigned(&self) -> Vec<Range> {
        self.routing
            .read()
            .ranges
            .iter()
            .filter(|(_, owner)| owner.is_none())
            .map(|(range, _)| range)
            .collect()
    }

    /// Shard counts per worker, plus unassigned shards.
    pub fn stats(&self) -> ClusterStats {
        let routing = self.routing.read();
        let snapshot = Snapshot::capture(&routing.ranges, routing.workers.indexes());
        ClusterStats {
            shards: routing.ranges.len(),
            unassigned: snapshot.unassigned.len(),
            workers: snapshot
                .held
                .iter()
                .filter_map(|(idx, ranges)| Some((routing.workers.id(*idx)?.clone(), ranges.len())))
                .collect(),
        }
    }

    /// Diagnostics reported by every worker.
    pub async fn worker_stats(&self) -> Vec<(WorkerId, ClusterResult<WorkerStats>)> {
        let requests = self.handles().into_iter().map(|(id, handle)| async move {
            let stats = self.call(&id, handle.stats()).await;
            (id, stats)
        });
        join_all(requests).await
    }

    /// First near-duplicate of each hash, `None` when there is none.
    pub async fn find_first_bulk(&self, hashes: &[u64]) -> Vec<(u64, ClusterResult<Option<u64>>)> {
        let queries = hashes.iter().enumerate().map(|(pos, hash)| (pos, *hash, *hash));
        let results = self
            .fan_out(
                "find_first",
                hashes.len(),
                queries,
                |handle, hashes| async move { handle.find_first(hashes).await },
                |first: Option<u64>, next| first.or(next),
                || Ok(None),
            )
            .await;
        hashes.iter().copied().zip(results).collect()
    }

    /// All near-duplicates of each hash.
    pub async fn find_all_bulk(&self, hashes: &[u64]) -> Vec<(u64, ClusterResult<Vec<u64>>)> {
        let queries = hashes.iter().enumerate().map(|(pos, hash)| (pos, *hash, *hash));
        let results = self
            .fan_out(
                "find_all",
                hashes.len(),
                queries,
                |handle, hashes| async move { handle.find_all(hashes).await },
                |mut all: Vec<u64>, more| {
                    all.extend(more);
                    all
                },
                || Ok(Vec::new()),
            )
            .await;
        hashes.iter().copied().zip(results).collect()
    }

    /// Stores each hash at every shard its routing keys fall into.
    pub async fn insert_bulk(&self, hashes: &[u64]) -> Vec<(u64, ClusterResult<()>)> {
        let results = self
            .fan_out(
                "insert",
                hashes.len(),
                self.expand(hashes),
                |handle, writes| async move { handle.insert(writes).await },
                |(), ()| (),
                || Ok(()),
            )
            .await;
        hashes.iter().copied().zip(results).collect()
    }

    /// Removes each hash from every shard its routing keys fall into.
    ///
    /// Yields whether any shard held the hash. Absence at some (or all)
    /// destinations is not an error.
    pub async fn remove_bulk(&self, hashes: &[u64]) -> Vec<(u64, ClusterResult<bool>)> {
        let results = self
            .fan_out(
                "remove",
                hashes.len(),
                self.expand(hashes),
                |handle, writes| async move { handle.remove(writes).await },
                |a: bool, b| a || b,
                || Ok(false),
            )
            .await;
        hashes.iter().copied().zip(results).collect()
    }

    /// First near-duplicate of a single hash.
    pub async fn find_first(&self, hash: u64) -> ClusterResult<Option<u64>> {
        let mut results = self.find_first_bulk(&[hash]).await;
        results.pop().map_or(Ok(None), |(_, result)| result)
    }

    /// All near-duplicates of a single hash.
    pub async fn find_all(&self, hash: u64) -> ClusterResult<Vec<u64>> {
        let mut results = self.find_all_bulk(&[hash]).await;
        results.pop().map_or(Ok(Vec::new()), |(_, result)| result)
    }

    /// Stores a single hash at the shards of all its routing keys.
    pub async fn insert(&self, hash: u64) -> ClusterResult<()> {
        let mut results = self.insert_bulk(&[hash]).await;
        results.pop().map_or(Ok(()), |(_, result)| result)
    }

    /// Removes a single hash, yielding whether any shard held it.
    pub async fn remove(&self, hash: u64) -> ClusterResult<bool> {
        let mut results = self.remove_bulk(&[hash]).await;
        results.pop().map_or(Ok(false), |(_, result)| result)
    }

    /// Writes addressed to every routing key of every hash.
    fn expand<'a>(&'a self, hashes: &'a [u64]) -> impl Iterator<Item = (usize, u64, RoutedHash)> + 'a {
        hashes.iter().enumerate().flat_map(move |(pos, &hash)| {
            self.space
                .routing_keys(hash)
                .map(move |key| (pos, key, RoutedHash { key, hash }))
        })
    }

    /// Dispatches one sub-request per destination worker, concurrently, and
    /// folds the answers back onto the queries.
    async fn fan_out<T, R, F, Fut>(
        &self,
        operation: &'static str,
        queries: usize,
        items: impl IntoIterator<Item = (usize, u64, T)>,
        send: F,
        combine: impl Fn(R, R) -> R,
        empty: impl Fn() -> ClusterResult<R>,
    ) -> Vec<ClusterResult<R>>
    where
        F: Fn(Arc<dyn WorkerHandle>, Vec<T>) -> Fut,
        Fut: Future<Output = Batch<R>>,
    {
        let dispatch = {
            let routing = self.routing.read();
            Dispatch::group(&routing.ranges, &routing.workers, items)
        };

        let mut fan_in = FanIn::new(queries);
        for (position, error) in dispatch.unrouted {
            fan_in.merge(position, Err(error), &combine);
        }

        let requests = dispatch.routes.into_iter().map(|route| {
            let Route {
                worker,
                handle,
                positions,
                items,
            } = route;
            let request = send(handle, items);
            async move {
                let batch = self.call(&worker, request).await;
                (worker, positions, batch)
            }
        });

        for (worker, positions, batch) in join_all(requests).await {
            match &batch {
                Ok(_) => debug!(%worker, operation, items = positions.len(), "finished sub-request"),
                Err(e) => warn!(%worker, operation, error = %e, "sub-request failed"),
            }
            fan_in.merge_batch(&worker, &positions, batch, &combine);
        }

        fan_in.finish(empty)
    }

    /// Awaits a worker request, bounded by the request timeout.
    async fn call<T>(
        &self,
        worker: &WorkerId,
        request: impl Future<Output = ClusterResult<T>>,
    ) -> ClusterResult<T> {
        let timeout = self.request_timeout();
        tokio::time::timeout(timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(ClusterError::Timeout {
                    worker: worker.to_string(),
                    timeout_ms: millis(timeout),
                })
            })
    }
}
