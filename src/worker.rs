use {
    super::{
        Batch,
        ClusterError,
        ClusterOptions,
        ClusterResult,
        Corpus,
        CorpusFactory,
        Range,
        RangeIndex,
        RoutedHash,
        SimhashCorpusFactory,
        WorkerHandle,
        WorkerId,
        WorkerStats,
    },
    async_trait::async_trait,
    parking_lot::RwLock,
    std::sync::Arc,
    tracing::{debug, info},
};

type Shard<C> = Arc<RwLock<C>>;

/// Node hosting a set of shards.
///
/// Each loaded range is backed by its own near-duplicate index, created by
/// the worker's [`CorpusFactory`]. Keys are resolved to shards through a
/// local [`RangeIndex`]; a key outside every loaded range is reported as
/// [`ClusterError::NoSuchShard`], which is expected while shards move.
pub struct Worker<F: CorpusFactory = SimhashCorpusFactory> {
    id: WorkerId,
    factory: F,
    shards: RwLock<RangeIndex<Shard<F::Corpus>>>,
    options: RwLock<ClusterOptions>,
}

impl Worker {
    /// Creates a worker backed by default simhash corpora.
    pub fn new(id: impl Into<WorkerId>) -> Self {
        Self::with_factory(id, SimhashCorpusFactory::default())
    }
}

impl<F: CorpusFactory> Worker<F> {
    /// Creates a worker building its shard indexes with `factory`.
    pub fn with_factory(id: impl Into<WorkerId>, factory: F) -> Self {
        Self {
            id: id.into(),
            factory,
            shards: RwLock::new(RangeIndex::new()),
            options: RwLock::new(ClusterOptions::default()),
        }
    }

    /// Identity of the worker.
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Loads and starts serving a range, with an empty index.
    ///
    /// Loading a range overlapping an already loaded one is a caller error and
    /// is not checked; loading the same start again replaces the shard.
    pub fn load(&self, range: Range) {
        info!(worker = %self.id, %range, "loading range");
        let shard = Arc::new(RwLock::new(self.factory.create(range)));
        self.shards.write().insert(range, shard);
    }

    /// Stops serving the range, discarding its index.
    pub fn unload(&self, range: Range) -> ClusterResult<()> {
        info!(worker = %self.id, %range, "unloading range");
        self.shards.write().remove(range).map(drop)
    }

    /// Finds the shard responsible for the given key.
    pub fn find(&self, key: u64) -> ClusterResult<Shard<F::Corpus>> {
        self.shards
            .read()
            .find(key)
            .cloned()
            .ok_or(ClusterError::NoSuchShard { key })
    }

    /// First near-duplicate of each hash.
    pub fn find_first(&self, hashes: &[u64]) -> Vec<ClusterResult<Option<u64>>> {
        hashes
            .iter()
            .map(|hash| {
                let shard = self.find(*hash)?;
                let found = shard.read().find_first(*hash);
                Ok(found)
            })
            .collect()
    }

    /// All near-duplicates of each hash.
    pub fn find_all(&self, hashes: &[u64]) -> Vec<ClusterResult<Vec<u64>>> {
        hashes
            .iter()
            .map(|hash| {
                let shard = self.find(*hash)?;
                let found = shard.read().find_all(*hash);
                Ok(found)
            })
            .collect()
    }

    /// Inserts each hash into the shard owning its routing key.
    pub fn insert(&self, writes: &[RoutedHash]) -> Vec<ClusterResult<()>> {
        writes
            .iter()
            .map(|write| {
                self.find(write.key)?.write().insert(write.hash);
                Ok(())
            })
            .collect()
    }

    /// Removes each hash from the shard owning its routing key.
    ///
    /// A hash missing from its shard yields `Ok(false)`.
    pub fn remove(&self, writes: &[RoutedHash]) -> Vec<ClusterResult<bool>> {
        writes
            .iter()
            .map(|write| {
                let shard = self.find(write.key)?;
                let removed = shard.write().remove(write.hash);
                match removed {
                    Ok(()) => Ok(true),
                    Err(ClusterError::HashNotFound { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .collect()
    }

    /// Stores options pushed by the coordinator.
    pub fn set_options(&self, options: ClusterOptions) {
        debug!(worker = %self.id, ?options, "updating options");
        *self.options.write() = options;
    }

    /// Options last pushed by the coordinator.
    pub fn options(&self) -> ClusterOptions {
        self.options.read().clone()
    }

    /// Currently loaded ranges, in ascending order.
    pub fn ranges(&self) -> Vec<Range> {
        self.shards.read().ranges().collect()
    }

    /// Loaded range count and stored hash count.
    pub fn stats(&self) -> WorkerStats {
        let shards = self.shards.read();
        WorkerStats {
            worker: self.id.clone(),
            ranges: shards.len(),
            hashes: shards.iter().map(|(_, shard)| shard.read().len()).sum(),
        }
    }
}

#[async_trait]
impl<F: CorpusFactory> WorkerHandle for Worker<F> {
    async fn load(&self, range: Range) -> ClusterResult<()> {
        Worker::load(self, range);
        Ok(())
    }

    async fn unload(&self, range: Range) -> ClusterResult<()> {
        Worker::unload(self, range)
    }

    async fn config(&self, options: ClusterOptions) -> ClusterResult<()> {
        self.set_options(options);
        Ok(())
    }

    async fn stats(&self) -> ClusterResult<WorkerStats> {
        Ok(Worker::stats(self))
    }

    async fn find_first(&self, hashes: Vec<u64>) -> Batch<Option<u64>> {
        Ok(Worker::find_first(self, &hashes))
    }

    async fn find_all(&self, hashes: Vec<u64>) -> Batch<Vec<u64>> {
        Ok(Worker::find_all(self, &hashes))
    }

    async fn insert(&self, writes: Vec<RoutedHash>) -> Batch<()> {
        Ok(Worker::insert(self, &writes))
    }

    async fn remove(&self, writes: Vec<RoutedHash>) -> Batch<bool> {
        Ok(Worker::remove(self, &writes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed(key: u64, hash: u64) -> RoutedHash {
        RoutedHash { key, hash }
    }

    #[test]
    fn load_unload() {
        let worker = Worker::new("worker-0");
        let low = Range::new(0, 99);
        let high = Range::new(100, 199);
        worker.load(low);
        worker.load(high);
        assert_eq!(worker.ranges(), vec![low, high]);
        assert!(worker.find(150).is_ok());

        assert_eq!(
            worker.unload(Range::new(100, 150)),
            Err(ClusterError::RangeMismatch {
                start: 100,
                end: 150,
                found: Some(199),
            })
        );
        assert_eq!(worker.unload(high), Ok(()));
        assert!(matches!(
            worker.find(150),
            Err(ClusterError::NoSuchShard { key: 150 })
        ));
        assert!(worker.unload(high).is_err());
        assert_eq!(worker.ranges(), vec![low]);
    }

    #[test]
    fn shard_operations() {
        let worker = Worker::new("worker-0");
        worker.load(Range::new(0, 1 << 32));

        // Routed on `key`, stored as `hash`.
        let results = worker.insert(&[routed(5, 0b1010), routed(u64::MAX, 0b1010)]);
        assert_eq!(results[0], Ok(()));
        assert_eq!(results[1], Err(ClusterError::NoSuchShard { key: u64::MAX }));

        assert_eq!(
            worker.find_first(&[0b1011, 1 << 40]),
            vec![Ok(Some(0b1010)), Err(ClusterError::NoSuchShard { key: 1 << 40 })]
        );
        assert_eq!(worker.find_all(&[0b1000]), vec![Ok(vec![0b1010])]);
        assert_eq!(worker.find_first(&[0xFFFF]), vec![Ok(None)]);

        let stats = worker.stats();
        assert_eq!(stats.worker.as_str(), "worker-0");
        assert_eq!((stats.ranges, stats.hashes), (1, 1));

        assert_eq!(
            worker.remove(&[routed(7, 0b1010), routed(7, 0b1010)]),
            vec![Ok(true), Ok(false)]
        );
        assert_eq!(worker.find_first(&[0b1011]), vec![Ok(None)]);
        assert_eq!(worker.stats().hashes, 0);
    }

    #[test]
    fn reload_discards_contents() {
        let worker = Worker::new("worker-0");
        let range = Range::new(0, u64::MAX);
        worker.load(range);
        worker.insert(&[routed(1, 1)]);
        worker.unload(range).unwrap();
        worker.load(range);
        assert_eq!(worker.find_first(&[1]), vec![Ok(None)]);
    }

    #[tokio::test]
    async fn as_handle() {
        let worker: Arc<dyn WorkerHandle> = Arc::new(Worker::new("worker-0"));
        let range = Range::new(0, u64::MAX);
        worker.load(range).await.unwrap();
        worker.insert(vec![routed(3, 3)]).await.unwrap();
        assert_eq!(worker.find_all(vec![2]).await, Ok(vec![Ok(vec![3])]));

        let options = ClusterOptions {
            port: Some(1234),
            ..Default::default()
        };
        worker.config(options.clone()).await.unwrap();
        assert_eq!(worker.stats().await.unwrap().hashes, 1);
        worker.unload(range).await.unwrap();
        assert_eq!(worker.stats().await.unwrap().ranges, 0);
    }
}
