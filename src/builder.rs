use {
    super::{ClusterOptions, ClusterResult, Coordinator, CoordinatorConfig, OptionMap},
    std::time::Duration,
};

/// Coordinator builder.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    options: OptionMap,
}

impl CoordinatorBuilder {
    /// Create new coordinator builder, with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of shards the hash space is divided into.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.config = self.config.with_shards(shards);
        self
    }

    /// Set the maximum number of shards a single worker may hold.
    pub fn with_max_node_shards(mut self, max_node_shards: usize) -> Self {
        self.config = self.config.with_max_node_shards(max_node_shards);
        self
    }

    /// Set the number of high-order bits flipped when fanning out writes.
    pub fn with_differing_bits(mut self, differing_bits: u32) -> Self {
        self.config = self.config.with_differing_bits(differing_bits);
        self
    }

    /// Set the default timeout of worker requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Set the initial cluster options, pushed to every joining worker.
    pub fn with_options(mut self, options: OptionMap) -> Self {
        self.options = options;
        self
    }

    /// Build the coordinator.
    ///
    /// Fails if the shard space parameters or the options are invalid.
    pub fn build(self) -> ClusterResult<Coordinator> {
        let options = ClusterOptions::from_map(&self.options)?;
        Coordinator::with_options(self.config, options)
    }
}
