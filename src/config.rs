//! Coordinator settings and the option map propagated to workers.

use {
    super::{ClusterError, ClusterResult, ShardSpace},
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, time::Duration},
};

/// Option map as it arrives from a transport adapter.
pub type OptionMap = BTreeMap<String, serde_json::Value>;

/// Configuration of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of equal-width shards the hash space is divided into.
    pub shards: usize,
    /// Maximum number of shards a single worker may hold.
    pub max_node_shards: usize,
    /// High-order bits flipped when fanning out writes.
    pub differing_bits: u32,
    /// Timeout for a single worker sub-request, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shards: 1024,
            max_node_shards: 256,
            differing_bits: 3,
            request_timeout_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    /// Set the number of shards.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the per-worker shard cap.
    pub fn with_max_node_shards(mut self, max_node_shards: usize) -> Self {
        self.max_node_shards = max_node_shards;
        self
    }

    /// Set the differing bits width.
    pub fn with_differing_bits(mut self, differing_bits: u32) -> Self {
        self.differing_bits = differing_bits;
        self
    }

    /// Set the sub-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    /// Sub-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Shard space described by this configuration.
    pub fn space(&self) -> ClusterResult<ShardSpace> {
        ShardSpace::new(self.shards, self.max_node_shards, self.differing_bits)
    }
}

/// Cluster-wide options, pushed from the coordinator to every worker.
///
/// Unset options leave the receiver's defaults in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterOptions {
    /// Port the node's transport adapter listens on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Sub-request timeout applied by the coordinator, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl ClusterOptions {
    /// Recognized option keys.
    pub const KEYS: &'static [&'static str] = &["port", "request_timeout_ms"];

    /// Validates and decodes an option map.
    ///
    /// Unknown keys and ill-typed values are rejected as a whole: either every
    /// option decodes or an error is returned. A `null` value unsets the
    /// option.
    pub fn from_map(map: &OptionMap) -> ClusterResult<Self> {
        if let Some(key) = map.keys().find(|key| !Self::KEYS.contains(&key.as_str())) {
            return Err(ClusterError::UnknownOption(key.clone()));
        }

        let options: Self = serde_json::from_value(object(map)).map_err(|e| {
            // Attribute the failure to the first option that fails on its own.
            let key = map
                .iter()
                .find(|(key, value)| {
                    let single = OptionMap::from([((*key).clone(), (*value).clone())]);
                    serde_json::from_value::<Self>(object(&single)).is_err()
                })
                .map_or_else(String::new, |(key, _)| key.clone());
            ClusterError::InvalidOption {
                key,
                reason: e.to_string(),
            }
        })?;

        if options.request_timeout_ms == Some(0) {
            return Err(ClusterError::InvalidOption {
                key: "request_timeout_ms".into(),
                reason: "timeout must be positive".into(),
            });
        }
        Ok(options)
    }

    /// Encodes the options back into a map, skipping unset ones.
    pub fn to_map(&self) -> OptionMap {
        let mut map = OptionMap::new();
        if let Some(port) = self.port {
            map.insert("port".into(), port.into());
        }
        if let Some(timeout) = self.request_timeout_ms {
            map.insert("request_timeout_ms".into(), timeout.into());
        }
        map
    }
}

/// Whole milliseconds in `duration`, rounding a non-zero sub-millisecond
/// remainder up and saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    u64::try_from(nanos.div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn object(map: &OptionMap) -> serde_json::Value {
    serde_json::Value::Object(map.clone().into_iter().collect())
}
