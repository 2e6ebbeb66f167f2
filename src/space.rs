use super::{ClusterError, ClusterResult, Range};

/// Upper bound on the differing bits width, keeping the per-hash fan-out at
/// most 65536 routing keys.
pub const MAX_DIFFERING_BITS: u32 = 16;

/// Fixed partition of the 64-bit hash space.
///
/// The space `[0, 2^64 - 1]` is uniformly divided into `shards` contiguous
/// ranges. Together with the placement policy (how many shards a single
/// worker may hold) and the routing fan-out width, this describes everything
/// the coordinator needs to know about the space. Shard count is fixed for the
/// lifetime of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpace {
    shards: usize,
    max_node_shards: usize,
    differing_bits: u32,
}

impl ShardSpace {
    /// Creates a new shard space, validating its parameters.
    pub fn new(shards: usize, max_node_shards: usize, differing_bits: u32) -> ClusterResult<Self> {
        if shards == 0 {
            return Err(ClusterError::InvalidSpace("shard count must be positive".into()));
        }
        if max_node_shards == 0 {
            return Err(ClusterError::InvalidSpace(
                "max shards per node must be positive".into(),
            ));
        }
        if differing_bits > MAX_DIFFERING_BITS {
            return Err(ClusterError::InvalidSpace(format!(
                "differing bits {differing_bits} exceeds {MAX_DIFFERING_BITS}"
            )));
        }

        Ok(Self {
            shards,
            max_node_shards,
            differing_bits,
        })
    }

    /// Number of shards the space is divided into.
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Maximum number of shards a single worker may hold.
    pub fn max_node_shards(&self) -> usize {
        self.max_node_shards
    }

    /// Number of high-order bits flipped when routing writes.
    pub fn differing_bits(&self) -> u32 {
        self.differing_bits
    }

    /// Returns the range of the shard at the given index.
    ///
    /// `start_i = i * 2^64 / shards`, `end_i = (i + 1) * 2^64 / shards - 1`,
    /// computed in 128-bit arithmetic so the last shard ends at `u64::MAX`.
    pub fn range(&self, idx: usize) -> Range {
        debug_assert!(idx < self.shards);
        let bound = |i: usize| (i as u128) * (1u128 << 64) / self.shards as u128;
        Range::new(bound(idx) as u64, (bound(idx + 1) - 1) as u64)
    }

    /// Iterator over all shard ranges, in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = Range> {
        let space = *self;
        (0..space.shards).map(move |idx| space.range(idx))
    }

    /// Routing keys a stored hash is fanned out to.
    ///
    /// Flips the top `differing_bits` bits of `hash` through every possible
    /// combination, so a near-duplicate that differs from `hash` only in those
    /// bits routes to a shard holding a copy. The first key is always `hash`
    /// itself.
    pub fn routing_keys(&self, hash: u64) -> impl Iterator<Item = u64> {
        let bits = self.differing_bits;
        // With zero differing bits the shift would be 64; only `hash` remains.
        (0..1u64 << bits).map(move |i| hash ^ i.checked_shl(64 - bits).unwrap_or(0))
    }

    /// Number of shards a newly joining worker should hold, given the number
    /// of workers in the cluster once it has joined.
    pub fn join_target(&self, workers: usize) -> usize {
        self.max_node_shards.min(self.shards / workers.max(1))
    }

    /// Number of shards each surviving worker is topped up to when another
    /// worker leaves.
    ///
    /// Rounds the fair share up by one, so the freed shards are absorbed
    /// before any are left unassigned.
    pub fn leave_target(&self, survivors: usize) -> usize {
        if survivors == 0 {
            return 0;
        }
        self.max_node_shards.min(self.shards / survivors + 1)
    }
}

impl Default for ShardSpace {
    fn default() -> Self {
        Self {
            shards: 1024,
            max_node_shards: 256,
            differing_bits: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashSet};

    #[test]
    fn ranges_cover_space() {
        for shards in [1, 3, 7, 1024] {
            let space = ShardSpace::new(shards, 1, 3).unwrap();
            let ranges: Vec<_> = space.ranges().collect();
            assert_eq!(ranges.len(), shards);
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges[shards - 1].end, u64::MAX);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end + 1, pair[1].start, "gap or overlap");
            }
        }
    }

    #[test]
    fn equal_width_shards() {
        let space = ShardSpace::default();
        assert_eq!(space.range(0), Range::new(0, (1 << 54) - 1));
        assert_eq!(space.range(1), Range::new(1 << 54, (2 << 54) - 1));
        assert_eq!(space.range(1023), Range::new(1023 << 54, u64::MAX));
    }

    #[test]
    fn routing_keys_flip_high_bits() {
        let space = ShardSpace::default();
        let hash = 0b1010_1010_1010;
        let keys: Vec<_> = space.routing_keys(hash).collect();

        assert_eq!(keys.len(), 8);
        assert_eq!(keys[0], hash);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 8);
        for key in &keys {
            // Only the top three bits may differ.
            assert_eq!(key << 3, hash << 3);
        }
        assert!(keys.contains(&(hash | 0b111 << 61)));
    }

    #[test]
    fn routing_keys_without_differing_bits() {
        let space = ShardSpace::new(16, 16, 0).unwrap();
        let keys: Vec<_> = space.routing_keys(42).collect();
        assert_eq!(keys, vec![42]);
    }

    #[test]
    fn targets() {
        let space = ShardSpace::default();
        assert_eq!(space.join_target(1), 256);
        assert_eq!(space.join_target(4), 256);
        assert_eq!(space.join_target(8), 128);
        assert_eq!(space.leave_target(0), 0);
        assert_eq!(space.leave_target(3), 256);
        assert_eq!(space.leave_target(8), 129);
    }

    #[test]
    fn invalid_parameters() {
        assert!(matches!(
            ShardSpace::new(0, 1, 3),
            Err(ClusterError::InvalidSpace(_))
        ));
        assert!(matches!(
            ShardSpace::new(8, 0, 3),
            Err(ClusterError::InvalidSpace(_))
        ));
        assert!(matches!(
            ShardSpace::new(8, 8, MAX_DIFFERING_BITS + 1),
            Err(ClusterError::InvalidSpace(_))
        ));
    }
}
