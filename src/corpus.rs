use {
    super::{ClusterError, ClusterResult, Range},
    auto_impl::auto_impl,
    rapidhash::RapidBuildHasher,
    std::collections::HashMap,
};

/// Near-duplicate index over the hashes stored in a single shard.
///
/// What counts as a match (Hamming distance threshold, table layout) is up to
/// the implementation; the cluster only routes hashes to it.
#[auto_impl(Box)]
pub trait Corpus: Send + Sync {
    /// Stores a hash. Storing a hash twice keeps a single copy.
    fn insert(&mut self, hash: u64);

    /// Removes a stored hash.
    ///
    /// Fails with [`ClusterError::HashNotFound`] if the hash is not stored.
    fn remove(&mut self, hash: u64) -> ClusterResult<()>;

    /// Returns any stored near-duplicate of `hash`.
    fn find_first(&self, hash: u64) -> Option<u64>;

    /// Returns all stored near-duplicates of `hash`.
    fn find_all(&self, hash: u64) -> Vec<u64>;

    /// Number of stored hashes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates a fresh corpus whenever a worker loads a shard.
#[auto_impl(&, Arc)]
pub trait CorpusFactory: Send + Sync {
    type Corpus: Corpus;

    /// Creates an empty corpus for the given shard range.
    fn create(&self, range: Range) -> Self::Corpus;
}

struct Table {
    /// Bits a hash and its candidates must agree on to share a bucket.
    mask: u64,
    buckets: HashMap<u64, Vec<u64>, RapidBuildHasher>,
}

/// Permuted-table simhash index.
///
/// The 64 bits of a hash are split into `blocks` contiguous blocks. If two
/// hashes are within `distance` bits of each other, at most `distance` blocks
/// differ, so they agree on at least `blocks - distance` blocks. One table is
/// kept per such combination of blocks, bucketed on the bits of those blocks;
/// a query only inspects its own bucket in every table and verifies the
/// candidates' Hamming distance.
pub struct SimhashCorpus {
    distance: u32,
    tables: Vec<Table>,
    len: usize,
}

impl SimhashCorpus {
    /// Creates an empty corpus matching hashes at most `distance` bits apart.
    pub fn new(blocks: u32, distance: u32) -> Self {
        let blocks = block_masks(blocks.clamp(1, 64));
        let keep = blocks.len().saturating_sub(distance as usize);
        let tables = combinations(&blocks, keep)
            .into_iter()
            .map(|mask| Table {
                mask,
                buckets: HashMap::default(),
            })
            .collect();

        Self {
            distance,
            tables,
            len: 0,
        }
    }

    /// Number of permuted tables kept.
    pub fn tables(&self) -> usize {
        self.tables.len()
    }

    /// Whether the exact hash is stored.
    pub fn contains(&self, hash: u64) -> bool {
        self.tables.first().is_some_and(|table| {
            table
                .buckets
                .get(&(hash & table.mask))
                .is_some_and(|bucket| bucket.contains(&hash))
        })
    }

    fn candidates(&self, hash: u64) -> impl Iterator<Item = u64> {
        self.tables
            .iter()
            .filter_map(move |table| table.buckets.get(&(hash & table.mask)))
            .flatten()
            .copied()
            .filter(move |candidate| (candidate ^ hash).count_ones() <= self.distance)
    }
}

impl Default for SimhashCorpus {
    fn default() -> Self {
        Self::new(6, 3)
    }
}

impl Corpus for SimhashCorpus {
    fn insert(&mut self, hash: u64) {
        if self.contains(hash) {
            return;
        }
        for table in &mut self.tables {
            table
                .buckets
                .entry(hash & table.mask)
                .or_default()
                .push(hash);
        }
        self.len += 1;
    }

    fn remove(&mut self, hash: u64) -> ClusterResult<()> {
        if !self.contains(hash) {
            return Err(ClusterError::HashNotFound { hash });
        }
        for table in &mut self.tables {
            let key = hash & table.mask;
            if let Some(bucket) = table.buckets.get_mut(&key) {
                bucket.retain(|stored| *stored != hash);
                if bucket.is_empty() {
                    table.buckets.remove(&key);
                }
            }
        }
        self.len -= 1;
        Ok(())
    }

    fn find_first(&self, hash: u64) -> Option<u64> {
        self.candidates(hash).next()
    }

    fn find_all(&self, hash: u64) -> Vec<u64> {
        let mut matches: Vec<_> = self.candidates(hash).collect();
        matches.sort_unstable();
        matches.dedup();
        matches
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Builds [`SimhashCorpus`] instances with fixed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimhashCorpusFactory {
    pub blocks: u32,
    pub distance: u32,
}

impl Default for SimhashCorpusFactory {
    fn default() -> Self {
        Self {
            blocks: 6,
            distance: 3,
        }
    }
}

impl CorpusFactory for SimhashCorpusFactory {
    type Corpus = SimhashCorpus;

    fn create(&self, _range: Range) -> SimhashCorpus {
        SimhashCorpus::new(self.blocks, self.distance)
    }
}

/// Splits 64 bits into `blocks` contiguous masks, high bits first. Leading
/// blocks absorb the remainder when 64 is not divisible.
fn block_masks(blocks: u32) -> Vec<u64> {
    let (width, extra) = (64 / blocks, 64 % blocks);
    let mut offset = 64;
    (0..blocks)
        .map(|i| {
            let width = width + u32::from(i < extra);
            offset -= width;
            (((1u128 << width) - 1) << offset) as u64
        })
        .collect()
}

/// Unions of every `k`-sized combination of masks.
fn combinations(masks: &[u64], k: usize) -> Vec<u64> {
    if k == 0 {
        return vec![0];
    }
    let Some((first, rest)) = masks.split_first() else {
        return Vec::new();
    };

    let mut unions: Vec<_> = combinations(rest, k - 1)
        .into_iter()
        .map(|mask| mask | first)
        .collect();
    unions.extend(combinations(rest, k));
    unions
}
