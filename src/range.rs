use {
    super::{ClusterError, ClusterResult},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A closed interval of the hash space.
///
/// Range bounded inclusively on both sides i.e. `[start..=end]`, so a key
/// equal to `end` belongs to this range and never to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    /// Create a new range from the given inclusive bounds.
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Check if the given key is in the range.
    pub fn contains(&self, key: u64) -> bool {
        key >= self.start && key <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#018x}, {:#018x}]", self.start, self.end)
    }
}

struct Entry<T> {
    range: Range,
    value: T,
}

/// Ordered map of non-overlapping ranges to values.
///
/// Entries are keyed by their start and kept sorted, so point lookups are a
/// binary search. Insertion and removal shift the backing vector and are
/// linear, which is fine: the index is mutated only when shards move.
///
/// Ranges held by one index are expected not to overlap. This is not checked
/// here; callers own that invariant.
pub struct RangeIndex<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for RangeIndex<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> RangeIndex<T> {
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value responsible for the given range.
    ///
    /// An existing entry with the same start is replaced (last write wins),
    /// and its value is returned.
    pub fn insert(&mut self, range: Range, value: T) -> Option<T> {
        match self.position(range.start) {
            Ok(idx) => {
                let entry = &mut self.entries[idx];
                entry.range = range;
                Some(std::mem::replace(&mut entry.value, value))
            }
            Err(idx) => {
                self.entries.insert(idx, Entry { range, value });
                None
            }
        }
    }

    /// Removes and returns the value stored for exactly the given range.
    ///
    /// Fails with [`ClusterError::RangeMismatch`] if nothing starts at
    /// `range.start`, or if the stored end differs. The index is left
    /// untouched on failure.
    pub fn remove(&mut self, range: Range) -> ClusterResult<T> {
        let idx = self
            .position(range.start)
            .map_err(|_| ClusterError::RangeMismatch {
                start: range.start,
                end: range.end,
                found: None,
            })?;

        let stored = self.entries[idx].range;
        if stored.end != range.end {
            return Err(ClusterError::RangeMismatch {
                start: range.start,
                end: range.end,
                found: Some(stored.end),
            });
        }

        Ok(self.entries.remove(idx).value)
    }

    /// Returns the value responsible for the range containing `key`.
    pub fn find(&self, key: u64) -> Option<&T> {
        self.find_entry(key).map(|(_, value)| value)
    }

    /// Returns the range containing `key` together with its value.
    pub fn find_entry(&self, key: u64) -> Option<(Range, &T)> {
        // Number of entries starting at or before the key; the candidate is
        // the last of them.
        let idx = self.entries.partition_point(|e| e.range.start <= key);
        let entry = self.entries.get(idx.checked_sub(1)?)?;
        entry
            .range
            .contains(key)
            .then_some((entry.range, &entry.value))
    }

    /// Returns the value stored for exactly the given range.
    pub fn get(&self, range: Range) -> Option<&T> {
        let entry = &self.entries[self.position(range.start).ok()?];
        (entry.range == range).then_some(&entry.value)
    }

    /// Iterator over `(range, value)` pairs in ascending range order.
    pub fn iter(&self) -> impl Iterator<Item = (Range, &T)> {
        self.entries.iter().map(|e| (e.range, &e.value))
    }

    /// Iterator over the ranges, in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = Range> {
        self.entries.iter().map(|e| e.range)
    }

    /// Number of ranges in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, start: u64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&start, |e| e.range.start)
    }
}

impl<T> FromIterator<(Range, T)> for RangeIndex<T> {
    fn from_iter<I: IntoIterator<Item = (Range, T)>>(iter: I) -> Self {
        let mut index = Self::new();
        for (range, value) in iter {
            index.insert(range, value);
        }
        index
    }
}
