use {
    super::{Range, RangeIndex, ShardSpace},
    std::cmp::Reverse,
};

/// Shard ownership at a point in time, the input of rebalance planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<O> {
    /// Ranges no worker owns, in ascending order.
    pub unassigned: Vec<Range>,

    /// Ranges held by each worker (ascending), workers in registration order.
    pub held: Vec<(O, Vec<Range>)>,
}

impl<O: Copy + Eq> Snapshot<O> {
    /// Captures the ownership recorded in `index` for the given workers.
    ///
    /// Workers keep the order they are passed in; every worker appears, even
    /// if it holds nothing.
    pub fn capture(index: &RangeIndex<Option<O>>, workers: impl IntoIterator<Item = O>) -> Self {
        let mut held: Vec<(O, Vec<Range>)> =
            workers.into_iter().map(|worker| (worker, Vec::new())).collect();
        let mut unassigned = Vec::new();

        for (range, owner) in index.iter() {
            match owner {
                None => unassigned.push(range),
                Some(owner) => {
                    if let Some((_, ranges)) = held.iter_mut().find(|(w, _)| w == owner) {
                        ranges.push(range);
                    }
                }
            }
        }

        Self { unassigned, held }
    }
}

/// A single planned ownership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move<O> {
    pub range: Range,

    /// Current owner, which must unload the range before it moves.
    pub from: Option<O>,

    /// New owner; `None` leaves the range explicitly unassigned.
    pub to: Option<O>,
}

/// Deterministic shard reassignment plan.
///
/// Planning never touches workers: it is computed from a [`Snapshot`] alone,
/// and the coordinator applies the moves (unload, load, index update)
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalancePlan<O> {
    moves: Vec<Move<O>>,
}

impl<O: Copy + Eq> RebalancePlan<O> {
    /// Plans the shards a joining worker takes over.
    ///
    /// The worker is given `min(max_node_shards, shards / workers)` ranges,
    /// where `workers` counts it in. Unassigned ranges are taken first. Any
    /// shortfall is stolen from the existing workers holding the most ranges,
    /// each giving up at most what it holds above the target. Equal holdings
    /// are visited in registration order. If donors run out the worker simply
    /// gets fewer ranges.
    pub fn join(space: &ShardSpace, snapshot: &Snapshot<O>, joining: O) -> Self {
        let target = space.join_target(snapshot.held.len() + 1);
        let mut moves: Vec<_> = snapshot
            .unassigned
            .iter()
            .take(target)
            .map(|range| Move {
                range: *range,
                from: None,
                to: Some(joining),
            })
            .collect();

        if moves.len() < target {
            let mut donors: Vec<_> = snapshot.held.iter().collect();
            // Stable sort, ties keep registration order.
            donors.sort_by_key(|(_, ranges)| Reverse(ranges.len()));

            for (donor, ranges) in donors {
                let need = target - moves.len();
                if need == 0 {
                    break;
                }

                let count = ranges.len().saturating_sub(target).min(need);
                moves.extend(ranges[..count].iter().map(|range| Move {
                    range: *range,
                    from: Some(*donor),
                    to: Some(joining),
                }));
            }
        }

        Self { moves }
    }

    /// Plans redistribution of the ranges freed by a leaving worker.
    ///
    /// `snapshot` describes the surviving workers only; `freed` lists the
    /// leaver's ranges. Survivors are topped up in registration order to
    /// `min(max_node_shards, shards / survivors + 1)`. Whatever is left over
    /// is planned as unassigned rather than overloading anyone.
    pub fn leave(space: &ShardSpace, snapshot: &Snapshot<O>, freed: &[Range]) -> Self {
        let target = space.leave_target(snapshot.held.len());
        let mut freed = freed.iter().copied();
        let mut moves = Vec::with_capacity(freed.len());

        for (worker, ranges) in &snapshot.held {
            let room = target.saturating_sub(ranges.len());
            moves.extend(freed.by_ref().take(room).map(|range| Move {
                range,
                from: None,
                to: Some(*worker),
            }));
        }

        moves.extend(freed.map(|range| Move {
            range,
            from: None,
            to: None,
        }));

        Self { moves }
    }
}

impl<O> RebalancePlan<O> {
    /// Planned moves, in application order.
    pub fn moves(&self) -> &[Move<O>] {
        &self.moves
    }

    /// Number of planned moves.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

impl<O> IntoIterator for RebalancePlan<O> {
    type Item = Move<O>;
    type IntoIter = std::vec::IntoIter<Move<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.moves.into_iter()
    }
}

#[cfg(test)]
#[path = "rebalance_test.rs"]
mod tests;
