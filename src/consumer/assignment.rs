//! Partition assignment state
//!
//! Tracks the partitions this consumer owns and the next offset to read from
//! each. Rebalances replace the whole set; freshness resync moves positions
//! forward toward the high-water mark and never backwards.

use std::collections::BTreeMap;

use crate::broker::{PartitionOffset, TopicPartition, Watermarks};

/// Owned partitions and their read positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// `None` while the broker has not told us where reading starts
    positions: BTreeMap<TopicPartition, Option<i64>>,
}

/// Planned move of one partition's read position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reposition {
    pub tp: TopicPartition,
    /// Position before the move, if known
    pub from: Option<i64>,
    pub to: i64,
}

impl Reposition {
    /// Records jumped over by this move
    pub fn skipped(&self) -> u64 {
        self.from.map_or(0, |from| (self.to - from).max(0) as u64)
    }
}

/// Offset the consumer should read from to stay within `lookback` records
/// of the high-water mark
pub fn resync_target(watermarks: Watermarks, lookback: u32) -> i64 {
    watermarks
        .high
        .saturating_sub(i64::from(lookback))
        .max(watermarks.low)
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the owned set with the broker's assignment
    pub fn assign(&mut self, partitions: &[PartitionOffset]) {
        self.positions = partitions
            .iter()
            .map(|p| (p.tp.clone(), p.offset.filter(|o| *o >= 0)))
            .collect();
    }

    /// Drop every owned partition
    pub fn revoke(&mut self) {
        self.positions.clear();
    }

    pub fn owns(&self, tp: &TopicPartition) -> bool {
        self.positions.contains_key(tp)
    }

    /// Next offset to read, if known
    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.positions.get(tp).copied().flatten()
    }

    /// Record that `offset` was delivered from `tp`
    ///
    /// Ignored for partitions not owned.
    pub fn delivered(&mut self, tp: &TopicPartition, offset: i64) {
        if let Some(position) = self.positions.get_mut(tp) {
            let next = offset + 1;
            if position.map_or(true, |p| next > p) {
                *position = Some(next);
            }
        }
    }

    /// Owned partitions in order
    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.positions.keys()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Decide whether `tp` must move given its current watermarks
    ///
    /// Moves only if the position is unknown or behind the target.
    pub fn plan(
        &self,
        tp: &TopicPartition,
        watermarks: Watermarks,
        lookback: u32,
    ) -> Option<Reposition> {
        let current = *self.positions.get(tp)?;
        let target = resync_target(watermarks, lookback);

        match current {
            Some(position) if position >= target => None,
            from => Some(Reposition {
                tp: tp.clone(),
                from,
                to: target,
            }),
        }
    }

    /// Apply a planned move
    pub fn apply(&mut self, reposition: &Reposition) {
        if let Some(position) = self.positions.get_mut(&reposition.tp) {
            *position = Some(match *position {
                Some(current) => current.max(reposition.to),
                None => reposition.to,
            });
        }
    }

    /// The owned set as the broker expects it for `assign`
    pub fn to_partition_offsets(&self) -> Vec<PartitionOffset> {
        self.positions
            .iter()
            .map(|(tp, offset)| PartitionOffset::new(tp.clone(), *offset))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("frames", partition)
    }

    fn wm(low: i64, high: i64) -> Watermarks {
        Watermarks { low, high }
    }

    #[test]
    fn test_resync_target() {
        assert_eq!(resync_target(wm(0, 100), 1), 99);
        assert_eq!(resync_target(wm(0, 100), 0), 100);
        // Never below the oldest retained record
        assert_eq!(resync_target(wm(95, 100), 10), 95);
        // Empty partition
        assert_eq!(resync_target(wm(0, 0), 1), 0);
    }

    #[test]
    fn test_unknown_position_always_moves() {
        let mut assignment = Assignment::new();
        assignment.assign(&[PartitionOffset::new(tp(0), None)]);

        let plan = assignment.plan(&tp(0), wm(0, 10), 1).unwrap();
        assert_eq!(plan.from, None);
        assert_eq!(plan.to, 9);
        assert_eq!(plan.skipped(), 0);

        assignment.apply(&plan);
        assert_eq!(assignment.position(&tp(0)), Some(9));
    }

    #[test]
    fn test_lagging_position_moves_forward() {
        let mut assignment = Assignment::new();
        assignment.assign(&[PartitionOffset::new(tp(0), Some(3))]);

        let plan = assignment.plan(&tp(0), wm(0, 50), 2).unwrap();
        assert_eq!(plan.to, 48);
        assert_eq!(plan.skipped(), 45);
    }

    #[test]
    fn test_fresh_position_is_kept() {
        let mut assignment = Assignment::new();
        assignment.assign(&[PartitionOffset::new(tp(0), Some(10))]);

        // Already at the live edge
        assert_eq!(assignment.plan(&tp(0), wm(0, 10), 1), None);
        // Within the lookback window
        assert_eq!(assignment.plan(&tp(0), wm(0, 11), 1), None);
    }

    #[test]
    fn test_apply_never_moves_backwards() {
        let mut assignment = Assignment::new();
        assignment.assign(&[PartitionOffset::new(tp(0), Some(20))]);

        assignment.apply(&Reposition {
            tp: tp(0),
            from: Some(20),
            to: 5,
        });
        assert_eq!(assignment.position(&tp(0)), Some(20));
    }

    #[test]
    fn test_delivered_advances_owned_only() {
        let mut assignment = Assignment::new();
        assignment.assign(&[PartitionOffset::new(tp(0), Some(0))]);

        assignment.delivered(&tp(0), 4);
        assignment.delivered(&tp(1), 9);

        assert_eq!(assignment.position(&tp(0)), Some(5));
        assert!(!assignment.owns(&tp(1)));
    }

    #[test]
    fn test_revoke_drops_positions() {
        let mut assignment = Assignment::new();
        assignment.assign(&[
            PartitionOffset::new(tp(0), Some(1)),
            PartitionOffset::new(tp(1), Some(2)),
        ]);
        assert_eq!(assignment.len(), 2);

        assignment.revoke();
        assert!(assignment.is_empty());
        assert_eq!(assignment.plan(&tp(0), wm(0, 10), 1), None);
        assert!(assignment.to_partition_offsets().is_empty());
    }

    #[test]
    fn test_negative_offsets_are_unknown() {
        let mut assignment = Assignment::new();
        assignment.assign(&[PartitionOffset::new(tp(0), Some(-1001))]);

        assert!(assignment.owns(&tp(0)));
        assert_eq!(assignment.position(&tp(0)), None);
    }
}
