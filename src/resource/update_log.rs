use std::collections::VecDeque;

use crate::error::{ReplicationError, ReplicationResult};
use crate::resource::delta::Delta;

/// Bounded log of the most recent deltas of a resource, keyed by the sequence number each delta
///  produced. When the log is full, appending evicts the oldest delta.
///
/// Entries are contiguous: the log always holds the deltas `oldest_seq ..= newest_seq` without
///  gaps, which is what makes the backfill decision a simple range check.
pub struct UpdateLog {
    capacity: usize,
    entries: VecDeque<(u64, Delta)>,
}

impl UpdateLog {
    pub fn new(capacity: usize) -> UpdateLog {
        assert!(capacity > 0, "update log capacity must be positive");

        UpdateLog {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest_seq(&self) -> Option<u64> {
        self.entries.front().map(|(seq, _)| *seq)
    }

    pub fn newest_seq(&self) -> Option<u64> {
        self.entries.back().map(|(seq, _)| *seq)
    }

    /// appends the delta that produced `seq`, returning the evicted entry's seq (if any)
    pub fn append(&mut self, seq: u64, delta: Delta) -> Option<u64> {
        if let Some(newest) = self.newest_seq() {
            assert_eq!(seq, newest + 1, "update log entries must be contiguous");
        }

        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front().map(|(seq, _)| seq)
        }
        else {
            None
        };

        self.entries.push_back((seq, delta));
        evicted
    }

    /// Returns the ordered deltas strictly after `last_seq` up to and including `current_seq`.
    ///
    /// An empty result means the caller is up to date. If any delta in that range was evicted
    ///  (or never logged, e.g. for a baseline that was installed by a snapshot), the caller must
    ///  fall back to a full snapshot.
    pub fn since(&self, last_seq: u64, current_seq: u64) -> ReplicationResult<Vec<(u64, Delta)>> {
        if last_seq >= current_seq {
            return Ok(vec![]);
        }

        match (self.oldest_seq(), self.newest_seq()) {
            (Some(oldest), Some(newest)) if oldest <= last_seq + 1 && newest == current_seq => {
                Ok(self.entries.iter()
                    .filter(|(seq, _)| *seq > last_seq)
                    .cloned()
                    .collect())
            }
            (oldest, _) => Err(ReplicationError::SnapshotRequired {
                requested: last_seq,
                oldest_retained: oldest,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::resource::delta::ListChange;

    fn delta(n: u32) -> Delta {
        Delta::new(vec![ListChange::Delete { index: n }])
    }

    fn log_with(capacity: usize, seqs: std::ops::RangeInclusive<u64>) -> UpdateLog {
        let mut log = UpdateLog::new(capacity);
        for seq in seqs {
            log.append(seq, delta(seq as u32));
        }
        log
    }

    #[test]
    fn test_append_evicts_oldest() {
        let mut log = UpdateLog::new(3);
        assert_eq!(log.append(1, delta(1)), None);
        assert_eq!(log.append(2, delta(2)), None);
        assert_eq!(log.append(3, delta(3)), None);
        assert_eq!(log.append(4, delta(4)), Some(1));
        assert_eq!(log.len(), 3);
        assert_eq!(log.oldest_seq(), Some(2));
        assert_eq!(log.newest_seq(), Some(4));
    }

    #[test]
    #[should_panic]
    fn test_append_gap_panics() {
        let mut log = UpdateLog::new(3);
        log.append(1, delta(1));
        log.append(3, delta(3));
    }

    #[rstest]
    #[case::up_to_date(5, vec![])]
    #[case::one_behind(4, vec![5])]
    #[case::from_oldest_minus_one(1, vec![2, 3, 4, 5])]
    #[case::ahead(7, vec![])]
    fn test_since_retained(#[case] last_seq: u64, #[case] expected: Vec<u64>) {
        let log = log_with(10, 2..=5);
        let actual = log.since(last_seq, 5).unwrap()
            .into_iter()
            .map(|(seq, d)| {
                assert_eq!(d, delta(seq as u32));
                seq
            })
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case::evicted(0, 8..=10)]
    #[case::just_evicted(6, 8..=10)]
    fn test_since_evicted(#[case] last_seq: u64, #[case] retained: std::ops::RangeInclusive<u64>) {
        let log = log_with(3, 1..=10);
        assert_eq!(log.oldest_seq(), Some(*retained.start()));

        match log.since(last_seq, 10) {
            Err(ReplicationError::SnapshotRequired { requested, oldest_retained }) => {
                assert_eq!(requested, last_seq);
                assert_eq!(oldest_retained, Some(8));
            }
            other => panic!("expected SnapshotRequired, was {:?}", other),
        }
    }

    #[test]
    fn test_since_empty_log_behind() {
        let log = UpdateLog::new(3);
        assert!(matches!(log.since(0, 2), Err(ReplicationError::SnapshotRequired { oldest_retained: None, .. })));
    }

    #[test]
    fn test_since_boundary_just_retained() {
        let log = log_with(3, 1..=10);
        let deltas = log.since(7, 10).unwrap();
        assert_eq!(deltas.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![8, 9, 10]);
    }
}
