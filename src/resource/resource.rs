use tracing::trace;

use crate::error::{ReplicationError, ReplicationResult};
use crate::resource::delta::{Delta, Mutation, Record};
use crate::resource::update_log::UpdateLog;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResourceRole {
    /// owns the canonical state and is the only source of deltas
    Publisher,
    /// holds a replica that is kept in sync by applying deltas in order
    Subscriber,
}

/// A consistent copy of a resource's state, taken on the reactor
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceSnapshot {
    /// `None` for a replica that has not received its baseline yet
    pub seq: Option<u64>,
    pub records: Vec<Record>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum RemoteDeltaOutcome {
    Applied,
    /// the delta was already applied before - this is not an error
    Duplicate,
}

/// The named, replicated list. All mutation goes through the sequencing discipline here:
/// * a publisher's `seq` increases only through [Resource::apply_local_mutation]
/// * a subscriber's `seq` increases only through in-order [Resource::apply_remote_delta] or a
///    snapshot baseline
pub struct Resource {
    name: String,
    role: ResourceRole,
    records: Vec<Record>,
    seq: Option<u64>,
    /// only publishers keep a log - replicas never serve backfill
    log: Option<UpdateLog>,
}

impl Resource {
    pub fn publish(name: impl Into<String>, initial_snapshot: Vec<Record>, log_capacity: usize) -> Resource {
        Resource {
            name: name.into(),
            role: ResourceRole::Publisher,
            records: initial_snapshot,
            seq: Some(0),
            log: Some(UpdateLog::new(log_capacity)),
        }
    }

    /// creates an unsynchronized replica, waiting for its baseline
    pub fn new_replica(name: impl Into<String>) -> Resource {
        Resource {
            name: name.into(),
            role: ResourceRole::Subscriber,
            records: vec![],
            seq: None,
            log: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ResourceRole {
        self.role
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            seq: self.seq,
            records: self.records.clone(),
        }
    }

    fn require_role(&self, role: ResourceRole) -> ReplicationResult<()> {
        if self.role != role {
            return Err(ReplicationError::WrongRole {
                name: self.name.clone(),
                role: self.role,
            });
        }
        Ok(())
    }

    /// Returns the current snapshot and seq as the baseline for a newly subscribed link.
    pub fn subscribe(&self) -> ReplicationResult<(u64, &[Record])> {
        self.require_role(ResourceRole::Publisher)?;
        Ok((self.publisher_seq(), &self.records))
    }

    fn publisher_seq(&self) -> u64 {
        // a publisher is created at seq 0 and its seq is never reset
        self.seq.unwrap_or(0)
    }

    /// Applies a mutation originating locally, returning the delta and the seq it produced. An
    ///  invalid mutation leaves the resource untouched.
    pub fn apply_local_mutation(&mut self, mutation: &Mutation) -> ReplicationResult<(u64, Delta)> {
        self.require_role(ResourceRole::Publisher)?;

        let delta = mutation.to_delta(&self.records)?;
        delta.apply_to(&mut self.records)?;

        let seq = self.publisher_seq() + 1;
        self.seq = Some(seq);
        if let Some(log) = &mut self.log {
            if let Some(evicted) = log.append(seq, delta.clone()) {
                trace!("{:?}: evicted delta #{} from the update log", self.name, evicted);
            }
        }
        Ok((seq, delta))
    }

    /// Applies a delta received from the publisher. Duplicates are discarded, a gap is reported
    ///  as [ReplicationError::OutOfOrderUpdate] without touching the replica.
    pub fn apply_remote_delta(&mut self, delta: &Delta, delta_seq: u64) -> ReplicationResult<RemoteDeltaOutcome> {
        self.require_role(ResourceRole::Subscriber)?;

        match self.seq {
            Some(seq) if delta_seq <= seq => Ok(RemoteDeltaOutcome::Duplicate),
            Some(seq) if delta_seq == seq + 1 => {
                delta.apply_to(&mut self.records)?;
                self.seq = Some(delta_seq);
                Ok(RemoteDeltaOutcome::Applied)
            }
            expected => Err(ReplicationError::OutOfOrderUpdate {
                expected: expected.map(|seq| seq + 1),
                got: delta_seq,
            }),
        }
    }

    /// Replaces the replica's state with a full snapshot from the publisher.
    pub fn apply_snapshot(&mut self, seq: u64, records: Vec<Record>) -> ReplicationResult<()> {
        self.require_role(ResourceRole::Subscriber)?;

        self.records = records;
        self.seq = Some(seq);
        Ok(())
    }

    /// The ordered deltas strictly after `last_seq`, or [ReplicationError::SnapshotRequired] if
    ///  some of them are no longer retained.
    pub fn delta_since(&self, last_seq: u64) -> ReplicationResult<Vec<(u64, Delta)>> {
        self.require_role(ResourceRole::Publisher)?;

        match &self.log {
            Some(log) => log.since(last_seq, self.publisher_seq()),
            None => Err(ReplicationError::SnapshotRequired {
                requested: last_seq,
                oldest_retained: None,
            }),
        }
    }
}
