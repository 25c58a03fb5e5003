use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::connection::connection::ConnectionId;
use crate::error::{ReplicationError, ReplicationResult};
use crate::resource::delta::{Delta, Record};
use crate::resource::resource::{RemoteDeltaOutcome, Resource};
use crate::resource::ResourceId;

/// which side of the replication this peer is on for a given link
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LinkRole {
    /// this peer owns the resource and sends deltas over the link
    Publisher,
    /// this peer holds a replica and receives deltas over the link
    Subscriber,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LinkState {
    Subscribing,
    Synchronized,
    Resyncing,
    Closed,
}

/// What a publisher-side link has to send so the other end mirrors the resource
#[derive(Debug, Eq, PartialEq)]
pub enum CatchUp {
    UpToDate,
    Deltas(Vec<(u64, Delta)>),
    Snapshot {
        seq: u64,
        records: Vec<Record>,
    },
}

/// Result of feeding a received delta through a subscriber-side link
#[derive(Debug, Eq, PartialEq)]
pub enum DeltaReceipt {
    Applied,
    Duplicate,
    /// a gap was detected: ask the publisher for everything after `known_seq` (or a snapshot)
    ResyncRequested {
        known_seq: Option<u64>,
    },
    /// out-of-order delta while a baseline or backfill is pending - the pending answer supersedes it
    Dropped,
}

/// Synchronization state of one resource on one connection.
///
/// `ack_seq` is the last seq this peer believes to be mirrored on the other end. It is
///  optimistically advanced when deltas are handed to the connection: ordering is enforced by
///  the receiver's strict `seq + 1` check, not by acknowledgements.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceLink {
    connection: ConnectionId,
    resource: ResourceId,
    role: LinkRole,
    state: LinkState,
    ack_seq: Option<u64>,
}

impl ResourceLink {
    pub fn new(connection: ConnectionId, resource: ResourceId, role: LinkRole) -> ResourceLink {
        ResourceLink {
            connection,
            resource,
            role,
            state: LinkState::Subscribing,
            ack_seq: None,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn ack_seq(&self) -> Option<u64> {
        self.ack_seq
    }

    pub fn close(&mut self) {
        self.state = LinkState::Closed;
    }

    /// Publisher side: answers a SUBSCRIBE presenting `known_seq`. This is used both for new links
    ///  and for resync requests on existing ones.
    ///
    /// If the subscriber is already current, the newest delta is re-sent: the subscriber discards
    ///  it as a duplicate, which confirms its baseline.
    pub fn on_subscribe(&mut self, known_seq: Option<u64>, resource: &Resource) -> ReplicationResult<CatchUp> {
        let (current, _) = resource.subscribe()?;

        if self.state != LinkState::Subscribing {
            debug!("resync requested for {:?} on {:?} from {:?}", resource.name(), self.connection, known_seq);
            self.state = LinkState::Resyncing;
        }

        self.ack_seq = match known_seq {
            Some(known) if known == current && current > 0 => Some(current - 1),
            Some(known) if known < current => Some(known),
            _ => None,
        };
        self.catch_up(resource)
    }

    /// Publisher side: determines everything the other end is missing and advances `ack_seq` to
    ///  the resource's current seq.
    pub fn catch_up(&mut self, resource: &Resource) -> ReplicationResult<CatchUp> {
        let (current, records) = resource.subscribe()?;

        let plan = match self.ack_seq {
            Some(ack) if ack == current => CatchUp::UpToDate,
            Some(ack) if ack < current => match resource.delta_since(ack) {
                Ok(deltas) => CatchUp::Deltas(deltas),
                Err(ReplicationError::SnapshotRequired { requested, oldest_retained }) => {
                    debug!("deltas after #{} for {:?} were evicted (oldest retained: {:?}) - falling back to snapshot", requested, resource.name(), oldest_retained);
                    CatchUp::Snapshot { seq: current, records: records.to_vec() }
                }
                Err(e) => return Err(e),
            },
            _ => CatchUp::Snapshot { seq: current, records: records.to_vec() },
        };

        self.ack_seq = Some(current);
        self.state = LinkState::Synchronized;
        Ok(plan)
    }

    /// Publisher side: discards the assumed baseline and plans a full snapshot of the current
    ///  state. Used when planned deltas could not be sent.
    pub fn fall_back_to_snapshot(&mut self, resource: &Resource) -> ReplicationResult<CatchUp> {
        self.ack_seq = None;
        self.catch_up(resource)
    }

    /// Subscriber side: installs a full snapshot as the new baseline.
    pub fn receive_snapshot(&mut self, resource: &mut Resource, seq: u64, records: Vec<Record>) -> ReplicationResult<()> {
        resource.apply_snapshot(seq, records)?;
        self.ack_seq = Some(seq);
        self.state = LinkState::Synchronized;
        Ok(())
    }

    /// Subscriber side: applies a delta in order, discarding duplicates and turning gaps into a
    ///  single resync request.
    pub fn receive_delta(&mut self, resource: &mut Resource, seq: u64, delta: &Delta) -> ReplicationResult<DeltaReceipt> {
        match resource.apply_remote_delta(delta, seq) {
            Ok(RemoteDeltaOutcome::Applied) => {
                self.ack_seq = Some(seq);
                self.state = LinkState::Synchronized;
                Ok(DeltaReceipt::Applied)
            }
            Ok(RemoteDeltaOutcome::Duplicate) => {
                if self.state != LinkState::Synchronized && resource.seq() == Some(seq) {
                    // re-sent newest delta: the publisher confirms our baseline
                    self.ack_seq = Some(seq);
                    self.state = LinkState::Synchronized;
                }
                Ok(DeltaReceipt::Duplicate)
            }
            Err(ReplicationError::OutOfOrderUpdate { expected, got }) => {
                if self.state != LinkState::Synchronized {
                    return Ok(DeltaReceipt::Dropped);
                }
                debug!("gap in updates for {:?}: expected {:?}, got {} - resyncing", resource.name(), expected, got);
                self.state = LinkState::Resyncing;
                Ok(DeltaReceipt::ResyncRequested { known_seq: resource.seq() })
            }
            Err(ReplicationError::InvalidDelta(reason)) => {
                if self.state == LinkState::Resyncing {
                    return Ok(DeltaReceipt::Dropped);
                }
                debug!("delta #{} does not apply to the replica of {:?} ({}) - requesting a snapshot", seq, resource.name(), reason);
                self.state = LinkState::Resyncing;
                Ok(DeltaReceipt::ResyncRequested { known_seq: None })
            }
            Err(e) => Err(e),
        }
    }
}


/// All links, keyed by (connection, resource) and indexed from both sides. Owning the links here
///  instead of in connections or resources means that tearing down either side removes the link
///  exactly once.
#[derive(Default)]
pub struct LinkTable {
    links: FxHashMap<(ConnectionId, ResourceId), ResourceLink>,
    by_connection: FxHashMap<ConnectionId, FxHashSet<ResourceId>>,
    by_resource: FxHashMap<ResourceId, FxHashSet<ConnectionId>>,
}

impl LinkTable {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// inserts a link, returning the link it replaces for the same (connection, resource) pair
    pub fn insert(&mut self, link: ResourceLink) -> Option<ResourceLink> {
        let key = (link.connection, link.resource);
        self.by_connection.entry(key.0).or_default().insert(key.1);
        self.by_resource.entry(key.1).or_default().insert(key.0);
        self.links.insert(key, link)
    }

    pub fn get(&self, connection: ConnectionId, resource: ResourceId) -> Option<&ResourceLink> {
        self.links.get(&(connection, resource))
    }

    pub fn get_mut(&mut self, connection: ConnectionId, resource: ResourceId) -> Option<&mut ResourceLink> {
        self.links.get_mut(&(connection, resource))
    }

    pub fn remove(&mut self, connection: ConnectionId, resource: ResourceId) -> Option<ResourceLink> {
        let mut link = self.links.remove(&(connection, resource))?;

        Self::remove_from_index(&mut self.by_connection, connection, &resource);
        Self::remove_from_index(&mut self.by_resource, resource, &connection);

        link.close();
        Some(link)
    }

    fn remove_from_index<K: Eq + std::hash::Hash, V: Eq + std::hash::Hash>(index: &mut FxHashMap<K, FxHashSet<V>>, key: K, value: &V) {
        if let Some(values) = index.get_mut(&key) {
            values.remove(value);
            if values.is_empty() {
                index.remove(&key);
            }
        }
    }

    /// removes (and closes) all links of a connection
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<ResourceLink> {
        self.resources_for(connection)
            .into_iter()
            .filter_map(|resource| self.remove(connection, resource))
            .collect()
    }

    /// removes (and closes) all links of a resource
    pub fn remove_resource(&mut self, resource: ResourceId) -> Vec<ResourceLink> {
        self.connections_for(resource)
            .into_iter()
            .filter_map(|connection| self.remove(connection, resource))
            .collect()
    }

    /// the connections carrying a resource, in ascending order
    pub fn connections_for(&self, resource: ResourceId) -> Vec<ConnectionId> {
        let mut result = self.by_resource.get(&resource)
            .map(|s| s.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        result.sort();
        result
    }

    /// the resources carried by a connection, in ascending order
    pub fn resources_for(&self, connection: ConnectionId) -> Vec<ResourceId> {
        let mut result = self.by_connection.get(&connection)
            .map(|s| s.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::resource::delta::Mutation;

    fn rec(s: &'static str) -> Record {
        Bytes::from_static(s.as_bytes())
    }

    fn conn(n: u64) -> ConnectionId {
        ConnectionId(n)
    }

    fn res(n: u64) -> ResourceId {
        ResourceId(n)
    }

    /// a publisher with `n` appended records, keeping the last `log_capacity` deltas
    fn publisher(n: usize, log_capacity: usize) -> Resource {
        let mut resource = Resource::publish("list", vec![rec("A")], log_capacity);
        for i in 0..n {
            resource.apply_local_mutation(&Mutation::Append(Bytes::from(format!("{}", i)))).unwrap();
        }
        resource
    }

    fn seqs(plan: &CatchUp) -> Vec<u64> {
        match plan {
            CatchUp::Deltas(deltas) => deltas.iter().map(|(s, _)| *s).collect(),
            other => panic!("expected deltas, was {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_without_known_seq_sends_snapshot() {
        let resource = publisher(0, 10);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);

        let plan = link.on_subscribe(None, &resource).unwrap();
        assert_eq!(plan, CatchUp::Snapshot { seq: 0, records: vec![rec("A")] });
        assert_eq!(link.ack_seq(), Some(0));
        assert_eq!(link.state(), LinkState::Synchronized);
    }

    #[test]
    fn test_reconnect_backfills_from_log() {
        let resource = publisher(5, 10);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);

        let plan = link.on_subscribe(Some(1), &resource).unwrap();
        assert_eq!(seqs(&plan), vec![2, 3, 4, 5]);
        assert_eq!(link.ack_seq(), Some(5));
    }

    #[test]
    fn test_reconnect_after_eviction_sends_snapshot() {
        let resource = publisher(10, 3);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);

        match link.on_subscribe(Some(0), &resource).unwrap() {
            CatchUp::Snapshot { seq, records } => {
                assert_eq!(seq, 10);
                assert_eq!(records, resource.records());
            }
            other => panic!("expected snapshot, was {:?}", other),
        }
        assert_eq!(link.ack_seq(), Some(10));
    }

    #[rstest]
    #[case::current_resends_newest(Some(5), Some(vec![5]))]
    #[case::ahead_of_publisher(Some(9), None)]
    fn test_subscribe_edge_baselines(#[case] known_seq: Option<u64>, #[case] expected_deltas: Option<Vec<u64>>) {
        let resource = publisher(5, 10);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);

        let plan = link.on_subscribe(known_seq, &resource).unwrap();
        match expected_deltas {
            Some(expected) => assert_eq!(seqs(&plan), expected),
            None => assert!(matches!(plan, CatchUp::Snapshot { seq: 5, .. })),
        }
    }

    #[test]
    fn test_catch_up_after_mutations() {
        let mut resource = publisher(0, 10);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);
        link.on_subscribe(None, &resource).unwrap();

        assert_eq!(link.catch_up(&resource).unwrap(), CatchUp::UpToDate);

        resource.apply_local_mutation(&Mutation::Append(rec("B"))).unwrap();
        assert_eq!(seqs(&link.catch_up(&resource).unwrap()), vec![1]);
        assert_eq!(link.ack_seq(), Some(1));
        assert_eq!(link.catch_up(&resource).unwrap(), CatchUp::UpToDate);
    }

    #[test]
    fn test_repeated_subscribe_resets_ack_seq() {
        let resource = publisher(4, 10);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);
        link.on_subscribe(None, &resource).unwrap();
        assert_eq!(link.ack_seq(), Some(4));

        assert_eq!(seqs(&link.on_subscribe(Some(2), &resource).unwrap()), vec![3, 4]);
        assert_eq!(link.state(), LinkState::Synchronized);
    }

    #[test]
    fn test_fall_back_to_snapshot() {
        let resource = publisher(3, 10);
        let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Publisher);
        assert_eq!(seqs(&link.on_subscribe(Some(1), &resource).unwrap()), vec![2, 3]);
        assert_eq!(link.ack_seq(), Some(3));

        match link.fall_back_to_snapshot(&resource).unwrap() {
            CatchUp::Snapshot { seq, records } => {
                assert_eq!(seq, 3);
                assert_eq!(records, resource.records());
            }
            other => panic!("expected snapshot, was {:?}", other),
        }
        assert_eq!(link.ack_seq(), Some(3));
        assert_eq!(link.catch_up(&resource).unwrap(), CatchUp::UpToDate);
    }

    /// runs a subscriber link against the deltas produced by a publisher
    struct SubscriberFixture {
        publisher: Resource,
        deltas: Vec<(u64, Delta)>,
        replica: Resource,
        link: ResourceLink,
    }
    impl SubscriberFixture {
        fn new(num_deltas: usize) -> SubscriberFixture {
            let mut publisher = Resource::publish("list", vec![rec("A")], 10);
            let mut replica = Resource::new_replica("list");
            let mut link = ResourceLink::new(conn(1), res(1), LinkRole::Subscriber);
            link.receive_snapshot(&mut replica, 0, vec![rec("A")]).unwrap();

            let deltas = (0..num_deltas)
                .map(|i| publisher.apply_local_mutation(&Mutation::Append(Bytes::from(format!("{}", i)))).unwrap())
                .collect();

            SubscriberFixture { publisher, deltas, replica, link }
        }

        fn receive(&mut self, seq: u64) -> DeltaReceipt {
            let (s, delta) = &self.deltas[(seq - 1) as usize];
            assert_eq!(*s, seq);
            self.link.receive_delta(&mut self.replica, seq, delta).unwrap()
        }
    }

    #[test]
    fn test_receive_in_order() {
        let mut f = SubscriberFixture::new(3);
        assert_eq!(f.link.state(), LinkState::Synchronized);
        for seq in 1..=3 {
            assert_eq!(f.receive(seq), DeltaReceipt::Applied);
        }
        assert_eq!(f.replica.snapshot(), f.publisher.snapshot());
        assert_eq!(f.link.ack_seq(), Some(3));
    }

    #[test]
    fn test_receive_duplicate() {
        let mut f = SubscriberFixture::new(2);
        f.receive(1);
        f.receive(2);
        assert_eq!(f.receive(1), DeltaReceipt::Duplicate);
        assert_eq!(f.link.state(), LinkState::Synchronized);
        assert_eq!(f.replica.snapshot(), f.publisher.snapshot());
    }

    #[test]
    fn test_gap_resyncs_once_then_recovers() {
        let mut f = SubscriberFixture::new(4);
        f.receive(1);

        assert_eq!(f.receive(3), DeltaReceipt::ResyncRequested { known_seq: Some(1) });
        assert_eq!(f.link.state(), LinkState::Resyncing);
        assert_eq!(f.replica.seq(), Some(1));

        // further gaps while the backfill is pending don't trigger a second request
        assert_eq!(f.receive(4), DeltaReceipt::Dropped);

        // backfill
        for seq in 2..=4 {
            assert_eq!(f.receive(seq), DeltaReceipt::Applied);
        }
        assert_eq!(f.link.state(), LinkState::Synchronized);
        assert_eq!(f.replica.snapshot(), f.publisher.snapshot());
    }

    #[test]
    fn test_resent_newest_delta_confirms_baseline() {
        let mut f = SubscriberFixture::new(2);
        f.receive(1);
        f.receive(2);

        // simulate reconnect: a fresh link on the same replica
        f.link = ResourceLink::new(conn(2), res(1), LinkRole::Subscriber);
        assert_eq!(f.receive(2), DeltaReceipt::Duplicate);
        assert_eq!(f.link.state(), LinkState::Synchronized);
    }

    #[test]
    fn test_invalid_delta_requests_snapshot() {
        let mut f = SubscriberFixture::new(0);
        let bogus = Delta::new(vec![crate::resource::delta::ListChange::Delete { index: 7 }]);
        assert_eq!(f.link.receive_delta(&mut f.replica, 1, &bogus).unwrap(), DeltaReceipt::ResyncRequested { known_seq: None });
        assert_eq!(f.replica.seq(), Some(0));
    }

    #[test]
    fn test_link_table_indexes() {
        let mut table = LinkTable::default();
        table.insert(ResourceLink::new(conn(1), res(1), LinkRole::Publisher));
        table.insert(ResourceLink::new(conn(1), res(2), LinkRole::Subscriber));
        table.insert(ResourceLink::new(conn(2), res(1), LinkRole::Publisher));

        assert_eq!(table.len(), 3);
        assert_eq!(table.connections_for(res(1)), vec![conn(1), conn(2)]);
        assert_eq!(table.resources_for(conn(1)), vec![res(1), res(2)]);

        let removed = table.remove_connection(conn(1));
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|l| l.state() == LinkState::Closed));
        assert_eq!(table.connections_for(res(1)), vec![conn(2)]);
        assert!(table.connections_for(res(2)).is_empty());
        assert!(table.get(conn(1), res(1)).is_none());

        // tearing down the other side afterwards does not see the removed links again
        let removed = table.remove_resource(res(1));
        assert_eq!(removed.iter().map(|l| l.connection()).collect::<Vec<_>>(), vec![conn(2)]);
        assert!(table.is_empty());
        assert!(table.remove(conn(2), res(1)).is_none());
    }

    #[test]
    fn test_link_table_insert_replaces() {
        let mut table = LinkTable::default();
        assert!(table.insert(ResourceLink::new(conn(1), res(1), LinkRole::Publisher)).is_none());
        assert!(table.insert(ResourceLink::new(conn(1), res(1), LinkRole::Subscriber)).is_some());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(conn(1), res(1)).map(|l| l.role()), Some(LinkRole::Subscriber));
    }
}
