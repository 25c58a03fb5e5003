use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::connection::connection::{Connection, ConnectionId, ConnectionState, ReadOutcome};
use crate::connection::peer_socket::PeerSocket;
use crate::connection::readiness::{Readiness, ReadinessWatchers};
use crate::error::{ReplicationError, ReplicationResult};
use crate::peer::handle::{PeerCommand, PeerHandle};
use crate::peer::listener::ResourceListener;
use crate::peer::peer_config::PeerConfig;
use crate::protocol::messages::{DisconnectReason, PeerMessage};
use crate::resource::delta::{Delta, Mutation, Record};
use crate::resource::link::{CatchUp, DeltaReceipt, LinkRole, LinkState, LinkTable, ResourceLink};
use crate::resource::resource::{Resource, ResourceRole, ResourceSnapshot};
use crate::resource::ResourceId;

struct LocalResource {
    resource: Resource,
    /// only for replicas
    subscription: Option<Subscription>,
}

struct Subscription {
    publisher_addr: SocketAddr,
    listener: Arc<dyn ResourceListener>,
}

/// The reactor: the single owner of all connections, resources and links.
///
/// Everything that touches them runs on the task executing [Dispatcher::run]: commands from the
///  local adapter, socket readiness, accepted and established connections. Sockets are only
///  accessed with non-blocking reads and writes, so no handler ever waits, and all messages for
///  a link are encoded in the order they are generated.
pub struct Dispatcher {
    config: Arc<PeerConfig>,
    tcp_listener: TcpListener,
    local_addr: SocketAddr,

    commands_tx: mpsc::UnboundedSender<PeerCommand>,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    readiness_tx: mpsc::Sender<Readiness>,
    readiness: mpsc::Receiver<Readiness>,
    connected_tx: mpsc::UnboundedSender<(ConnectionId, io::Result<TcpStream>)>,
    connected: mpsc::UnboundedReceiver<(ConnectionId, io::Result<TcpStream>)>,

    next_connection_id: u64,
    connections: FxHashMap<ConnectionId, Connection>,
    /// connections this peer initiated, for reuse by further subscriptions
    outbound_connections: FxHashMap<SocketAddr, ConnectionId>,

    next_resource_id: u64,
    resources: FxHashMap<ResourceId, LocalResource>,
    by_name: FxHashMap<String, ResourceId>,

    links: LinkTable,
    /// SUBSCRIBE requests for names that were not published yet
    pending_interest: FxHashMap<String, FxHashSet<ConnectionId>>,
}

impl Dispatcher {
    pub async fn bind(config: Arc<PeerConfig>) -> anyhow::Result<Dispatcher> {
        config.validate()?;

        let tcp_listener = TcpListener::bind(config.self_addr).await?;
        let local_addr = tcp_listener.local_addr()?;
        info!("peer listening on {}", local_addr);

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (readiness_tx, readiness) = mpsc::channel(config.event_channel_size);
        let (connected_tx, connected) = mpsc::unbounded_channel();

        Ok(Dispatcher {
            config,
            tcp_listener,
            local_addr,
            commands_tx,
            commands,
            readiness_tx,
            readiness,
            connected_tx,
            connected,
            next_connection_id: 0,
            connections: Default::default(),
            outbound_connections: Default::default(),
            next_resource_id: 0,
            resources: Default::default(),
            by_name: Default::default(),
            links: Default::default(),
            pending_interest: Default::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle::new(self.commands_tx.clone(), self.local_addr)
    }

    /// Runs the reactor until [PeerHandle::shutdown] is called.
    pub async fn run(mut self) {
        let span = info_span!("peer", addr = %self.local_addr);
        self._run().instrument(span).await
    }

    async fn _run(&mut self) {
        loop {
            select! {
                cmd = self.commands.recv() => match cmd {
                    Some(PeerCommand::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                Some(readiness) = self.readiness.recv() => match readiness {
                    Readiness::Readable(id) => self.on_readable(id),
                    Readiness::Writable(id) => self.on_writable(id),
                },
                Some((id, result)) = self.connected.recv() => self.on_connected(id, result),
                accepted = self.tcp_listener.accept() => match accepted {
                    Ok((stream, addr)) => self.on_accepted(stream, addr),
                    Err(e) => warn!("error accepting connection: {}", e),
                },
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        info!("shutting down");

        let mut ids = self.connections.keys().copied().collect::<Vec<_>>();
        ids.sort();
        for id in ids {
            self.detach_connection(id);
            if let Some(mut conn) = self.connections.remove(&id) {
                conn.disconnect(DisconnectReason::Shutdown);
                // best effort: whatever the socket accepts without blocking
                let _ = conn.on_writable();
                conn.close();
            }
        }
        self.outbound_connections.clear();
    }

    fn on_command(&mut self, cmd: PeerCommand) {
        match cmd {
            PeerCommand::Publish { name, records, reply } => {
                let _ = reply.send(self.publish(name, records));
            }
            PeerCommand::Subscribe { publisher_addr, name, listener, reply } => {
                let _ = reply.send(self.subscribe(publisher_addr, name, listener));
            }
            PeerCommand::Mutate { resource, mutation, reply } => {
                let result = self.mutate(resource, &mutation);
                if let Err(e) = &result {
                    warn!("rejected mutation {:?} on {:?}: {}", mutation, resource, e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            PeerCommand::Snapshot { resource, reply } => {
                let _ = reply.send(self.snapshot(resource));
            }
            PeerCommand::Unpublish { resource } => self.unpublish(resource),
            PeerCommand::Unsubscribe { resource } => self.unsubscribe(resource),
            PeerCommand::Reconnect { resource } => self.reconnect(resource),
            PeerCommand::Disconnect { addr } => {
                let ids = self.connections.values()
                    .filter(|c| c.peer_addr() == addr)
                    .map(|c| c.id())
                    .collect::<Vec<_>>();
                if ids.is_empty() {
                    debug!("disconnect requested for {}, but there is no connection", addr);
                }
                for id in ids {
                    self.disconnect_connection(id, DisconnectReason::Requested);
                }
            }
            PeerCommand::Shutdown => {}
        }
    }

    fn register(&mut self, resource: Resource, subscription: Option<Subscription>) -> anyhow::Result<ResourceId> {
        if self.by_name.contains_key(resource.name()) {
            bail!("resource {:?} is already registered", resource.name());
        }

        self.next_resource_id += 1;
        let id = ResourceId(self.next_resource_id);
        self.by_name.insert(resource.name().to_string(), id);
        self.resources.insert(id, LocalResource { resource, subscription });
        Ok(id)
    }

    fn publish(&mut self, name: String, records: Vec<Record>) -> anyhow::Result<ResourceId> {
        let resource = Resource::publish(name.clone(), records.clone(), self.config.delta_log_capacity);
        let id = self.register(resource, None)?;
        info!("published {:?} as {:?}", name, id);

        if let Some(interested) = self.pending_interest.remove(&name) {
            let mut interested = interested.into_iter().collect::<Vec<_>>();
            interested.sort();
            for conn in interested {
                debug!("announcing {:?} to {:?}", name, conn);
                self.send(conn, PeerMessage::Publish { name: name.clone(), records: records.clone() });
            }
        }
        Ok(id)
    }

    fn subscribe(&mut self, publisher_addr: SocketAddr, name: String, listener: Arc<dyn ResourceListener>) -> anyhow::Result<ResourceId> {
        let id = self.register(Resource::new_replica(name.clone()), Some(Subscription { publisher_addr, listener }))?;
        info!("subscribing to {:?} at {} as {:?}", name, publisher_addr, id);
        self.start_subscription(id);
        Ok(id)
    }

    /// creates a subscriber link to the resource's publisher address and sends SUBSCRIBE with
    ///  the replica's current seq
    fn start_subscription(&mut self, id: ResourceId) {
        let (name, known_seq, publisher_addr) = match self.resources.get(&id) {
            Some(LocalResource { resource, subscription: Some(subscription) }) => {
                (resource.name().to_string(), resource.seq(), subscription.publisher_addr)
            }
            _ => return,
        };

        let conn = self.connection_to(publisher_addr);
        self.links.insert(ResourceLink::new(conn, id, LinkRole::Subscriber));
        self.notify_link_state(id, LinkState::Subscribing);
        self.send(conn, PeerMessage::Subscribe { name, known_seq });
    }

    fn mutate(&mut self, id: ResourceId, mutation: &Mutation) -> ReplicationResult<u64> {
        let local = self.resources.get_mut(&id)
            .ok_or_else(|| ReplicationError::UnknownResource(format!("{:?}", id)))?;
        let (seq, _) = local.resource.apply_local_mutation(mutation)?;
        trace!("{:?} is at seq {} after local mutation", local.resource.name(), seq);

        for conn in self.links.connections_for(id) {
            self.catch_up(conn, id);
        }
        Ok(seq)
    }

    fn snapshot(&self, id: ResourceId) -> anyhow::Result<ResourceSnapshot> {
        match self.resources.get(&id) {
            Some(local) => Ok(local.resource.snapshot()),
            None => bail!("{:?} is not registered", id),
        }
    }

    fn unregister(&mut self, id: ResourceId) -> Option<LocalResource> {
        let local = self.resources.remove(&id)?;
        self.by_name.remove(local.resource.name());

        let name = local.resource.name().to_string();
        for link in self.links.remove_resource(id) {
            self.send(link.connection(), PeerMessage::Unsubscribe { name: name.clone() });
        }
        Some(local)
    }

    fn unpublish(&mut self, id: ResourceId) {
        if let Some(local) = self.unregister(id) {
            info!("unpublished {:?}", local.resource.name());
        }
    }

    fn unsubscribe(&mut self, id: ResourceId) {
        if let Some(local) = self.unregister(id) {
            info!("unsubscribed from {:?}", local.resource.name());
            if let Some(subscription) = local.subscription {
                subscription.listener.on_link_state(local.resource.name(), LinkState::Closed);
            }
        }
    }

    fn reconnect(&mut self, id: ResourceId) {
        for conn in self.links.connections_for(id) {
            self.links.remove(conn, id);
        }
        self.start_subscription(id);
    }

    /// an open or connecting outbound connection to the address, initiating one if necessary
    fn connection_to(&mut self, addr: SocketAddr) -> ConnectionId {
        if let Some(&id) = self.outbound_connections.get(&addr) {
            if let Some(conn) = self.connections.get(&id) {
                if matches!(conn.state(), ConnectionState::Connecting | ConnectionState::Open) {
                    return id;
                }
            }
        }

        let id = self.new_connection(addr);
        self.outbound_connections.insert(addr, id);
        info!("connecting to {} as {:?}", addr, id);

        let connected_tx = self.connected_tx.clone();
        tokio::spawn(async move {
            let result = TcpStream::connect(addr).await;
            let _ = connected_tx.send((id, result));
        });
        id
    }

    fn new_connection(&mut self, addr: SocketAddr) -> ConnectionId {
        self.next_connection_id += 1;
        let id = ConnectionId(self.next_connection_id);
        self.connections.insert(id, Connection::new(id, addr, &self.config));
        id
    }

    fn on_accepted(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.new_connection(addr);
        info!("accepted connection from {} as {:?}", addr, id);
        self.open_connection(id, stream);
    }

    fn on_connected(&mut self, id: ConnectionId, result: io::Result<TcpStream>) {
        match result {
            Ok(stream) => {
                debug!("{:?} established", id);
                self.open_connection(id, stream);
            }
            Err(e) => {
                error!("{:?}: connect failed: {}", id, e);
                self.close_connection(id);
            }
        }
    }

    fn open_connection(&mut self, id: ConnectionId, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{:?}: could not set TCP_NODELAY: {}", id, e);
        }

        match self.connections.get_mut(&id) {
            Some(conn) => {
                let socket: Arc<dyn PeerSocket> = Arc::new(stream);
                let readiness = ReadinessWatchers::spawn(id, socket.clone(), self.readiness_tx.clone());
                conn.open(socket, readiness);
            }
            None => debug!("{:?} was closed while connecting", id),
        }
    }

    fn on_readable(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else { return };
        if conn.state() != ConnectionState::Open {
            return;
        }
        let span = conn.span().clone();
        let _entered = span.enter();

        let mut messages = vec![];
        let result = conn.on_readable(&mut messages);

        for msg in messages {
            if self.connections.get(&id).map(|c| c.state()) != Some(ConnectionState::Open) {
                break;
            }
            self.on_message(id, msg);
        }

        match result {
            Ok(ReadOutcome::Open) => {}
            Ok(ReadOutcome::Eof) => {
                info!("{:?} was closed by the peer", id);
                self.close_connection(id);
            }
            Err(e @ (ReplicationError::ProtocolDecode(_) | ReplicationError::FrameTooLarge { .. })) => {
                warn!("{:?}: {} - disconnecting", id, e);
                self.disconnect_connection(id, DisconnectReason::ProtocolError);
            }
            Err(e) => {
                error!("{:?}: {} - closing", id, e);
                self.close_connection(id);
            }
        }
    }

    fn on_writable(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else { return };
        let span = conn.span().clone();
        let _entered = span.enter();

        match conn.on_writable() {
            Ok(()) => {
                if conn.state() == ConnectionState::Closed {
                    self.close_connection(id);
                }
            }
            Err(e) => {
                error!("{:?}: {} - closing", id, e);
                self.close_connection(id);
            }
        }
    }

    /// Sends a message, closing the connection if that fails. Sending on a connection that
    ///  is closing or gone is silently skipped.
    ///
    /// Returns `false` if the message exceeds the maximum frame length and was dropped.
    fn send(&mut self, id: ConnectionId, msg: PeerMessage) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else { return true };
        match conn.send(&msg) {
            Ok(()) => {}
            Err(ReplicationError::ConnectionClosed) => {}
            Err(e @ ReplicationError::FrameTooLarge { .. }) => {
                // nothing was queued, the connection's stream is intact
                error!("{:?}: dropping message #{} for {:?}: {}", id, msg.id(), msg.resource_name(), e);
                return false;
            }
            Err(e) => {
                error!("{:?}: {} - closing", id, e);
                self.close_connection(id);
            }
        }
        true
    }

    /// Orderly disconnect: links are torn down immediately, the connection is closed once the
    ///  DISCONNECT is flushed.
    fn disconnect_connection(&mut self, id: ConnectionId, reason: DisconnectReason) {
        self.detach_connection(id);
        if let Some(conn) = self.connections.get_mut(&id) {
            debug!("{:?}: disconnecting ({:?})", id, reason);
            conn.disconnect(reason);
            if conn.state() == ConnectionState::Closed {
                self.connections.remove(&id);
            }
        }
    }

    fn close_connection(&mut self, id: ConnectionId) {
        self.detach_connection(id);
        if let Some(mut conn) = self.connections.remove(&id) {
            conn.close();
        }
    }

    /// removes everything referring to the connection except the connection itself
    fn detach_connection(&mut self, id: ConnectionId) {
        self.outbound_connections.retain(|_, conn| *conn != id);
        self.pending_interest.retain(|_, interested| {
            interested.remove(&id);
            !interested.is_empty()
        });

        for link in self.links.remove_connection(id) {
            if link.role() == LinkRole::Subscriber {
                self.notify_link_state(link.resource(), LinkState::Closed);
            }
        }
    }

    fn notify_link_state(&self, id: ResourceId, state: LinkState) {
        if let Some(LocalResource { resource, subscription: Some(subscription) }) = self.resources.get(&id) {
            debug!("link for {:?} is {:?}", resource.name(), state);
            subscription.listener.on_link_state(resource.name(), state);
        }
    }

    fn on_message(&mut self, conn: ConnectionId, msg: PeerMessage) {
        trace!("{:?}: received message #{} for {:?}", conn, msg.id(), msg.resource_name());

        match msg {
            PeerMessage::Publish { name, records } => self.on_publish(conn, name, records),
            PeerMessage::Subscribe { name, known_seq } => self.on_subscribe(conn, name, known_seq),
            PeerMessage::Snapshot { name, seq, records } => self.on_snapshot(conn, name, seq, records),
            PeerMessage::Delta { name, seq, delta } => self.on_delta(conn, name, seq, delta),
            PeerMessage::Unsubscribe { name } => self.on_unsubscribe(conn, name),
            PeerMessage::Disconnect { reason } => {
                info!("{:?}: peer disconnected ({:?})", conn, reason);
                self.close_connection(conn);
            }
        }
    }

    fn on_subscribe(&mut self, conn: ConnectionId, name: String, known_seq: Option<u64>) {
        let id = match self.by_name.get(&name) {
            Some(&id) => id,
            None => {
                warn!("{:?}: {} - it is announced when it is published", conn, ReplicationError::UnknownResource(name.clone()));
                self.pending_interest.entry(name).or_default().insert(conn);
                return;
            }
        };
        let Some(local) = self.resources.get(&id) else { return };
        if local.resource.role() != ResourceRole::Publisher {
            warn!("{:?}: {}", conn, ReplicationError::WrongRole { name, role: local.resource.role() });
            return;
        }

        if self.links.get(conn, id).is_none() {
            debug!("{:?}: new subscriber for {:?}", conn, name);
            self.links.insert(ResourceLink::new(conn, id, LinkRole::Publisher));
        }
        let Some(link) = self.links.get_mut(conn, id) else { return };

        match link.on_subscribe(known_seq, &local.resource) {
            Ok(plan) => self.send_catch_up(conn, id, &name, plan),
            Err(e) => error!("{:?}: answering SUBSCRIBE for {:?} failed: {}", conn, name, e),
        }
    }

    fn catch_up(&mut self, conn: ConnectionId, id: ResourceId) {
        let (Some(local), Some(link)) = (self.resources.get(&id), self.links.get_mut(conn, id)) else { return };
        if link.role() != LinkRole::Publisher {
            return;
        }

        let name = local.resource.name().to_string();
        match link.catch_up(&local.resource) {
            Ok(plan) => self.send_catch_up(conn, id, &name, plan),
            Err(e) => error!("{:?}: catching up {:?} failed: {}", conn, name, e),
        }
    }

    /// Sends a catch-up plan. A delta that exceeds the maximum frame length would leave a gap
    ///  the subscriber can never close, so the rest of the plan is replaced by a snapshot.
    fn send_catch_up(&mut self, conn: ConnectionId, id: ResourceId, name: &str, plan: CatchUp) {
        match plan {
            CatchUp::UpToDate => {}
            CatchUp::Deltas(deltas) => {
                for (seq, delta) in deltas {
                    if !self.send(conn, PeerMessage::Delta { name: name.to_string(), seq, delta }) {
                        debug!("{:?}: delta #{} of {:?} can not be sent - sending a snapshot instead", conn, seq, name);
                        self.send_snapshot_instead(conn, id, name);
                        return;
                    }
                }
            }
            CatchUp::Snapshot { seq, records } => {
                debug!("{:?}: sending snapshot of {:?} at seq {}", conn, name, seq);
                self.send(conn, PeerMessage::Snapshot { name: name.to_string(), seq, records });
            }
        }
    }

    fn send_snapshot_instead(&mut self, conn: ConnectionId, id: ResourceId, name: &str) {
        let (Some(local), Some(link)) = (self.resources.get(&id), self.links.get_mut(conn, id)) else { return };

        match link.fall_back_to_snapshot(&local.resource) {
            Ok(CatchUp::Snapshot { seq, records }) => {
                self.send(conn, PeerMessage::Snapshot { name: name.to_string(), seq, records });
            }
            Ok(plan) => error!("{:?}: expected a snapshot of {:?}, planned {:?}", conn, name, plan),
            Err(e) => error!("{:?}: snapshot of {:?} failed: {}", conn, name, e),
        }
    }

    /// the local replica that is subscribed to `name` on this connection
    fn subscribed_resource(&self, conn: ConnectionId, name: &str) -> Option<ResourceId> {
        let id = *self.by_name.get(name)?;
        match self.links.get(conn, id) {
            Some(link) if link.role() == LinkRole::Subscriber => Some(id),
            _ => None,
        }
    }

    fn on_publish(&mut self, conn: ConnectionId, name: String, records: Vec<Record>) {
        let Some(id) = self.subscribed_resource(conn, &name) else {
            warn!("{:?}: announcement for {}", conn, ReplicationError::UnknownResource(name));
            return;
        };
        if self.links.get(conn, id).map(|l| l.state()) != Some(LinkState::Subscribing) {
            debug!("{:?}: ignoring announcement of {:?} for an established link", conn, name);
            return;
        }

        self.receive_snapshot(conn, id, 0, records);
        self.send(conn, PeerMessage::Subscribe { name, known_seq: Some(0) });
    }

    fn on_snapshot(&mut self, conn: ConnectionId, name: String, seq: u64, records: Vec<Record>) {
        match self.subscribed_resource(conn, &name) {
            Some(id) => self.receive_snapshot(conn, id, seq, records),
            None => warn!("{:?}: snapshot for {}", conn, ReplicationError::UnknownResource(name)),
        }
    }

    fn receive_snapshot(&mut self, conn: ConnectionId, id: ResourceId, seq: u64, records: Vec<Record>) {
        let (Some(local), Some(link)) = (self.resources.get_mut(&id), self.links.get_mut(conn, id)) else { return };
        let state_before = link.state();

        if let Err(e) = link.receive_snapshot(&mut local.resource, seq, records) {
            error!("{:?}: applying snapshot of {:?} failed: {}", conn, local.resource.name(), e);
            return;
        }
        debug!("{:?}: {:?} synchronized by snapshot at seq {}", conn, local.resource.name(), seq);

        if let Some(subscription) = &local.subscription {
            subscription.listener.on_snapshot(local.resource.name(), seq, local.resource.records());
        }
        if state_before != link.state() {
            self.notify_link_state(id, LinkState::Synchronized);
        }
    }

    fn on_delta(&mut self, conn: ConnectionId, name: String, seq: u64, delta: Delta) {
        let Some(id) = self.subscribed_resource(conn, &name) else {
            warn!("{:?}: delta #{} for {}", conn, seq, ReplicationError::UnknownResource(name));
            return;
        };
        let (Some(local), Some(link)) = (self.resources.get_mut(&id), self.links.get_mut(conn, id)) else { return };
        let state_before = link.state();

        let receipt = match link.receive_delta(&mut local.resource, seq, &delta) {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("{:?}: applying delta #{} to {:?} failed: {}", conn, seq, name, e);
                return;
            }
        };
        let state_after = link.state();

        match receipt {
            DeltaReceipt::Applied => {
                if let Some(subscription) = &local.subscription {
                    subscription.listener.on_delta(&name, seq, &delta);
                }
            }
            DeltaReceipt::Duplicate => trace!("{:?}: discarding duplicate delta #{} for {:?}", conn, seq, name),
            DeltaReceipt::Dropped => trace!("{:?}: dropping delta #{} for {:?} while resyncing", conn, seq, name),
            DeltaReceipt::ResyncRequested { known_seq } => {
                self.send(conn, PeerMessage::Subscribe { name, known_seq });
            }
        }

        if state_before != state_after {
            self.notify_link_state(id, state_after);
        }
    }

    fn on_unsubscribe(&mut self, conn: ConnectionId, name: String) {
        if let Some(interested) = self.pending_interest.get_mut(&name) {
            interested.remove(&conn);
        }

        let Some(&id) = self.by_name.get(&name) else {
            debug!("{:?}: UNSUBSCRIBE for unknown resource {:?}", conn, name);
            return;
        };
        if let Some(link) = self.links.remove(conn, id) {
            match link.role() {
                LinkRole::Publisher => debug!("{:?}: subscriber left {:?}", conn, name),
                LinkRole::Subscriber => {
                    info!("{:?}: {:?} was unpublished - keeping the replica", conn, name);
                    self.notify_link_state(id, LinkState::Closed);
                }
            }
        }
    }
}
