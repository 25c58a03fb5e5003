use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use tokio::sync::{mpsc, oneshot};

use crate::error::ReplicationResult;
use crate::peer::listener::ResourceListener;
use crate::resource::delta::{Mutation, Record};
use crate::resource::resource::{ResourceRole, ResourceSnapshot};
use crate::resource::ResourceId;

/// Requests from the local adapter, executed on the reactor in the order they were submitted
pub(crate) enum PeerCommand {
    Publish {
        name: String,
        records: Vec<Record>,
        reply: oneshot::Sender<anyhow::Result<ResourceId>>,
    },
    Subscribe {
        publisher_addr: SocketAddr,
        name: String,
        listener: Arc<dyn ResourceListener>,
        reply: oneshot::Sender<anyhow::Result<ResourceId>>,
    },
    Mutate {
        resource: ResourceId,
        mutation: Mutation,
        reply: Option<oneshot::Sender<ReplicationResult<u64>>>,
    },
    Snapshot {
        resource: ResourceId,
        reply: oneshot::Sender<anyhow::Result<ResourceSnapshot>>,
    },
    Unpublish {
        resource: ResourceId,
    },
    Unsubscribe {
        resource: ResourceId,
    },
    Reconnect {
        resource: ResourceId,
    },
    Disconnect {
        addr: SocketAddr,
    },
    Shutdown,
}

fn send_command(commands: &mpsc::UnboundedSender<PeerCommand>, cmd: PeerCommand) -> anyhow::Result<()> {
    commands.send(cmd)
        .map_err(|_| anyhow!("peer is shut down"))
}

async fn await_reply<T>(reply: oneshot::Receiver<anyhow::Result<T>>) -> anyhow::Result<T> {
    reply.await
        .map_err(|_| anyhow!("peer shut down before replying"))?
}

/// The local adapter's access to a running peer. Handles are cheap to clone and can be used from
///  any thread or task.
#[derive(Clone)]
pub struct PeerHandle {
    commands: mpsc::UnboundedSender<PeerCommand>,
    local_addr: SocketAddr,
}

impl PeerHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<PeerCommand>, local_addr: SocketAddr) -> PeerHandle {
        PeerHandle {
            commands,
            local_addr,
        }
    }

    /// the address the peer actually listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registers a resource in publisher role at seq 0. Peers that asked for this name before it
    ///  existed are sent a PUBLISH announcement.
    pub async fn publish_resource(&self, name: impl Into<String>, initial_snapshot: Vec<Record>) -> anyhow::Result<ResourceHandle> {
        let name = name.into();
        let (reply, reply_rx) = oneshot::channel();
        send_command(&self.commands, PeerCommand::Publish { name: name.clone(), records: initial_snapshot, reply })?;
        let id = await_reply(reply_rx).await?;

        Ok(ResourceHandle {
            id,
            name,
            role: ResourceRole::Publisher,
            commands: self.commands.clone(),
        })
    }

    /// Registers a replica and subscribes to the resource of the same name at `publisher_addr`,
    ///  connecting if there is no connection to that address yet. The listener is notified of
    ///  every snapshot and delta applied to the replica.
    pub async fn subscribe_resource(&self, publisher_addr: SocketAddr, name: impl Into<String>, listener: Arc<dyn ResourceListener>) -> anyhow::Result<ResourceHandle> {
        let name = name.into();
        let (reply, reply_rx) = oneshot::channel();
        send_command(&self.commands, PeerCommand::Subscribe { publisher_addr, name: name.clone(), listener, reply })?;
        let id = await_reply(reply_rx).await?;

        Ok(ResourceHandle {
            id,
            name,
            role: ResourceRole::Subscriber,
            commands: self.commands.clone(),
        })
    }

    /// orderly disconnect of all connections to a remote peer
    pub fn disconnect(&self, addr: SocketAddr) -> anyhow::Result<()> {
        send_command(&self.commands, PeerCommand::Disconnect { addr })
    }

    pub fn shutdown(&self) -> anyhow::Result<()> {
        send_command(&self.commands, PeerCommand::Shutdown)
    }
}

/// The local adapter's access to one resource
#[derive(Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    name: String,
    role: ResourceRole,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl ResourceHandle {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ResourceRole {
        self.role
    }

    fn require_role(&self, role: ResourceRole) -> anyhow::Result<()> {
        if self.role != role {
            bail!("resource {:?} is a {:?}", self.name, self.role);
        }
        Ok(())
    }

    /// Enqueues a mutation for the reactor without waiting for it. Mutations are applied in the
    ///  order they are enqueued, a rejected mutation is logged and skipped.
    pub fn mutate(&self, mutation: Mutation) -> anyhow::Result<()> {
        self.require_role(ResourceRole::Publisher)?;
        send_command(&self.commands, PeerCommand::Mutate { resource: self.id, mutation, reply: None })
    }

    /// Applies a mutation, returning the seq it produced
    pub async fn mutate_and_wait(&self, mutation: Mutation) -> anyhow::Result<u64> {
        self.require_role(ResourceRole::Publisher)?;
        let (reply, reply_rx) = oneshot::channel();
        send_command(&self.commands, PeerCommand::Mutate { resource: self.id, mutation, reply: Some(reply) })?;
        let seq = reply_rx.await
            .map_err(|_| anyhow!("peer shut down before replying"))??;
        Ok(seq)
    }

    /// a consistent copy of the resource's current state
    pub async fn snapshot(&self) -> anyhow::Result<ResourceSnapshot> {
        let (reply, reply_rx) = oneshot::channel();
        send_command(&self.commands, PeerCommand::Snapshot { resource: self.id, reply })?;
        await_reply(reply_rx).await
    }

    /// removes the resource, sending UNSUBSCRIBE to every subscriber
    pub fn unpublish(self) -> anyhow::Result<()> {
        self.require_role(ResourceRole::Publisher)?;
        send_command(&self.commands, PeerCommand::Unpublish { resource: self.id })
    }

    /// removes the replica, sending UNSUBSCRIBE to the publisher
    pub fn unsubscribe(self) -> anyhow::Result<()> {
        self.require_role(ResourceRole::Subscriber)?;
        send_command(&self.commands, PeerCommand::Unsubscribe { resource: self.id })
    }

    /// Subscribes again at the original publisher address, presenting the replica's current seq
    ///  so that the publisher can backfill the missing deltas. This is the hook for a
    ///  reconnection policy after a transport failure.
    pub fn reconnect(&self) -> anyhow::Result<()> {
        self.require_role(ResourceRole::Subscriber)?;
        send_command(&self.commands, PeerCommand::Reconnect { resource: self.id })
    }
}
