use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::connection::connection::ConnectionId;
use crate::connection::peer_socket::PeerSocket;

/// Socket readiness, reported to the reactor which then performs the actual non-blocking I/O
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Readiness {
    Readable(ConnectionId),
    Writable(ConnectionId),
}

/// Two tasks per connection that wait for socket readiness and report it to the reactor.
///
/// Each report is followed by a pause until the reactor re-arms the watcher: the read watcher
///  after the reactor drained the socket, the write watcher when there are buffered bytes that
///  the socket did not accept. [Notify] stores a permit, so re-arming before the watcher waits
///  is not lost.
///
/// Dropping the watchers aborts both tasks.
pub struct ReadinessWatchers {
    read_rearm: Arc<Notify>,
    write_wanted: Arc<Notify>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl ReadinessWatchers {
    pub fn spawn(connection: ConnectionId, socket: Arc<dyn PeerSocket>, events: mpsc::Sender<Readiness>) -> ReadinessWatchers {
        let read_rearm = Arc::new(Notify::new());
        let write_wanted = Arc::new(Notify::new());

        let read_task = tokio::spawn(watch_readable(connection, socket.clone(), events.clone(), read_rearm.clone()));
        let write_task = tokio::spawn(watch_writable(connection, socket, events, write_wanted.clone()));

        ReadinessWatchers {
            read_rearm,
            write_wanted,
            read_task,
            write_task,
        }
    }

    /// the reactor read until 'would block'
    pub fn rearm_read(&self) {
        self.read_rearm.notify_one();
    }

    /// there are outgoing bytes waiting for the socket to become writable
    pub fn want_write(&self) {
        self.write_wanted.notify_one();
    }
}

impl Drop for ReadinessWatchers {
    fn drop(&mut self) {
        self.read_task.abort();
        self.write_task.abort();
    }
}

async fn watch_readable(connection: ConnectionId, socket: Arc<dyn PeerSocket>, events: mpsc::Sender<Readiness>, rearm: Arc<Notify>) {
    loop {
        // errors surface when the reactor reads from the socket
        if let Err(e) = socket.readable().await {
            trace!("{:?}: readiness error {}", connection, e);
        }
        if events.send(Readiness::Readable(connection)).await.is_err() {
            break;
        }
        rearm.notified().await;
    }
}

async fn watch_writable(connection: ConnectionId, socket: Arc<dyn PeerSocket>, events: mpsc::Sender<Readiness>, write_wanted: Arc<Notify>) {
    loop {
        write_wanted.notified().await;
        if let Err(e) = socket.writable().await {
            trace!("{:?}: readiness error {}", connection, e);
        }
        if events.send(Readiness::Writable(connection)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::test_util::socket::InMemorySocket;

    #[tokio::test]
    async fn test_read_watcher_waits_for_rearm() {
        let socket = Arc::new(InMemorySocket::new());
        let (tx, mut rx) = mpsc::channel(16);
        let watchers = ReadinessWatchers::spawn(ConnectionId(3), socket, tx);

        assert_eq!(rx.recv().await, Some(Readiness::Readable(ConnectionId(3))));
        assert!(timeout(Duration::from_millis(20), rx.recv()).await.is_err());

        watchers.rearm_read();
        assert_eq!(rx.recv().await, Some(Readiness::Readable(ConnectionId(3))));
    }

    #[tokio::test]
    async fn test_write_watcher_reports_when_wanted() {
        let socket = Arc::new(InMemorySocket::new());
        let (tx, mut rx) = mpsc::channel(16);
        let watchers = ReadinessWatchers::spawn(ConnectionId(1), socket, tx);
        assert_eq!(rx.recv().await, Some(Readiness::Readable(ConnectionId(1))));

        watchers.want_write();
        assert_eq!(rx.recv().await, Some(Readiness::Writable(ConnectionId(1))));
        assert!(timeout(Duration::from_millis(20), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_stops_watchers() {
        let socket = Arc::new(InMemorySocket::new());
        let (tx, mut rx) = mpsc::channel(16);
        let watchers = ReadinessWatchers::spawn(ConnectionId(1), socket, tx);
        assert_eq!(rx.recv().await, Some(Readiness::Readable(ConnectionId(1))));

        drop(watchers);
        // the aborted tasks drop their senders, closing the channel
        assert_eq!(rx.recv().await, None);
    }
}
