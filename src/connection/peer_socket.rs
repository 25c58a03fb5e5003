use std::io;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// The transport underneath a [crate::connection::connection::Connection].
///
/// Reads and writes are non-blocking and return [io::ErrorKind::WouldBlock] when the socket is
///  not ready. The readiness futures are awaited by watcher tasks off the reactor, and may
///  complete spuriously.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerSocket: Send + Sync + 'static {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    async fn readable(&self) -> io::Result<()>;

    async fn writable(&self) -> io::Result<()>;
}

#[async_trait]
impl PeerSocket for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    async fn readable(&self) -> io::Result<()> {
        TcpStream::readable(self).await
    }

    async fn writable(&self) -> io::Result<()> {
        TcpStream::writable(self).await
    }
}
