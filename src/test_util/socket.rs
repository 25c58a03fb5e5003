use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::connection::peer_socket::PeerSocket;
use crate::protocol::frame_buffer::FrameBuffer;
use crate::protocol::messages::PeerMessage;

pub enum ScriptedRead {
    Data(Vec<u8>),
    WouldBlock,
    /// returned for every read from here on
    Eof,
    Error(io::ErrorKind),
}

/// An in-memory [PeerSocket] with scripted reads and write budgets, for testing connection
///  handling without a network. Readiness is always reported immediately.
///
/// Reads hand out the scripted chunks in order (a chunk larger than the read buffer is split),
///  and report 'would block' when the script is exhausted. Writes accept as many bytes as the
///  next scripted budget allows, a budget of 0 meaning 'would block'. Without a budget, writes
///  accept everything.
#[derive(Default)]
pub struct InMemorySocket {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    reads: VecDeque<ScriptedRead>,
    write_budgets: VecDeque<usize>,
    written: Vec<u8>,
}

impl InMemorySocket {
    pub fn new() -> InMemorySocket {
        Default::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn script_read(&self, read: ScriptedRead) {
        self.inner().reads.push_back(read);
    }

    pub fn script_write_budget(&self, budget: usize) {
        self.inner().write_budgets.push_back(budget);
    }

    /// everything that was written to the socket so far
    pub fn written(&self) -> Vec<u8> {
        self.inner().written.clone()
    }
}

#[async_trait]
impl PeerSocket for InMemorySocket {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner();
        match inner.reads.pop_front() {
            None | Some(ScriptedRead::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(ScriptedRead::Eof) => {
                inner.reads.push_front(ScriptedRead::Eof);
                Ok(0)
            }
            Some(ScriptedRead::Error(kind)) => Err(kind.into()),
            Some(ScriptedRead::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    inner.reads.push_front(ScriptedRead::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner();
        let n = match inner.write_budgets.pop_front() {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        inner.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    async fn readable(&self) -> io::Result<()> {
        Ok(())
    }

    async fn writable(&self) -> io::Result<()> {
        Ok(())
    }
}

/// the bytes of the given messages as they appear on the wire
pub fn encode_frames(msgs: &[PeerMessage]) -> Vec<u8> {
    let mut buf = FrameBuffer::new(u32::MAX);
    for msg in msgs {
        if let Err(e) = buf.write_frame(msg) {
            panic!("test message can not be encoded: {}", e);
        }
    }
    buf.drainable().to_vec()
}
