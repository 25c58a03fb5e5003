use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::messages::PeerMessage;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// Byte buffer for one direction of a connection.
///
/// Inbound, it accumulates partial reads and hands out a message only once its complete
///  length-prefixed frame is buffered. Outbound, it accumulates encoded frames until the socket
///  accepts them. A frame is `[u32 BE payload length][payload]`.
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_len: u32,
}

impl FrameBuffer {
    pub fn new(max_frame_len: u32) -> FrameBuffer {
        FrameBuffer {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decodes the next message if its frame is completely buffered. Partial frames are left in
    ///  place, so this can be called again after the next [FrameBuffer::append].
    ///
    /// A length prefix above the limit fails before the payload arrives: the connection is
    ///  compromised and must be closed anyway.
    pub fn try_read_frame(&mut self) -> ReplicationResult<Option<PeerMessage>> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_buf = [0u8; LEN_PREFIX];
        len_buf.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let payload_len = u32::from_be_bytes(len_buf);

        if payload_len > self.max_frame_len {
            return Err(ReplicationError::FrameTooLarge { len: SafeCast::<usize>::safe_cast(payload_len), max: self.max_frame_len });
        }

        let frame_len = LEN_PREFIX + SafeCast::<usize>::safe_cast(payload_len);
        if self.buf.len() < frame_len {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(frame_len);
        frame.advance(LEN_PREFIX);

        PeerMessage::deser(&frame)
            .map(Some)
            .map_err(ReplicationError::ProtocolDecode)
    }

    /// Encodes a message as a frame at the end of the buffer. A message exceeding the frame limit
    ///  is rejected and leaves the buffer unchanged.
    pub fn write_frame(&mut self, msg: &PeerMessage) -> ReplicationResult<()> {
        let start = self.buf.len();
        self.buf.put_u32(0);
        msg.ser(&mut self.buf);

        let payload_len = self.buf.len() - start - LEN_PREFIX;
        if payload_len > SafeCast::<usize>::safe_cast(self.max_frame_len) {
            self.buf.truncate(start);
            return Err(ReplicationError::FrameTooLarge { len: payload_len, max: self.max_frame_len });
        }

        let prefix: u32 = payload_len.prechecked_cast();
        self.buf[start..start + LEN_PREFIX].copy_from_slice(&prefix.to_be_bytes());
        Ok(())
    }

    /// the buffered bytes that are ready to be handed to the transport
    pub fn drainable(&self) -> &[u8] {
        &self.buf
    }

    /// discards the first `n` bytes after the transport accepted them
    pub fn confirm_sent(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::protocol::messages::DisconnectReason;
    use crate::resource::delta::{Delta, ListChange};

    fn messages() -> Vec<PeerMessage> {
        vec![
            PeerMessage::Subscribe { name: "list".to_string(), known_seq: None },
            PeerMessage::Snapshot { name: "list".to_string(), seq: 0, records: vec![Bytes::from_static(b"A")] },
            PeerMessage::Delta {
                name: "list".to_string(),
                seq: 1,
                delta: Delta::new(vec![ListChange::Insert { index: 1, record: Bytes::from_static(b"B") }]),
            },
            PeerMessage::Disconnect { reason: DisconnectReason::Shutdown },
        ]
    }

    fn encoded(msgs: &[PeerMessage]) -> Vec<u8> {
        let mut buf = FrameBuffer::new(1024);
        for msg in msgs {
            buf.write_frame(msg).unwrap();
        }
        buf.drainable().to_vec()
    }

    fn read_all(buf: &mut FrameBuffer) -> Vec<PeerMessage> {
        let mut result = vec![];
        while let Some(msg) = buf.try_read_frame().unwrap() {
            result.push(msg);
        }
        result
    }

    #[test]
    fn test_write_frame_layout() {
        let bytes = encoded(&[PeerMessage::Unsubscribe { name: "ab".to_string() }]);
        assert_eq!(bytes, b"\0\0\0\x04\x05\x02ab");
    }

    #[rstest]
    #[case::whole(usize::MAX)]
    #[case::single_bytes(1)]
    #[case::two_bytes(2)]
    #[case::three_bytes(3)]
    #[case::seven_bytes(7)]
    fn test_split_into_chunks(#[case] chunk_size: usize) {
        let msgs = messages();
        let bytes = encoded(&msgs);

        let mut buf = FrameBuffer::new(1024);
        let mut decoded = vec![];
        for chunk in bytes.chunks(chunk_size.min(bytes.len())) {
            buf.append(chunk);
            decoded.extend(read_all(&mut buf));
        }

        assert_eq!(decoded, msgs);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_not_consumed() {
        let bytes = encoded(&messages()[..1]);

        let mut buf = FrameBuffer::new(1024);
        buf.append(&bytes[..bytes.len() - 1]);
        assert_eq!(buf.try_read_frame().unwrap(), None);
        assert_eq!(buf.len(), bytes.len() - 1);

        buf.append(&bytes[bytes.len() - 1..]);
        assert_eq!(buf.try_read_frame().unwrap(), Some(messages()[0].clone()));
    }

    #[test]
    fn test_read_oversized_prefix() {
        let mut buf = FrameBuffer::new(16);
        buf.append(&17u32.to_be_bytes());
        assert!(matches!(buf.try_read_frame(), Err(ReplicationError::FrameTooLarge { len: 17, max: 16 })));
    }

    #[test]
    fn test_write_oversized_leaves_buffer_unchanged() {
        let mut buf = FrameBuffer::new(16);
        buf.write_frame(&PeerMessage::Unsubscribe { name: "a".to_string() }).unwrap();
        let before = buf.drainable().to_vec();

        let result = buf.write_frame(&PeerMessage::Unsubscribe { name: "a".repeat(100) });
        assert!(matches!(result, Err(ReplicationError::FrameTooLarge { max: 16, .. })));
        assert_eq!(buf.drainable(), &before[..]);
    }

    #[test]
    fn test_malformed_payload() {
        let mut buf = FrameBuffer::new(16);
        buf.append(b"\0\0\0\x02\x09\x00");
        assert!(matches!(buf.try_read_frame(), Err(ReplicationError::ProtocolDecode(_))));
    }

    #[test]
    fn test_confirm_sent() {
        let mut buf = FrameBuffer::new(1024);
        buf.write_frame(&PeerMessage::Unsubscribe { name: "ab".to_string() }).unwrap();
        buf.confirm_sent(3);
        assert_eq!(buf.drainable(), b"\x04\x05\x02ab");
        buf.confirm_sent(5);
        assert!(buf.is_empty());
    }
}
