use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::resource::delta::{Delta, Record};
use crate::util::buf::{put_bytes, put_opt_u64, put_string, try_get_bytes, try_get_opt_u64, try_get_string};

#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DisconnectReason {
    Shutdown = 0,
    Requested = 1,
    ProtocolError = 2,
}

/// The messages exchanged between peers. Every message except DISCONNECT refers to a resource by
///  name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerMessage {
    /// announces a resource with its initial snapshot to a peer that asked for it before it existed
    Publish { name: String, records: Vec<Record> },
    /// requests a link; `known_seq` is the subscriber's current baseline, `None` asks for a snapshot
    Subscribe { name: String, known_seq: Option<u64> },
    Snapshot { name: String, seq: u64, records: Vec<Record> },
    Delta { name: String, seq: u64, delta: Delta },
    Unsubscribe { name: String },
    Disconnect { reason: DisconnectReason },
}

const ID_PUBLISH: u8 = 1;
const ID_SUBSCRIBE: u8 = 2;
const ID_SNAPSHOT: u8 = 3;
const ID_DELTA: u8 = 4;
const ID_UNSUBSCRIBE: u8 = 5;
const ID_DISCONNECT: u8 = 6;

impl PeerMessage {
    pub fn id(&self) -> u8 {
        match self {
            PeerMessage::Publish { .. } => ID_PUBLISH,
            PeerMessage::Subscribe { .. } => ID_SUBSCRIBE,
            PeerMessage::Snapshot { .. } => ID_SNAPSHOT,
            PeerMessage::Delta { .. } => ID_DELTA,
            PeerMessage::Unsubscribe { .. } => ID_UNSUBSCRIBE,
            PeerMessage::Disconnect { .. } => ID_DISCONNECT,
        }
    }

    /// the resource this message refers to, if any
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            PeerMessage::Publish { name, .. }
            | PeerMessage::Subscribe { name, .. }
            | PeerMessage::Snapshot { name, .. }
            | PeerMessage::Delta { name, .. }
            | PeerMessage::Unsubscribe { name } => Some(name),
            PeerMessage::Disconnect { .. } => None,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.id());
        match self {
            PeerMessage::Publish { name, records } => {
                put_string(buf, name);
                Self::ser_records(records, buf);
            }
            PeerMessage::Subscribe { name, known_seq } => {
                put_string(buf, name);
                put_opt_u64(buf, *known_seq);
            }
            PeerMessage::Snapshot { name, seq, records } => {
                put_string(buf, name);
                buf.put_u64(*seq);
                Self::ser_records(records, buf);
            }
            PeerMessage::Delta { name, seq, delta } => {
                put_string(buf, name);
                buf.put_u64(*seq);
                delta.ser(buf);
            }
            PeerMessage::Unsubscribe { name } => {
                put_string(buf, name);
            }
            PeerMessage::Disconnect { reason } => {
                buf.put_u8((*reason).into());
            }
        }
    }

    fn ser_records(records: &[Record], buf: &mut impl BufMut) {
        buf.put_usize_varint(records.len());
        for r in records {
            put_bytes(buf, r);
        }
    }

    fn try_deser_records(buf: &mut impl Buf) -> anyhow::Result<Vec<Record>> {
        let num_records = buf.try_get_usize_varint()?;
        // every record has at least a one-byte length prefix
        if num_records > buf.remaining() {
            bail!("{} records announced, but only {} bytes remain", num_records, buf.remaining());
        }

        let mut records = Vec::with_capacity(num_records);
        for _ in 0..num_records {
            records.push(try_get_bytes(buf)?);
        }
        Ok(records)
    }

    /// Deserializes a complete frame payload. Bytes left over after the message are an error.
    pub fn deser(buf: &[u8]) -> anyhow::Result<PeerMessage> {
        let mut buf = buf;
        let msg = match buf.try_get_u8()? {
            ID_PUBLISH => PeerMessage::Publish {
                name: try_get_string(&mut buf)?,
                records: Self::try_deser_records(&mut buf)?,
            },
            ID_SUBSCRIBE => PeerMessage::Subscribe {
                name: try_get_string(&mut buf)?,
                known_seq: try_get_opt_u64(&mut buf)?,
            },
            ID_SNAPSHOT => PeerMessage::Snapshot {
                name: try_get_string(&mut buf)?,
                seq: buf.try_get_u64()?,
                records: Self::try_deser_records(&mut buf)?,
            },
            ID_DELTA => PeerMessage::Delta {
                name: try_get_string(&mut buf)?,
                seq: buf.try_get_u64()?,
                delta: Delta::try_deser(&mut buf)?,
            },
            ID_UNSUBSCRIBE => PeerMessage::Unsubscribe {
                name: try_get_string(&mut buf)?,
            },
            ID_DISCONNECT => PeerMessage::Disconnect {
                reason: DisconnectReason::try_from(buf.try_get_u8()?)?,
            },
            id => return Err(anyhow!("invalid message discriminator {}", id)),
        };

        if buf.has_remaining() {
            bail!("{} trailing bytes after message", buf.remaining());
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use rstest::rstest;

    use super::*;
    use crate::resource::delta::ListChange;

    fn rec(s: &'static str) -> Record {
        Bytes::from_static(s.as_bytes())
    }

    #[rstest]
    #[case::publish(PeerMessage::Publish { name: "list".to_string(), records: vec![rec("A"), rec("")] })]
    #[case::publish_empty(PeerMessage::Publish { name: "".to_string(), records: vec![] })]
    #[case::subscribe_fresh(PeerMessage::Subscribe { name: "list".to_string(), known_seq: None })]
    #[case::subscribe_known(PeerMessage::Subscribe { name: "list".to_string(), known_seq: Some(17) })]
    #[case::snapshot(PeerMessage::Snapshot { name: "list".to_string(), seq: 10, records: vec![rec("A"), rec("B")] })]
    #[case::delta(PeerMessage::Delta { name: "list".to_string(), seq: 1, delta: Delta::new(vec![ListChange::Insert { index: 1, record: rec("B") }]) })]
    #[case::delta_empty(PeerMessage::Delta { name: "list".to_string(), seq: u64::MAX, delta: Delta::default() })]
    #[case::unsubscribe(PeerMessage::Unsubscribe { name: "list".to_string() })]
    #[case::disconnect(PeerMessage::Disconnect { reason: DisconnectReason::Requested })]
    fn test_ser_deser(#[case] msg: PeerMessage) {
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        assert_eq!(buf[0], msg.id());
        assert_eq!(PeerMessage::deser(&buf).unwrap(), msg);
    }

    #[test]
    fn test_ser_subscribe_layout() {
        let mut buf = BytesMut::new();
        PeerMessage::Subscribe { name: "ab".to_string(), known_seq: Some(258) }.ser(&mut buf);
        assert_eq!(&buf[..], b"\x02\x02ab\x01\0\0\0\0\0\0\x01\x02");
    }

    #[test]
    fn test_ser_snapshot_layout() {
        let mut buf = BytesMut::new();
        PeerMessage::Snapshot { name: "l".to_string(), seq: 3, records: vec![rec("A"), rec("BC")] }.ser(&mut buf);
        assert_eq!(&buf[..], b"\x03\x01l\0\0\0\0\0\0\0\x03\x02\x01A\x02BC");
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::unknown_tag(b"\x07")]
    #[case::truncated_name(b"\x05\x05ab")]
    #[case::truncated_seq(b"\x03\x01l\0\0\0")]
    #[case::invalid_known_seq_flag(b"\x02\x01l\x02")]
    #[case::invalid_reason(b"\x06\x09")]
    #[case::trailing_bytes(b"\x05\x01lx")]
    #[case::not_utf8(b"\x05\x02\xc3\x28")]
    #[case::bogus_record_count(b"\x01\x01l\xff\xff\x03")]
    fn test_deser_invalid(#[case] buf: &[u8]) {
        assert!(PeerMessage::deser(buf).is_err());
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(PeerMessage::Unsubscribe { name: "x".to_string() }.resource_name(), Some("x"));
        assert_eq!(PeerMessage::Disconnect { reason: DisconnectReason::Shutdown }.resource_name(), None);
    }
}
