use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

use crate::error::{ReplicationError, ReplicationResult};
use crate::util::buf::{put_bytes, try_get_bytes};
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// A single element of a replicated list. Records are opaque to the replication core, their
///  interpretation is up to the local adapter.
pub type Record = Bytes;

/// A change requested by the local adapter on a publisher-role resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mutation {
    Append(Record),
    Insert { index: u32, record: Record },
    Set { index: u32, record: Record },
    Remove { index: u32 },
    Clear,
    ReplaceAll(Vec<Record>),
}

/// Primitive list change. Applied in order, the changes of a [Delta] transform the list at
///  `seq - 1` into the list at `seq`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListChange {
    Insert { index: u32, record: Record },
    Update { index: u32, record: Record },
    Delete { index: u32 },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Delta {
    pub changes: Vec<ListChange>,
}

impl Mutation {
    /// Computes the delta representing this mutation, validating it against the current list.
    pub fn to_delta(&self, records: &[Record]) -> ReplicationResult<Delta> {
        let len = records.len();

        let changes = match self {
            Mutation::Append(record) => {
                vec![ListChange::Insert { index: len.prechecked_cast(), record: record.clone() }]
            }
            Mutation::Insert { index, record } => {
                if SafeCast::<usize>::safe_cast(*index) > len {
                    return Err(ReplicationError::InvalidMutation(format!("insert at {} into a list of length {}", index, len)));
                }
                vec![ListChange::Insert { index: *index, record: record.clone() }]
            }
            Mutation::Set { index, record } => {
                if SafeCast::<usize>::safe_cast(*index) >= len {
                    return Err(ReplicationError::InvalidMutation(format!("set at {} in a list of length {}", index, len)));
                }
                vec![ListChange::Update { index: *index, record: record.clone() }]
            }
            Mutation::Remove { index } => {
                if SafeCast::<usize>::safe_cast(*index) >= len {
                    return Err(ReplicationError::InvalidMutation(format!("remove at {} from a list of length {}", index, len)));
                }
                vec![ListChange::Delete { index: *index }]
            }
            Mutation::Clear => Self::delete_all(len),
            Mutation::ReplaceAll(new_records) => {
                let mut changes = Self::delete_all(len);
                for (i, record) in new_records.iter().enumerate() {
                    changes.push(ListChange::Insert { index: i.prechecked_cast(), record: record.clone() });
                }
                changes
            }
        };

        Ok(Delta { changes })
    }

    fn delete_all(len: usize) -> Vec<ListChange> {
        // deleting from the back keeps every intermediate index valid
        (0..len).rev()
            .map(|i| ListChange::Delete { index: i.prechecked_cast() })
            .collect()
    }
}


const KIND_INSERT: u8 = 1;
const KIND_UPDATE: u8 = 2;
const KIND_DELETE: u8 = 3;

impl Delta {
    pub fn new(changes: Vec<ListChange>) -> Delta {
        Delta { changes }
    }

    /// Checks that every change fits the list it will be applied to, tracking the list's length
    ///  through the sequence of changes.
    pub fn validate(&self, initial_len: usize) -> ReplicationResult<()> {
        let mut len = initial_len;
        for change in &self.changes {
            match change {
                ListChange::Insert { index, .. } => {
                    if SafeCast::<usize>::safe_cast(*index) > len {
                        return Err(ReplicationError::InvalidDelta(format!("insert at {} with length {}", index, len)));
                    }
                    len += 1;
                }
                ListChange::Update { index, .. } => {
                    if SafeCast::<usize>::safe_cast(*index) >= len {
                        return Err(ReplicationError::InvalidDelta(format!("update at {} with length {}", index, len)));
                    }
                }
                ListChange::Delete { index } => {
                    if SafeCast::<usize>::safe_cast(*index) >= len {
                        return Err(ReplicationError::InvalidDelta(format!("delete at {} with length {}", index, len)));
                    }
                    len -= 1;
                }
            }
        }
        Ok(())
    }

    /// Applies all changes or none of them: the list is left untouched if the delta does not fit.
    pub fn apply_to(&self, records: &mut Vec<Record>) -> ReplicationResult<()> {
        self.validate(records.len())?;

        for change in &self.changes {
            match change {
                ListChange::Insert { index, record } => records.insert(index.safe_cast(), record.clone()),
                ListChange::Update { index, record } => records[SafeCast::<usize>::safe_cast(*index)] = record.clone(),
                ListChange::Delete { index } => {
                    records.remove(index.safe_cast());
                }
            }
        }
        Ok(())
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_usize_varint(self.changes.len());
        for change in &self.changes {
            match change {
                ListChange::Insert { index, record } => {
                    buf.put_u8(KIND_INSERT);
                    buf.put_u32_varint(*index);
                    put_bytes(buf, record);
                }
                ListChange::Update { index, record } => {
                    buf.put_u8(KIND_UPDATE);
                    buf.put_u32_varint(*index);
                    put_bytes(buf, record);
                }
                ListChange::Delete { index } => {
                    buf.put_u8(KIND_DELETE);
                    buf.put_u32_varint(*index);
                }
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Delta> {
        let num_changes = buf.try_get_usize_varint()?;

        // every change needs at least two bytes, so a bogus count is rejected before allocating
        if num_changes > buf.remaining() / 2 {
            return Err(anyhow!("delta announces {} changes but only {} bytes remain", num_changes, buf.remaining()));
        }

        let mut changes = Vec::with_capacity(num_changes);
        for _ in 0..num_changes {
            let kind = buf.try_get_u8()?;
            let index = buf.try_get_u32_varint()?;
            let change = match kind {
                KIND_INSERT => ListChange::Insert { index, record: try_get_bytes(buf)? },
                KIND_UPDATE => ListChange::Update { index, record: try_get_bytes(buf)? },
                KIND_DELETE => ListChange::Delete { index },
                k => return Err(anyhow!("invalid list change discriminator {}", k)),
            };
            changes.push(change);
        }
        Ok(Delta { changes })
    }
}
